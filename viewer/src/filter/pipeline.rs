use image::RgbaImage;
use rawview_common::config::FilterConfig;
use rawview_common::rect::{sort_by_area_desc, Rect};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::overlay;
use super::traits::{Tracker, TrackerError};
use crate::cancel::CancellationToken;
use crate::source::directory::{DecodedFrame, DirectorySequenceSource};
use crate::source::{Extent, FrameSource, SourceError};

/// A frame the tracker found motion in, with its overlay.
#[derive(Debug, Clone)]
pub struct FilteredFrame {
    /// Position of the source image in the directory listing.
    pub index: usize,
    pub path: PathBuf,
    /// Detected regions, largest first.
    pub rects: Vec<Rect>,
    pub original: RgbaImage,
    pub overlay: RgbaImage,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub delta_threshold: u32,
    pub queue_capacity: usize,
}

impl From<&FilterConfig> for PipelineConfig {
    fn from(config: &FilterConfig) -> Self {
        Self {
            delta_threshold: config.delta_threshold,
            queue_capacity: config.queue_capacity,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub seen: u64,
    pub kept: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("tracker failed on frame {index}: {source}")]
    Tracker { index: usize, source: TrackerError },
    #[error("pipeline task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Filter stage of the directory pipeline.
///
/// Pulls decoded frames off the input queue, asks the tracker for motion,
/// and forwards `(original, overlay)` for frames that moved. Frames without
/// motion are dropped. Output order matches input order and the output
/// queue is bounded, so the stage blocks when the consumer falls behind.
pub struct MotionFilterPipeline {
    output: mpsc::Receiver<FilteredFrame>,
    filter: JoinHandle<Result<FilterStats, PipelineError>>,
    decoder: Option<JoinHandle<usize>>,
    cancel: CancellationToken,
}

impl MotionFilterPipeline {
    /// Start the filter stage over an existing queue of decoded frames.
    pub fn spawn<T: Tracker + 'static>(
        input: mpsc::Receiver<DecodedFrame>,
        tracker: T,
        config: &PipelineConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, output) = mpsc::channel(config.queue_capacity);
        let filter = tokio::spawn(run_filter(
            input,
            tx,
            Box::new(tracker),
            config.delta_threshold,
            cancel.clone(),
        ));
        Self {
            output,
            filter,
            decoder: None,
            cancel,
        }
    }

    /// Start both the decoder and the filter stage for an image directory.
    pub fn from_directory<T: Tracker + 'static>(
        source: DirectorySequenceSource,
        tracker: T,
        config: &PipelineConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (input, decoder) = source.spawn_decoder(config.queue_capacity, cancel.clone());
        let mut pipeline = Self::spawn(input, tracker, config, cancel);
        pipeline.decoder = Some(decoder);
        pipeline
    }

    /// Next filtered frame, or `None` once the pipeline is finished or cancelled.
    pub async fn next(&mut self) -> Option<FilteredFrame> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            frame = self.output.recv() => frame,
        }
    }

    /// Drain every filtered frame into a buffer, then wait for the stages to exit.
    pub async fn drain(mut self) -> Result<FilteredBuffer, PipelineError> {
        let mut buffer = FilteredBuffer::default();
        while let Some(frame) = self.next().await {
            debug!(
                index = frame.index,
                path = %frame.path.display(),
                rects = frame.rects.len(),
                "buffered filtered frame"
            );
            buffer.push(frame);
        }
        // Unblock the filter stage if we stopped early.
        drop(self.output);

        let stats = self.filter.await??;
        if let Some(decoder) = self.decoder {
            let decoded = decoder.await?;
            debug!(decoded, "decoder stage joined");
        }
        info!(
            seen = stats.seen,
            kept = stats.kept,
            buffered = buffer.len(),
            "motion filter finished"
        );
        Ok(buffer)
    }
}

async fn run_filter(
    mut input: mpsc::Receiver<DecodedFrame>,
    tx: mpsc::Sender<FilteredFrame>,
    mut tracker: Box<dyn Tracker>,
    threshold: u32,
    cancel: CancellationToken,
) -> Result<FilterStats, PipelineError> {
    let mut stats = FilterStats::default();
    info!(tracker = tracker.name(), threshold, "motion filter started");

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("filter cancelled");
                break;
            }
            frame = input.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        stats.seen += 1;
        let index = frame.index;

        // Tracking and compositing are CPU-bound; run them off the async workers.
        let (returned, frame, result) = tokio::task::spawn_blocking(move || {
            let result = detect_and_composite(tracker.as_mut(), &frame.image, threshold);
            (tracker, frame, result)
        })
        .await?;
        tracker = returned;

        let (rects, overlay) = match result {
            Ok(Some(found)) => found,
            Ok(None) => {
                debug!(index, "no motion, dropping frame");
                continue;
            }
            Err(e) => {
                error!(index, error = %e, "tracker failed");
                return Err(PipelineError::Tracker { index, source: e });
            }
        };

        debug!(index, rects = rects.len(), "motion detected");
        let filtered = FilteredFrame {
            index,
            path: frame.path,
            rects,
            original: frame.image,
            overlay,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(index, "filter cancelled while queue was full");
                break;
            }
            res = tx.send(filtered) => {
                if res.is_err() {
                    debug!("consumer dropped its queue, stopping filter");
                    break;
                }
            }
        }
        stats.kept += 1;
    }

    info!(seen = stats.seen, kept = stats.kept, "motion filter stage finished");
    Ok(stats)
}

/// Run the tracker on one frame. `Ok(None)` means no motion.
fn detect_and_composite(
    tracker: &mut dyn Tracker,
    image: &RgbaImage,
    threshold: u32,
) -> Result<Option<(Vec<Rect>, RgbaImage)>, TrackerError> {
    let mut rects = tracker.detect(image, threshold)?;
    if rects.is_empty() {
        return Ok(None);
    }
    sort_by_area_desc(&mut rects);
    let overlay = overlay::composite(image, &rects);
    Ok(Some((rects, overlay)))
}

/// Append-only buffer of filtered frames, in source order.
#[derive(Debug, Default)]
pub struct FilteredBuffer {
    frames: Vec<FilteredFrame>,
}

impl FilteredBuffer {
    pub fn push(&mut self, frame: FilteredFrame) {
        self.frames.push(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, index: usize) -> Option<&FilteredFrame> {
        self.frames.get(index)
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &FilteredFrame> {
        self.frames.iter()
    }
}

impl FrameSource for FilteredBuffer {
    fn extent(&self) -> Extent {
        Extent::Fixed(self.frames.len())
    }

    fn images(&mut self, index: usize) -> Result<Vec<RgbaImage>, SourceError> {
        let frame = self.frames.get(index).ok_or(SourceError::Missing {
            index,
            count: self.frames.len(),
        })?;
        Ok(vec![frame.original.clone(), frame.overlay.clone()])
    }

    fn name(&self) -> &str {
        "filtered"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Tracker that reports motion for frames whose red channel at (0, 0)
    /// is in `moving`. Frames are tagged with their index that way.
    struct ScriptedTracker {
        moving: HashSet<u8>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedTracker {
        fn new(moving: &[u8]) -> Self {
            Self {
                moving: moving.iter().copied().collect(),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Tracker for ScriptedTracker {
        fn detect(&mut self, frame: &RgbaImage, _threshold: u32) -> Result<Vec<Rect>, TrackerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let tag = frame.get_pixel(0, 0).0[0];
            if self.moving.contains(&tag) {
                Ok(vec![Rect::new(0, 0, 1, 1), Rect::new(1, 1, 4, 4)])
            } else {
                Ok(Vec::new())
            }
        }
    }

    struct FailingTracker;

    impl Tracker for FailingTracker {
        fn detect(&mut self, _frame: &RgbaImage, _threshold: u32) -> Result<Vec<Rect>, TrackerError> {
            Err(TrackerError::Failed {
                tracker: "failing".into(),
                reason: "model not loaded".into(),
            })
        }
    }

    fn tagged(index: u8) -> DecodedFrame {
        DecodedFrame {
            index: index as usize,
            path: PathBuf::from(format!("{index}.png")),
            image: RgbaImage::from_pixel(4, 4, Rgba([index, 0, 0, 255])),
        }
    }

    fn config(capacity: usize) -> PipelineConfig {
        PipelineConfig {
            delta_threshold: 2208,
            queue_capacity: capacity,
        }
    }

    fn feed(count: u8, capacity: usize) -> (mpsc::Receiver<DecodedFrame>, Arc<AtomicUsize>) {
        let (tx, rx) = mpsc::channel(capacity);
        let sent = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&sent);
        tokio::spawn(async move {
            for i in 0..count {
                if tx.send(tagged(i)).await.is_err() {
                    break;
                }
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        (rx, sent)
    }

    #[tokio::test]
    async fn keeps_only_moving_frames_in_order() {
        let (input, _) = feed(10, 100);
        let tracker = ScriptedTracker::new(&[2, 3, 7, 9]);
        let calls = Arc::clone(&tracker.calls);
        let pipeline =
            MotionFilterPipeline::spawn(input, tracker, &config(100), CancellationToken::new());

        let buffer = pipeline.drain().await.unwrap();
        let indices: Vec<usize> = buffer.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![2, 3, 7, 9]);
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn rects_are_sorted_largest_first() {
        let (input, _) = feed(1, 4);
        let pipeline = MotionFilterPipeline::spawn(
            input,
            ScriptedTracker::new(&[0]),
            &config(4),
            CancellationToken::new(),
        );
        let buffer = pipeline.drain().await.unwrap();
        let frame = buffer.get(0).unwrap();
        assert_eq!(frame.rects, vec![Rect::new(1, 1, 4, 4), Rect::new(0, 0, 1, 1)]);
        assert_eq!(frame.overlay, overlay::composite(&frame.original, &frame.rects));
    }

    #[tokio::test]
    async fn no_motion_yields_empty_buffer() {
        let (input, _) = feed(5, 4);
        let pipeline = MotionFilterPipeline::spawn(
            input,
            ScriptedTracker::new(&[]),
            &config(4),
            CancellationToken::new(),
        );
        assert!(pipeline.drain().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tracker_failure_is_fatal() {
        let (input, _) = feed(3, 4);
        let pipeline =
            MotionFilterPipeline::spawn(input, FailingTracker, &config(4), CancellationToken::new());
        let err = pipeline.drain().await.unwrap_err();
        assert!(matches!(err, PipelineError::Tracker { index: 0, .. }));
    }

    #[tokio::test]
    async fn full_queues_apply_backpressure() {
        let (input, sent) = feed(50, 1);
        let mut pipeline = MotionFilterPipeline::spawn(
            input,
            ScriptedTracker::new(&(0..50).collect::<Vec<u8>>()),
            &config(1),
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        // One waiting in each queue plus one held by the filter stage.
        assert!(sent.load(Ordering::SeqCst) <= 4);

        let mut received = 0;
        while pipeline.next().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 50);
    }

    #[tokio::test]
    async fn cancel_stops_blocked_pipeline() {
        let (input, _) = feed(50, 1);
        let cancel = CancellationToken::new();
        let mut pipeline = MotionFilterPipeline::spawn(
            input,
            ScriptedTracker::new(&(0..50).collect::<Vec<u8>>()),
            &config(1),
            cancel.clone(),
        );
        let first = pipeline.next().await.unwrap();
        assert_eq!(first.index, 0);

        cancel.cancel();
        assert!(pipeline.next().await.is_none());
        let buffer = tokio::time::timeout(Duration::from_secs(5), pipeline.drain())
            .await
            .unwrap()
            .unwrap();
        assert!(buffer.is_empty());
    }

    fn write_tagged_png(dir: &Path, name: &str, tag: u8) {
        RgbaImage::from_pixel(4, 4, Rgba([tag, 0, 0, 255]))
            .save(dir.join(name))
            .unwrap();
    }

    #[tokio::test]
    async fn directory_of_five_keeps_positions_one_and_three() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5u8 {
            write_tagged_png(dir.path(), &format!("frame_{i:02}.png"), i);
        }
        let source = DirectorySequenceSource::open(dir.path()).unwrap();
        let pipeline = MotionFilterPipeline::from_directory(
            source,
            ScriptedTracker::new(&[1, 3]),
            &config(100),
            CancellationToken::new(),
        );

        let mut buffer = pipeline.drain().await.unwrap();
        assert_eq!(buffer.len(), 2);
        let indices: Vec<usize> = buffer.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![1, 3]);
        assert!(buffer.get(0).unwrap().path.ends_with("frame_01.png"));

        let images = buffer.images(1).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].get_pixel(0, 0).0[0], 3);
        assert!(matches!(
            buffer.images(2),
            Err(SourceError::Missing { index: 2, count: 2 })
        ));
    }
}
