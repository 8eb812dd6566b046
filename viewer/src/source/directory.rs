use image::{ImageReader, RgbaImage};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::SourceError;
use crate::cancel::CancellationToken;

/// One decoded directory entry.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Position of the entry in the directory listing.
    pub index: usize,
    pub path: PathBuf,
    pub image: RgbaImage,
}

/// A directory of still images, listed in file-name order up front and
/// decoded in the background.
pub struct DirectorySequenceSource {
    path: String,
    entries: Vec<PathBuf>,
}

impl DirectorySequenceSource {
    pub fn open(dir: &Path) -> Result<Self, SourceError> {
        let path = dir.display().to_string();
        let mut entries = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| SourceError::List {
                path: path.clone(),
                source: e,
            })?;
            if entry.file_type().is_file() {
                entries.push(entry.into_path());
            }
        }
        info!(path, entries = entries.len(), "listed image directory");
        Ok(Self { path, entries })
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    /// Start the decoder task.
    ///
    /// Decoded images arrive on the returned queue in listing order. The
    /// task blocks once `capacity` images are waiting, and closes the queue
    /// when the listing is exhausted or `cancel` fires. Entries that fail to
    /// decode are logged and skipped. The handle yields the number of
    /// images sent.
    pub fn spawn_decoder(
        self,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<DecodedFrame>, JoinHandle<usize>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(run_decoder(self.path, self.entries, tx, cancel));
        (rx, handle)
    }
}

async fn run_decoder(
    dir: String,
    entries: Vec<PathBuf>,
    tx: mpsc::Sender<DecodedFrame>,
    cancel: CancellationToken,
) -> usize {
    let total = entries.len();
    let mut sent = 0;

    for (index, path) in entries.into_iter().enumerate() {
        if cancel.is_cancelled() {
            debug!(index, "decoder cancelled");
            break;
        }

        let decode_path = path.clone();
        let image = match tokio::task::spawn_blocking(move || decode(&decode_path)).await {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => {
                warn!(path = %path.display(), error = %e, "failed to decode image, skipping");
                continue;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "decode task failed, skipping");
                continue;
            }
        };

        debug!(index, path = %path.display(), "decoded image");
        let frame = DecodedFrame { index, path, image };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(index, "decoder cancelled while queue was full");
                break;
            }
            res = tx.send(frame) => {
                if res.is_err() {
                    debug!("filter stage dropped its queue, stopping decoder");
                    break;
                }
            }
        }
        sent += 1;
    }

    info!(dir, sent, total, "decoder finished");
    sent
}

fn decode(path: &Path) -> image::ImageResult<RgbaImage> {
    let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    Ok(img.to_rgba8())
}
