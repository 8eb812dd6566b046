use image::{imageops, GrayImage, RgbaImage};
use rawview_common::rect::Rect;
use tracing::debug;

use super::traits::{Tracker, TrackerError};

/// Block-difference motion tracker.
///
/// Compares each frame's luma against the previous frame's in square blocks
/// of `block_size` pixels. A block has moved when the summed absolute luma
/// difference over its pixels exceeds the threshold. Neighbouring moved
/// blocks (8-connected) are merged into one bounding rectangle.
///
/// The first frame, and any frame whose size differs from its predecessor,
/// only establishes a baseline and reports no motion.
pub struct DeltaTracker {
    block_size: u32,
    last_luma: Option<GrayImage>,
}

impl DeltaTracker {
    pub fn new(block_size: u32) -> Self {
        Self {
            block_size: block_size.max(1),
            last_luma: None,
        }
    }

    /// Per-block "moved" map in row-major order, plus its column/row counts.
    fn moved_blocks(
        &self,
        prev: &GrayImage,
        cur: &GrayImage,
        threshold: u32,
    ) -> (u32, u32, Vec<bool>) {
        let (width, height) = cur.dimensions();
        let bs = self.block_size;
        let cols = width.div_ceil(bs);
        let rows = height.div_ceil(bs);

        let mut map = vec![false; (cols * rows) as usize];
        for by in 0..rows {
            for bx in 0..cols {
                let mut sum: u64 = 0;
                for y in by * bs..((by + 1) * bs).min(height) {
                    for x in bx * bs..((bx + 1) * bs).min(width) {
                        let a = prev.get_pixel(x, y).0[0];
                        let b = cur.get_pixel(x, y).0[0];
                        sum += a.abs_diff(b) as u64;
                    }
                }
                map[(by * cols + bx) as usize] = sum > threshold as u64;
            }
        }
        (cols, rows, map)
    }

    /// Flood-fill moved blocks into bounding rectangles, in row-major discovery order.
    fn group(
        &self,
        cols: u32,
        rows: u32,
        mut map: Vec<bool>,
        width: u32,
        height: u32,
    ) -> Vec<Rect> {
        let bs = self.block_size;
        let mut rects = Vec::new();

        for y in 0..rows {
            for x in 0..cols {
                if !map[(y * cols + x) as usize] {
                    continue;
                }
                map[(y * cols + x) as usize] = false;
                let (mut min_c, mut min_r, mut max_c, mut max_r) = (x, y, x, y);
                let mut to_fill = vec![(x, y)];

                while let Some((cx, cy)) = to_fill.pop() {
                    min_c = min_c.min(cx);
                    min_r = min_r.min(cy);
                    max_c = max_c.max(cx);
                    max_r = max_r.max(cy);

                    for ny in cy.saturating_sub(1)..=(cy + 1).min(rows - 1) {
                        for nx in cx.saturating_sub(1)..=(cx + 1).min(cols - 1) {
                            let i = (ny * cols + nx) as usize;
                            if map[i] {
                                map[i] = false;
                                to_fill.push((nx, ny));
                            }
                        }
                    }
                }

                rects.push(Rect::new(
                    min_c * bs,
                    min_r * bs,
                    ((max_c + 1) * bs).min(width),
                    ((max_r + 1) * bs).min(height),
                ));
            }
        }
        rects
    }
}

impl Tracker for DeltaTracker {
    fn detect(&mut self, frame: &RgbaImage, threshold: u32) -> Result<Vec<Rect>, TrackerError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(TrackerError::Failed {
                tracker: self.name().to_string(),
                reason: "empty frame".into(),
            });
        }
        let luma = imageops::grayscale(frame);

        let Some(prev) = self.last_luma.take() else {
            debug!("first frame, establishing baseline");
            self.last_luma = Some(luma);
            return Ok(Vec::new());
        };

        if prev.dimensions() != luma.dimensions() {
            debug!(
                previous = ?prev.dimensions(),
                current = ?luma.dimensions(),
                "frame size changed, resetting baseline"
            );
            self.last_luma = Some(luma);
            return Ok(Vec::new());
        }

        let (width, height) = luma.dimensions();
        let (cols, rows, map) = self.moved_blocks(&prev, &luma, threshold);
        let rects = self.group(cols, rows, map, width, height);
        debug!(rects = rects.len(), threshold, "delta comparison");

        self.last_luma = Some(luma);
        Ok(rects)
    }

    fn name(&self) -> &str {
        "delta"
    }
}
