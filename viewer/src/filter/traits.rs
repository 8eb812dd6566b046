use image::RgbaImage;
use rawview_common::rect::Rect;

/// Motion-tracker interface used by the filter stage.
///
/// Implementations see every frame in order and report the regions that
/// changed significantly. `threshold` is the minimum aggregate pixel delta
/// that counts as motion; how it is aggregated is up to the tracker.
pub trait Tracker: Send {
    /// Returns the changed regions of `frame`, empty if nothing moved.
    fn detect(&mut self, frame: &RgbaImage, threshold: u32) -> Result<Vec<Rect>, TrackerError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("tracker {tracker} failed: {reason}")]
    Failed { tracker: String, reason: String },
}
