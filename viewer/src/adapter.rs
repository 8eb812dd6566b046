use image::RgbaImage;
use tracing::debug;

use crate::source::{Extent, FrameSource, SourceError};

/// What the viewer gets back for a request.
#[derive(Debug)]
pub struct ViewResponse {
    /// Index actually served, after wraparound.
    pub index: usize,
    pub images: Vec<RgbaImage>,
}

#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("{0} source has no frames to show")]
    Empty(String),
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Map a requested index onto a source's valid range.
///
/// Fixed sources wrap: past the end goes to the first frame, negative goes
/// to the last. Open-ended (live) sources never wrap forward; a negative
/// index goes to the highest frame read so far. `None` for an empty fixed
/// source.
pub fn wrap_index(requested: i64, extent: Extent) -> Option<usize> {
    match extent {
        Extent::Fixed(0) => None,
        Extent::Fixed(count) => {
            let index = match usize::try_from(requested) {
                Err(_) => count - 1,
                Ok(i) if i >= count => 0,
                Ok(i) => i,
            };
            Some(index)
        }
        Extent::Open { highest } => {
            let index = match usize::try_from(requested) {
                Err(_) if requested < 0 => highest.unwrap_or(0),
                Err(_) => usize::MAX,
                Ok(i) => i,
            };
            Some(index)
        }
    }
}

/// The single pull contract every source is exposed through.
///
/// Does no I/O itself: it normalizes the index and dispatches to the source.
pub struct IndexedViewer {
    source: Box<dyn FrameSource>,
}

impl IndexedViewer {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self { source }
    }

    pub fn extent(&self) -> Extent {
        self.source.extent()
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn request(&mut self, requested: i64) -> Result<ViewResponse, ViewError> {
        let extent = self.source.extent();
        let index = wrap_index(requested, extent)
            .ok_or_else(|| ViewError::Empty(self.source.name().to_string()))?;
        debug!(requested, index, ?extent, source = self.source.name(), "view request");
        let images = self.source.images(index)?;
        Ok(ViewResponse { index, images })
    }
}
