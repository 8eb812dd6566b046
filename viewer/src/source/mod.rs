pub mod device;
pub mod directory;
pub mod mapped;

use image::RgbaImage;
use rawview_common::frame::FrameError;
use std::fs::Metadata;

/// How many frames a source can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extent {
    /// Frame count is known and will not change.
    Fixed(usize),
    /// Live stream with no known end. `highest` is the highest index read
    /// successfully so far.
    Open { highest: Option<usize> },
}

/// Index-addressed retrieval of displayable images.
///
/// Implementations own their backing storage. `index` is always already
/// normalized by the caller (see `adapter::IndexedViewer`).
pub trait FrameSource: Send {
    fn extent(&self) -> Extent;

    /// Images to display for `index`: one frame, or an (original, overlay) pair.
    fn images(&mut self, index: usize) -> Result<Vec<RgbaImage>, SourceError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Which kind of source an input path calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Directory,
    RegularFile,
    /// Character/block devices, pipes and anything else that is not a plain file.
    Device,
}

impl InputKind {
    pub fn classify(metadata: &Metadata) -> Self {
        if metadata.is_dir() {
            InputKind::Directory
        } else if metadata.is_file() {
            InputKind::RegularFile
        } else {
            InputKind::Device
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to map {path}: {source}")]
    Map {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to list directory {path}: {source}")]
    List {
        path: String,
        source: walkdir::Error,
    },
    #[error("seek to frame {index} failed: {source}")]
    Seek {
        index: usize,
        source: std::io::Error,
    },
    #[error("read of frame {index} failed: {source}")]
    Read {
        index: usize,
        source: std::io::Error,
    },
    #[error("frame {index} is not available ({count} frames)")]
    Missing { index: usize, count: usize },
    #[error(transparent)]
    Frame(#[from] FrameError),
}
