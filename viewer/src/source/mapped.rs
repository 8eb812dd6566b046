use image::RgbaImage;
use memmap2::Mmap;
use rawview_common::frame::{FrameError, FrameFormat, RawFrame};
use std::fs::File;
use std::path::Path;
use tracing::{debug, info, warn};

use super::{Extent, FrameSource, SourceError};

/// Random access over a raw frame file through a read-only memory map.
///
/// No I/O happens per frame: every `get` is offset arithmetic over the
/// mapped region. The mapping is released when the source is dropped.
pub struct MappedFileSource {
    path: String,
    map: Mmap,
    format: FrameFormat,
    frame_count: usize,
}

impl MappedFileSource {
    pub fn open(path: &Path, format: FrameFormat) -> Result<Self, SourceError> {
        let path_str = path.display().to_string();
        let file = File::open(path).map_err(|e| SourceError::Open {
            path: path_str.clone(),
            source: e,
        })?;

        // SAFETY: the mapping is read-only and private to this source. If another
        // process truncates the file underneath us, reads may fault; raw capture
        // files are not modified while being viewed.
        let map = unsafe { Mmap::map(&file) }.map_err(|e| SourceError::Map {
            path: path_str.clone(),
            source: e,
        })?;

        let frame_count = format.frame_count(map.len());
        let trailing = format.trailing_bytes(map.len());
        if trailing != 0 {
            warn!(
                path = path_str,
                trailing_bytes = trailing,
                frame_size = format.frame_size(),
                "file size is not a multiple of the frame size, ignoring trailing partial frame"
            );
        }

        info!(
            path = path_str,
            bytes = map.len(),
            frame_count,
            width = format.width(),
            height = format.height(),
            "mapped raw frame file"
        );

        Ok(Self {
            path: path_str,
            map,
            format,
            frame_count,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Mapped length in bytes, trailing partial frame included.
    pub fn byte_len(&self) -> usize {
        self.map.len()
    }

    /// Borrow frame `index` straight out of the map.
    pub fn get(&self, index: usize) -> Result<RawFrame<'_>, FrameError> {
        self.format.frame_at(&self.map, index)
    }
}

impl FrameSource for MappedFileSource {
    fn extent(&self) -> Extent {
        Extent::Fixed(self.frame_count())
    }

    fn images(&mut self, index: usize) -> Result<Vec<RgbaImage>, SourceError> {
        Ok(vec![self.get(index)?.to_rgba()])
    }

    fn name(&self) -> &str {
        "mapped"
    }
}

impl Drop for MappedFileSource {
    fn drop(&mut self) {
        debug!(path = self.path, bytes = self.map.len(), "unmapping raw frame file");
    }
}
