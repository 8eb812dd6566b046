use image::RgbaImage;
use rawview_common::frame::{FrameFormat, RawFrame};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, info};

use super::{Extent, FrameSource, SourceError};

/// Forward-streaming frame source for character devices and pipes.
///
/// Seeking is only done when the requested index is not the one the stream
/// is already positioned at, so stepping forward one frame at a time never
/// seeks. Running into end-of-stream is not an error: a live device may
/// produce more data later, and until then the last complete frame keeps
/// being served.
pub struct DeviceSource<R> {
    path: String,
    stream: R,
    format: FrameFormat,
    /// Last complete frame read.
    front: Vec<u8>,
    /// Scratch buffer the next read lands in; swapped with `front` once full.
    back: Vec<u8>,
    /// Frame index the stream position is aligned to, `None` after a partial read.
    position: Option<usize>,
    highest: Option<usize>,
}

impl DeviceSource<File> {
    pub fn open(path: &Path, format: FrameFormat) -> Result<Self, SourceError> {
        let path_str = path.display().to_string();
        let file = File::open(path).map_err(|e| SourceError::Open {
            path: path_str.clone(),
            source: e,
        })?;
        info!(
            path = path_str,
            frame_size = format.frame_size(),
            "opened raw frame device"
        );
        Ok(Self::new(file, path_str, format))
    }
}

impl<R: Read + Seek> DeviceSource<R> {
    pub fn new(stream: R, path: impl Into<String>, format: FrameFormat) -> Self {
        Self {
            path: path.into(),
            stream,
            format,
            front: vec![0; format.frame_size()],
            back: vec![0; format.frame_size()],
            position: Some(0),
            highest: None,
        }
    }

    /// Highest frame index read completely so far.
    pub fn highest_read(&self) -> Option<usize> {
        self.highest
    }

    /// Read frame `index`.
    ///
    /// The returned frame borrows the source and is only valid until the
    /// next call. An index whose offset the stream cannot seek to is served
    /// like end-of-stream.
    pub fn get(&mut self, index: usize) -> Result<RawFrame<'_>, SourceError> {
        if self.position != Some(index) {
            let Some(offset) = self
                .format
                .offset(index)
                .and_then(|offset| i64::try_from(offset).ok())
            else {
                debug!(
                    path = self.path,
                    index,
                    "frame offset not addressable, serving last complete frame"
                );
                return Ok(RawFrame::new(&self.front, self.format)?);
            };
            debug!(
                path = self.path,
                index,
                from = ?self.position,
                offset,
                "seeking device"
            );
            match self.stream.seek(SeekFrom::Start(offset as u64)) {
                Ok(_) => self.position = Some(index),
                Err(e) if e.kind() == ErrorKind::InvalidInput => {
                    debug!(
                        path = self.path,
                        index,
                        error = %e,
                        "seek beyond device limit, serving last complete frame"
                    );
                    return Ok(RawFrame::new(&self.front, self.format)?);
                }
                Err(e) => return Err(SourceError::Seek { index, source: e }),
            }
        }

        let filled = read_full(&mut self.stream, &mut self.back)
            .map_err(|e| SourceError::Read { index, source: e })?;

        if filled == self.back.len() {
            std::mem::swap(&mut self.front, &mut self.back);
            self.position = Some(index + 1);
            self.highest = Some(self.highest.map_or(index, |h| h.max(index)));
        } else {
            debug!(
                path = self.path,
                index,
                filled,
                frame_size = self.back.len(),
                "end of stream, serving last complete frame"
            );
            // A partial read leaves the stream between frame boundaries.
            self.position = if filled == 0 { Some(index) } else { None };
        }

        Ok(RawFrame::new(&self.front, self.format)?)
    }
}

/// Fill `buf` until it is full or the stream reports end-of-file.
fn read_full<R: Read>(stream: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl<R: Read + Seek + Send> FrameSource for DeviceSource<R> {
    fn extent(&self) -> Extent {
        Extent::Open {
            highest: self.highest_read(),
        }
    }

    fn images(&mut self, index: usize) -> Result<Vec<RgbaImage>, SourceError> {
        Ok(vec![self.get(index)?.to_rgba()])
    }

    fn name(&self) -> &str {
        "device"
    }
}
