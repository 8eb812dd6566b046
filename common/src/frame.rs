use image::RgbaImage;

/// Bytes per pixel in the packed YUYV (4:2:2) layout.
pub const BYTES_PER_PIXEL: usize = 2;

/// Geometry of a raw YUYV frame.
///
/// Raw files and devices carry no header, so the dimensions are supplied
/// externally and every frame occupies exactly `2 * width * height` bytes:
///
///   frame i:  [i * frame_size .. (i + 1) * frame_size]
///   pixels:   Y0 U0 Y1 V0 | Y2 U1 Y3 V1 | ...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    width: u32,
    height: u32,
}

impl FrameFormat {
    pub fn new(width: u32, height: u32) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::InvalidGeometry {
                width,
                height,
                reason: "width and height must be non-zero",
            });
        }
        // Two horizontally adjacent pixels share one U/V pair.
        if width % 2 != 0 {
            return Err(FrameError::InvalidGeometry {
                width,
                height,
                reason: "width must be even for YUYV",
            });
        }
        // RGBA output is the larger of the two buffers a frame needs.
        let rgba_size = (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(4));
        if rgba_size.is_none() {
            return Err(FrameError::InvalidGeometry {
                width,
                height,
                reason: "frame size overflows the address space",
            });
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Size of one frame in bytes. Never overflows; `new` rejects such geometry.
    pub fn frame_size(&self) -> usize {
        BYTES_PER_PIXEL * self.width as usize * self.height as usize
    }

    /// Byte offset of frame `index`, or `None` on overflow.
    pub fn offset(&self, index: usize) -> Option<usize> {
        index.checked_mul(self.frame_size())
    }

    /// Number of whole frames that fit in `len` bytes.
    pub fn frame_count(&self, len: usize) -> usize {
        len / self.frame_size()
    }

    /// Bytes left over after the last whole frame.
    pub fn trailing_bytes(&self, len: usize) -> usize {
        len % self.frame_size()
    }

    /// Borrow frame `index` out of `buf` without copying.
    pub fn frame_at<'a>(&self, buf: &'a [u8], index: usize) -> Result<RawFrame<'a>, FrameError> {
        let size = self.frame_size();
        let range = self
            .offset(index)
            .and_then(|start| start.checked_add(size).map(|end| start..end))
            .filter(|range| range.end <= buf.len())
            .ok_or(FrameError::OutOfRange {
                index,
                frame_size: size,
                available: buf.len(),
            })?;
        Ok(RawFrame {
            pixels: &buf[range],
            width: self.width,
            height: self.height,
        })
    }
}

/// A view of one packed YUYV frame.
///
/// Borrowed rather than owned: it may point into a memory map or into a
/// source's read buffer.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    pixels: &'a [u8],
    width: u32,
    height: u32,
}

impl<'a> RawFrame<'a> {
    pub fn new(pixels: &'a [u8], format: FrameFormat) -> Result<Self, FrameError> {
        if pixels.len() != format.frame_size() {
            return Err(FrameError::SizeMismatch {
                got: pixels.len(),
                expected: format.frame_size(),
            });
        }
        Ok(Self {
            pixels,
            width: format.width,
            height: format.height,
        })
    }

    pub fn pixels(&self) -> &'a [u8] {
        self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Convert to an RGBA image (full-range BT.601).
    ///
    /// Allocates exactly one `width * height * 4` buffer.
    pub fn to_rgba(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);
        for (dst, src) in out.chunks_exact_mut(8).zip(self.pixels.chunks_exact(4)) {
            let (y0, u, y1, v) = (src[0], src[1], src[2], src[3]);
            let [r, g, b] = yuv_to_rgb(y0, u, v);
            dst[..4].copy_from_slice(&[r, g, b, 0xFF]);
            let [r, g, b] = yuv_to_rgb(y1, u, v);
            dst[4..].copy_from_slice(&[r, g, b, 0xFF]);
        }
        out
    }
}

/// 16.16 fixed-point YCbCr -> RGB.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let yy = (y as i32) << 16;
    let cb = u as i32 - 128;
    let cr = v as i32 - 128;
    let round = 1 << 15;

    let r = (yy + 91_881 * cr + round) >> 16;
    let g = (yy - 22_554 * cb - 46_802 * cr + round) >> 16;
    let b = (yy + 116_130 * cb + round) >> 16;
    [clamp_u8(r), clamp_u8(g), clamp_u8(b)]
}

fn clamp_u8(x: i32) -> u8 {
    x.clamp(0, 255) as u8
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame geometry {width}x{height}: {reason}")]
    InvalidGeometry {
        width: u32,
        height: u32,
        reason: &'static str,
    },
    #[error("frame {index} out of range: frame size {frame_size}, {available} bytes available")]
    OutOfRange {
        index: usize,
        frame_size: usize,
        available: usize,
    },
    #[error("frame buffer is {got} bytes, expected {expected}")]
    SizeMismatch { got: usize, expected: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_is_two_bytes_per_pixel() {
        let format = FrameFormat::new(4, 4).unwrap();
        assert_eq!(format.frame_size(), 32);
        assert_eq!(format.offset(3), Some(96));
    }

    #[test]
    fn rejects_bad_geometry() {
        assert!(FrameFormat::new(0, 10).is_err());
        assert!(FrameFormat::new(10, 0).is_err());
        assert!(FrameFormat::new(3, 2).is_err());
    }

    #[test]
    fn rejects_geometry_too_large_to_address() {
        let result = FrameFormat::new(u32::MAX - 1, u32::MAX);
        assert!(matches!(result, Err(FrameError::InvalidGeometry { .. })));
    }

    #[test]
    fn frame_at_views_expected_slice() {
        let format = FrameFormat::new(4, 2).unwrap();
        let buf: Vec<u8> = (0..64).collect();
        let frame = format.frame_at(&buf, 2).unwrap();
        assert_eq!(frame.pixels().len(), 16);
        assert_eq!(frame.pixels()[0], 32);
        // A view, not a copy.
        assert_eq!(frame.pixels().as_ptr(), buf[32..].as_ptr());
    }

    #[test]
    fn frame_at_out_of_range() {
        let format = FrameFormat::new(4, 2).unwrap();
        let buf = vec![0u8; 40];
        assert!(format.frame_at(&buf, 2).is_ok());
        assert!(matches!(
            format.frame_at(&buf, 3),
            Err(FrameError::OutOfRange { index: 3, .. })
        ));
        assert!(format.frame_at(&buf, usize::MAX).is_err());
    }

    #[test]
    fn count_truncates_partial_frame() {
        let format = FrameFormat::new(4, 4).unwrap();
        assert_eq!(format.frame_count(320), 10);
        assert_eq!(format.frame_count(335), 10);
        assert_eq!(format.trailing_bytes(335), 15);
    }

    #[test]
    fn raw_frame_checks_length() {
        let format = FrameFormat::new(2, 2).unwrap();
        assert!(RawFrame::new(&[0u8; 8], format).is_ok());
        assert!(matches!(
            RawFrame::new(&[0u8; 7], format),
            Err(FrameError::SizeMismatch { got: 7, expected: 8 })
        ));
    }

    #[test]
    fn neutral_chroma_converts_to_gray() {
        let format = FrameFormat::new(2, 1).unwrap();
        let pixels = [0x80, 0x80, 0xFF, 0x80];
        let img = RawFrame::new(&pixels, format).unwrap().to_rgba();
        assert_eq!(img.dimensions(), (2, 1));
        assert_eq!(img.get_pixel(0, 0).0, [128, 128, 128, 255]);
        assert_eq!(img.get_pixel(1, 0).0, [255, 255, 255, 255]);
        assert_eq!(img.as_raw().len(), 2 * 1 * 4);
    }

    #[test]
    fn conversion_is_deterministic() {
        let format = FrameFormat::new(4, 4).unwrap();
        let pixels: Vec<u8> = (0..32u8).map(|b| b.wrapping_mul(37)).collect();
        let frame = RawFrame::new(&pixels, format).unwrap();
        assert_eq!(frame.to_rgba(), frame.to_rgba());
    }
}
