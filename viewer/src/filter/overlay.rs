use image::{Rgba, RgbaImage};
use rawview_common::rect::Rect;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Build the motion overlay for `original`.
///
/// Starts from a white canvas the size of `original`. For each rectangle,
/// in the order given, a white border one pixel wide is drawn around it and
/// then the rectangle's own pixels are copied in from `original`. Callers
/// pass rectangles largest first so smaller regions end up on top.
pub fn composite(original: &RgbaImage, rects: &[Rect]) -> RgbaImage {
    let (width, height) = original.dimensions();
    let mut out = RgbaImage::from_pixel(width, height, WHITE);

    for rect in rects {
        fill(&mut out, rect.grow(1, width, height), WHITE);

        let inner = rect.clip(width, height);
        for y in inner.min_y..inner.max_y {
            for x in inner.min_x..inner.max_x {
                out.put_pixel(x, y, *original.get_pixel(x, y));
            }
        }
    }
    out
}

fn fill(img: &mut RgbaImage, rect: Rect, color: Rgba<u8>) {
    for y in rect.min_y..rect.max_y {
        for x in rect.min_x..rect.max_x {
            img.put_pixel(x, y, color);
        }
    }
}
