/// A half-open pixel rectangle: `[min_x, max_x) x [min_y, max_y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl Rect {
    pub fn new(min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> u32 {
        self.max_x.saturating_sub(self.min_x)
    }

    pub fn height(&self) -> u32 {
        self.max_y.saturating_sub(self.min_y)
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }

    /// Grow by `n` pixels on every side, clipped to `width x height`.
    pub fn grow(&self, n: u32, width: u32, height: u32) -> Rect {
        Rect {
            min_x: self.min_x.saturating_sub(n),
            min_y: self.min_y.saturating_sub(n),
            max_x: self.max_x.saturating_add(n).min(width),
            max_y: self.max_y.saturating_add(n).min(height),
        }
    }

    /// Clip to `width x height`.
    pub fn clip(&self, width: u32, height: u32) -> Rect {
        Rect {
            min_x: self.min_x.min(width),
            min_y: self.min_y.min(height),
            max_x: self.max_x.min(width),
            max_y: self.max_y.min(height),
        }
    }
}

/// Order rectangles largest first. Stable: equal areas keep their order.
pub fn sort_by_area_desc(rects: &mut [Rect]) {
    rects.sort_by(|a, b| b.area().cmp(&a.area()));
}
