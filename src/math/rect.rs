use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle stored as origin plus size.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Builds a rectangle from two arbitrary corners, sorting them.
    pub fn from_corners(a: [f32; 2], b: [f32; 2]) -> Self {
        let left = a[0].min(b[0]);
        let top = a[1].min(b[1]);
        Self {
            x: left,
            y: top,
            width: (a[0] - b[0]).abs(),
            height: (a[1] - b[1]).abs(),
        }
    }

    pub fn centered(center: [f32; 2], width: f32, height: f32) -> Self {
        Self {
            x: center[0] - width / 2.0,
            y: center[1] - height / 2.0,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> [f32; 2] {
        [self.x + self.width / 2.0, self.y + self.height / 2.0]
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width > 0.0
            && self.height > 0.0
    }

    pub fn contains_point(&self, p: [f32; 2]) -> bool {
        p[0] >= self.x && p[0] < self.right() && p[1] >= self.y && p[1] < self.bottom()
    }

    /// Containment with a small slack for accumulated float error.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        const SLACK: f32 = 1e-3;
        other.x >= self.x - SLACK
            && other.y >= self.y - SLACK
            && other.right() <= self.right() + SLACK
            && other.bottom() <= self.bottom() + SLACK
    }

    pub fn fits_within(&self, other: &Rect) -> bool {
        self.width <= other.width && self.height <= other.height
    }

    pub fn offset(&self, dx: f32, dy: f32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }

    /// Moves every edge inward by `dx`/`dy`; negative values grow the rectangle.
    pub fn inset(&self, dx: f32, dy: f32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            width: self.width - 2.0 * dx,
            height: self.height - 2.0 * dy,
        }
    }

    pub fn scaled(&self, ratio: f32) -> Self {
        Self {
            x: self.x * ratio,
            y: self.y * ratio,
            width: self.width * ratio,
            height: self.height * ratio,
        }
    }

    /// Translates this rectangle so it lies inside `parent` without resizing it.
    pub fn translated_into(&self, parent: &Rect) -> Self {
        let mut dx = 0.0;
        let mut dy = 0.0;
        if self.right() > parent.right() {
            dx = parent.right() - self.right();
        }
        if self.x < parent.x {
            dx = parent.x - self.x;
        }
        if self.bottom() > parent.bottom() {
            dy = parent.bottom() - self.bottom();
        }
        if self.y < parent.y {
            dy = parent.y - self.y;
        }
        self.offset(dx, dy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_corners_sorts() {
        let r = Rect::from_corners([10.0, 40.0], [2.0, 5.0]);
        assert_eq!(r, Rect::new(2.0, 5.0, 8.0, 35.0));
    }

    #[test]
    fn test_inset_keeps_center() {
        let r = Rect::new(0.0, 0.0, 100.0, 50.0);
        let shrunk = r.inset(10.0, 5.0);
        assert_eq!(shrunk.center(), r.center());
        assert_eq!(shrunk.width, 80.0);
        assert_eq!(shrunk.height, 40.0);
    }

    #[test]
    fn test_translated_into_parent() {
        let parent = Rect::new(0.0, 0.0, 100.0, 100.0);
        let r = Rect::new(80.0, -10.0, 40.0, 30.0).translated_into(&parent);
        assert_eq!(r, Rect::new(60.0, 0.0, 40.0, 30.0));
        assert!(parent.contains_rect(&r));
    }
}
