use serde::{Deserialize, Serialize};

use crate::config::ViewportConfig;
use crate::math::Rect;

/// Point stored as a fraction of the image width/height, independent of the
/// resolution it is later rendered at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativePoint {
    pub x: f64,
    pub y: f64,
}

impl RelativePoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn to_point(&self, width: f32, height: f32) -> [f32; 2] {
        [
            (self.x * width as f64) as f32,
            (self.y * height as f64) as f32,
        ]
    }
}

/// The visible portion of the background image.
///
/// `parent` spans the whole image; `child` is the sub-rectangle currently shown
/// on screen. Every operation either leaves `child` inside `parent` with a
/// positive size, or is rejected and keeps the previous rectangle.
#[derive(Debug, Clone)]
pub struct Viewport {
    parent: Rect,
    child: Option<Rect>,
    pending: Option<Rect>,
    display: [f32; 2],
    aspect_ratio: f32,
    config: ViewportConfig,
}

impl Viewport {
    pub fn new(image_width: u32, image_height: u32, config: ViewportConfig) -> Self {
        Self {
            parent: Rect::new(0.0, 0.0, image_width.max(1) as f32, image_height.max(1) as f32),
            child: None,
            pending: None,
            display: [0.0, 0.0],
            aspect_ratio: 1.0,
            config,
        }
    }

    pub fn image_rect(&self) -> Rect {
        self.parent
    }

    pub fn image_size(&self) -> [f32; 2] {
        [self.parent.width, self.parent.height]
    }

    /// The visible sub-rectangle. Before a display size is known this is the whole image.
    pub fn rect(&self) -> Rect {
        self.child.unwrap_or(self.parent)
    }

    pub fn display_size(&self) -> [f32; 2] {
        self.display
    }

    pub fn display_rect(&self) -> Rect {
        Rect::new(0.0, 0.0, self.display[0], self.display[1])
    }

    pub fn has_display(&self) -> bool {
        self.display[0] > 0.0 && self.display[1] > 0.0
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.aspect_ratio
    }

    pub fn magnification(&self) -> f32 {
        if !self.has_display() {
            return 1.0;
        }
        self.display[0] / self.rect().width
    }

    /// How many image pixels one pixel of finger travel corresponds to when zooming.
    pub fn zoom_modifier(&self) -> f32 {
        if !self.has_display() {
            return 1.0;
        }
        self.parent.width / self.display[0]
    }

    pub fn set_display_size(&mut self, width: f32, height: f32) {
        if !(width > 0.0 && height > 0.0 && width.is_finite() && height.is_finite()) {
            log::warn!("Rejecting display size {width}x{height}");
            return;
        }

        let old_display_width = self.display[0];
        self.display = [width, height];
        self.aspect_ratio = width / height;

        let next = if let Some(pending) = self.pending.take() {
            let fitted = Rect::new(pending.x, pending.y, pending.width, pending.width / self.aspect_ratio);
            self.settle(fitted, false)
        } else if let (Some(child), true) = (self.child, old_display_width > 0.0) {
            // Keep the top-left corner and the previous zoom ratio.
            let zoom_ratio = child.width / old_display_width;
            let new_width = width * zoom_ratio;
            let rescaled = Rect::new(child.x, child.y, new_width, new_width / self.aspect_ratio);
            self.settle(rescaled, false)
        } else {
            Some(self.default_rect())
        };

        match next {
            Some(rect) => self.child = Some(rect),
            None => {
                log::warn!("Display resize produced no valid view; restoring default");
                self.child = Some(self.default_rect());
            }
        }
        log::debug!("Display size {}x{}, view {:?}", width, height, self.child);
    }

    /// Restores a previously saved view rectangle, deferring it until the
    /// display size is known.
    pub fn restore_rect(&mut self, rect: Rect) {
        if !self.has_display() {
            self.pending = Some(rect);
            return;
        }
        let fitted = Rect::new(rect.x, rect.y, rect.width, rect.width / self.aspect_ratio);
        match self.settle(fitted, false) {
            Some(rect) => self.child = Some(rect),
            None => log::warn!("Ignoring invalid saved view rectangle {rect:?}"),
        }
    }

    /// Offsets the view by an image-space delta, clamping by translation only.
    pub fn pan(&mut self, dx: f32, dy: f32) -> bool {
        let Some(child) = self.child else {
            return false;
        };
        if !dx.is_finite() || !dy.is_finite() {
            return false;
        }
        let moved = child.offset(dx, dy).translated_into(&self.parent);
        if moved.is_valid() && self.parent.contains_rect(&moved) {
            self.child = Some(moved);
            true
        } else {
            false
        }
    }

    /// Pans by a delta measured in screen pixels.
    pub fn pan_screen(&mut self, dx: f32, dy: f32) -> bool {
        let [sx, sy] = self.screen_to_image_scale();
        self.pan(dx * sx, dy * sy)
    }

    /// Grows or shrinks the view about its center. Positive deltas zoom in.
    /// Returns false when the change was rejected and the view kept.
    pub fn zoom(&mut self, delta: f32) -> bool {
        let Some(child) = self.child else {
            return false;
        };

        let scaled = delta * self.zoom_modifier();
        let dy = scaled / (self.aspect_ratio.powi(2) + 1.0).sqrt();
        let dx = self.aspect_ratio * dy;

        match self.settle(child.inset(dx, dy), true) {
            Some(rect) => {
                self.child = Some(rect);
                true
            }
            None => {
                log::debug!("Rejected zoom of {delta}");
                false
            }
        }
    }

    /// Fits the view around `target` plus padding, respecting the display aspect ratio.
    pub fn focus_on_rect(&mut self, target: Rect) -> bool {
        if self.child.is_none() || !target.is_valid() {
            return false;
        }

        let padding = 1.0 + 2.0 * self.config.focus_padding;
        let target_ratio = target.width / target.height;
        let (width, height) = if target_ratio > self.aspect_ratio {
            let width = target.width * padding;
            (width, width / self.aspect_ratio)
        } else {
            let height = target.height * padding;
            (height * self.aspect_ratio, height)
        };

        match self.settle(Rect::centered(target.center(), width, height), true) {
            Some(rect) => {
                self.child = Some(rect);
                true
            }
            None => false,
        }
    }

    pub fn screen_to_image(&self, p: [f32; 2]) -> [f32; 2] {
        let child = self.rect();
        let [sx, sy] = self.screen_to_image_scale();
        [p[0] * sx + child.x, p[1] * sy + child.y]
    }

    pub fn image_to_screen(&self, p: [f32; 2]) -> [f32; 2] {
        let child = self.rect();
        let [sx, sy] = self.screen_to_image_scale();
        [(p[0] - child.x) / sx, (p[1] - child.y) / sy]
    }

    /// Ratio between a raster of the given width and the image.
    pub fn raster_ratio(&self, raster_width: u32) -> f32 {
        raster_width as f32 / self.parent.width
    }

    pub fn image_to_raster(p: [f32; 2], ratio: f32) -> [f32; 2] {
        [p[0] * ratio, p[1] * ratio]
    }

    pub fn raster_to_image(p: [f32; 2], ratio: f32) -> [f32; 2] {
        if ratio == 0.0 {
            return p;
        }
        [p[0] / ratio, p[1] / ratio]
    }

    pub fn to_relative(&self, p: [f32; 2]) -> RelativePoint {
        RelativePoint::new(
            p[0] as f64 / self.parent.width as f64,
            p[1] as f64 / self.parent.height as f64,
        )
    }

    pub fn from_relative(&self, p: RelativePoint) -> [f32; 2] {
        p.to_point(self.parent.width, self.parent.height)
    }

    fn screen_to_image_scale(&self) -> [f32; 2] {
        if !self.has_display() {
            return [1.0, 1.0];
        }
        let child = self.rect();
        [child.width / self.display[0], child.height / self.display[1]]
    }

    /// Largest view with the display aspect ratio that fits in the image.
    fn default_rect(&self) -> Rect {
        let image_ratio = self.parent.width / self.parent.height;
        if image_ratio > self.aspect_ratio {
            Rect::new(0.0, 0.0, self.parent.height * self.aspect_ratio, self.parent.height)
        } else {
            Rect::new(0.0, 0.0, self.parent.width, self.parent.width / self.aspect_ratio)
        }
    }

    fn min_size(&self) -> [f32; 2] {
        let max = self.config.max_magnification.max(f32::EPSILON);
        [self.display[0] / max, self.display[1] / max]
    }

    fn settle(&self, candidate: Rect, enforce_min: bool) -> Option<Rect> {
        let mut rect = candidate;

        if rect.width > self.parent.width || rect.height > self.parent.height {
            let largest = self.default_rect();
            rect = Rect::centered(rect.center(), largest.width, largest.height);
        }

        if enforce_min {
            let [min_width, min_height] = self.min_size();
            if !(rect.width >= min_width && rect.height >= min_height) {
                let resized = Rect::centered(rect.center(), min_width, min_height);
                if !resized.fits_within(&self.parent) {
                    return None;
                }
                rect = resized;
            }
        }

        let rect = rect.translated_into(&self.parent);
        if rect.is_valid() && self.parent.contains_rect(&rect) {
            Some(rect)
        } else {
            None
        }
    }
}
