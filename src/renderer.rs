use ab_glyph::FontArc;
use image::imageops::FilterType;
use image::{Rgba, RgbaImage};

use crate::math::{Rect, distance, point_to_segment_distance};
use crate::text_renderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintStyle {
    Stroke,
    Fill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Over,
    /// Writes fully transparent pixels wherever the shape covers.
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Paint {
    pub color: [f32; 4],
    pub width: f32,
    pub style: PaintStyle,
    pub mode: BlendMode,
}

impl Paint {
    pub fn stroke(color: [f32; 4], width: f32) -> Self {
        Self {
            color,
            width,
            style: PaintStyle::Stroke,
            mode: BlendMode::Over,
        }
    }

    pub fn fill(color: [f32; 4]) -> Self {
        Self {
            color,
            width: 0.0,
            style: PaintStyle::Fill,
            mode: BlendMode::Over,
        }
    }

    pub fn clear(width: f32) -> Self {
        Self {
            color: [0.0, 0.0, 0.0, 0.0],
            width,
            style: PaintStyle::Stroke,
            mode: BlendMode::Clear,
        }
    }
}

/// Drawing backend the annotations paint through. Coordinates are raster pixels.
pub trait Painter {
    fn dimensions(&self) -> (u32, u32);

    fn fill(&mut self, color: [f32; 4]);

    fn draw_line(&mut self, start: [f32; 2], end: [f32; 2], paint: &Paint);

    fn draw_rect(&mut self, rect: Rect, paint: &Paint);

    fn draw_circle(&mut self, center: [f32; 2], radius: f32, paint: &Paint);

    /// Draws one line of text with its top-left corner at `origin`.
    fn draw_text(&mut self, text: &str, origin: [f32; 2], px: f32, color: [f32; 4]);

    /// Replaces the whole target with `image` scaled to fit it.
    fn blit(&mut self, image: &RgbaImage);

    fn draw_polyline(&mut self, points: &[[f32; 2]], paint: &Paint) {
        match points {
            [] => {}
            [single] => {
                let dot = Paint {
                    style: PaintStyle::Fill,
                    ..*paint
                };
                self.draw_circle(*single, paint.width / 2.0, &dot);
            }
            _ => {
                for pair in points.windows(2) {
                    self.draw_line(pair[0], pair[1], paint);
                }
            }
        }
    }
}

pub fn to_rgba(color: [f32; 4]) -> Rgba<u8> {
    let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgba([
        channel(color[0]),
        channel(color[1]),
        channel(color[2]),
        channel(color[3]),
    ])
}

/// Software painter over an `RgbaImage`. Coverage is binary so painting the
/// same opaque shape twice gives the same pixels as painting it once.
pub struct RasterPainter<'a> {
    target: &'a mut RgbaImage,
    font: Option<&'a FontArc>,
}

impl<'a> RasterPainter<'a> {
    pub fn new(target: &'a mut RgbaImage, font: Option<&'a FontArc>) -> Self {
        Self { target, font }
    }

    fn put(&mut self, x: i64, y: i64, paint: &Paint) {
        if x < 0 || y < 0 || x >= self.target.width() as i64 || y >= self.target.height() as i64 {
            return;
        }
        let pixel = self.target.get_pixel_mut(x as u32, y as u32);
        match paint.mode {
            BlendMode::Clear => *pixel = Rgba([0, 0, 0, 0]),
            BlendMode::Over => *pixel = blend(*pixel, paint.color),
        }
    }

    /// Visits every pixel whose center lies inside `bounds` and satisfies `covered`.
    fn cover(&mut self, bounds: Rect, paint: &Paint, covered: impl Fn([f32; 2]) -> bool) {
        let x0 = bounds.x.floor().max(0.0) as i64;
        let y0 = bounds.y.floor().max(0.0) as i64;
        let x1 = (bounds.right().ceil() as i64).min(self.target.width() as i64);
        let y1 = (bounds.bottom().ceil() as i64).min(self.target.height() as i64);
        for y in y0..y1 {
            for x in x0..x1 {
                if covered([x as f32 + 0.5, y as f32 + 0.5]) {
                    self.put(x, y, paint);
                }
            }
        }
    }
}

fn blend(dst: Rgba<u8>, color: [f32; 4]) -> Rgba<u8> {
    let src = to_rgba(color);
    if src[3] == 255 {
        return src;
    }
    let a = color[3].clamp(0.0, 1.0);
    let mix = |s: u8, d: u8| (s as f32 * a + d as f32 * (1.0 - a)).round() as u8;
    let out_alpha = a + dst[3] as f32 / 255.0 * (1.0 - a);
    Rgba([
        mix(src[0], dst[0]),
        mix(src[1], dst[1]),
        mix(src[2], dst[2]),
        (out_alpha * 255.0).round() as u8,
    ])
}

impl Painter for RasterPainter<'_> {
    fn dimensions(&self) -> (u32, u32) {
        self.target.dimensions()
    }

    fn fill(&mut self, color: [f32; 4]) {
        let rgba = to_rgba(color);
        for pixel in self.target.pixels_mut() {
            *pixel = rgba;
        }
    }

    fn draw_line(&mut self, start: [f32; 2], end: [f32; 2], paint: &Paint) {
        let radius = (paint.width / 2.0).max(0.5);
        let bounds = Rect::from_corners(start, end).inset(-radius, -radius);
        self.cover(bounds, paint, |p| {
            point_to_segment_distance(p, start, end) <= radius
        });
    }

    fn draw_rect(&mut self, rect: Rect, paint: &Paint) {
        match paint.style {
            PaintStyle::Fill => self.cover(rect, paint, |p| {
                p[0] >= rect.x && p[0] < rect.right() && p[1] >= rect.y && p[1] < rect.bottom()
            }),
            PaintStyle::Stroke => {
                let half = (paint.width / 2.0).max(0.5);
                let outer = rect.inset(-half, -half);
                let inner = rect.inset(half, half);
                self.cover(outer, paint, |p| {
                    let in_outer = p[0] >= outer.x
                        && p[0] < outer.right()
                        && p[1] >= outer.y
                        && p[1] < outer.bottom();
                    let in_inner = inner.width > 0.0
                        && inner.height > 0.0
                        && p[0] >= inner.x
                        && p[0] < inner.right()
                        && p[1] >= inner.y
                        && p[1] < inner.bottom();
                    in_outer && !in_inner
                });
            }
        }
    }

    fn draw_circle(&mut self, center: [f32; 2], radius: f32, paint: &Paint) {
        match paint.style {
            PaintStyle::Fill => {
                let radius = radius.max(0.5);
                let bounds = Rect::centered(center, radius * 2.0, radius * 2.0);
                self.cover(bounds, paint, |p| distance(p, center) <= radius);
            }
            PaintStyle::Stroke => {
                let half = (paint.width / 2.0).max(0.5);
                let reach = radius + half;
                let bounds = Rect::centered(center, reach * 2.0, reach * 2.0);
                self.cover(bounds, paint, |p| (distance(p, center) - radius).abs() <= half);
            }
        }
    }

    fn draw_text(&mut self, text: &str, origin: [f32; 2], px: f32, color: [f32; 4]) {
        let Some(font) = self.font else {
            return;
        };
        let paint = Paint::fill(color);
        let mut covered = Vec::new();
        text_renderer::rasterize_line(font, text, origin, px, |x, y| covered.push((x, y)));
        for (x, y) in covered {
            self.put(x, y, &paint);
        }
    }

    fn blit(&mut self, image: &RgbaImage) {
        let (width, height) = self.target.dimensions();
        if image.dimensions() == (width, height) {
            self.target.copy_from_slice(image.as_raw());
        } else {
            *self.target = image::imageops::resize(image, width, height, FilterType::Nearest);
        }
    }
}
