use ab_glyph::FontArc;
use serde::{Deserialize, Serialize};

use crate::canvas::{DisplayMetrics, RelativePoint};
use crate::math::point_to_segment_distance;
use crate::renderer::{Paint, Painter};

/// Everything an annotation needs to paint itself onto a surface raster.
#[derive(Clone, Copy)]
pub struct RenderContext<'a> {
    /// Raster pixels per image pixel.
    pub resize_ratio: f32,
    pub image_size: [f32; 2],
    pub magnification: f32,
    pub metrics: DisplayMetrics,
    pub font: Option<&'a FontArc>,
}

impl RenderContext<'_> {
    pub fn to_raster(&self, p: [f32; 2]) -> [f32; 2] {
        [p[0] * self.resize_ratio, p[1] * self.resize_ratio]
    }

    pub fn to_image(&self, p: RelativePoint) -> [f32; 2] {
        p.to_point(self.image_size[0], self.image_size[1])
    }

    pub fn dp_to_px(&self, dp: f32) -> f32 {
        self.metrics.dp_to_px(dp)
    }
}

pub trait Annotation {
    fn draw(&self, painter: &mut dyn Painter, ctx: &RenderContext);

    /// `point` is in image space.
    fn hit_test(&self, point: [f32; 2], ctx: &RenderContext) -> bool;

    /// Painting this annotation incrementally would be wrong for the current surface.
    fn forces_full_redraw(&self) -> bool {
        false
    }
}

/// What a layer needs after handling an event, ordered from cheapest to most expensive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Redraw {
    #[default]
    None,
    /// Only the viewport moved; the raster is unchanged.
    View,
    /// Paint the layer's pending annotation incrementally.
    Quick,
    Full,
}

impl Redraw {
    pub fn merge(self, other: Redraw) -> Redraw {
        self.max(other)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokePath {
    pub points: Vec<RelativePoint>,
    pub color: [f32; 4],
    /// Image pixels.
    pub width: f32,
    #[serde(default)]
    pub erase: bool,
    /// Set while a multi-layer surface is being erased on.
    #[serde(skip)]
    pub full_redraw: bool,
}

impl StrokePath {
    pub fn new(color: [f32; 4], width: f32, erase: bool) -> Self {
        Self {
            points: Vec::new(),
            color,
            width,
            erase,
            full_redraw: false,
        }
    }

    pub fn push(&mut self, point: RelativePoint) {
        self.points.push(point);
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn image_points(&self, ctx: &RenderContext) -> Vec<[f32; 2]> {
        self.points.iter().map(|p| ctx.to_image(*p)).collect()
    }
}

impl Annotation for StrokePath {
    fn draw(&self, painter: &mut dyn Painter, ctx: &RenderContext) {
        let points: Vec<[f32; 2]> = self
            .image_points(ctx)
            .into_iter()
            .map(|p| ctx.to_raster(p))
            .collect();
        let width = self.width * ctx.resize_ratio;
        let paint = if self.erase {
            Paint::clear(width)
        } else {
            Paint::stroke(self.color, width)
        };
        painter.draw_polyline(&points, &paint);
    }

    fn hit_test(&self, point: [f32; 2], ctx: &RenderContext) -> bool {
        let points = self.image_points(ctx);
        let reach = self.width / 2.0 + ctx.dp_to_px(4.0) / ctx.magnification.max(f32::EPSILON);
        match points.as_slice() {
            [] => false,
            [single] => point_to_segment_distance(point, *single, *single) <= reach,
            _ => points
                .windows(2)
                .any(|pair| point_to_segment_distance(point, pair[0], pair[1]) <= reach),
        }
    }

    /// Translucent ink would build up if the growing stroke were repainted
    /// over itself on every sample.
    fn forces_full_redraw(&self) -> bool {
        self.full_redraw || (!self.erase && self.color[3] < 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::RasterPainter;
    use image::RgbaImage;

    fn ctx() -> RenderContext<'static> {
        RenderContext {
            resize_ratio: 0.5,
            image_size: [200.0, 100.0],
            magnification: 1.0,
            metrics: DisplayMetrics::default(),
            font: None,
        }
    }

    fn stroke() -> StrokePath {
        let mut path = StrokePath::new([0.0, 0.0, 1.0, 1.0], 4.0, false);
        path.push(RelativePoint::new(0.1, 0.5));
        path.push(RelativePoint::new(0.9, 0.5));
        path
    }

    #[test]
    fn test_redraw_merge_keeps_strongest() {
        assert_eq!(Redraw::None.merge(Redraw::Quick), Redraw::Quick);
        assert_eq!(Redraw::Full.merge(Redraw::View), Redraw::Full);
    }

    #[test]
    fn test_stroke_draws_at_resize_ratio() {
        let mut raster = RgbaImage::new(100, 50);
        stroke().draw(&mut RasterPainter::new(&mut raster, None), &ctx());
        // Image (100, 50) lands on raster (50, 25).
        assert_eq!(raster.get_pixel(50, 25)[2], 255);
        assert_eq!(raster.get_pixel(50, 40)[3], 0);
    }

    #[test]
    fn test_stroke_hit_test() {
        let path = stroke();
        assert!(path.hit_test([100.0, 52.0], &ctx()));
        assert!(!path.hit_test([100.0, 80.0], &ctx()));
        assert!(!StrokePath::new([0.0; 4], 1.0, false).hit_test([0.0, 0.0], &ctx()));
    }
}
