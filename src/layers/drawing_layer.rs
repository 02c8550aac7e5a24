use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::{LayerContext, Overlay};
use crate::config::DrawingConfig;
use crate::drawing::{Annotation, Redraw, StrokePath};
use crate::persist;

/// Freehand ink with undo/redo.
pub struct DrawingLayer {
    config: DrawingConfig,
    strokes: Vec<StrokePath>,
    redo: Vec<StrokePath>,
    current: Option<StrokePath>,
    drew: bool,
    color: [f32; 4],
    size: u32,
    erasing: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawingSnapshot {
    pub version: u32,
    pub strokes: Vec<StrokePath>,
    pub redo: Vec<StrokePath>,
    pub color: Option<[f32; 4]>,
    pub size: Option<u32>,
    pub erasing: bool,
}

impl DrawingLayer {
    pub fn new(config: DrawingConfig) -> Self {
        Self {
            color: config.default_color,
            size: config.default_size,
            config,
            strokes: Vec::new(),
            redo: Vec::new(),
            current: None,
            drew: false,
            erasing: false,
        }
    }

    pub fn strokes(&self) -> &[StrokePath] {
        &self.strokes
    }

    pub fn set_color(&mut self, color: [f32; 4]) {
        self.color = color;
    }

    pub fn set_size(&mut self, size: u32) {
        self.size = size.max(1);
    }

    pub fn set_erasing(&mut self, erasing: bool) {
        self.erasing = erasing;
    }

    pub fn is_erasing(&self) -> bool {
        self.erasing
    }

    /// Stroke width in image pixels for the current size.
    pub fn stroke_width(&self, image_width: f32) -> f32 {
        let width =
            (self.size as f32).powf(self.config.size_exponent) * image_width / self.config.width_divisions;
        if self.erasing {
            width * self.config.eraser_multiplier
        } else {
            width
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.strokes.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo(&mut self) -> Redraw {
        match self.strokes.pop() {
            Some(stroke) => {
                self.redo.push(stroke);
                Redraw::Full
            }
            None => Redraw::None,
        }
    }

    pub fn redo(&mut self) -> Redraw {
        match self.redo.pop() {
            Some(stroke) => {
                self.strokes.push(stroke);
                Redraw::Full
            }
            None => Redraw::None,
        }
    }

    pub fn clear(&mut self) -> Redraw {
        self.strokes.clear();
        self.redo.clear();
        self.current = None;
        Redraw::Full
    }

    fn discard_current(&mut self) -> Redraw {
        let had_ink = self.current.take().is_some() && self.drew;
        self.drew = false;
        if had_ink { Redraw::Full } else { Redraw::None }
    }
}

impl Overlay for DrawingLayer {
    fn on_start(&mut self, pos: [f32; 2], ctx: &mut LayerContext) -> Redraw {
        let width = self.stroke_width(ctx.image_size()[0]);
        let mut stroke = StrokePath::new(self.color, width, self.erasing);
        stroke.full_redraw = self.erasing && ctx.layer_count != 1;
        stroke.push(ctx.viewport.to_relative(pos));
        self.current = Some(stroke);
        self.drew = false;
        Redraw::None
    }

    fn on_draw(
        &mut self,
        pos: [f32; 2],
        _dx: f32,
        _dy: f32,
        _possibly_accidental: bool,
        ctx: &mut LayerContext,
    ) -> Redraw {
        let Some(stroke) = self.current.as_mut() else {
            return Redraw::None;
        };
        stroke.push(ctx.viewport.to_relative(pos));
        self.drew = true;
        Redraw::Quick
    }

    fn on_unintended_draw(&mut self, _ctx: &mut LayerContext) -> Redraw {
        self.discard_current()
    }

    fn on_finish(&mut self, pos: [f32; 2], max_fingers: usize, ctx: &mut LayerContext) -> Redraw {
        if max_fingers != 1 {
            return self.discard_current();
        }
        let Some(mut stroke) = self.current.take() else {
            return Redraw::None;
        };

        stroke.push(ctx.viewport.to_relative(pos));
        if !self.drew {
            // A tap still leaves a visible dot.
            stroke.push(ctx.viewport.to_relative([pos[0] + 1.0, pos[1]]));
        }
        stroke.full_redraw = false;
        self.strokes.push(stroke);
        self.redo.clear();
        self.drew = false;
        log::debug!("Committed stroke, {} total", self.strokes.len());
        Redraw::Full
    }

    fn on_activation_changed(&mut self, active: bool, _ctx: &mut LayerContext) -> Redraw {
        if !active {
            self.current = None;
        }
        Redraw::Full
    }

    fn annotations(&self) -> Box<dyn Iterator<Item = &dyn Annotation> + '_> {
        Box::new(
            self.strokes
                .iter()
                .chain(self.current.iter())
                .map(|stroke| stroke as &dyn Annotation),
        )
    }

    fn pending(&self) -> Option<&dyn Annotation> {
        self.current.as_ref().map(|stroke| stroke as &dyn Annotation)
    }

    fn save(&self) -> anyhow::Result<serde_json::Value> {
        let snapshot = DrawingSnapshot {
            version: persist::SNAPSHOT_VERSION,
            strokes: self.strokes.clone(),
            redo: self.redo.clone(),
            color: Some(self.color),
            size: Some(self.size),
            erasing: self.erasing,
        };
        serde_json::to_value(snapshot).context("failed to encode drawing layer")
    }

    fn restore(&mut self, value: serde_json::Value) -> anyhow::Result<()> {
        let snapshot: DrawingSnapshot =
            serde_json::from_value(value).context("failed to decode drawing layer")?;
        persist::check_version(snapshot.version)?;
        self.strokes = snapshot.strokes;
        self.redo = snapshot.redo;
        self.color = snapshot.color.unwrap_or(self.config.default_color);
        self.size = snapshot.size.unwrap_or(self.config.default_size);
        self.erasing = snapshot.erasing;
        self.current = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{DisplayMetrics, Viewport};
    use crate::config::ViewportConfig;

    fn with_ctx(layer_count: usize, f: impl FnOnce(&mut LayerContext)) {
        let mut viewport = Viewport::new(1000, 500, ViewportConfig::default());
        viewport.set_display_size(1000.0, 500.0);
        let mut notices = Vec::new();
        let mut ctx = LayerContext {
            viewport: &mut viewport,
            metrics: DisplayMetrics::default(),
            notices: &mut notices,
            layer_count,
            font: None,
        };
        f(&mut ctx);
    }

    fn draw_stroke(layer: &mut DrawingLayer, ctx: &mut LayerContext) {
        layer.on_start([10.0, 10.0], ctx);
        assert_eq!(layer.on_draw([20.0, 10.0], 10.0, 0.0, true, ctx), Redraw::Quick);
        assert_eq!(layer.on_finish([20.0, 10.0], 1, ctx), Redraw::Full);
    }

    #[test]
    fn test_stroke_width_scales_with_image() {
        let mut layer = DrawingLayer::new(DrawingConfig::default());
        layer.set_size(1);
        assert!((layer.stroke_width(300.0) - 1.0).abs() < 0.001);
        layer.set_erasing(true);
        assert!((layer.stroke_width(300.0) - 4.0).abs() < 0.001);
    }

    #[test]
    fn test_undo_redo_stacks() {
        with_ctx(1, |ctx| {
            let mut layer = DrawingLayer::new(DrawingConfig::default());
            draw_stroke(&mut layer, ctx);
            draw_stroke(&mut layer, ctx);
            assert_eq!(layer.undo(), Redraw::Full);
            assert!(layer.can_redo());
            assert_eq!(layer.redo(), Redraw::Full);
            assert_eq!(layer.strokes().len(), 2);

            layer.undo();
            draw_stroke(&mut layer, ctx);
            assert!(!layer.can_redo());
            assert_eq!(layer.redo(), Redraw::None);
        });
    }

    #[test]
    fn test_tap_leaves_dot_and_multi_finger_discards() {
        with_ctx(1, |ctx| {
            let mut layer = DrawingLayer::new(DrawingConfig::default());
            layer.on_start([50.0, 50.0], ctx);
            layer.on_finish([50.0, 50.0], 1, ctx);
            assert_eq!(layer.strokes()[0].points.len(), 3);

            layer.on_start([60.0, 60.0], ctx);
            layer.on_draw([70.0, 60.0], 10.0, 0.0, true, ctx);
            assert_eq!(layer.on_unintended_draw(ctx), Redraw::Full);
            assert_eq!(layer.on_finish([70.0, 60.0], 2, ctx), Redraw::None);
            assert_eq!(layer.strokes().len(), 1);
            assert!(layer.pending().is_none());
        });
    }

    #[test]
    fn test_erasing_on_shared_surface_forces_full_redraw() {
        with_ctx(2, |ctx| {
            let mut layer = DrawingLayer::new(DrawingConfig::default());
            layer.set_erasing(true);
            layer.on_start([50.0, 50.0], ctx);
            assert!(layer.pending().is_some_and(|p| p.forces_full_redraw()));
        });
        with_ctx(1, |ctx| {
            let mut layer = DrawingLayer::new(DrawingConfig::default());
            layer.set_erasing(true);
            layer.on_start([50.0, 50.0], ctx);
            assert!(layer.pending().is_some_and(|p| !p.forces_full_redraw()));
        });
    }

    #[test]
    fn test_translucent_ink_is_never_quickdrawn() {
        with_ctx(1, |ctx| {
            let mut layer = DrawingLayer::new(DrawingConfig::default());
            layer.set_color([0.0, 0.0, 0.0, 0.4]);
            layer.on_start([50.0, 50.0], ctx);
            assert!(layer.pending().is_some_and(|p| p.forces_full_redraw()));

            layer.set_color([0.0, 0.0, 0.0, 1.0]);
            layer.on_start([50.0, 50.0], ctx);
            assert!(layer.pending().is_some_and(|p| !p.forces_full_redraw()));
        });
    }

    #[test]
    fn test_snapshot_round_trip() {
        with_ctx(1, |ctx| {
            let mut layer = DrawingLayer::new(DrawingConfig::default());
            layer.set_color([1.0, 0.0, 0.0, 1.0]);
            draw_stroke(&mut layer, ctx);
            let saved = layer.save().unwrap();

            let mut restored = DrawingLayer::new(DrawingConfig::default());
            restored.restore(saved).unwrap();
            assert_eq!(restored.strokes(), layer.strokes());
            assert_eq!(restored.color, [1.0, 0.0, 0.0, 1.0]);

            restored.restore(serde_json::json!({ "version": 1 })).unwrap();
            assert!(restored.strokes().is_empty());
        });
    }
}
