mod drawing_layer;
mod textbox_layer;

pub use drawing_layer::{DrawingLayer, DrawingSnapshot};
pub use textbox_layer::{TextboxLayer, TextboxSnapshot};

use std::fmt;

use ab_glyph::FontArc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::Notice;
use crate::canvas::{DisplayMetrics, Viewport};
use crate::config::{GestureConfig, SurfaceConfig};
use crate::drawing::{Annotation, Redraw, RenderContext};
use crate::event_handler::{GestureEvent, GestureRecognizer};
use crate::measure::MeasurementEngine;
use crate::state::PointerFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(Uuid);

impl LayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Borrowed view state handed to a layer while it reacts to input.
pub struct LayerContext<'a> {
    pub viewport: &'a mut Viewport,
    pub metrics: DisplayMetrics,
    pub notices: &'a mut Vec<Notice>,
    /// Number of layers on the surface that owns the layer.
    pub layer_count: usize,
    pub font: Option<&'a FontArc>,
}

impl LayerContext<'_> {
    pub fn image_size(&self) -> [f32; 2] {
        self.viewport.image_size()
    }

    pub fn render_context(&self) -> RenderContext<'_> {
        RenderContext {
            resize_ratio: 1.0,
            image_size: self.viewport.image_size(),
            magnification: self.viewport.magnification(),
            metrics: self.metrics,
            font: self.font,
        }
    }

    pub fn notify(&mut self, notice: Notice) {
        self.notices.push(notice);
    }
}

/// Behaviour shared by every kind of layer. Gesture callbacks return the
/// redraw the change requires.
pub trait Overlay {
    fn on_start(&mut self, _pos: [f32; 2], _ctx: &mut LayerContext) -> Redraw {
        Redraw::None
    }

    fn on_draw(
        &mut self,
        _pos: [f32; 2],
        _dx: f32,
        _dy: f32,
        _possibly_accidental: bool,
        _ctx: &mut LayerContext,
    ) -> Redraw {
        Redraw::None
    }

    fn on_unintended_draw(&mut self, _ctx: &mut LayerContext) -> Redraw {
        Redraw::None
    }

    fn on_finish(&mut self, _pos: [f32; 2], _max_fingers: usize, _ctx: &mut LayerContext) -> Redraw {
        Redraw::None
    }

    fn on_long_press(&mut self, _pos: [f32; 2], _ctx: &mut LayerContext) -> Redraw {
        Redraw::None
    }

    fn on_pan(&mut self, dx: f32, dy: f32, ctx: &mut LayerContext) -> Redraw {
        if ctx.viewport.pan_screen(dx, dy) {
            Redraw::View
        } else {
            Redraw::None
        }
    }

    fn on_zoom(&mut self, delta: f32, ctx: &mut LayerContext) -> Redraw {
        if ctx.viewport.zoom(delta) {
            Redraw::View
        } else {
            Redraw::None
        }
    }

    fn on_activation_changed(&mut self, _active: bool, _ctx: &mut LayerContext) -> Redraw {
        Redraw::Full
    }

    /// Annotations in paint order.
    fn annotations(&self) -> Box<dyn Iterator<Item = &dyn Annotation> + '_>;

    /// The annotation being edited, painted alone by an incremental redraw.
    fn pending(&self) -> Option<&dyn Annotation> {
        None
    }

    fn save(&self) -> anyhow::Result<serde_json::Value>;

    fn restore(&mut self, value: serde_json::Value) -> anyhow::Result<()>;
}

pub enum LayerKind {
    Drawing(DrawingLayer),
    Textbox(TextboxLayer),
    Measuring(MeasurementEngine),
}

impl LayerKind {
    pub fn overlay(&self) -> &dyn Overlay {
        match self {
            LayerKind::Drawing(layer) => layer,
            LayerKind::Textbox(layer) => layer,
            LayerKind::Measuring(engine) => engine,
        }
    }

    pub fn overlay_mut(&mut self) -> &mut dyn Overlay {
        match self {
            LayerKind::Drawing(layer) => layer,
            LayerKind::Textbox(layer) => layer,
            LayerKind::Measuring(engine) => engine,
        }
    }

    fn needs_transparency(&self) -> bool {
        matches!(self, LayerKind::Textbox(_))
    }

    /// Kinds whose annotations keep a constant on-screen size, so the raster
    /// goes stale whenever the magnification changes.
    fn needs_inflation(&self) -> bool {
        matches!(self, LayerKind::Textbox(_) | LayerKind::Measuring(_))
    }

    /// Gesture tuning for this kind of layer, derived from the surface defaults.
    pub fn gesture_config(&self, config: &SurfaceConfig) -> GestureConfig {
        match self {
            LayerKind::Drawing(_) => config.gesture,
            LayerKind::Textbox(_) => GestureConfig {
                long_press_ms: config.text.long_press_ms,
                ..config.gesture
            },
            LayerKind::Measuring(_) => GestureConfig {
                max_accidental_moves: config.measuring.max_accidental_moves,
                min_draw_dp: config.measuring.min_draw_dp,
                ..config.gesture
            },
        }
    }

    fn label(&self) -> &'static str {
        match self {
            LayerKind::Drawing(_) => "drawing",
            LayerKind::Textbox(_) => "textbox",
            LayerKind::Measuring(_) => "measuring",
        }
    }
}

pub struct Layer {
    id: LayerId,
    name: String,
    needs_transparency: bool,
    needs_inflation: bool,
    active: bool,
    recognizer: GestureRecognizer,
    pub kind: LayerKind,
}

impl Layer {
    pub fn new(name: impl Into<String>, kind: LayerKind, gesture: GestureConfig) -> Self {
        let layer = Self {
            id: LayerId::new(),
            name: name.into(),
            needs_transparency: kind.needs_transparency(),
            needs_inflation: kind.needs_inflation(),
            active: false,
            recognizer: GestureRecognizer::new(gesture),
            kind,
        };
        log::debug!("Created {} layer '{}' ({})", layer.kind.label(), layer.name, layer.id);
        layer
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn needs_transparency(&self) -> bool {
        self.needs_transparency
    }

    pub fn needs_inflation(&self) -> bool {
        self.needs_inflation
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn recognizer(&self) -> &GestureRecognizer {
        &self.recognizer
    }

    pub fn annotations(&self) -> Box<dyn Iterator<Item = &dyn Annotation> + '_> {
        self.kind.overlay().annotations()
    }

    pub fn pending(&self) -> Option<&dyn Annotation> {
        self.kind.overlay().pending()
    }

    fn accepts_input(&self) -> bool {
        match &self.kind {
            LayerKind::Measuring(engine) => !engine.extraction_pending(),
            _ => true,
        }
    }

    pub fn process_frame(&mut self, frame: &PointerFrame, ctx: &mut LayerContext) -> Redraw {
        if !self.accepts_input() {
            log::debug!("Layer '{}' is busy, ignoring input", self.name);
            return Redraw::None;
        }
        let events = self.recognizer.process(frame, ctx.viewport, &ctx.metrics);
        events
            .into_iter()
            .fold(Redraw::None, |redraw, event| redraw.merge(self.handle(event, ctx)))
    }

    /// Fires a due long-press timer.
    pub fn tick(&mut self, now: std::time::Duration, ctx: &mut LayerContext) -> Redraw {
        if !self.accepts_input() {
            return Redraw::None;
        }
        match self.recognizer.poll(now) {
            Some(event) => self.handle(event, ctx),
            None => Redraw::None,
        }
    }

    pub fn handle(&mut self, event: GestureEvent, ctx: &mut LayerContext) -> Redraw {
        let overlay = self.kind.overlay_mut();
        match event {
            GestureEvent::Start(pos) => overlay.on_start(pos, ctx),
            GestureEvent::Draw {
                pos,
                dx,
                dy,
                possibly_accidental,
            } => overlay.on_draw(pos, dx, dy, possibly_accidental, ctx),
            GestureEvent::UnintendedDraw => overlay.on_unintended_draw(ctx),
            GestureEvent::Finish { pos, max_fingers } => overlay.on_finish(pos, max_fingers, ctx),
            GestureEvent::LongPress(pos) => overlay.on_long_press(pos, ctx),
            GestureEvent::Pan { dx, dy } => overlay.on_pan(dx, dy, ctx),
            GestureEvent::Zoom(delta) => overlay.on_zoom(delta, ctx),
        }
    }

    pub fn set_active(&mut self, active: bool, ctx: &mut LayerContext) -> Redraw {
        self.active = active;
        if !active {
            self.recognizer.cancel_long_press();
        }
        log::info!("Layer '{}' active: {}", self.name, active);
        self.kind.overlay_mut().on_activation_changed(active, ctx)
    }

    pub fn save(&self) -> anyhow::Result<serde_json::Value> {
        self.kind.overlay().save()
    }

    pub fn restore(&mut self, value: serde_json::Value) -> anyhow::Result<()> {
        self.kind.overlay_mut().restore(value)
    }
}
