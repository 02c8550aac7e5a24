mod app;
mod app_state;
mod canvas;
mod config;
mod drawing;
mod event_handler;
mod layers;
mod math;
mod measure;
mod persist;
mod renderer;
mod state;
mod text_box;
mod text_renderer;
mod update_logic;

// Re-export the main public interface
pub use app::{Script, Step, replay, run};
pub use app_state::{AnnotationView, Notice};
pub use canvas::{Background, CompositeSurface, DisplayMetrics, RelativePoint, Viewport};
pub use config::{
    DrawingConfig, GestureConfig, MeasuringConfig, ResolutionConfig, SurfaceConfig, TextConfig, ViewportConfig,
};
pub use drawing::{Annotation, Redraw, RenderContext, StrokePath};
pub use event_handler::{GestureEvent, GestureRecognizer};
pub use layers::{DrawingLayer, Layer, LayerContext, LayerId, LayerKind, Overlay, TextboxLayer};
pub use math::Rect;
pub use measure::{
    CalibrationState, CandidateRectangle, ContourExtractor, MeasureMode, MeasurementEngine, MeasuringLine,
    Polygon, StaticExtractor,
};
pub use persist::SessionStore;
pub use renderer::{Paint, Painter, RasterPainter};
pub use state::{PointerAction, PointerFrame};
pub use text_box::TextBox;
