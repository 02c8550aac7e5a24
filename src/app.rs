use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ab_glyph::FontArc;
use anyhow::{Context, anyhow, bail};
use image::RgbaImage;
use serde::Deserialize;

use crate::app_state::AnnotationView;
use crate::canvas::{Background, DisplayMetrics};
use crate::config::SurfaceConfig;
use crate::drawing::Redraw;
use crate::layers::{DrawingLayer, LayerId, LayerKind, TextboxLayer};
use crate::measure::{MeasurementEngine, Polygon, StaticExtractor};
use crate::state::PointerFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKindName {
    Drawing,
    Textbox,
    Measuring,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LayerSetup {
    pub name: String,
    pub kind: LayerKindName,
}

/// One scripted host action.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Activate(String),
    Frame(PointerFrame),
    /// Host clock in milliseconds.
    Tick(u64),
    WaitExtraction,
    Resize([f32; 2]),
    ReferenceLength { layer: String, value: String },
    Recalibrate(String),
    Text { layer: String, value: String },
    /// Stamps the current local time into a text layer.
    Timestamp(String),
    Undo(String),
    Redo(String),
}

/// A recorded session: the display, the layers and the actions to replay.
#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    pub display: [f32; 2],
    #[serde(default = "default_density")]
    pub density: f32,
    #[serde(default)]
    pub config: SurfaceConfig,
    #[serde(default)]
    pub font: Option<PathBuf>,
    pub layers: Vec<LayerSetup>,
    /// What the scripted extractor reports, in image space.
    #[serde(default)]
    pub contours: Vec<Polygon>,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub session_out: Option<PathBuf>,
}

fn default_density() -> f32 {
    1.0
}

impl Script {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("failed to parse replay script")
    }
}

fn layer_id(view: &AnnotationView, name: &str) -> anyhow::Result<LayerId> {
    view.layer_by_name(name)
        .map(|layer| layer.id())
        .ok_or_else(|| anyhow!("script refers to unknown layer '{name}'"))
}

/// Builds a view over `image` and plays every step of `script` against it.
pub fn replay(image: RgbaImage, script: &Script) -> anyhow::Result<AnnotationView> {
    let mut view = AnnotationView::new(
        Arc::new(image),
        DisplayMetrics::new(script.density),
        script.config.clone(),
    );
    if let Some(path) = &script.font {
        let bytes = std::fs::read(path).with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontArc::try_from_vec(bytes).map_err(|_| anyhow!("invalid font {}", path.display()))?;
        view.set_font(font);
    }
    view.set_extractor(Arc::new(StaticExtractor::new(script.contours.clone())));
    view.on_display_size_changed(script.display[0], script.display[1]);

    for entry in &script.layers {
        if view.layer_by_name(&entry.name).is_some() {
            bail!("duplicate layer name '{}'", entry.name);
        }
        let config = view.config();
        let kind = match entry.kind {
            LayerKindName::Drawing => LayerKind::Drawing(DrawingLayer::new(config.drawing)),
            LayerKindName::Textbox => LayerKind::Textbox(TextboxLayer::new(config.text)),
            LayerKindName::Measuring => LayerKind::Measuring(MeasurementEngine::new(config.measuring.clone())),
        };
        let surface = view.add_surface(Background::Transparent);
        view.add_layer(surface, &entry.name, kind);
    }

    for (index, step) in script.steps.iter().enumerate() {
        log::debug!("Step {index}: {step:?}");
        match step {
            Step::Activate(name) => {
                let id = layer_id(&view, name)?;
                view.activate_sole(id);
            }
            Step::Frame(frame) => {
                view.handle_pointer_frame(frame);
            }
            Step::Tick(ms) => view.update(Duration::from_millis(*ms)),
            Step::WaitExtraction => view.finish_extraction(),
            Step::Resize([width, height]) => view.on_display_size_changed(*width, *height),
            Step::ReferenceLength { layer, value } => {
                let id = layer_id(&view, layer)?;
                view.edit_layer(id, |kind, ctx| match kind {
                    LayerKind::Measuring(engine) => engine.set_reference_length(value, ctx),
                    _ => Redraw::None,
                });
            }
            Step::Recalibrate(layer) => {
                let id = layer_id(&view, layer)?;
                view.edit_layer(id, |kind, ctx| match kind {
                    LayerKind::Measuring(engine) => engine.recalibrate(ctx),
                    _ => Redraw::None,
                });
            }
            Step::Text { layer, value } => {
                let id = layer_id(&view, layer)?;
                view.edit_layer(id, |kind, ctx| match kind {
                    LayerKind::Textbox(text) => text.set_text(value, ctx),
                    _ => Redraw::None,
                });
            }
            Step::Timestamp(layer) => {
                let id = layer_id(&view, layer)?;
                let now = chrono::Local::now().naive_local();
                view.edit_layer(id, |kind, ctx| match kind {
                    LayerKind::Textbox(text) => text.add_timestamp(now, ctx),
                    _ => Redraw::None,
                });
            }
            Step::Undo(layer) | Step::Redo(layer) => {
                let undo = matches!(step, Step::Undo(_));
                let id = layer_id(&view, layer)?;
                view.edit_layer(id, |kind, _ctx| match kind {
                    LayerKind::Drawing(drawing) if undo => drawing.undo(),
                    LayerKind::Drawing(drawing) => drawing.redo(),
                    _ => Redraw::None,
                });
            }
        }
        for notice in view.drain_notices() {
            log::debug!("  {notice:?}");
        }
    }
    Ok(view)
}

fn replay_files(background: &Path, script: &Path, out: &Path) -> anyhow::Result<()> {
    let image = image::open(background)
        .with_context(|| format!("failed to load {}", background.display()))?
        .to_rgba8();
    let json = std::fs::read_to_string(script).with_context(|| format!("failed to read {}", script.display()))?;
    let script = Script::from_json_str(&json)?;

    let view = replay(image, &script)?;
    view.compose()
        .save(out)
        .with_context(|| format!("failed to write {}", out.display()))?;
    log::info!("Wrote {}", out.display());

    if let Some(path) = &script.session_out {
        let session = view.save_session()?.to_json_string()?;
        std::fs::write(path, session).with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

pub fn run() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let [_, background, script, out] = args.as_slice() else {
        bail!("usage: annocanvas <background> <script.json> <out.png>");
    };
    replay_files(Path::new(background), Path::new(script), Path::new(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::LayerKind;
    use crate::measure::MeasureMode;
    use image::Rgba;

    const SCRIPT: &str = r#"{
        "display": [500, 500],
        "layers": [
            { "name": "ink", "kind": "drawing" },
            { "name": "measure", "kind": "measuring" }
        ],
        "contours": [
            { "points": [[100, 100], [600, 100], [600, 400], [100, 400]], "area": 150000 }
        ],
        "steps": [
            { "activate": "ink" },
            { "frame": { "action": "Down", "pointers": [[50, 50]] } },
            { "frame": { "action": "Move", "pointers": [[150, 50]] } },
            { "frame": { "action": "Up", "pointers": [[150, 50]] } },
            { "activate": "measure" },
            "wait_extraction",
            { "frame": { "action": "Down", "pointers": [[100, 100]] } },
            { "frame": { "action": "Up", "pointers": [[100, 100]] } },
            { "reference_length": { "layer": "measure", "value": "10" } },
            { "frame": { "action": "Down", "pointers": [[50, 300]] } },
            { "frame": { "action": "Move", "pointers": [[300, 300]] } },
            { "frame": { "action": "Up", "pointers": [[300, 300]] } },
            { "undo": "ink" }
        ]
    }"#;

    #[test]
    fn test_replay_script() {
        let _ = env_logger::builder().is_test(true).try_init();
        let image = RgbaImage::from_pixel(1000, 1000, Rgba([255, 255, 255, 255]));
        let script = Script::from_json_str(SCRIPT).unwrap();
        let view = replay(image, &script).unwrap();

        match &view.layer_by_name("ink").unwrap().kind {
            LayerKind::Drawing(layer) => {
                assert!(layer.strokes().is_empty());
                assert!(layer.can_redo());
            }
            _ => unreachable!(),
        }
        match &view.layer_by_name("measure").unwrap().kind {
            LayerKind::Measuring(engine) => {
                assert_eq!(engine.mode(), MeasureMode::Measure);
                // 250 screen px at magnification 0.5 is 500 image px; the long edge is 500 too.
                let line = engine.selected_line().unwrap();
                assert!((line.real_length([1000.0, 1000.0]) - 10.0).abs() < 1e-3);
            }
            _ => unreachable!(),
        }
        assert_eq!(view.compose().dimensions(), (500, 500));
    }

    #[test]
    fn test_timestamp_step() {
        let script = Script::from_json_str(
            r#"{
                "display": [500, 500],
                "layers": [{ "name": "text", "kind": "textbox" }],
                "steps": [{ "activate": "text" }, { "timestamp": "text" }, { "timestamp": "text" }]
            }"#,
        )
        .unwrap();
        let view = replay(RgbaImage::new(1000, 1000), &script).unwrap();
        match &view.layer_by_name("text").unwrap().kind {
            LayerKind::Textbox(layer) => {
                assert_eq!(layer.boxes().len(), 1);
                assert!(layer.has_timestamp());
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_unknown_layer_is_an_error() {
        let script = Script::from_json_str(
            r#"{ "display": [10, 10], "layers": [], "steps": [{ "activate": "nope" }] }"#,
        )
        .unwrap();
        assert!(replay(RgbaImage::new(10, 10), &script).is_err());
    }
}
