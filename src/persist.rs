use std::collections::BTreeMap;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::app_state::AnnotationView;
use crate::math::Rect;

/// Version written into every layer snapshot.
pub const SNAPSHOT_VERSION: u32 = 1;

const VIEWPORT_KEY: &str = "viewport";
const LAYER_PREFIX: &str = "layer/";

/// Snapshots without a version field count as version 0 and are accepted.
pub fn check_version(version: u32) -> anyhow::Result<()> {
    if version > SNAPSHOT_VERSION {
        bail!("snapshot version {version} is newer than supported version {SNAPSHOT_VERSION}");
    }
    Ok(())
}

/// Key/value store the host keeps between sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionStore {
    entries: BTreeMap<String, Value>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json_string(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("failed to encode session")
    }

    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("failed to parse session")
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LayerEntry {
    #[serde(default)]
    active: bool,
    #[serde(default)]
    data: Value,
}

impl AnnotationView {
    /// Saves the viewport and every layer, keyed by layer name.
    pub fn save_session(&self) -> anyhow::Result<SessionStore> {
        let mut store = SessionStore::new();
        let rect = serde_json::to_value(self.viewport.rect()).context("failed to encode viewport")?;
        store.insert(VIEWPORT_KEY, rect);

        for layer in self.surfaces.iter().flat_map(|surface| surface.layers()) {
            let entry = LayerEntry {
                active: layer.is_active(),
                data: layer
                    .save()
                    .with_context(|| format!("failed to save layer '{}'", layer.name()))?,
            };
            let value = serde_json::to_value(entry).context("failed to encode layer entry")?;
            store.insert(format!("{LAYER_PREFIX}{}", layer.name()), value);
        }
        log::info!("Saved session with {} entries", store.entries.len());
        Ok(store)
    }

    /// Restores whatever the store holds for the layers of this view. Layers
    /// without an entry keep their current state.
    pub fn restore_session(&mut self, store: &SessionStore) -> anyhow::Result<()> {
        if let Some(value) = store.get(VIEWPORT_KEY) {
            let rect: Rect = serde_json::from_value(value.clone()).context("failed to decode viewport")?;
            self.viewport.restore_rect(rect);
        }

        for id in self.layer_ids() {
            let Some(index) = self.surface_of(id) else {
                continue;
            };
            let Some(layer) = self.surfaces[index].layer_mut(id) else {
                continue;
            };
            let name = layer.name().to_string();
            let Some(value) = store.get(&format!("{LAYER_PREFIX}{name}")) else {
                log::debug!("No saved state for layer '{name}'");
                continue;
            };
            let entry: LayerEntry = serde_json::from_value(value.clone())
                .with_context(|| format!("failed to decode entry for layer '{name}'"))?;
            if !entry.data.is_null() {
                layer
                    .restore(entry.data)
                    .with_context(|| format!("failed to restore layer '{name}'"))?;
            }
            if entry.active != layer.is_active() {
                self.set_active(id, entry.active);
            }
        }

        self.redraw_everything();
        log::info!("Restored session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use image::RgbaImage;
    use serde_json::json;

    use super::*;
    use crate::canvas::{Background, DisplayMetrics};
    use crate::config::{DrawingConfig, SurfaceConfig};
    use crate::layers::{DrawingLayer, LayerKind};
    use crate::state::{PointerAction::*, PointerFrame};

    fn new_view() -> AnnotationView {
        let image = Arc::new(RgbaImage::new(800, 400));
        let mut view = AnnotationView::new(image, DisplayMetrics::default(), SurfaceConfig::default());
        view.on_display_size_changed(400.0, 200.0);
        let surface = view.add_surface(Background::Transparent);
        view.add_layer(surface, "ink", LayerKind::Drawing(DrawingLayer::new(DrawingConfig::default())));
        view
    }

    fn strokes(view: &AnnotationView) -> usize {
        match &view.layer_by_name("ink").unwrap().kind {
            LayerKind::Drawing(layer) => layer.strokes().len(),
            _ => 0,
        }
    }

    #[test]
    fn test_version_check() {
        assert!(check_version(0).is_ok());
        assert!(check_version(SNAPSHOT_VERSION).is_ok());
        assert!(check_version(SNAPSHOT_VERSION + 1).is_err());
    }

    #[test]
    fn test_session_round_trip() {
        let mut view = new_view();
        let id = view.layer_by_name("ink").unwrap().id();
        view.activate_sole(id);
        for frame in [
            PointerFrame::new(Down, &[[10.0, 10.0]], Default::default()),
            PointerFrame::new(Move, &[[100.0, 100.0]], Default::default()),
            PointerFrame::new(Up, &[[100.0, 100.0]], Default::default()),
        ] {
            view.handle_pointer_frame(&frame);
        }
        view.viewport.zoom(100.0);
        let zoomed = view.viewport().rect();

        let json = view.save_session().unwrap().to_json_string().unwrap();
        let store = SessionStore::from_json_str(&json).unwrap();

        let mut restored = new_view();
        restored.restore_session(&store).unwrap();
        assert_eq!(strokes(&restored), 1);
        assert!(restored.layer_by_name("ink").unwrap().is_active());
        let rect = restored.viewport().rect();
        assert!((rect.x - zoomed.x).abs() < 1e-3 && (rect.y - zoomed.y).abs() < 1e-3);
        assert!((rect.width - zoomed.width).abs() < 1e-3);
    }

    #[test]
    fn test_missing_entries_are_skipped() {
        let mut view = new_view();
        let mut store = SessionStore::new();
        store.insert("layer/ink", json!({ "active": false }));
        store.insert("layer/unknown", json!({ "data": { "version": 1 } }));
        view.restore_session(&store).unwrap();
        assert_eq!(strokes(&view), 0);
    }

    #[test]
    fn test_newer_snapshot_is_rejected() {
        let mut view = new_view();
        let mut store = SessionStore::new();
        store.insert("layer/ink", json!({ "data": { "version": SNAPSHOT_VERSION + 1 } }));
        assert!(view.restore_session(&store).is_err());
    }
}
