use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Tunables for the whole annotation surface. Every field has a default, so a
/// partial JSON document is enough to override a single value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub gesture: GestureConfig,
    pub viewport: ViewportConfig,
    pub resolution: ResolutionConfig,
    pub drawing: DrawingConfig,
    pub text: TextConfig,
    pub measuring: MeasuringConfig,
}

impl SurfaceConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("failed to parse surface configuration")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    pub long_press_ms: u64,
    /// Moves counted from gesture start below which a draw may still turn into a zoom.
    pub max_accidental_moves: u32,
    pub min_draw_dp: f32,
    pub min_zoom_dp: f32,
    pub long_press_cancel_dp: f32,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            long_press_ms: 500,
            max_accidental_moves: 3,
            min_draw_dp: 1.0,
            min_zoom_dp: 1.0,
            long_press_cancel_dp: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    pub max_magnification: f32,
    pub focus_padding: f32,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            max_magnification: 2.0,
            focus_padding: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    pub active_ratio: f32,
    pub background_ratio: f32,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            active_ratio: 0.7,
            background_ratio: 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawingConfig {
    pub size_exponent: f32,
    pub width_divisions: f32,
    pub eraser_multiplier: f32,
    pub default_size: u32,
    pub default_color: [f32; 4],
}

impl Default for DrawingConfig {
    fn default() -> Self {
        Self {
            size_exponent: 1.3,
            width_divisions: 300.0,
            eraser_multiplier: 4.0,
            default_size: 4,
            default_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    pub long_press_ms: u64,
    pub default_font_px: f32,
    pub min_font_px: f32,
    pub font_step_px: f32,
    pub min_width_dp: f32,
    pub min_height_dp: f32,
    pub min_area_dp2: f32,
    pub padding_dp: f32,
    pub outline_dp: f32,
    pub edge_grab_dp: f32,
    pub corner_grab_dp: f32,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            long_press_ms: 300,
            default_font_px: 42.0,
            min_font_px: 12.0,
            font_step_px: 4.0,
            min_width_dp: 160.0,
            min_height_dp: 90.0,
            min_area_dp2: 500.0,
            padding_dp: 3.0,
            outline_dp: 2.0,
            edge_grab_dp: 20.0,
            corner_grab_dp: 40.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasuringConfig {
    pub processing_scale: f32,
    pub center_tolerance: f64,
    pub edge_tolerance: f64,
    pub min_line_dp: f32,
    pub endpoint_grab_dp: f32,
    pub label_grab_dp: f32,
    pub label_font_px: f32,
    pub unit_label: String,
    pub max_accidental_moves: u32,
    pub min_draw_dp: f32,
}

impl Default for MeasuringConfig {
    fn default() -> Self {
        Self {
            processing_scale: 0.5,
            center_tolerance: 1.0 / 30000.0,
            edge_tolerance: 1.0 / 30000.0,
            min_line_dp: 5.0,
            endpoint_grab_dp: 20.0,
            label_grab_dp: 15.0,
            label_font_px: 20.0,
            unit_label: "cm".to_string(),
            max_accidental_moves: 6,
            min_draw_dp: 0.0,
        }
    }
}
