use serde::{Deserialize, Serialize};

/// Screen density information threaded through everything that converts
/// device-independent sizes into pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayMetrics {
    pub density: f32,
}

impl Default for DisplayMetrics {
    fn default() -> Self {
        Self { density: 1.0 }
    }
}

impl DisplayMetrics {
    pub fn new(density: f32) -> Self {
        if density.is_finite() && density > 0.0 {
            Self { density }
        } else {
            log::warn!("Ignoring invalid display density {density}, using 1.0");
            Self::default()
        }
    }

    pub fn dp_to_px(&self, dp: f32) -> f32 {
        (dp * self.density + 0.5).trunc()
    }

    pub fn px_to_dp(&self, px: f32) -> f32 {
        (px / self.density).trunc()
    }
}
