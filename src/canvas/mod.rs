mod metrics;
mod surface;
mod viewport;

pub use metrics::DisplayMetrics;
pub use surface::{Background, CompositeSurface};
pub use viewport::{RelativePoint, Viewport};
