use serde::{Deserialize, Serialize};

use crate::canvas::{DisplayMetrics, RelativePoint};
use crate::config::MeasuringConfig;
use crate::drawing::{Annotation, RenderContext};
use crate::math::{Rect, clamp, distance};
use crate::renderer::{Paint, Painter};
use crate::text_renderer;

const LINE_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];
const SELECTED_COLOR: [f32; 4] = [0.2, 0.8, 0.2, 1.0];
const TEXT_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
const LINE_WIDTH_DP: f32 = 5.0;
const HANDLE_RADIUS_FACTOR: f32 = 0.5;
const UNCALIBRATED_LABEL: &str = "-";

/// Presentation settings shared by every line of a layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LineStyle {
    pub label_px: f32,
    pub unit_label: String,
    pub endpoint_grab_dp: f32,
    pub label_grab_dp: f32,
    pub min_length_dp: f32,
}

impl Default for LineStyle {
    fn default() -> Self {
        Self::from(&MeasuringConfig::default())
    }
}

impl From<&MeasuringConfig> for LineStyle {
    fn from(config: &MeasuringConfig) -> Self {
        Self {
            label_px: config.label_font_px,
            unit_label: config.unit_label.clone(),
            endpoint_grab_dp: config.endpoint_grab_dp,
            label_grab_dp: config.label_grab_dp,
            min_length_dp: config.min_line_dp,
        }
    }
}

/// Which part of a line a drag moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineGrip {
    Start,
    End,
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasuringLine {
    pub start: RelativePoint,
    pub end: RelativePoint,
    #[serde(default)]
    pub selected: bool,
    #[serde(skip)]
    pub units_per_pixel: f64,
    #[serde(skip)]
    pub style: LineStyle,
    #[serde(skip)]
    grip: Option<LineGrip>,
}

impl MeasuringLine {
    pub fn new(start: RelativePoint, end: RelativePoint, style: LineStyle) -> Self {
        Self {
            start,
            end,
            selected: false,
            units_per_pixel: 0.0,
            style,
            grip: None,
        }
    }

    pub fn endpoints(&self, image_size: [f32; 2]) -> ([f32; 2], [f32; 2]) {
        (
            self.start.to_point(image_size[0], image_size[1]),
            self.end.to_point(image_size[0], image_size[1]),
        )
    }

    pub fn pixel_length(&self, image_size: [f32; 2]) -> f64 {
        let (start, end) = self.endpoints(image_size);
        distance(start, end) as f64
    }

    /// Real-world length, 0 while uncalibrated.
    pub fn real_length(&self, image_size: [f32; 2]) -> f64 {
        self.pixel_length(image_size) * self.units_per_pixel
    }

    pub fn label_text(&self, image_size: [f32; 2]) -> String {
        let length = self.real_length(image_size);
        if length == 0.0 {
            UNCALIBRATED_LABEL.to_string()
        } else {
            format!("{:.2}{}", length, self.style.unit_label)
        }
    }

    /// Label box centred on the line midpoint, in image space.
    pub fn label_rect(&self, ctx: &RenderContext) -> Rect {
        let (start, end) = self.endpoints(ctx.image_size);
        let text = self.label_text(ctx.image_size);
        let width = text_renderer::measure_line(ctx.font, &text, self.style.label_px);
        let height = text_renderer::line_height(ctx.font, self.style.label_px);
        let midpoint = [(start[0] + end[0]) / 2.0, (start[1] + end[1]) / 2.0];
        Rect::centered(midpoint, width, height)
    }

    pub fn is_too_small(&self, image_size: [f32; 2], metrics: &DisplayMetrics) -> bool {
        self.pixel_length(image_size) < metrics.dp_to_px(self.style.min_length_dp) as f64
    }

    pub fn grip(&self) -> Option<LineGrip> {
        self.grip
    }

    pub fn set_grip(&mut self, grip: Option<LineGrip>) {
        self.grip = grip;
    }

    /// The label grabs the whole line; otherwise the nearest endpoint within tolerance.
    pub fn grip_at(&self, point: [f32; 2], ctx: &RenderContext) -> Option<LineGrip> {
        let magnification = ctx.magnification.max(f32::EPSILON);
        let label_tolerance = ctx.dp_to_px(self.style.label_grab_dp) / magnification;
        let label = self.label_rect(ctx).inset(-label_tolerance, -label_tolerance);
        if label.contains_point(point) {
            return Some(LineGrip::Both);
        }

        let endpoint_tolerance = ctx.dp_to_px(self.style.endpoint_grab_dp) / magnification;
        let (start, end) = self.endpoints(ctx.image_size);
        if distance(point, start) < endpoint_tolerance {
            Some(LineGrip::Start)
        } else if distance(point, end) < endpoint_tolerance {
            Some(LineGrip::End)
        } else {
            None
        }
    }

    /// Moves the gripped endpoints by an image-space delta, keeping them on the image.
    pub fn apply_drag(&mut self, dx: f32, dy: f32, image_size: [f32; 2]) {
        let Some(grip) = self.grip else {
            return;
        };
        let shift = |p: RelativePoint| {
            let [x, y] = p.to_point(image_size[0], image_size[1]);
            RelativePoint::new(
                (clamp(x + dx, 0.0, image_size[0]) / image_size[0]) as f64,
                (clamp(y + dy, 0.0, image_size[1]) / image_size[1]) as f64,
            )
        };
        if matches!(grip, LineGrip::Start | LineGrip::Both) {
            self.start = shift(self.start);
        }
        if matches!(grip, LineGrip::End | LineGrip::Both) {
            self.end = shift(self.end);
        }
    }
}

impl Annotation for MeasuringLine {
    fn draw(&self, painter: &mut dyn Painter, ctx: &RenderContext) {
        let color = if self.selected { SELECTED_COLOR } else { LINE_COLOR };
        let (start, end) = self.endpoints(ctx.image_size);
        let (start, end) = (ctx.to_raster(start), ctx.to_raster(end));

        if self.selected {
            // Handles keep a constant on-screen size.
            let radius = ctx.dp_to_px(self.style.endpoint_grab_dp) * HANDLE_RADIUS_FACTOR
                / ctx.magnification.max(f32::EPSILON)
                * ctx.resize_ratio;
            let handle = Paint::stroke(SELECTED_COLOR, ctx.resize_ratio.max(1.0));
            painter.draw_circle(start, radius, &handle);
            painter.draw_circle(end, radius, &handle);
        }

        painter.draw_line(start, end, &Paint::stroke(color, ctx.dp_to_px(LINE_WIDTH_DP) * ctx.resize_ratio));

        let label = self.label_rect(ctx);
        painter.draw_rect(label.scaled(ctx.resize_ratio), &Paint::fill(color));
        painter.draw_text(
            &self.label_text(ctx.image_size),
            ctx.to_raster([label.x, label.y]),
            self.style.label_px * ctx.resize_ratio,
            TEXT_COLOR,
        );
    }

    fn hit_test(&self, point: [f32; 2], ctx: &RenderContext) -> bool {
        self.grip_at(point, ctx).is_some()
    }
}
