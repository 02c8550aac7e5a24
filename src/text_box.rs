use serde::{Deserialize, Serialize};

use crate::canvas::RelativePoint;
use crate::config::TextConfig;
use crate::drawing::{Annotation, RenderContext};
use crate::math::{Rect, distance};
use crate::renderer::{Paint, Painter};
use crate::text_renderer::{self, TextLayout};

const TEXT_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
const OUTLINE_COLOR: [f32; 4] = [0.2, 0.6, 1.0, 1.0];

/// Part of a text box a pointer grabbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grip {
    Body,
    Left,
    Right,
    Top,
    Bottom,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Grip {
    fn moves_left(self) -> bool {
        matches!(self, Grip::Left | Grip::TopLeft | Grip::BottomLeft)
    }

    fn moves_right(self) -> bool {
        matches!(self, Grip::Right | Grip::TopRight | Grip::BottomRight)
    }

    fn moves_top(self) -> bool {
        matches!(self, Grip::Top | Grip::TopLeft | Grip::TopRight)
    }

    fn moves_bottom(self) -> bool {
        matches!(self, Grip::Bottom | Grip::BottomLeft | Grip::BottomRight)
    }
}

/// Resizable text label stored relative to the image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBox {
    pub top_left: RelativePoint,
    pub bottom_right: RelativePoint,
    #[serde(default)]
    pub text: String,
    pub font_px: f32,
    #[serde(default)]
    pub selected: bool,
    pub padding: f32,
    pub outline_width: f32,
    /// Date stamp: moved but never resized or edited.
    #[serde(default)]
    pub timestamp: bool,
}

impl TextBox {
    pub fn new(rect: Rect, image_size: [f32; 2], config: &TextConfig, density: f32) -> Self {
        let mut text_box = Self {
            top_left: RelativePoint::new(0.0, 0.0),
            bottom_right: RelativePoint::new(0.0, 0.0),
            text: String::new(),
            font_px: config.default_font_px,
            selected: false,
            padding: config.padding_dp * density,
            outline_width: config.outline_dp * density,
            timestamp: false,
        };
        text_box.set_rect(rect, image_size);
        text_box
    }

    pub fn rect(&self, image_size: [f32; 2]) -> Rect {
        Rect::from_corners(
            self.top_left.to_point(image_size[0], image_size[1]),
            self.bottom_right.to_point(image_size[0], image_size[1]),
        )
    }

    pub fn set_rect(&mut self, rect: Rect, image_size: [f32; 2]) {
        let relative = |p: [f32; 2]| {
            RelativePoint::new(
                p[0] as f64 / image_size[0] as f64,
                p[1] as f64 / image_size[1] as f64,
            )
        };
        self.top_left = relative([rect.x, rect.y]);
        self.bottom_right = relative([rect.right(), rect.bottom()]);
    }

    pub fn layout(&self, ctx: &RenderContext) -> TextLayout {
        let rect = self.rect(ctx.image_size);
        let max_width = (rect.width - 2.0 * self.padding).max(1.0);
        text_renderer::layout_text(ctx.font, &self.text, self.font_px, max_width)
    }

    /// Grows the box vertically so the wrapped text fits, staying inside the image.
    pub fn fit_text(&mut self, ctx: &RenderContext) {
        let layout = self.layout(ctx);
        let mut rect = self.rect(ctx.image_size);
        let needed = layout.height + 2.0 * self.padding;
        if needed > rect.height {
            rect.height = needed.min(ctx.image_size[1]);
            rect = rect.translated_into(&Rect::new(0.0, 0.0, ctx.image_size[0], ctx.image_size[1]));
            self.set_rect(rect, ctx.image_size);
        }
    }

    /// Finds which part of the box `point` grabs. Resize grips only apply to a selected box.
    pub fn grip_at(&self, point: [f32; 2], ctx: &RenderContext, config: &TextConfig) -> Option<Grip> {
        let rect = self.rect(ctx.image_size);
        let magnification = ctx.magnification.max(f32::EPSILON);
        let edge = ctx.dp_to_px(config.edge_grab_dp) / magnification;
        let corner = ctx.dp_to_px(config.corner_grab_dp) / magnification;

        if self.selected && !self.timestamp {
            let corners = [
                ([rect.x, rect.y], Grip::TopLeft),
                ([rect.right(), rect.y], Grip::TopRight),
                ([rect.x, rect.bottom()], Grip::BottomLeft),
                ([rect.right(), rect.bottom()], Grip::BottomRight),
            ];
            for (position, grip) in corners {
                if distance(point, position) < corner {
                    return Some(grip);
                }
            }

            let within_x = point[0] > rect.x - edge && point[0] < rect.right() + edge;
            let within_y = point[1] > rect.y - edge && point[1] < rect.bottom() + edge;
            if within_y && (point[0] - rect.x).abs() < edge {
                return Some(Grip::Left);
            }
            if within_y && (point[0] - rect.right()).abs() < edge {
                return Some(Grip::Right);
            }
            if within_x && (point[1] - rect.y).abs() < edge {
                return Some(Grip::Top);
            }
            if within_x && (point[1] - rect.bottom()).abs() < edge {
                return Some(Grip::Bottom);
            }
        }

        rect.contains_point(point).then_some(Grip::Body)
    }

    /// Applies a drag of (`dx`, `dy`) on `grip` to `start`, keeping at least `min_size`.
    pub fn dragged_rect(start: Rect, grip: Grip, dx: f32, dy: f32, min_size: [f32; 2], bounds: Rect) -> Rect {
        if grip == Grip::Body {
            return start.offset(dx, dy).translated_into(&bounds);
        }

        // The minimum grows as the view zooms out, so it can exceed what fits
        // between an edge of the box and the bounds.
        let min_width = min_size[0].min(bounds.width);
        let min_height = min_size[1].min(bounds.height);
        let mut left = start.x;
        let mut top = start.y;
        let mut right = start.right();
        let mut bottom = start.bottom();

        if grip.moves_left() {
            left = (left + dx).min((right - min_width).max(bounds.x)).max(bounds.x);
        }
        if grip.moves_right() {
            right = (right + dx).max((left + min_width).min(bounds.right())).min(bounds.right());
        }
        if grip.moves_top() {
            top = (top + dy).min((bottom - min_height).max(bounds.y)).max(bounds.y);
        }
        if grip.moves_bottom() {
            bottom = (bottom + dy).max((top + min_height).min(bounds.bottom())).min(bounds.bottom());
        }

        Rect::new(left, top, right - left, bottom - top)
    }
}

impl Annotation for TextBox {
    fn draw(&self, painter: &mut dyn Painter, ctx: &RenderContext) {
        let rect = self.rect(ctx.image_size);
        let layout = self.layout(ctx);

        for (index, line) in layout.lines.iter().enumerate() {
            let origin = [
                rect.x + self.padding,
                rect.y + self.padding + index as f32 * layout.line_height,
            ];
            painter.draw_text(line, ctx.to_raster(origin), self.font_px * ctx.resize_ratio, TEXT_COLOR);
        }

        if self.selected {
            let width = self.outline_width / ctx.magnification.max(f32::EPSILON) * ctx.resize_ratio;
            painter.draw_rect(rect.scaled(ctx.resize_ratio), &Paint::stroke(OUTLINE_COLOR, width));
        }
    }

    fn hit_test(&self, point: [f32; 2], ctx: &RenderContext) -> bool {
        self.rect(ctx.image_size).contains_point(point)
    }
}
