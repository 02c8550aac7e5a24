use anyhow::Context;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{LayerContext, Overlay};
use crate::app_state::Notice;
use crate::config::TextConfig;
use crate::drawing::{Annotation, Redraw};
use crate::math::Rect;
use crate::persist;
use crate::text_box::{Grip, TextBox};
use crate::text_renderer;

const TIMESTAMP_FORMAT: &str = "%b-%d-%Y %I:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Deselect,
    Create,
    Edit,
}

#[derive(Debug, Clone, Copy)]
struct Drag {
    grip: Grip,
    start: Rect,
    anchor: [f32; 2],
}

/// Text labels the user creates by dragging or long-pressing.
pub struct TextboxLayer {
    config: TextConfig,
    boxes: Vec<TextBox>,
    selected: Option<usize>,
    mode: Mode,
    down: [f32; 2],
    drag: Option<Drag>,
    saved_view: Option<Rect>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TextboxSnapshot {
    pub version: u32,
    pub boxes: Vec<TextBox>,
}

impl TextboxLayer {
    pub fn new(config: TextConfig) -> Self {
        Self {
            config,
            boxes: Vec::new(),
            selected: None,
            mode: Mode::Deselect,
            down: [0.0, 0.0],
            drag: None,
            saved_view: None,
        }
    }

    pub fn boxes(&self) -> &[TextBox] {
        &self.boxes
    }

    pub fn selected(&self) -> Option<&TextBox> {
        self.selected.and_then(|index| self.boxes.get(index))
    }

    pub fn has_timestamp(&self) -> bool {
        self.boxes.iter().any(|text_box| text_box.timestamp)
    }

    pub fn set_text(&mut self, text: &str, ctx: &mut LayerContext) -> Redraw {
        let render = ctx.render_context();
        let Some(text_box) = self.selected.and_then(|index| self.boxes.get_mut(index)) else {
            return Redraw::None;
        };
        if text_box.timestamp {
            return Redraw::None;
        }
        text_box.text = text.to_string();
        text_box.fit_text(&render);
        Redraw::Full
    }

    pub fn increase_font_size(&mut self, ctx: &mut LayerContext) -> Redraw {
        let step = self.config.font_step_px;
        self.adjust_font(ctx, |px| px + step)
    }

    pub fn decrease_font_size(&mut self, ctx: &mut LayerContext) -> Redraw {
        let (step, min) = (self.config.font_step_px, self.config.min_font_px);
        self.adjust_font(ctx, |px| (px - step).max(min))
    }

    pub fn deselect(&mut self, ctx: &mut LayerContext) -> Redraw {
        self.select(None, ctx);
        Redraw::Full
    }

    pub fn delete_selected(&mut self, ctx: &mut LayerContext) -> Redraw {
        let Some(index) = self.selected.take() else {
            return Redraw::None;
        };
        let removed = self.boxes.remove(index);
        ctx.notify(Notice::TextBoxSelected(false));
        if removed.timestamp {
            ctx.notify(Notice::TimestampExistenceChanged(false));
        }
        Redraw::Full
    }

    pub fn clear(&mut self, ctx: &mut LayerContext) -> Redraw {
        let had_timestamp = self.has_timestamp();
        self.boxes.clear();
        if self.selected.take().is_some() {
            ctx.notify(Notice::TextBoxSelected(false));
        }
        if had_timestamp {
            ctx.notify(Notice::TimestampExistenceChanged(false));
        }
        Redraw::Full
    }

    /// Stamps `now` into a selected box at the top-left of the image. Only one
    /// stamp may exist at a time.
    pub fn add_timestamp(&mut self, now: NaiveDateTime, ctx: &mut LayerContext) -> Redraw {
        if self.has_timestamp() {
            log::debug!("Timestamp already on the canvas");
            return Redraw::None;
        }

        let render = ctx.render_context();
        let bounds = Self::image_bounds(ctx);
        let text = now.format(TIMESTAMP_FORMAT).to_string();
        let mut text_box = self.new_box(Rect::new(0.0, 0.0, 1.0, 1.0), ctx);
        let width = text_renderer::measure_line(render.font, &text, text_box.font_px) + 2.0 * text_box.padding + 1.0;
        let height = text_renderer::line_height(render.font, text_box.font_px) + 2.0 * text_box.padding;
        text_box.set_rect(
            Rect::new(0.0, 0.0, width.min(bounds.width), height.min(bounds.height)),
            render.image_size,
        );
        text_box.text = text;
        text_box.timestamp = true;
        text_box.fit_text(&render);

        self.boxes.push(text_box);
        self.select(Some(self.boxes.len() - 1), ctx);
        self.mode = Mode::Edit;
        ctx.notify(Notice::TimestampExistenceChanged(true));
        log::info!("Added timestamp");
        Redraw::Full
    }

    /// Zooms the viewport onto the selected box, remembering the current view.
    pub fn focus_selected(&mut self, ctx: &mut LayerContext) -> Redraw {
        let image_size = ctx.image_size();
        let Some(rect) = self.selected().map(|text_box| text_box.rect(image_size)) else {
            return Redraw::None;
        };
        self.saved_view = Some(ctx.viewport.rect());
        if ctx.viewport.focus_on_rect(rect) {
            Redraw::View
        } else {
            Redraw::None
        }
    }

    pub fn restore_view(&mut self, ctx: &mut LayerContext) -> Redraw {
        match self.saved_view.take() {
            Some(rect) => {
                ctx.viewport.restore_rect(rect);
                Redraw::View
            }
            None => Redraw::None,
        }
    }

    fn adjust_font(&mut self, ctx: &mut LayerContext, change: impl Fn(f32) -> f32) -> Redraw {
        let render = ctx.render_context();
        let Some(text_box) = self.selected.and_then(|index| self.boxes.get_mut(index)) else {
            return Redraw::None;
        };
        text_box.font_px = change(text_box.font_px);
        text_box.fit_text(&render);
        Redraw::Full
    }

    /// Selects `index`, deleting the previously selected box if it was left empty.
    fn select(&mut self, index: Option<usize>, ctx: &mut LayerContext) {
        let mut index = index;
        if let Some(previous) = self.selected {
            if Some(previous) != index && self.boxes.get(previous).is_some_and(|b| b.text.is_empty()) {
                self.boxes.remove(previous);
                log::debug!("Removed empty text box");
                index = index.map(|i| if i > previous { i - 1 } else { i });
            }
        }

        for text_box in &mut self.boxes {
            text_box.selected = false;
        }
        if let Some(text_box) = index.and_then(|i| self.boxes.get_mut(i)) {
            text_box.selected = true;
        }

        if self.selected.is_some() || index.is_some() {
            ctx.notify(Notice::TextBoxSelected(index.is_some()));
        }
        self.selected = index;
    }

    fn min_size(&self, ctx: &LayerContext) -> [f32; 2] {
        let magnification = ctx.viewport.magnification().max(f32::EPSILON);
        [
            ctx.metrics.dp_to_px(self.config.min_width_dp) / magnification,
            ctx.metrics.dp_to_px(self.config.min_height_dp) / magnification,
        ]
    }

    fn image_bounds(ctx: &LayerContext) -> Rect {
        let [width, height] = ctx.image_size();
        Rect::new(0.0, 0.0, width, height)
    }

    fn new_box(&self, rect: Rect, ctx: &LayerContext) -> TextBox {
        TextBox::new(rect, ctx.image_size(), &self.config, ctx.metrics.density)
    }

    /// On-screen area of a box in dp².
    fn screen_area_dp(rect: Rect, ctx: &LayerContext) -> f32 {
        let magnification = ctx.viewport.magnification();
        ctx.metrics.px_to_dp(rect.width * magnification) * ctx.metrics.px_to_dp(rect.height * magnification)
    }
}

impl Overlay for TextboxLayer {
    fn on_start(&mut self, pos: [f32; 2], ctx: &mut LayerContext) -> Redraw {
        let render = ctx.render_context();
        let hit = self.boxes.iter().enumerate().rev().find_map(|(index, text_box)| {
            text_box
                .grip_at(pos, &render, &self.config)
                .map(|grip| (index, grip, text_box.rect(render.image_size)))
        });

        self.down = pos;
        match hit {
            Some((index, grip, start)) => {
                self.select(Some(index), ctx);
                // `select` may have removed an empty box below this one.
                self.drag = self.selected.map(|_| Drag {
                    grip,
                    start,
                    anchor: pos,
                });
                self.mode = Mode::Edit;
            }
            None => {
                self.select(None, ctx);
                self.drag = None;
                self.mode = Mode::Deselect;
            }
        }
        Redraw::Full
    }

    fn on_draw(
        &mut self,
        pos: [f32; 2],
        _dx: f32,
        _dy: f32,
        possibly_accidental: bool,
        ctx: &mut LayerContext,
    ) -> Redraw {
        let bounds = Self::image_bounds(ctx);
        let image_size = ctx.image_size();
        match self.mode {
            Mode::Edit => {
                let (Some(drag), Some(index)) = (self.drag, self.selected) else {
                    return Redraw::None;
                };
                let min_size = self.min_size(ctx);
                let rect = TextBox::dragged_rect(
                    drag.start,
                    drag.grip,
                    pos[0] - drag.anchor[0],
                    pos[1] - drag.anchor[1],
                    min_size,
                    bounds,
                );
                self.boxes[index].set_rect(rect, image_size);
                Redraw::Full
            }
            Mode::Create => {
                let Some(index) = self.selected else {
                    return Redraw::None;
                };
                self.boxes[index].set_rect(Rect::from_corners(self.down, pos), image_size);
                Redraw::Full
            }
            Mode::Deselect if !possibly_accidental => {
                let text_box = self.new_box(Rect::from_corners(self.down, pos), ctx);
                self.boxes.push(text_box);
                self.select(Some(self.boxes.len() - 1), ctx);
                self.mode = Mode::Create;
                Redraw::Full
            }
            Mode::Deselect => Redraw::None,
        }
    }

    fn on_unintended_draw(&mut self, ctx: &mut LayerContext) -> Redraw {
        if let (Mode::Edit, Some(drag), Some(index)) = (self.mode, self.drag.take(), self.selected) {
            let image_size = ctx.image_size();
            self.boxes[index].set_rect(drag.start, image_size);
            return Redraw::Full;
        }
        Redraw::None
    }

    fn on_finish(&mut self, _pos: [f32; 2], _max_fingers: usize, ctx: &mut LayerContext) -> Redraw {
        self.drag = None;
        let Some(index) = self.selected else {
            self.mode = Mode::Deselect;
            return Redraw::None;
        };

        if self.boxes[index].timestamp {
            self.mode = Mode::Edit;
            return Redraw::Full;
        }

        let image_size = ctx.image_size();
        let rect = self.boxes[index].rect(image_size);
        if Self::screen_area_dp(rect, ctx) < self.config.min_area_dp2 {
            self.boxes.remove(index);
            self.selected = None;
            self.mode = Mode::Deselect;
            ctx.notify(Notice::TextBoxSelected(false));
            log::debug!("Discarded text box below minimum area");
            return Redraw::Full;
        }

        let [min_width, min_height] = self.min_size(ctx);
        let grown = Rect::new(rect.x, rect.y, rect.width.max(min_width), rect.height.max(min_height))
            .translated_into(&Self::image_bounds(ctx));
        let render = ctx.render_context();
        let text_box = &mut self.boxes[index];
        text_box.set_rect(grown, image_size);
        text_box.fit_text(&render);

        if self.mode == Mode::Create {
            ctx.notify(Notice::TextEditRequested);
        }
        self.mode = Mode::Edit;
        Redraw::Full
    }

    fn on_long_press(&mut self, pos: [f32; 2], ctx: &mut LayerContext) -> Redraw {
        if self.selected().is_some_and(|text_box| text_box.timestamp) {
            return Redraw::None;
        }
        if self.mode == Mode::Edit {
            ctx.notify(Notice::TextEditRequested);
            return Redraw::None;
        }

        let [min_width, min_height] = self.min_size(ctx);
        let rect = Rect::new(pos[0], pos[1], min_width, min_height).translated_into(&Self::image_bounds(ctx));
        let text_box = self.new_box(rect, ctx);
        self.boxes.push(text_box);
        self.select(Some(self.boxes.len() - 1), ctx);
        self.mode = Mode::Create;
        Redraw::Full
    }

    fn on_activation_changed(&mut self, _active: bool, ctx: &mut LayerContext) -> Redraw {
        self.select(None, ctx);
        self.mode = Mode::Deselect;
        self.drag = None;
        Redraw::Full
    }

    fn annotations(&self) -> Box<dyn Iterator<Item = &dyn Annotation> + '_> {
        Box::new(self.boxes.iter().map(|text_box| text_box as &dyn Annotation))
    }

    fn save(&self) -> anyhow::Result<serde_json::Value> {
        let snapshot = TextboxSnapshot {
            version: persist::SNAPSHOT_VERSION,
            boxes: self.boxes.clone(),
        };
        serde_json::to_value(snapshot).context("failed to encode text box layer")
    }

    fn restore(&mut self, value: serde_json::Value) -> anyhow::Result<()> {
        let snapshot: TextboxSnapshot =
            serde_json::from_value(value).context("failed to decode text box layer")?;
        persist::check_version(snapshot.version)?;
        self.boxes = snapshot.boxes;
        self.selected = self.boxes.iter().position(|text_box| text_box.selected);
        for (index, text_box) in self.boxes.iter_mut().enumerate() {
            text_box.selected = Some(index) == self.selected;
        }
        self.mode = if self.selected.is_some() { Mode::Edit } else { Mode::Deselect };
        self.drag = None;
        Ok(())
    }
}
