use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::candidate::{CandidateRectangle, dedup_candidates};
use super::line::{LineGrip, LineStyle, MeasuringLine};
use crate::app_state::Notice;
use crate::config::MeasuringConfig;
use crate::drawing::{Annotation, Redraw};
use crate::layers::{LayerContext, Overlay};
use crate::persist;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MeasureMode {
    #[default]
    SelectReference,
    Measure,
}

/// The chosen reference and the scale derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalibrationState {
    /// Index into the candidate list.
    pub reference: Option<usize>,
    /// Real-world units per image pixel; 0 when uncalibrated.
    pub units_per_pixel: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasuringSnapshot {
    pub version: u32,
    pub mode: MeasureMode,
    pub candidates: Option<Vec<CandidateRectangle>>,
    pub lines: Vec<MeasuringLine>,
}

/// Parses a user-supplied reference length. Anything that is not a finite,
/// non-negative number counts as uncalibrated.
pub fn parse_reference_length(input: &str) -> f64 {
    match input.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => value,
        _ => {
            log::warn!("Invalid reference length {input:?}, treating as uncalibrated");
            0.0
        }
    }
}

pub struct MeasurementEngine {
    config: MeasuringConfig,
    style: LineStyle,
    mode: MeasureMode,
    active: bool,
    candidates: Option<Vec<CandidateRectangle>>,
    show_candidates: bool,
    lines: Vec<MeasuringLine>,
    current: Option<usize>,
    extraction_requested: bool,
    extraction_pending: bool,
}

impl MeasurementEngine {
    pub fn new(config: MeasuringConfig) -> Self {
        Self {
            style: LineStyle::from(&config),
            config,
            mode: MeasureMode::SelectReference,
            active: false,
            candidates: None,
            show_candidates: false,
            lines: Vec::new(),
            current: None,
            extraction_requested: false,
            extraction_pending: false,
        }
    }

    pub fn config(&self) -> &MeasuringConfig {
        &self.config
    }

    pub fn mode(&self) -> MeasureMode {
        self.mode
    }

    pub fn candidates(&self) -> Option<&[CandidateRectangle]> {
        self.candidates.as_deref()
    }

    pub fn candidates_visible(&self) -> bool {
        self.show_candidates
    }

    pub fn lines(&self) -> &[MeasuringLine] {
        &self.lines
    }

    pub fn selected_line(&self) -> Option<&MeasuringLine> {
        self.current.and_then(|index| self.lines.get(index))
    }

    pub fn calibration(&self) -> CalibrationState {
        let reference = self
            .candidates
            .as_ref()
            .and_then(|candidates| candidates.iter().position(|c| c.selected));
        let units_per_pixel = reference
            .and_then(|index| self.candidates.as_ref().map(|c| c[index].units_per_pixel()))
            .unwrap_or(0.0);
        CalibrationState {
            reference,
            units_per_pixel,
        }
    }

    pub fn extraction_pending(&self) -> bool {
        self.extraction_pending
    }

    /// Returns true once per request for contour extraction.
    pub fn take_extraction_request(&mut self) -> bool {
        std::mem::take(&mut self.extraction_requested)
    }

    pub fn begin_extraction(&mut self) {
        self.extraction_pending = true;
    }

    pub fn set_mode(&mut self, mode: MeasureMode, ctx: &mut LayerContext) -> Redraw {
        self.mode = mode;
        ctx.notify(Notice::MeasuringModeChanged(mode));

        if self.active {
            match mode {
                MeasureMode::Measure => self.show_candidates = false,
                MeasureMode::SelectReference => {
                    self.select_line(None, ctx);
                    if self.candidates.is_none() {
                        if !self.extraction_pending {
                            self.extraction_requested = true;
                        }
                    } else {
                        self.show_candidates = true;
                    }
                }
            }
        } else {
            self.show_candidates = false;
            self.select_line(None, ctx);
        }
        log::debug!("Measuring mode {:?}", mode);
        Redraw::Full
    }

    /// Returns to reference selection, keeping every measuring line.
    pub fn recalibrate(&mut self, ctx: &mut LayerContext) -> Redraw {
        self.set_mode(MeasureMode::SelectReference, ctx)
    }

    /// Deduplicates and installs the extractor's candidates.
    pub fn set_candidates(&mut self, candidates: Vec<CandidateRectangle>, ctx: &mut LayerContext) -> Redraw {
        let [width, height] = ctx.image_size();
        let found = candidates.len();
        let unique = dedup_candidates(
            candidates,
            width as f64 * height as f64,
            self.config.center_tolerance,
            self.config.edge_tolerance,
        );
        log::info!("Contour extraction found {} candidates, {} unique", found, unique.len());

        self.extraction_pending = false;
        ctx.notify(Notice::ExtractionFinished { count: unique.len() });
        if unique.is_empty() {
            ctx.notify(Notice::NoContoursFound);
        }
        self.candidates = Some(unique);
        self.show_candidates = self.active && self.mode == MeasureMode::SelectReference;
        Redraw::Full
    }

    /// Assigns the real-world long-edge length of the selected reference and
    /// switches to measuring. Unparsable input leaves the layer uncalibrated.
    pub fn set_reference_length(&mut self, input: &str, ctx: &mut LayerContext) -> Redraw {
        self.set_reference_length_value(parse_reference_length(input), ctx)
    }

    pub fn set_reference_length_value(&mut self, length: f64, ctx: &mut LayerContext) -> Redraw {
        let length = if length.is_finite() && length >= 0.0 { length } else { 0.0 };
        let Some(reference) = self
            .candidates
            .as_mut()
            .and_then(|candidates| candidates.iter_mut().find(|c| c.selected))
        else {
            log::warn!("No reference rectangle selected");
            return Redraw::None;
        };
        reference.long_edge_length = Some(length);
        self.apply_calibration();
        self.set_mode(MeasureMode::Measure, ctx)
    }

    pub fn delete_selected_line(&mut self, ctx: &mut LayerContext) -> Redraw {
        let Some(index) = self.current.take() else {
            return Redraw::None;
        };
        self.lines.remove(index);
        ctx.notify(Notice::MeasuringLineSelected(false));
        Redraw::Full
    }

    pub fn clear(&mut self, ctx: &mut LayerContext) -> Redraw {
        self.lines.clear();
        if self.current.take().is_some() {
            ctx.notify(Notice::MeasuringLineSelected(false));
        }
        Redraw::Full
    }

    fn apply_calibration(&mut self) {
        let units_per_pixel = self.calibration().units_per_pixel;
        for line in &mut self.lines {
            line.units_per_pixel = units_per_pixel;
        }
    }

    fn select_line(&mut self, index: Option<usize>, ctx: &mut LayerContext) {
        for (i, line) in self.lines.iter_mut().enumerate() {
            line.selected = Some(i) == index;
            if Some(i) != index {
                line.set_grip(None);
            }
        }
        if self.current.is_some() || index.is_some() {
            ctx.notify(Notice::MeasuringLineSelected(index.is_some()));
        }
        self.current = index;
    }

    fn delete_current_if_too_small(&mut self, ctx: &mut LayerContext) -> bool {
        let image_size = ctx.image_size();
        let Some(index) = self.current else {
            return false;
        };
        if !self.lines[index].is_too_small(image_size, &ctx.metrics) {
            return false;
        }
        self.lines.remove(index);
        self.current = None;
        ctx.notify(Notice::MeasuringLineSelected(false));
        log::debug!("Discarded measuring line below minimum length");
        true
    }
}

impl Overlay for MeasurementEngine {
    fn on_start(&mut self, pos: [f32; 2], ctx: &mut LayerContext) -> Redraw {
        match self.mode {
            MeasureMode::Measure => {
                let render = ctx.render_context();
                let hit = self
                    .lines
                    .iter()
                    .enumerate()
                    .find_map(|(index, line)| line.grip_at(pos, &render).map(|grip| (index, grip)));

                match hit {
                    Some((index, grip)) => {
                        self.select_line(Some(index), ctx);
                        self.lines[index].set_grip(Some(grip));
                    }
                    None => {
                        let point = ctx.viewport.to_relative(pos);
                        let mut line = MeasuringLine::new(point, point, self.style.clone());
                        line.units_per_pixel = self.calibration().units_per_pixel;
                        line.set_grip(Some(LineGrip::End));
                        self.lines.push(line);
                        let index = self.lines.len() - 1;
                        self.select_line(Some(index), ctx);
                    }
                }
                Redraw::Full
            }
            MeasureMode::SelectReference => {
                let Some(candidates) = self.candidates.as_mut() else {
                    return Redraw::None;
                };
                // Smallest first, so a reference nested inside a larger one can be picked.
                let mut found = false;
                for candidate in candidates.iter_mut().rev() {
                    let hit = !found && candidate.contains(pos);
                    candidate.selected = hit;
                    found |= hit;
                }
                ctx.notify(Notice::ContourSelectionChanged(found));
                Redraw::Full
            }
        }
    }

    fn on_draw(
        &mut self,
        _pos: [f32; 2],
        dx: f32,
        dy: f32,
        _possibly_accidental: bool,
        ctx: &mut LayerContext,
    ) -> Redraw {
        if self.mode != MeasureMode::Measure {
            return Redraw::None;
        }
        let image_size = ctx.image_size();
        match self.current.and_then(|index| self.lines.get_mut(index)) {
            Some(line) => {
                line.apply_drag(dx, dy, image_size);
                Redraw::Full
            }
            None => Redraw::None,
        }
    }

    fn on_unintended_draw(&mut self, ctx: &mut LayerContext) -> Redraw {
        if self.mode == MeasureMode::Measure && self.delete_current_if_too_small(ctx) {
            Redraw::Full
        } else {
            Redraw::None
        }
    }

    fn on_finish(&mut self, _pos: [f32; 2], max_fingers: usize, ctx: &mut LayerContext) -> Redraw {
        if self.mode != MeasureMode::Measure {
            return Redraw::None;
        }
        if !self.delete_current_if_too_small(ctx) && max_fingers == 1 && self.current.is_some() {
            ctx.notify(Notice::MeasuringLineSelected(true));
        }
        for line in &mut self.lines {
            line.set_grip(None);
        }
        Redraw::Full
    }

    fn on_zoom(&mut self, delta: f32, ctx: &mut LayerContext) -> Redraw {
        // Handles and grab areas depend on magnification.
        if ctx.viewport.zoom(delta) {
            Redraw::Full
        } else {
            Redraw::None
        }
    }

    fn on_activation_changed(&mut self, active: bool, ctx: &mut LayerContext) -> Redraw {
        self.active = active;
        if active && self.candidates.as_ref().is_some_and(|c| c.is_empty()) {
            ctx.notify(Notice::NoContoursFound);
        }
        self.set_mode(self.mode, ctx)
    }

    fn annotations(&self) -> Box<dyn Iterator<Item = &dyn Annotation> + '_> {
        let lines = self.lines.iter().map(|line| line as &dyn Annotation);
        let candidates = self
            .candidates
            .iter()
            .filter(|_| self.show_candidates)
            .flatten()
            .map(|candidate| candidate as &dyn Annotation);
        Box::new(lines.chain(candidates))
    }

    fn save(&self) -> anyhow::Result<serde_json::Value> {
        let snapshot = MeasuringSnapshot {
            version: persist::SNAPSHOT_VERSION,
            mode: self.mode,
            candidates: self.candidates.clone(),
            lines: self.lines.clone(),
        };
        serde_json::to_value(snapshot).context("failed to encode measuring layer")
    }

    fn restore(&mut self, value: serde_json::Value) -> anyhow::Result<()> {
        let snapshot: MeasuringSnapshot =
            serde_json::from_value(value).context("failed to decode measuring layer")?;
        persist::check_version(snapshot.version)?;

        self.mode = snapshot.mode;
        self.candidates = snapshot.candidates;
        self.lines = snapshot.lines;
        self.current = self.lines.iter().position(|line| line.selected);
        for line in &mut self.lines {
            line.style = self.style.clone();
        }
        self.apply_calibration();
        self.show_candidates =
            self.active && self.mode == MeasureMode::SelectReference && self.candidates.is_some();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{DisplayMetrics, Viewport};
    use crate::config::ViewportConfig;

    fn with_ctx(f: impl FnOnce(&mut LayerContext)) -> Vec<Notice> {
        let mut viewport = Viewport::new(1000, 1000, ViewportConfig::default());
        viewport.set_display_size(1000.0, 1000.0);
        let mut notices = Vec::new();
        let mut ctx = LayerContext {
            viewport: &mut viewport,
            metrics: DisplayMetrics::default(),
            notices: &mut notices,
            layer_count: 1,
            font: None,
        };
        f(&mut ctx);
        notices
    }

    fn rect(x: f32, y: f32, w: f32, h: f32) -> CandidateRectangle {
        CandidateRectangle::new([[x, y], [x + w, y], [x + w, y + h], [x, y + h]], (w * h) as f64)
    }

    fn active_engine(ctx: &mut LayerContext) -> MeasurementEngine {
        let mut engine = MeasurementEngine::new(MeasuringConfig::default());
        engine.on_activation_changed(true, ctx);
        engine
    }

    fn draw_line(engine: &mut MeasurementEngine, ctx: &mut LayerContext, from: [f32; 2], to: [f32; 2]) {
        engine.on_start(from, ctx);
        engine.on_draw(to, to[0] - from[0], to[1] - from[1], false, ctx);
        engine.on_finish(to, 1, ctx);
    }

    #[test]
    fn test_activation_requests_extraction_once() {
        with_ctx(|ctx| {
            let mut engine = active_engine(ctx);
            assert_eq!(engine.mode(), MeasureMode::SelectReference);
            assert!(engine.take_extraction_request());
            assert!(!engine.take_extraction_request());
            engine.begin_extraction();
            assert!(engine.extraction_pending());

            engine.set_candidates(vec![rect(0.0, 0.0, 100.0, 50.0)], ctx);
            assert!(!engine.extraction_pending());
            assert!(engine.candidates_visible());
            assert_eq!(engine.annotations().count(), 1);
        });
    }

    #[test]
    fn test_empty_extraction_reports_no_contours() {
        let notices = with_ctx(|ctx| {
            let mut engine = active_engine(ctx);
            engine.set_candidates(Vec::new(), ctx);
        });
        assert!(notices.contains(&Notice::NoContoursFound));
    }

    #[test]
    fn test_selects_smallest_containing_candidate() {
        with_ctx(|ctx| {
            let mut engine = active_engine(ctx);
            engine.set_candidates(vec![rect(0.0, 0.0, 500.0, 500.0), rect(100.0, 100.0, 100.0, 100.0)], ctx);
            engine.on_start([150.0, 150.0], ctx);
            let candidates = engine.candidates().unwrap();
            assert!(!candidates[0].selected);
            assert!(candidates[1].selected);
            assert_eq!(engine.calibration().reference, Some(1));

            engine.on_start([400.0, 400.0], ctx);
            assert_eq!(engine.calibration().reference, Some(0));
        });
    }

    #[test]
    fn test_calibration_round_trip() {
        with_ctx(|ctx| {
            let mut engine = active_engine(ctx);
            engine.set_candidates(vec![rect(100.0, 100.0, 400.0, 250.0)], ctx);
            engine.on_start([200.0, 200.0], ctx);
            engine.set_reference_length("8.5", ctx);
            assert_eq!(engine.mode(), MeasureMode::Measure);
            assert!(!engine.candidates_visible());

            let calibration = engine.calibration();
            assert!((calibration.units_per_pixel - 8.5 / 400.0).abs() < 1e-12);

            draw_line(&mut engine, ctx, [100.0, 700.0], [500.0, 700.0]);
            let line = engine.selected_line().unwrap();
            assert!((line.real_length([1000.0, 1000.0]) - 8.5).abs() < 1e-4);
            assert_eq!(line.label_text([1000.0, 1000.0]), "8.50cm");
        });
    }

    #[test]
    fn test_invalid_length_is_uncalibrated() {
        with_ctx(|ctx| {
            let mut engine = active_engine(ctx);
            engine.set_candidates(vec![rect(100.0, 100.0, 400.0, 250.0)], ctx);
            engine.on_start([200.0, 200.0], ctx);
            engine.set_reference_length("abc", ctx);
            assert_eq!(engine.calibration().units_per_pixel, 0.0);

            draw_line(&mut engine, ctx, [100.0, 700.0], [500.0, 700.0]);
            assert_eq!(engine.selected_line().unwrap().label_text([1000.0, 1000.0]), "-");
        });
        assert_eq!(parse_reference_length(" 12.5 "), 12.5);
        assert_eq!(parse_reference_length("-3"), 0.0);
        assert_eq!(parse_reference_length("NaN"), 0.0);
    }

    #[test]
    fn test_small_lines_are_discarded() {
        with_ctx(|ctx| {
            let mut engine = active_engine(ctx);
            engine.set_candidates(vec![rect(100.0, 100.0, 400.0, 250.0)], ctx);
            engine.on_start([200.0, 200.0], ctx);
            engine.set_reference_length("10", ctx);

            draw_line(&mut engine, ctx, [600.0, 600.0], [602.0, 600.0]);
            assert!(engine.lines().is_empty());

            engine.on_start([600.0, 600.0], ctx);
            engine.on_unintended_draw(ctx);
            assert!(engine.lines().is_empty());
        });
    }

    #[test]
    fn test_recalibration_rescales_existing_lines() {
        with_ctx(|ctx| {
            let mut engine = active_engine(ctx);
            engine.set_candidates(vec![rect(100.0, 100.0, 400.0, 250.0)], ctx);
            engine.on_start([200.0, 200.0], ctx);
            engine.set_reference_length("4", ctx);
            draw_line(&mut engine, ctx, [100.0, 700.0], [500.0, 700.0]);

            engine.recalibrate(ctx);
            assert_eq!(engine.mode(), MeasureMode::SelectReference);
            assert!(engine.selected_line().is_none());
            assert_eq!(engine.lines().len(), 1);

            engine.on_start([200.0, 200.0], ctx);
            engine.set_reference_length("8", ctx);
            assert!((engine.lines()[0].real_length([1000.0, 1000.0]) - 8.0).abs() < 1e-4);
        });
    }

    #[test]
    fn test_drag_existing_line_endpoint_and_delete() {
        with_ctx(|ctx| {
            let mut engine = active_engine(ctx);
            engine.set_candidates(vec![rect(100.0, 100.0, 400.0, 250.0)], ctx);
            engine.on_start([200.0, 200.0], ctx);
            engine.set_reference_length("4", ctx);
            draw_line(&mut engine, ctx, [100.0, 700.0], [500.0, 700.0]);

            engine.on_start([102.0, 700.0], ctx);
            engine.on_draw([52.0, 700.0], -50.0, 0.0, false, ctx);
            engine.on_finish([52.0, 700.0], 1, ctx);
            assert!((engine.lines()[0].pixel_length([1000.0, 1000.0]) - 448.0).abs() < 0.01);

            assert_eq!(engine.delete_selected_line(ctx), Redraw::Full);
            assert!(engine.lines().is_empty());
        });
    }

    #[test]
    fn test_snapshot_keeps_mode_and_scale() {
        with_ctx(|ctx| {
            let mut engine = active_engine(ctx);
            engine.set_candidates(vec![rect(100.0, 100.0, 400.0, 250.0)], ctx);
            engine.on_start([200.0, 200.0], ctx);
            engine.set_reference_length("4", ctx);
            draw_line(&mut engine, ctx, [100.0, 700.0], [500.0, 700.0]);
            let saved = engine.save().unwrap();

            let mut restored = MeasurementEngine::new(MeasuringConfig::default());
            restored.restore(saved).unwrap();
            assert_eq!(restored.mode(), MeasureMode::Measure);
            assert!((restored.lines()[0].real_length([1000.0, 1000.0]) - 4.0).abs() < 1e-4);

            let mut empty = MeasurementEngine::new(MeasuringConfig::default());
            empty.restore(serde_json::json!({})).unwrap();
            assert!(empty.candidates().is_none());
            assert_eq!(empty.calibration(), CalibrationState::default());
        });
    }
}
