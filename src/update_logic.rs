use std::time::Duration;

use crate::app_state::{AnnotationView, Notice};
use crate::drawing::Redraw;
use crate::layers::{LayerId, LayerKind};
use crate::measure::{CandidateRectangle, ExtractionJob};

impl AnnotationView {
    /// Drives everything time-based: due long-press timers and a finished
    /// contour extraction. Call once per host frame.
    pub fn update(&mut self, now: Duration) {
        let due: Vec<LayerId> = self
            .surfaces
            .iter()
            .flat_map(|surface| surface.layers())
            .filter(|layer| layer.recognizer().long_press_pending())
            .map(|layer| layer.id())
            .collect();
        for id in due {
            self.with_layer(id, |layer, ctx| layer.tick(now, ctx));
        }

        self.poll_extraction();
    }

    /// Blocks until a running extraction is done and applies its result.
    pub fn finish_extraction(&mut self) {
        if let Some(job) = self.job.take() {
            let layer = job.layer();
            let candidates = job.wait();
            self.deliver_candidates(layer, candidates);
        }
    }

    fn poll_extraction(&mut self) {
        let Some(candidates) = self.job.as_ref().and_then(|job| job.try_finish()) else {
            return;
        };
        if let Some(job) = self.job.take() {
            self.deliver_candidates(job.layer(), candidates);
        }
    }

    fn deliver_candidates(&mut self, layer: LayerId, candidates: Vec<CandidateRectangle>) {
        let delivered = self.with_layer(layer, |layer, ctx| match &mut layer.kind {
            LayerKind::Measuring(engine) => engine.set_candidates(candidates, ctx),
            _ => Redraw::None,
        });
        if delivered.is_none() {
            log::warn!("Extraction finished for layer {layer}, which no longer exists");
        }
    }

    /// Starts a worker for the first measuring layer that asked for contours.
    /// Only one extraction runs at a time; later requests wait their turn.
    pub(crate) fn start_requested_extractions(&mut self) {
        if self.job.is_some() {
            return;
        }
        let requested = self
            .surfaces
            .iter_mut()
            .flat_map(|surface| surface.layers_mut())
            .find_map(|layer| {
                let wants = match &mut layer.kind {
                    LayerKind::Measuring(engine) => engine.take_extraction_request(),
                    _ => false,
                };
                wants.then(|| layer.id())
            });
        let Some(id) = requested else {
            return;
        };

        let spawned = match &self.extractor {
            Some(extractor) => ExtractionJob::spawn(
                id,
                extractor.clone(),
                self.image.clone(),
                self.config.measuring.processing_scale,
            )
            .map_err(|e| log::error!("{e:#}"))
            .ok(),
            None => {
                log::warn!("No contour extractor configured");
                None
            }
        };

        match spawned {
            Some(job) => {
                self.job = Some(job);
                self.notices.push(Notice::ExtractionStarted);
                self.with_layer(id, |layer, _ctx| {
                    if let LayerKind::Measuring(engine) = &mut layer.kind {
                        engine.begin_extraction();
                    }
                    Redraw::None
                });
            }
            None => self.deliver_candidates(id, Vec::new()),
        }
    }
}
