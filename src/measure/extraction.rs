use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use anyhow::Context;
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use super::CandidateRectangle;
use crate::layers::LayerId;

/// Polygon returned by a contour extractor, in the extractor's scaled space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub points: Vec<[f32; 2]>,
    pub area: f64,
}

/// Finds candidate quadrilaterals in an image processed at `scale`.
pub trait ContourExtractor: Send + Sync {
    fn extract(&self, image: &RgbaImage, scale: f32) -> Vec<Polygon>;
}

/// Extractor that returns a fixed set of full-resolution polygons, scaled the
/// way a real extractor would report them.
#[derive(Debug, Clone, Default)]
pub struct StaticExtractor {
    polygons: Vec<Polygon>,
}

impl StaticExtractor {
    pub fn new(polygons: Vec<Polygon>) -> Self {
        Self { polygons }
    }
}

impl ContourExtractor for StaticExtractor {
    fn extract(&self, _image: &RgbaImage, scale: f32) -> Vec<Polygon> {
        self.polygons
            .iter()
            .map(|polygon| Polygon {
                points: polygon.points.iter().map(|p| [p[0] * scale, p[1] * scale]).collect(),
                area: polygon.area * (scale as f64).powi(2),
            })
            .collect()
    }
}

/// Converts extractor output back to image space, dropping anything that is not a quadrilateral.
pub fn to_candidates(polygons: Vec<Polygon>, scale: f32) -> Vec<CandidateRectangle> {
    let scale = if scale > 0.0 && scale.is_finite() { scale } else { 1.0 };
    polygons
        .into_iter()
        .filter_map(|polygon| {
            let points: [[f32; 2]; 4] = polygon
                .points
                .iter()
                .map(|p| [p[0] / scale, p[1] / scale])
                .collect::<Vec<_>>()
                .try_into()
                .ok()?;
            Some(CandidateRectangle::new(points, polygon.area / (scale as f64).powi(2)))
        })
        .collect()
}

/// A contour extraction running on its own thread.
pub struct ExtractionJob {
    layer: LayerId,
    scale: f32,
    rx: Receiver<Vec<Polygon>>,
    _worker: thread::JoinHandle<()>,
}

impl ExtractionJob {
    pub fn spawn(
        layer: LayerId,
        extractor: Arc<dyn ContourExtractor>,
        image: Arc<RgbaImage>,
        scale: f32,
    ) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("contour-extraction".to_string())
            .spawn(move || {
                let polygons = extractor.extract(&image, scale);
                // The receiver is gone if the view was dropped; nothing to report then.
                let _ = tx.send(polygons);
            })
            .context("failed to spawn contour extraction worker")?;
        log::info!("Started contour extraction for layer {layer} at scale {scale}");

        Ok(Self {
            layer,
            scale,
            rx,
            _worker: worker,
        })
    }

    pub fn layer(&self) -> LayerId {
        self.layer
    }

    /// Returns the candidates once the worker is done, without blocking.
    pub fn try_finish(&self) -> Option<Vec<CandidateRectangle>> {
        match self.rx.try_recv() {
            Ok(polygons) => Some(to_candidates(polygons, self.scale)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                log::error!("Contour extraction worker exited without a result");
                Some(Vec::new())
            }
        }
    }

    /// Blocks until the worker is done.
    pub fn wait(self) -> Vec<CandidateRectangle> {
        match self.rx.recv() {
            Ok(polygons) => to_candidates(polygons, self.scale),
            Err(_) => {
                log::error!("Contour extraction worker exited without a result");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Panicking;

    impl ContourExtractor for Panicking {
        fn extract(&self, _image: &RgbaImage, _scale: f32) -> Vec<Polygon> {
            panic!("extractor failure");
        }
    }

    fn square() -> Polygon {
        Polygon {
            points: vec![[10.0, 10.0], [50.0, 10.0], [50.0, 30.0], [10.0, 30.0]],
            area: 800.0,
        }
    }

    #[test]
    fn test_candidates_are_unscaled_and_filtered() {
        let triangle = Polygon {
            points: vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
            area: 0.5,
        };
        let candidates = to_candidates(vec![square(), triangle], 0.5);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].points[1], [100.0, 20.0]);
        assert!((candidates[0].area - 3200.0).abs() < 1e-9);
    }

    #[test]
    fn test_job_round_trips_through_worker() {
        let extractor = Arc::new(StaticExtractor::new(vec![square()]));
        let image = Arc::new(RgbaImage::new(4, 4));
        let job = ExtractionJob::spawn(LayerId::new(), extractor, image, 0.5).unwrap();
        let candidates = job.wait();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].points[0], [10.0, 10.0]);
        assert!((candidates[0].area - 800.0).abs() < 1e-9);
    }

    #[test]
    fn test_failed_worker_yields_no_candidates() {
        let image = Arc::new(RgbaImage::new(4, 4));
        let job = ExtractionJob::spawn(LayerId::new(), Arc::new(Panicking), image, 0.5).unwrap();
        assert!(job.wait().is_empty());
    }
}
