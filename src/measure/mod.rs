//! Reference-object calibration and length measurement.

mod candidate;
mod engine;
mod extraction;
mod line;

pub use candidate::{CandidateRectangle, dedup_candidates};
pub use engine::{CalibrationState, MeasureMode, MeasurementEngine, MeasuringSnapshot, parse_reference_length};
pub use extraction::{ContourExtractor, ExtractionJob, Polygon, StaticExtractor, to_candidates};
pub use line::{LineGrip, LineStyle, MeasuringLine};
