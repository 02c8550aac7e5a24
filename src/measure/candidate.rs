use serde::{Deserialize, Serialize};

use crate::drawing::{Annotation, RenderContext};
use crate::math::{centroid, distance, point_in_polygon};
use crate::renderer::{Paint, Painter};

const DEFAULT_OUTLINE: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
const SELECTED_OUTLINE: [f32; 4] = [0.0, 1.0, 0.0, 1.0];
const OUTLINE_DP: f32 = 5.0;

/// A detected quadrilateral that may serve as the reference object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRectangle {
    /// Corners in image space, in contour order.
    pub points: [[f32; 2]; 4],
    pub area: f64,
    /// Real-world length assigned to the long edge once this is the reference.
    #[serde(default)]
    pub long_edge_length: Option<f64>,
    #[serde(default)]
    pub selected: bool,
}

impl CandidateRectangle {
    pub fn new(points: [[f32; 2]; 4], area: f64) -> Self {
        Self {
            points,
            area: area.abs(),
            long_edge_length: None,
            selected: false,
        }
    }

    /// Distances from the first corner to every corner, ascending:
    /// zero, short edge, long edge, diagonal.
    fn corner_distances(&self) -> [f64; 4] {
        let first = self.points[0];
        let mut distances = self.points.map(|p| distance(first, p) as f64);
        distances.sort_by(|a, b| a.total_cmp(b));
        distances
    }

    pub fn short_edge(&self) -> f64 {
        self.corner_distances()[1]
    }

    pub fn long_edge(&self) -> f64 {
        self.corner_distances()[2]
    }

    pub fn center(&self) -> [f32; 2] {
        centroid(&self.points)
    }

    pub fn contains(&self, point: [f32; 2]) -> bool {
        point_in_polygon(point, &self.points)
    }

    /// Units per image pixel derived from the assigned long-edge length, 0 when uncalibrated.
    pub fn units_per_pixel(&self) -> f64 {
        let long_edge = self.long_edge();
        match self.long_edge_length {
            Some(length) if long_edge > 0.0 && length.is_finite() && length > 0.0 => length / long_edge,
            _ => 0.0,
        }
    }

    /// Same object within tolerances scaled by the image area. Boundaries are inclusive.
    pub fn approx_eq(&self, other: &Self, image_area: f64, center_tolerance: f64, edge_tolerance: f64) -> bool {
        let center_limit = image_area * center_tolerance;
        let edge_limit = image_area * edge_tolerance;
        if distance(self.center(), other.center()) as f64 > center_limit {
            return false;
        }
        if (self.short_edge() - other.short_edge()).abs() > edge_limit {
            return false;
        }
        (self.long_edge() - other.long_edge()).abs() <= edge_limit
    }
}

/// Keeps the first candidate of every group of equal ones, largest area first.
pub fn dedup_candidates(
    candidates: Vec<CandidateRectangle>,
    image_area: f64,
    center_tolerance: f64,
    edge_tolerance: f64,
) -> Vec<CandidateRectangle> {
    let mut unique: Vec<CandidateRectangle> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let seen = unique
            .iter()
            .any(|kept| kept.approx_eq(&candidate, image_area, center_tolerance, edge_tolerance));
        if !seen {
            unique.push(candidate);
        }
    }
    unique.sort_by(|a, b| b.area.total_cmp(&a.area));
    unique
}

impl Annotation for CandidateRectangle {
    fn draw(&self, painter: &mut dyn Painter, ctx: &RenderContext) {
        let color = if self.selected {
            SELECTED_OUTLINE
        } else {
            DEFAULT_OUTLINE
        };
        let paint = Paint::stroke(color, ctx.dp_to_px(OUTLINE_DP) * ctx.resize_ratio);
        let mut outline: Vec<[f32; 2]> = self.points.iter().map(|p| ctx.to_raster(*p)).collect();
        outline.push(ctx.to_raster(self.points[0]));
        painter.draw_polyline(&outline, &paint);
    }

    fn hit_test(&self, point: [f32; 2], _ctx: &RenderContext) -> bool {
        self.contains(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const TOL: f64 = 1.0 / 30000.0;

    fn rect(x: f32, y: f32, w: f32, h: f32) -> CandidateRectangle {
        CandidateRectangle::new(
            [[x, y], [x + w, y], [x + w, y + h], [x, y + h]],
            (w * h) as f64,
        )
    }

    #[test]
    fn test_edges_from_first_corner() {
        let r = rect(0.0, 0.0, 40.0, 30.0);
        assert!((r.short_edge() - 30.0).abs() < 1e-6);
        assert!((r.long_edge() - 40.0).abs() < 1e-6);
    }

    #[test]
    fn test_units_per_pixel() {
        let mut r = rect(0.0, 0.0, 200.0, 100.0);
        assert_eq!(r.units_per_pixel(), 0.0);
        r.long_edge_length = Some(10.0);
        assert!((r.units_per_pixel() - 0.05).abs() < 1e-12);
        r.long_edge_length = Some(0.0);
        assert_eq!(r.units_per_pixel(), 0.0);
    }

    #[test]
    fn test_contains_uses_polygon() {
        let diamond = CandidateRectangle::new([[50.0, 0.0], [100.0, 50.0], [50.0, 100.0], [0.0, 50.0]], 5000.0);
        assert!(diamond.contains([50.0, 50.0]));
        assert!(!diamond.contains([5.0, 5.0]));
    }

    #[test]
    fn test_dedup_keeps_first_and_sorts_by_area() {
        // 30000 px image: tolerances come out at exactly 1px.
        let image_area = 30000.0;
        let first = rect(10.0, 10.0, 50.0, 20.0);
        let near = rect(10.5, 10.0, 50.0, 20.0);
        let big = rect(100.0, 100.0, 80.0, 80.0);
        let result = dedup_candidates(vec![first.clone(), near, big.clone()], image_area, TOL, TOL);
        assert_eq!(result, vec![big, first]);
    }

    #[test]
    fn test_dedup_boundary_is_inclusive() {
        // Power-of-two tolerance so the limit is exactly 1px.
        let (image_area, tol) = (1024.0, 1.0 / 1024.0);
        let a = rect(0.0, 0.0, 50.0, 20.0);
        let exactly = rect(1.0, 0.0, 50.0, 20.0);
        let beyond = rect(1.5, 0.0, 50.0, 20.0);
        assert_eq!(dedup_candidates(vec![a.clone(), exactly], image_area, tol, tol).len(), 1);
        assert_eq!(dedup_candidates(vec![a, beyond], image_area, tol, tol).len(), 2);
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let mut rng = StdRng::seed_from_u64(11);
        let image_area = 1_000_000.0;
        for _ in 0..50 {
            let candidates: Vec<_> = (0..rng.random_range(0..30))
                .map(|_| {
                    rect(
                        rng.random_range(0.0..200.0),
                        rng.random_range(0.0..200.0),
                        rng.random_range(5.0..100.0),
                        rng.random_range(5.0..100.0),
                    )
                })
                .collect();
            let once = dedup_candidates(candidates, image_area, TOL, TOL);
            let twice = dedup_candidates(once.clone(), image_area, TOL, TOL);
            assert_eq!(once, twice);
        }
    }
}
