//! Distance functions and the spatial capability used to gate queries.
//!
//! The index can only accelerate a query when the distance function is
//! decomposable into per-dimension bounds, because branch pruning works on
//! minimum bounding rectangles. Capability negotiation is a runtime trait
//! query resolved once when a query is constructed: [`DistanceFunction`]
//! exposes `as_spatial()`, and only functions returning `Some` reach the
//! tree - everything else is declined so the caller can fall back to a
//! linear scan.

use crate::mbr::Mbr;

/// A distance function over coordinate vectors.
pub trait DistanceFunction: Send + Sync {
    /// Exact distance between two points.
    fn distance(&self, a: &[f64], b: &[f64]) -> f64;

    /// The spatial capability of this function, if any. Spatial functions
    /// additionally provide a minimum-distance-to-region primitive and can
    /// drive index traversal.
    fn as_spatial(&self) -> Option<&dyn SpatialDistance> {
        None
    }
}

/// A distance function that can lower-bound itself against a bounding
/// rectangle (MINDIST), enabling branch-and-bound traversal.
pub trait SpatialDistance: DistanceFunction {
    /// Minimum possible distance between `point` and any point inside
    /// `mbr`; 0 when the point lies inside.
    fn min_dist(&self, mbr: &Mbr, point: &[f64]) -> f64;
}

/// Euclidean (L2) distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanDistance;

impl DistanceFunction for EuclideanDistance {
    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>()
            .sqrt()
    }

    fn as_spatial(&self) -> Option<&dyn SpatialDistance> {
        Some(self)
    }
}

impl SpatialDistance for EuclideanDistance {
    fn min_dist(&self, mbr: &Mbr, point: &[f64]) -> f64 {
        mbr.min_dist_sq(point).sqrt()
    }
}

/// Manhattan (L1) distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManhattanDistance;

impl DistanceFunction for ManhattanDistance {
    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
    }

    fn as_spatial(&self) -> Option<&dyn SpatialDistance> {
        Some(self)
    }
}

impl SpatialDistance for ManhattanDistance {
    fn min_dist(&self, mbr: &Mbr, point: &[f64]) -> f64 {
        mbr.min
            .iter()
            .zip(&mbr.max)
            .zip(point)
            .map(|((lo, hi), p)| (p.clamp(*lo, *hi) - p).abs())
            .sum()
    }
}

/// Cosine distance (1 - cosine similarity).
///
/// Not decomposable into per-dimension bounds, so it carries no spatial
/// capability: queries using it are declined by the index.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineDistance;

impl DistanceFunction for CosineDistance {
    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
        let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 1.0;
        }
        1.0 - dot / (norm_a * norm_b)
    }
}
