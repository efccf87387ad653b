use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// An N-dimensional minimum bounding rectangle.
///
/// `Mbr` defines an axis-aligned box in N-dimensional space using per-axis
/// minimum and maximum coordinates. It is the unit of pruning throughout the
/// tree: every directory entry carries the tight `Mbr` of its subtree, and
/// both query engines prune branches through it.
///
/// # Examples
///
/// ```rust,ignore
/// use paged_rstar::Mbr;
///
/// let a = Mbr::from_point(&[0.0, 0.0]);
/// let b = Mbr::from_point(&[3.0, 4.0]);
/// let both = a.union(&b);
/// assert_eq!(both.area(), 12.0);
/// ```
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Mbr {
    /// Per-axis minimum coordinates
    pub min: Vec<f64>,
    /// Per-axis maximum coordinates
    pub max: Vec<f64>,
}

impl Eq for Mbr {}

impl Hash for Mbr {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for v in self.min.iter().chain(self.max.iter()) {
            v.to_bits().hash(state);
        }
    }
}

impl std::fmt::Display for Mbr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Mbr({:?}, {:?})", self.min, self.max)
    }
}

impl Mbr {
    /// Creates a new bounding rectangle from per-axis minima and maxima.
    ///
    /// Both vectors must have the same length; this is the caller's
    /// responsibility, like capacity checks on nodes.
    pub fn new(min: Vec<f64>, max: Vec<f64>) -> Mbr {
        debug_assert_eq!(min.len(), max.len());
        Mbr { min, max }
    }

    /// Creates a degenerate (zero-extent) rectangle covering a single point.
    pub fn from_point(point: &[f64]) -> Mbr {
        Mbr {
            min: point.to_vec(),
            max: point.to_vec(),
        }
    }

    /// Returns the dimensionality of the rectangle.
    pub fn dims(&self) -> usize {
        self.min.len()
    }

    /// Returns the volume of the rectangle (area in 2-D).
    pub fn area(&self) -> f64 {
        self.min
            .iter()
            .zip(&self.max)
            .map(|(lo, hi)| hi - lo)
            .product()
    }

    /// Returns the sum of edge lengths (the margin used by the split
    /// heuristic; perimeter/2 in 2-D).
    pub fn margin(&self) -> f64 {
        self.min.iter().zip(&self.max).map(|(lo, hi)| hi - lo).sum()
    }

    /// Returns the center coordinates of the rectangle.
    pub fn center(&self) -> Vec<f64> {
        self.min
            .iter()
            .zip(&self.max)
            .map(|(lo, hi)| (lo + hi) / 2.0)
            .collect()
    }

    /// Checks if a point lies inside the rectangle (boundary inclusive).
    pub fn contains_point(&self, point: &[f64]) -> bool {
        self.min
            .iter()
            .zip(&self.max)
            .zip(point)
            .all(|((lo, hi), p)| *lo <= *p && *p <= *hi)
    }

    /// Checks if this rectangle fully contains another.
    pub fn contains(&self, other: &Mbr) -> bool {
        self.min
            .iter()
            .zip(&self.max)
            .zip(other.min.iter().zip(&other.max))
            .all(|((lo, hi), (olo, ohi))| *lo <= *olo && *ohi <= *hi)
    }

    /// Checks if this rectangle intersects another (touching counts).
    pub fn intersects(&self, other: &Mbr) -> bool {
        self.min
            .iter()
            .zip(&self.max)
            .zip(other.min.iter().zip(&other.max))
            .all(|((lo, hi), (olo, ohi))| *lo <= *ohi && *olo <= *hi)
    }

    /// Returns the smallest rectangle covering both `self` and `other`.
    pub fn union(&self, other: &Mbr) -> Mbr {
        Mbr {
            min: self
                .min
                .iter()
                .zip(&other.min)
                .map(|(a, b)| a.min(*b))
                .collect(),
            max: self
                .max
                .iter()
                .zip(&other.max)
                .map(|(a, b)| a.max(*b))
                .collect(),
        }
    }

    /// Grows this rectangle in place to cover `other`.
    pub fn expand(&mut self, other: &Mbr) {
        for (a, b) in self.min.iter_mut().zip(&other.min) {
            *a = a.min(*b);
        }
        for (a, b) in self.max.iter_mut().zip(&other.max) {
            *a = a.max(*b);
        }
    }

    /// Returns the volume increase needed to cover `other`.
    pub fn enlargement(&self, other: &Mbr) -> f64 {
        self.union(other).area() - self.area()
    }

    /// Returns the volume of the intersection with `other`, 0.0 if disjoint.
    pub fn overlap(&self, other: &Mbr) -> f64 {
        let mut vol = 1.0;
        for ((lo, hi), (olo, ohi)) in self
            .min
            .iter()
            .zip(&self.max)
            .zip(other.min.iter().zip(&other.max))
        {
            let extent = hi.min(*ohi) - lo.max(*olo);
            if extent <= 0.0 {
                return 0.0;
            }
            vol *= extent;
        }
        vol
    }

    /// Squared Euclidean distance from a point to the nearest point of the
    /// rectangle (MINDIST); 0.0 when the point lies inside.
    pub fn min_dist_sq(&self, point: &[f64]) -> f64 {
        self.min
            .iter()
            .zip(&self.max)
            .zip(point)
            .map(|((lo, hi), p)| {
                let nearest = p.clamp(*lo, *hi);
                let d = p - nearest;
                d * d
            })
            .sum()
    }

    /// Squared Euclidean distance between this rectangle's center and a point.
    pub fn center_dist_sq(&self, point: &[f64]) -> f64 {
        self.center()
            .iter()
            .zip(point)
            .map(|(c, p)| (c - p) * (c - p))
            .sum()
    }

    /// Checks that min <= max on every axis.
    pub fn is_valid(&self) -> bool {
        self.min.len() == self.max.len()
            && self.min.iter().zip(&self.max).all(|(lo, hi)| lo <= hi)
    }
}
