use ndarray::ArrayView1;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Float type used throughout the crate
pub type Q = f64;

/// Distance used to find nearest neighbours in the input space
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DistanceType {
    /// Straight-line distance
    Euclidean,
    /// One minus the cosine similarity
    #[default]
    Cosine,
}

impl DistanceType {
    /// Distance between two points
    #[inline]
    pub fn distance(self, x: ArrayView1<Q>, y: ArrayView1<Q>) -> Q {
        match self {
            DistanceType::Euclidean => euclidean(x, y),
            DistanceType::Cosine => cosine(x, y),
        }
    }

    /// A metric with the same neighbour order as [`DistanceType::distance`]. One minus the cosine
    /// similarity is not a metric but its square root is.
    #[inline]
    pub fn metric(self, x: ArrayView1<Q>, y: ArrayView1<Q>) -> Q {
        match self {
            DistanceType::Euclidean => euclidean(x, y),
            DistanceType::Cosine => cosine(x, y).sqrt(),
        }
    }

    /// Inverse of the transform applied by [`DistanceType::metric`]
    #[inline]
    pub fn metric_to_distance(self, m: Q) -> Q {
        match self {
            DistanceType::Euclidean => m,
            DistanceType::Cosine => m * m,
        }
    }
}

/// Euclidean distance
#[inline]
pub fn euclidean(x: ArrayView1<Q>, y: ArrayView1<Q>) -> Q {
    x.iter().zip(y).map(|(a, b)| (a - b) * (a - b)).sum::<Q>().sqrt()
}

/// Cosine distance. A zero vector is at distance 1 from everything except another zero vector.
#[inline]
pub fn cosine(x: ArrayView1<Q>, y: ArrayView1<Q>) -> Q {
    let nx = x.dot(&x);
    let ny = y.dot(&y);
    match (nx == 0.0, ny == 0.0) {
        (true, true) => 0.0,
        (true, false) | (false, true) => 1.0,
        _ => (1.0 - x.dot(&y) / (nx * ny).sqrt()).max(0.0),
    }
}
