//! # principal-graph
//!
//! Principal trees (SimplePPT) fitted to low-dimensional embeddings, plus the graph operations a
//! trajectory needs: leaf-branch pruning, loop closing and multi-source geodesic distances.
#![deny(missing_docs)]
#![deny(warnings)]

/// Geodesic distances and connectivity over weighted node/edge lists
pub mod geodesic;

/// k-means with k-means++ seeding
pub mod kmeans;

/// SimplePPT principal tree fitting
pub mod ppt;

/// Principal tree structure and its topology edits
pub mod tree;

pub use crate::geodesic::{connected_components, geodesic_distances};
pub use crate::kmeans::{kmeans, KMeans};
pub use crate::ppt::SimplePpt;
pub use crate::tree::PrincipalTree;

use ndarray::ArrayView1;

pub(crate) fn sq_dist(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}
