//! # umap-rs
//! Uniform Manifold Approximation and Projection of the rows of a dense matrix.
#![deny(warnings)]

pub mod curve_fit;
pub mod dist;
pub mod embedding;
pub mod fuzzy;
pub mod knn;
pub mod optimize;
pub mod umap;

pub use dist::DistanceType;
pub use umap::Umap;
