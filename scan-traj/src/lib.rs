//! # scan-traj: single-cell trajectory analysis in Rust
//!
//! A [`Dataset`] is built once from a count matrix and cell and gene metadata, then threaded by
//! value through the stages: [`preprocess`](preprocess::preprocess),
//! [`reduce_dimension`](reduce::reduce_dimension), [`cluster_cells`](cluster::cluster_cells),
//! [`learn_graph`](trajectory::learn_graph) and [`order_cells`](pseudotime::order_cells). Each
//! stage adds its own derived fields. [`top_markers`](markers::top_markers),
//! [`graph_test`](graph_test::graph_test) and [`find_gene_modules`](modules::find_gene_modules)
//! read a dataset and produce result tables.

#![deny(missing_docs)]

/// Clustering of cells and partitioning of clusters
pub mod cluster;

/// Expression matrix, metadata and derived fields
pub mod dataset;

/// Dimensionality reduction methods
pub mod dim_red;

/// Pipeline errors
pub mod error;


/// Loading inputs, checkpoints and writing result tables
pub mod io;

/// Marker genes of cell groups
pub mod markers;

/// Modules of co-varying genes
pub mod modules;

/// Nearest-neighbor graphs
pub mod nn;

/// Count matrix normalization methods
pub mod normalization;

mod parallel;

/// All stages in order
pub mod pipeline;

/// Renderer-agnostic plot data
pub mod plot;

/// Normalisation and PCA
pub mod preprocess;

/// Pseudotime along the principal graph
pub mod pseudotime;

/// UMAP and t-SNE embeddings
pub mod reduce;

/// Principal graph learning
pub mod trajectory;

#[cfg(test)]
mod test;

pub use crate::dataset::{CellMetadata, Dataset, ExpressionMatrix, GeneMetadata, ReductionMethod};
pub use crate::error::PipelineError;
pub use crate::pipeline::{run_pipeline, PipelineConfig, PipelineOutput};
