//! Statistics for differential expression between groups of cells and along a neighbour graph
#![deny(missing_docs)]

/// Spatial autocorrelation (Moran's I) over a neighbour graph
pub mod moran;
/// Wilcoxon rank-sum test
pub mod rank_sum;
/// Jensen-Shannon specificity of an expression profile
pub mod specificity;
/// statistics extension
pub mod stat;

pub use crate::moran::{morans_i, Alternative, MoranResult, SpatialWeights};
pub use crate::rank_sum::{rank_sum_greater, RankSumResult};
pub use crate::specificity::jensen_shannon_specificity;
pub use crate::stat::{adjusted_pvalue_bh, Statistics};
