use crate::dataset::Dataset;
use crate::dim_red::rand_svd::RandSvd;
use crate::dim_red::{Pca, ScaledSparse};
use crate::error::PipelineError;
use crate::normalization::{normalize_sparse, NormMethod};
use log::info;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

const STAGE: &str = "preprocess";

/// Parameters of [`preprocess`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessParams {
    /// Number of principal components
    pub num_dim: usize,
    /// Count transformation
    pub norm_method: NormMethod,
    /// Added before taking the logarithm
    pub pseudo_count: f64,
    /// Scale every gene to unit variance after centring
    pub scaling: bool,
    /// Seed of the random projection
    pub seed: u64,
}

impl Default for PreprocessParams {
    fn default() -> Self {
        PreprocessParams {
            num_dim: 50,
            norm_method: NormMethod::Log,
            pseudo_count: 1.0,
            scaling: true,
            seed: 0,
        }
    }
}

/// Principal components of the normalised, centred (and scaled) expression matrix
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PcaResult {
    /// Cells × components, `U·S`
    pub embedding: Array2<f64>,
    /// Genes × components. Genes without variation have zero loadings.
    pub loadings: Array2<f64>,
    /// Fraction of the total variance of the transformed matrix captured by each component
    pub variance_ratio: Array1<f64>,
    /// Genes with non-zero variance, the columns the decomposition was computed on
    pub genes_used: Vec<usize>,
}

impl PcaResult {
    /// Number of components
    pub fn num_dim(&self) -> usize {
        self.embedding.ncols()
    }
}

/// Normalise counts by size factor, log-transform, centre and scale each varying gene, and store
/// the leading `num_dim` principal components.
pub fn preprocess(mut ds: Dataset, params: &PreprocessParams) -> Result<Dataset, PipelineError> {
    if params.norm_method == NormMethod::Log && !(params.pseudo_count > 0.0 && params.pseudo_count.is_finite()) {
        return Err(PipelineError::parameter(
            "pseudo_count",
            params.pseudo_count,
            "must be positive and finite for log normalisation",
        ));
    }

    let all_genes: Vec<usize> = (0..ds.n_genes()).collect();
    let x = normalize_sparse(
        ds.matrix().counts(),
        ds.size_factors(),
        &all_genes,
        params.norm_method,
        params.pseudo_count,
    );
    let x = ScaledSparse::new(x, params.scaling);
    let genes_used = x.varying();

    let max_dim = ds.n_cells().min(genes_used.len());
    if params.num_dim == 0 || params.num_dim > max_dim {
        return Err(PipelineError::parameter(
            "num_dim",
            params.num_dim,
            format!(
                "must be between 1 and {max_dim} ({} cells, {} varying genes)",
                ds.n_cells(),
                genes_used.len()
            ),
        ));
    }

    info!(
        "running PCA on {} cells x {} varying genes, {} components",
        ds.n_cells(),
        genes_used.len(),
        params.num_dim
    );
    let (u, s, v) = RandSvd::with_seed(params.seed)
        .run_pca(&x, params.num_dim)
        .map_err(|e| PipelineError::numerical(STAGE, e))?;

    let total = x.total_variance();
    let variance_ratio = if total > 0.0 {
        s.mapv(|s| s * s / total)
    } else {
        Array1::zeros(s.len())
    };

    let mut loadings = Array2::<f64>::zeros((ds.n_genes(), params.num_dim));
    for &g in &genes_used {
        loadings.row_mut(g).assign(&v.row(g));
    }

    let embedding = &u * &s;
    info!(
        "PCA done, first component explains {:.3} of the variance",
        variance_ratio.get(0).copied().unwrap_or(0.0)
    );

    ds.set_pca(PcaResult {
        embedding,
        loadings,
        variance_ratio,
        genes_used,
    });
    Ok(ds)
}
