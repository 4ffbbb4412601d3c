use crate::dataset::{Dataset, ReductionMethod};
use crate::error::PipelineError;
use anyhow::Error;
use log::{info, warn};
use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tsne::Tsne;
use umap_rs::{DistanceType, Umap};

const STAGE: &str = "reduce_dimension";

/// A non-linear embedding of the principal components
pub trait Embedder {
    /// Slot the embedding is stored under
    fn method(&self) -> ReductionMethod;

    /// Number of output dimensions
    fn max_components(&self) -> usize;

    /// Leading principal components used as input, all of them when `None`
    fn preprocess_components(&self) -> Option<usize>;

    /// Check the parameters against the number of input points
    fn validate(&self, n_points: usize) -> Result<(), PipelineError>;

    /// Embed the rows of `x` (cells × principal components)
    fn embed(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, Error>;
}

/// Initial layout of UMAP
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UmapInit {
    /// Leading principal components, rescaled
    #[default]
    PcaScaled,
    /// Uniform random coordinates
    Random,
}

/// UMAP settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UmapParams {
    /// Output dimensions
    pub max_components: usize,
    /// Leading principal components used as input
    pub preprocess_components: Option<usize>,
    /// Size of the local neighbourhood
    pub n_neighbors: usize,
    /// Minimum distance between embedded points
    pub min_dist: f64,
    /// Scale of embedded points
    pub spread: f64,
    /// Distance in PCA space
    pub metric: DistanceType,
    /// Optimisation epochs; 500 up to 10,000 cells and 200 above when `None`
    pub n_epochs: Option<usize>,
    /// Initial learning rate
    pub learning_rate: f64,
    /// Negative samples per positive sample
    pub negative_sample_rate: usize,
    /// Initial layout
    pub init: UmapInit,
    /// Seed of the layout optimisation
    pub seed: u64,
}

impl Default for UmapParams {
    fn default() -> Self {
        UmapParams {
            max_components: 2,
            preprocess_components: None,
            n_neighbors: 15,
            min_dist: 0.1,
            spread: 1.0,
            metric: DistanceType::Cosine,
            n_epochs: None,
            learning_rate: 1.0,
            negative_sample_rate: 5,
            init: UmapInit::PcaScaled,
            seed: 0,
        }
    }
}

/// t-SNE settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TsneParams {
    /// Output dimensions
    pub max_components: usize,
    /// Leading principal components used as input
    pub preprocess_components: Option<usize>,
    /// Effective number of neighbours
    pub perplexity: f64,
    /// Total iterations
    pub max_iter: usize,
    /// Affinity multiplier during early exaggeration
    pub exaggeration: f64,
    /// Iterations of early exaggeration
    pub exaggeration_iter: usize,
    /// Gradient descent step size
    pub learning_rate: f64,
    /// Seed of the initial layout
    pub seed: u64,
}

impl Default for TsneParams {
    fn default() -> Self {
        TsneParams {
            max_components: 2,
            preprocess_components: None,
            perplexity: 30.0,
            max_iter: 1000,
            exaggeration: 12.0,
            exaggeration_iter: 250,
            learning_rate: 200.0,
            seed: 0,
        }
    }
}

/// Which embedding [`reduce_dimension`] computes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceParams {
    /// Uniform manifold approximation and projection
    Umap(UmapParams),
    /// t-distributed stochastic neighbour embedding
    Tsne(TsneParams),
}

impl Default for ReduceParams {
    fn default() -> Self {
        ReduceParams::Umap(UmapParams::default())
    }
}

impl ReduceParams {
    /// Slot the embedding is stored under
    pub fn method(&self) -> ReductionMethod {
        match self {
            ReduceParams::Umap(p) => p.method(),
            ReduceParams::Tsne(p) => p.method(),
        }
    }
}

fn check_components(max_components: usize) -> Result<(), PipelineError> {
    if max_components == 0 {
        return Err(PipelineError::parameter(
            "max_components",
            max_components,
            "need at least one output dimension",
        ));
    }
    Ok(())
}

impl Embedder for UmapParams {
    fn method(&self) -> ReductionMethod {
        ReductionMethod::Umap
    }

    fn max_components(&self) -> usize {
        self.max_components
    }

    fn preprocess_components(&self) -> Option<usize> {
        self.preprocess_components
    }

    fn validate(&self, n_points: usize) -> Result<(), PipelineError> {
        check_components(self.max_components)?;
        if self.n_neighbors < 2 || self.n_neighbors >= n_points {
            return Err(PipelineError::parameter(
                "n_neighbors",
                self.n_neighbors,
                format!("must be at least 2 and smaller than the number of cells ({n_points})"),
            ));
        }
        if !(self.spread > 0.0 && self.min_dist >= 0.0 && self.min_dist <= self.spread) {
            return Err(PipelineError::parameter(
                "min_dist",
                self.min_dist,
                format!("must lie between 0 and spread ({})", self.spread),
            ));
        }
        if self.n_epochs == Some(0) {
            return Err(PipelineError::parameter("n_epochs", 0, "must be positive"));
        }
        Ok(())
    }

    fn embed(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, Error> {
        let mut umap = Umap::new(
            Some(self.metric),
            self.max_components,
            self.min_dist,
            self.spread,
            self.n_neighbors,
            self.n_epochs,
        );
        umap.learning_rate = self.learning_rate;
        umap.negative_sample_rate = self.negative_sample_rate;

        let init = match self.init {
            UmapInit::PcaScaled if x.ncols() >= self.max_components => Some(x.slice(s![.., ..self.max_components])),
            UmapInit::PcaScaled => {
                warn!(
                    "only {} principal components for a {}-dimensional UMAP, using a random layout",
                    x.ncols(),
                    self.max_components
                );
                None
            }
            UmapInit::Random => None,
        };
        umap.fit(x, init, self.seed)
    }
}

impl Embedder for TsneParams {
    fn method(&self) -> ReductionMethod {
        ReductionMethod::Tsne
    }

    fn max_components(&self) -> usize {
        self.max_components
    }

    fn preprocess_components(&self) -> Option<usize> {
        self.preprocess_components
    }

    fn validate(&self, n_points: usize) -> Result<(), PipelineError> {
        check_components(self.max_components)?;
        if !(self.perplexity > 0.0) || 3.0 * self.perplexity > n_points.saturating_sub(1) as f64 {
            return Err(PipelineError::parameter(
                "perplexity",
                self.perplexity,
                format!("must be positive and at most a third of the other cells ({n_points} cells)"),
            ));
        }
        if self.max_iter == 0 {
            return Err(PipelineError::parameter("max_iter", 0, "must be positive"));
        }
        Ok(())
    }

    fn embed(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, Error> {
        let mut tsne = Tsne::default();
        tsne.n_dims = self.max_components;
        tsne.perplexity = self.perplexity;
        tsne.learning_rate = self.learning_rate;
        tsne.exaggeration = self.exaggeration;
        tsne.seed = Some(self.seed);
        tsne.max_iter = self.max_iter;
        tsne.stop_lying_iter = Some(self.exaggeration_iter);
        tsne.fit(x)
    }
}

/// Compute the embedding selected by `params` from the stored principal components.
pub fn reduce_dimension(ds: Dataset, params: &ReduceParams) -> Result<Dataset, PipelineError> {
    match params {
        ReduceParams::Umap(p) => reduce_dimension_with(ds, p),
        ReduceParams::Tsne(p) => reduce_dimension_with(ds, p),
    }
}

/// Compute an embedding with any [`Embedder`] and store it under its method.
pub fn reduce_dimension_with(mut ds: Dataset, embedder: &impl Embedder) -> Result<Dataset, PipelineError> {
    let pcs = &ds.require_pca(STAGE)?.embedding;
    let available = pcs.ncols();
    let used = embedder.preprocess_components().unwrap_or(available);
    if used == 0 || used > available {
        return Err(PipelineError::parameter(
            "preprocess_components",
            used,
            format!("must be between 1 and the {available} computed components"),
        ));
    }
    embedder.validate(ds.n_cells())?;

    let method = embedder.method();
    info!(
        "computing {}-dimensional {method} embedding of {} cells from {used} principal components",
        embedder.max_components(),
        ds.n_cells()
    );
    let embedding = embedder
        .embed(pcs.slice(s![.., ..used]))
        .map_err(|e| PipelineError::numerical(STAGE, e))?;
    ds.set_embedding(method, embedding);
    Ok(ds)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::two_population_dataset;
    use crate::preprocess::{preprocess, PreprocessParams};

    fn with_pca() -> Dataset {
        let ds = two_population_dataset(60, 200, 3);
        let params = PreprocessParams {
            num_dim: 10,
            ..Default::default()
        };
        preprocess(ds, &params).unwrap()
    }

    #[test]
    fn requires_pca() {
        let ds = two_population_dataset(30, 50, 1);
        let err = reduce_dimension(ds, &ReduceParams::default()).unwrap_err();
        assert!(matches!(err, PipelineError::PrecursorMissing { .. }), "{err}");
    }

    #[test]
    fn umap_embedding_is_stored() {
        let params = ReduceParams::Umap(UmapParams {
            n_epochs: Some(50),
            ..Default::default()
        });
        let ds = reduce_dimension(with_pca(), &params).unwrap();
        let emb = ds.embedding(ReductionMethod::Umap).unwrap();
        assert_eq!(emb.dim(), (60, 2));
        assert!(emb.iter().all(|v| v.is_finite()));
        assert!(ds.embedding(ReductionMethod::Tsne).is_none());
    }

    #[test]
    fn tsne_embedding_is_stored() {
        let params = ReduceParams::Tsne(TsneParams {
            perplexity: 10.0,
            max_iter: 300,
            max_components: 3,
            preprocess_components: Some(5),
            ..Default::default()
        });
        let ds = reduce_dimension(with_pca(), &params).unwrap();
        assert_eq!(ds.embedding(ReductionMethod::Tsne).unwrap().dim(), (60, 3));
    }

    #[test]
    fn parameters_are_checked() {
        let cases = [
            (
                ReduceParams::Umap(UmapParams {
                    preprocess_components: Some(11),
                    ..Default::default()
                }),
                "preprocess_components",
            ),
            (
                ReduceParams::Umap(UmapParams {
                    n_neighbors: 60,
                    ..Default::default()
                }),
                "n_neighbors",
            ),
            (
                ReduceParams::Tsne(TsneParams {
                    perplexity: 30.0,
                    ..Default::default()
                }),
                "perplexity",
            ),
            (
                ReduceParams::Tsne(TsneParams {
                    max_components: 0,
                    ..Default::default()
                }),
                "max_components",
            ),
        ];
        let ds = with_pca();
        for (params, expected) in cases {
            match reduce_dimension(ds.clone(), &params) {
                Err(PipelineError::Parameter { name, .. }) => assert_eq!(name, expected),
                other => panic!("expected a parameter error, got {other:?}"),
            }
        }
    }
}
