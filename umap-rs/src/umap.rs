use crate::curve_fit::find_ab_params;
use crate::dist::{DistanceType, Q};
use crate::embedding::{random_layout, scaled_layout, EdgeSamples};
use crate::fuzzy::fuzzy_simplicial_set;
use crate::knn::nearest_neighbors;
use crate::optimize::{LayoutParams, State};
use anyhow::{bail, Error};
use log::info;
use ndarray::{Array2, ArrayView2};
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

/// Uniform Manifold Approximation and Projection
#[derive(Clone, Debug)]
pub struct Umap {
    /// Distance in the input space
    pub distance_type: DistanceType,
    /// Size of the local neighbourhood
    pub n_neighbors: usize,
    /// Output dimensionality
    pub embedded_dim: usize,
    /// Minimum distance between embedded points
    pub min_dist: Q,
    /// Scale of embedded points
    pub spread: Q,
    /// Initial learning rate
    pub learning_rate: Q,
    /// Negative samples per positive sample
    pub negative_sample_rate: usize,
    /// Weight of negative samples
    pub repulsion_strength: Q,
    /// Number of nearest neighbours assumed locally connected
    pub local_connectivity: Q,
    /// Interpolation between fuzzy union (1) and intersection (0)
    pub set_op_mix_ratio: Q,
    /// Number of epochs, chosen from the number of points when `None`
    pub custom_number_of_epochs: Option<usize>,
}

impl Default for Umap {
    fn default() -> Self {
        Umap::new(None, 2, 0.1, 1.0, 15, None)
    }
}

impl Umap {
    /// UMAP with the given geometry parameters and standard optimisation settings
    pub fn new(
        distance_type: Option<DistanceType>,
        dimensions: usize,
        min_dist: Q,
        spread: Q,
        n_neighbors: usize,
        custom_number_of_epochs: Option<usize>,
    ) -> Umap {
        Umap {
            distance_type: distance_type.unwrap_or_default(),
            n_neighbors,
            embedded_dim: dimensions,
            min_dist,
            spread,
            learning_rate: 1.0,
            negative_sample_rate: 5,
            repulsion_strength: 1.0,
            local_connectivity: 1.0,
            set_op_mix_ratio: 1.0,
            custom_number_of_epochs,
        }
    }

    /// Number of epochs used for `rows` points
    pub fn get_num_epochs(&self, rows: usize) -> usize {
        if let Some(n) = self.custom_number_of_epochs {
            return n;
        }
        if rows <= 10_000 {
            500
        } else {
            200
        }
    }

    fn validate(&self, x: &ArrayView2<Q>, init: Option<&ArrayView2<Q>>) -> Result<(), Error> {
        let n = x.nrows();
        if self.n_neighbors < 2 {
            bail!("n_neighbors must be at least 2, got {}", self.n_neighbors);
        }
        if self.n_neighbors >= n {
            bail!("n_neighbors ({}) must be smaller than the number of points ({n})", self.n_neighbors);
        }
        if self.embedded_dim == 0 {
            bail!("embedding dimensionality must be positive");
        }
        if !(self.spread > 0.0) || !(self.min_dist >= 0.0) || self.min_dist > self.spread {
            bail!("need 0 <= min_dist ({}) <= spread ({})", self.min_dist, self.spread);
        }
        if self.custom_number_of_epochs == Some(0) {
            bail!("number of epochs, if provided, must be greater than 0");
        }
        if x.iter().any(|v| !v.is_finite()) {
            bail!("input contains non-finite values");
        }
        if let Some(init) = init {
            if init.dim() != (n, self.embedded_dim) {
                bail!(
                    "initial layout has shape {:?}, expected ({n}, {})",
                    init.dim(),
                    self.embedded_dim
                );
            }
        }
        Ok(())
    }

    /// Embed the rows of `x`. `init` optionally gives initial coordinates (rescaled to a box of
    /// half-width 10), otherwise a uniform random layout is used.
    pub fn fit(&self, x: ArrayView2<Q>, init: Option<ArrayView2<Q>>, seed: u64) -> Result<Array2<Q>, Error> {
        self.validate(&x, init.as_ref())?;
        let n = x.nrows();
        let mut rng = Pcg64Mcg::seed_from_u64(seed);

        let (knn_indices, knn_distances) = nearest_neighbors(x, self.n_neighbors, self.distance_type)?;
        let graph = fuzzy_simplicial_set(
            &knn_indices,
            &knn_distances,
            self.local_connectivity,
            self.set_op_mix_ratio,
        );

        let n_epochs = self.get_num_epochs(n);
        let samples = EdgeSamples::from_graph(&graph, n_epochs);
        let (a, b) = find_ab_params(self.spread, self.min_dist);
        info!(
            "umap: {n} points, {} edges, {n_epochs} epochs, a = {a:.4}, b = {b:.4}",
            samples.len()
        );

        let mut embedding = match init {
            Some(init) => scaled_layout(init),
            None => random_layout(n, self.embedded_dim, &mut rng),
        };

        let params = LayoutParams {
            a,
            b,
            gamma: self.repulsion_strength,
            initial_alpha: self.learning_rate,
            negative_sample_rate: self.negative_sample_rate,
            n_epochs,
        };
        let mut state = State::new(params, samples, rng);
        state.optimize(&mut embedding);
        Ok(embedding)
    }
}
