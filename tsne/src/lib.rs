//! Exact-gradient t-SNE with sparse (nearest-neighbour) input affinities.
#![deny(warnings)]

#[macro_use]
extern crate smart_default;

use anyhow::{bail, Error};
use log::{debug, info};
use ndarray::{Array2, ArrayView2, Axis};
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rand_pcg::Pcg64Mcg;
use rayon::prelude::*;
use umap_rs::knn::nearest_neighbors;
use umap_rs::DistanceType;

const RANDOM_STATE: u64 = 209_652_396;
const STOP_LYING_ITER: usize = 250;
const MOM_SWITCH_ITER: usize = 250;
const INITIAL_MOMENTUM: f64 = 0.5;
const FINAL_MOMENTUM: f64 = 0.8;
const MIN_GAIN: f64 = 0.01;
const PERPLEXITY_TOLERANCE: f64 = 1e-5;

/// t-distributed stochastic neighbour embedding
#[derive(SmartDefault)]
pub struct Tsne {
    /// Output dimensionality
    #[default = 2]
    pub n_dims: usize,
    /// Effective number of neighbours
    #[default = 30.]
    pub perplexity: f64,
    /// Gradient descent step size
    #[default = 200.]
    pub learning_rate: f64,
    /// Factor applied to the input affinities during the first iterations
    #[default = 12.]
    pub exaggeration: f64,
    /// Random seed for the initial layout
    #[default(None)]
    pub seed: Option<u64>,
    /// Total number of iterations
    #[default = 1000]
    pub max_iter: usize,
    /// Iteration at which exaggeration stops
    #[default(None)]
    pub stop_lying_iter: Option<usize>,
    /// Iteration at which momentum switches from 0.5 to 0.8
    #[default(None)]
    pub mom_switch_iter: Option<usize>,
    #[default(Array2::default((0, 0)))]
    y: Array2<f64>,
    #[default(None)]
    state: Option<State>,
}

/// Symmetric input affinities in compressed-row form plus optimiser memory
struct State {
    offsets: Vec<usize>,
    neighbors: Vec<usize>,
    p: Vec<f64>,
    gains: Array2<f64>,
    update: Array2<f64>,
    iter: usize,
}

impl Tsne {
    /// Compute input affinities of the rows of `x` and draw the initial layout.
    pub fn init(&mut self, x: ArrayView2<f64>) -> Result<(), Error> {
        let n = x.nrows();
        if self.n_dims == 0 {
            bail!("t-SNE output dimensionality must be positive");
        }
        if !(self.perplexity > 0.0) {
            bail!("perplexity must be positive, got {}", self.perplexity);
        }
        if n < 2 || ((n - 1) as f64) < 3.0 * self.perplexity {
            bail!("perplexity {} is too large for {} points", self.perplexity, n);
        }
        if x.iter().any(|v| !v.is_finite()) {
            bail!("t-SNE input contains non-finite values");
        }

        let k = ((3.0 * self.perplexity).floor() as usize).clamp(1, n - 1);
        info!("t-SNE: {n} points, perplexity {}, {k} neighbours", self.perplexity);
        let conditional = conditional_affinities(x, k, self.perplexity)?;
        let (offsets, neighbors, p) = symmetrize(n, &conditional);

        let mut rng = Pcg64Mcg::seed_from_u64(self.seed.unwrap_or(RANDOM_STATE));
        let normal = Normal::new(0.0, 1e-4)?;
        self.y = Array2::from_shape_simple_fn((n, self.n_dims), || normal.sample(&mut rng));

        self.state = Some(State {
            offsets,
            neighbors,
            p,
            gains: Array2::ones((n, self.n_dims)),
            update: Array2::zeros((n, self.n_dims)),
            iter: 0,
        });
        Ok(())
    }

    /// Run up to `n` more iterations. Returns true while iterations remain.
    pub fn run_n(&mut self, n: usize) -> bool {
        let stop_lying = self.stop_lying_iter.unwrap_or(STOP_LYING_ITER);
        let mom_switch = self.mom_switch_iter.unwrap_or(MOM_SWITCH_ITER);
        let Some(state) = self.state.as_mut() else {
            return false;
        };

        for _ in 0..n {
            if state.iter >= self.max_iter {
                break;
            }
            let exaggeration = if state.iter < stop_lying { self.exaggeration } else { 1.0 };
            let momentum = if state.iter < mom_switch {
                INITIAL_MOMENTUM
            } else {
                FINAL_MOMENTUM
            };

            let grad = gradient(state, &self.y, exaggeration);
            for ((g, gain), upd) in grad.iter().zip(state.gains.iter_mut()).zip(state.update.iter_mut()) {
                *gain = if (*g > 0.0) != (*upd > 0.0) {
                    *gain + 0.2
                } else {
                    *gain * 0.8
                };
                *gain = gain.max(MIN_GAIN);
                *upd = momentum * *upd - self.learning_rate * *gain * g;
            }
            self.y += &state.update;

            if let Some(mean) = self.y.mean_axis(Axis(0)) {
                self.y -= &mean;
            }

            state.iter += 1;
            if state.iter % 100 == 0 {
                debug!("t-SNE iteration {}", state.iter);
            }
        }
        state.iter < self.max_iter
    }

    /// Current layout
    pub fn result(self) -> Array2<f64> {
        self.y
    }

    /// Initialise and run all iterations
    pub fn fit(mut self, x: ArrayView2<f64>) -> Result<Array2<f64>, Error> {
        self.init(x)?;
        while self.run_n(50) {}
        Ok(self.result())
    }
}

/// Row-normalised Gaussian affinities over the `k` nearest neighbours of each point, with the
/// bandwidth of each point chosen so that the entropy matches `ln(perplexity)`.
fn conditional_affinities(x: ArrayView2<f64>, k: usize, perplexity: f64) -> Result<Vec<Vec<(usize, f64)>>, Error> {
    let target = perplexity.ln();
    let (indices, distances) = nearest_neighbors(x, k, DistanceType::Euclidean)?;

    let affinities = indices
        .outer_iter()
        .into_par_iter()
        .zip(distances.outer_iter().into_par_iter())
        .map(|(idx, dist)| {
            let d: Vec<(f64, usize)> = dist.iter().zip(idx.iter()).map(|(&r, &j)| (r * r, j)).collect();

            let mut beta = 1.0;
            let (mut lo, mut hi) = (f64::NEG_INFINITY, f64::INFINITY);
            let mut weights = vec![0.0; k];
            let min_d = d.iter().map(|x| x.0).fold(f64::INFINITY, f64::min);
            for _ in 0..200 {
                // shift by the closest distance for numerical stability
                let mut sum = 0.0;
                let mut weighted = 0.0;
                for (w, &(dist, _)) in weights.iter_mut().zip(&d) {
                    *w = (-beta * (dist - min_d)).exp();
                    sum += *w;
                    weighted += *w * (dist - min_d);
                }
                let entropy = sum.ln() + beta * weighted / sum;
                let diff = entropy - target;
                if diff.abs() < PERPLEXITY_TOLERANCE {
                    break;
                }
                if diff > 0.0 {
                    lo = beta;
                    beta = if hi.is_infinite() { beta * 2.0 } else { (beta + hi) / 2.0 };
                } else {
                    hi = beta;
                    beta = if lo.is_infinite() { beta / 2.0 } else { (beta + lo) / 2.0 };
                }
            }

            let sum: f64 = weights.iter().sum();
            d.iter().zip(weights).map(|(&(_, j), w)| (j, w / sum)).collect()
        })
        .collect();
    Ok(affinities)
}

/// `P_ij = (P_j|i + P_i|j) / 2n` in compressed-row form
fn symmetrize(n: usize, conditional: &[Vec<(usize, f64)>]) -> (Vec<usize>, Vec<usize>, Vec<f64>) {
    let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    for (i, row) in conditional.iter().enumerate() {
        for &(j, p) in row {
            rows[i].push((j, p));
            rows[j].push((i, p));
        }
    }

    let mut offsets = vec![0];
    let mut neighbors = Vec::new();
    let mut values = Vec::new();
    for mut row in rows {
        row.sort_unstable_by_key(|&(j, _)| j);
        let start = neighbors.len();
        for (j, p) in row {
            if neighbors.len() > start && neighbors[neighbors.len() - 1] == j {
                let last = values.len() - 1;
                values[last] += p / (2.0 * n as f64);
            } else {
                neighbors.push(j);
                values.push(p / (2.0 * n as f64));
            }
        }
        offsets.push(neighbors.len());
    }
    (offsets, neighbors, values)
}

/// Gradient of the KL divergence: sparse attraction plus exact repulsion
fn gradient(state: &State, y: &Array2<f64>, exaggeration: f64) -> Array2<f64> {
    let (n, dims) = y.dim();

    let rows: Vec<(Vec<f64>, Vec<f64>, f64)> = (0..n)
        .into_par_iter()
        .map(|i| {
            let yi = y.row(i);
            let mut attract = vec![0.0; dims];
            for idx in state.offsets[i]..state.offsets[i + 1] {
                let j = state.neighbors[idx];
                let yj = y.row(j);
                let dist: f64 = yi.iter().zip(yj).map(|(a, b)| (a - b) * (a - b)).sum();
                let q = 1.0 / (1.0 + dist);
                for d in 0..dims {
                    attract[d] += exaggeration * state.p[idx] * q * (yi[d] - yj[d]);
                }
            }

            let mut repulse = vec![0.0; dims];
            let mut z = 0.0;
            for j in 0..n {
                if j == i {
                    continue;
                }
                let yj = y.row(j);
                let dist: f64 = yi.iter().zip(yj).map(|(a, b)| (a - b) * (a - b)).sum();
                let q = 1.0 / (1.0 + dist);
                z += q;
                for d in 0..dims {
                    repulse[d] += q * q * (yi[d] - yj[d]);
                }
            }
            (attract, repulse, z)
        })
        .collect();

    let z: f64 = rows.iter().map(|r| r.2).sum();
    let mut grad = Array2::zeros((n, dims));
    for (i, (attract, repulse, _)) in rows.into_iter().enumerate() {
        for d in 0..dims {
            grad[[i, d]] = 4.0 * (attract[d] - repulse[d] / z);
        }
    }
    grad
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::s;
    use ndarray_rand::RandomExt;

    fn blobs(n_per_blob: usize) -> Array2<f64> {
        let mut rng = Pcg64Mcg::seed_from_u64(0);
        let mut x = Array2::random_using((2 * n_per_blob, 5), Normal::new(0.0, 1.0).unwrap(), &mut rng);
        x.slice_mut(s![n_per_blob.., ..]).mapv_inplace(|v| v + 20.0);
        x
    }

    #[test]
    fn affinities_sum_to_one() {
        let x = blobs(20);
        let conditional = conditional_affinities(x.view(), 15, 5.0).unwrap();
        for row in &conditional {
            assert_abs_diff_eq!(row.iter().map(|r| r.1).sum::<f64>(), 1.0, epsilon = 1e-9);
            // perplexity matches
            let h: f64 = -row.iter().filter(|r| r.1 > 0.0).map(|r| r.1 * r.1.ln()).sum::<f64>();
            assert_abs_diff_eq!(h.exp(), 5.0, epsilon = 1e-3);
        }
        let (_, _, p) = symmetrize(40, &conditional);
        assert_abs_diff_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn separates_blobs() {
        let x = blobs(30);
        let tsne = Tsne {
            perplexity: 10.0,
            max_iter: 300,
            seed: Some(1),
            ..Tsne::default()
        };
        let y = tsne.fit(x.view()).unwrap();
        assert_eq!(y.dim(), (60, 2));

        let c0 = y.slice(s![..30, ..]).mean_axis(Axis(0)).unwrap();
        let c1 = y.slice(s![30.., ..]).mean_axis(Axis(0)).unwrap();
        let between = (&c0 - &c1).mapv(|v| v * v).sum().sqrt();
        let within = y
            .slice(s![..30, ..])
            .outer_iter()
            .map(|r| (&r - &c0).mapv(|v| v * v).sum().sqrt())
            .fold(0.0, f64::max);
        println!("between {between} within {within}");
        assert!(between > within);
    }

    #[test]
    fn rejects_large_perplexity() {
        let x = blobs(5);
        assert!(Tsne::default().fit(x.view()).is_err());
    }

    #[test]
    fn seeded_runs_match() {
        let x = blobs(10);
        let run = || {
            Tsne {
                perplexity: 3.0,
                max_iter: 50,
                seed: Some(9),
                ..Tsne::default()
            }
            .fit(x.view())
            .unwrap()
        };
        assert_eq!(run(), run());
    }
}
