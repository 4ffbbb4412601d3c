//! Stochastic gradient descent of the fuzzy set cross entropy between the input graph and the
//! layout. Updates are applied immediately, so each epoch is sequential and fully determined by
//! the seed.
use crate::dist::Q;
use crate::embedding::EdgeSamples;
use ndarray::Array2;
use rand::Rng;
use rand_pcg::Pcg64Mcg;

const GRAD_CLIP: Q = 4.0;

/// Parameters of the layout optimisation
#[derive(Clone, Debug)]
pub struct LayoutParams {
    /// Curve parameter `a`
    pub a: Q,
    /// Curve parameter `b`
    pub b: Q,
    /// Weight of negative samples
    pub gamma: Q,
    /// Initial learning rate, decayed linearly to zero
    pub initial_alpha: Q,
    /// Negative samples per positive sample
    pub negative_sample_rate: usize,
    /// Number of epochs
    pub n_epochs: usize,
}

impl Default for LayoutParams {
    fn default() -> Self {
        LayoutParams {
            a: 1.5769434603113077,
            b: 0.8950608779109733,
            gamma: 1.0,
            initial_alpha: 1.0,
            negative_sample_rate: 5,
            n_epochs: 500,
        }
    }
}

/// Optimisation state
pub struct State {
    params: LayoutParams,
    samples: EdgeSamples,
    epoch_of_next_sample: Vec<Q>,
    epochs_per_negative_sample: Vec<Q>,
    epoch_of_next_negative_sample: Vec<Q>,
    current_epoch: usize,
    rng: Pcg64Mcg,
}

impl State {
    /// Prepare the optimisation of `samples`
    pub fn new(params: LayoutParams, samples: EdgeSamples, rng: Pcg64Mcg) -> State {
        let epochs_per_negative_sample: Vec<Q> = samples
            .epochs_per_sample
            .iter()
            .map(|&e| e / params.negative_sample_rate.max(1) as Q)
            .collect();
        State {
            epoch_of_next_sample: samples.epochs_per_sample.clone(),
            epoch_of_next_negative_sample: epochs_per_negative_sample.clone(),
            epochs_per_negative_sample,
            params,
            samples,
            current_epoch: 0,
            rng,
        }
    }

    /// Number of completed epochs
    pub fn current_epoch(&self) -> usize {
        self.current_epoch
    }

    /// Run all remaining epochs
    pub fn optimize(&mut self, embedding: &mut Array2<Q>) {
        while self.step(embedding) {}
    }

    /// Run one epoch. Returns false once all epochs are done.
    pub fn step(&mut self, embedding: &mut Array2<Q>) -> bool {
        if self.current_epoch >= self.params.n_epochs {
            return false;
        }
        let alpha = self.params.initial_alpha * (1.0 - self.current_epoch as Q / self.params.n_epochs as Q);
        for i in 0..self.samples.len() {
            self.sample_edge(embedding, i, alpha);
        }
        self.current_epoch += 1;
        true
    }

    fn sample_edge(&mut self, embedding: &mut Array2<Q>, i: usize, alpha: Q) {
        let epoch = self.current_epoch as Q;
        if self.samples.epochs_per_sample[i] <= 0.0 || self.epoch_of_next_sample[i] > epoch {
            return;
        }

        let LayoutParams { a, b, gamma, .. } = self.params;
        let (n_points, dim) = embedding.dim();
        let j = self.samples.head[i];
        let k = self.samples.tail[i];

        let dist_sq = squared_distance(embedding, j, k);
        let attract = if dist_sq > 0.0 {
            -2.0 * a * b * dist_sq.powf(b - 1.0) / (1.0 + a * dist_sq.powf(b))
        } else {
            0.0
        };
        for d in 0..dim {
            let grad = (attract * (embedding[[j, d]] - embedding[[k, d]])).clamp(-GRAD_CLIP, GRAD_CLIP);
            embedding[[j, d]] += grad * alpha;
            embedding[[k, d]] -= grad * alpha;
        }
        self.epoch_of_next_sample[i] += self.samples.epochs_per_sample[i];

        let n_neg = ((epoch - self.epoch_of_next_negative_sample[i]) / self.epochs_per_negative_sample[i])
            .floor()
            .max(0.0) as usize;
        for _ in 0..n_neg {
            let k = self.rng.gen_range(0..n_points);
            if k == j {
                continue;
            }
            let dist_sq = squared_distance(embedding, j, k);
            let repulse = if dist_sq > 0.0 {
                2.0 * gamma * b / ((1e-3 + dist_sq) * (1.0 + a * dist_sq.powf(b)))
            } else {
                0.0
            };
            for d in 0..dim {
                let grad = if repulse > 0.0 {
                    (repulse * (embedding[[j, d]] - embedding[[k, d]])).clamp(-GRAD_CLIP, GRAD_CLIP)
                } else {
                    GRAD_CLIP
                };
                embedding[[j, d]] += grad * alpha;
            }
        }
        self.epoch_of_next_negative_sample[i] += n_neg as Q * self.epochs_per_negative_sample[i];
    }
}

#[inline]
fn squared_distance(embedding: &Array2<Q>, j: usize, k: usize) -> Q {
    embedding
        .row(j)
        .iter()
        .zip(embedding.row(k))
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}
