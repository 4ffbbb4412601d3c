use crate::dist::Q;
use ndarray::{Array2, ArrayView2};
use rand::distributions::Uniform;
use rand::Rng;
use sprs::CsMat;

/// Largest absolute coordinate of an initial layout
const INIT_SCALE: Q = 10.0;

/// Uniform random layout in `[-10, 10]^dim`
pub fn random_layout(n_points: usize, dim: usize, rng: &mut impl Rng) -> Array2<Q> {
    let uniform = Uniform::new_inclusive(-INIT_SCALE, INIT_SCALE);
    Array2::from_shape_simple_fn((n_points, dim), || rng.sample(uniform))
}

/// Use given coordinates (e.g. the leading principal components) as the initial layout, rescaled
/// so that the largest absolute coordinate is 10.
pub fn scaled_layout(coords: ArrayView2<Q>) -> Array2<Q> {
    let max_abs = coords.iter().fold(0.0, |acc: Q, &v| acc.max(v.abs()));
    if max_abs > 0.0 {
        coords.mapv(|v| v * INIT_SCALE / max_abs)
    } else {
        coords.to_owned()
    }
}

/// Edges sampled during optimisation. Edges weaker than `max_weight / n_epochs` would never be
/// sampled and are dropped.
pub struct EdgeSamples {
    /// Source point of each edge
    pub head: Vec<usize>,
    /// Target point of each edge
    pub tail: Vec<usize>,
    /// Epochs between two samples of each edge
    pub epochs_per_sample: Vec<Q>,
}

impl EdgeSamples {
    /// Collect the edges of a fuzzy graph
    pub fn from_graph(graph: &CsMat<Q>, n_epochs: usize) -> EdgeSamples {
        let n_epochs = n_epochs as Q;
        let max_weight = graph.iter().fold(0.0, |acc: Q, (&w, _)| acc.max(w));

        let mut head = Vec::new();
        let mut tail = Vec::new();
        let mut weights = Vec::new();
        for (&w, (row, col)) in graph.iter() {
            if w > 0.0 && w >= max_weight / n_epochs {
                head.push(row);
                tail.push(col);
                weights.push(w);
            }
        }

        let epochs_per_sample = make_epochs_per_sample(&weights, n_epochs);
        EdgeSamples {
            head,
            tail,
            epochs_per_sample,
        }
    }

    /// Number of edges
    pub fn len(&self) -> usize {
        self.head.len()
    }

    /// True if no edge survived pruning
    pub fn is_empty(&self) -> bool {
        self.head.is_empty()
    }
}

/// The strongest edge is sampled every epoch, weaker edges proportionally less often.
fn make_epochs_per_sample(weights: &[Q], n_epochs: Q) -> Vec<Q> {
    let max_weight = weights.iter().copied().fold(0.0, Q::max);
    weights
        .iter()
        .map(|&w| {
            let n_samples = n_epochs * w / max_weight;
            if n_samples > 0.0 {
                n_epochs / n_samples
            } else {
                -1.0
            }
        })
        .collect()
}
