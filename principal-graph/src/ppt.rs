use crate::sq_dist;
use crate::tree::{minimum_spanning_tree, PrincipalTree};
use anyhow::{bail, format_err, Error};
use log::debug;
use nalgebra::DMatrix;
use ndarray::parallel::prelude::*;
use ndarray::{Array2, ArrayView2, Axis};

/// SimplePPT principal tree (Mao et al., 2015). Alternates between
///
/// * the Euclidean minimum spanning tree of the current nodes,
/// * soft assignment of points to nodes, `r_ij ∝ exp(-|x_i - c_j|² / sigma)`,
/// * the node update minimising the weighted fit plus `lambda` times the squared edge lengths,
///   `(lambda L + diag(Rᵀ1)) C = Rᵀ X` with `L` the tree Laplacian,
///
/// until the relative change of the objective falls below `eps`.
#[derive(Clone, Debug)]
pub struct SimplePpt {
    /// Bandwidth of the soft assignment
    pub sigma: f64,
    /// Weight of the tree length penalty
    pub lambda: f64,
    /// Maximum number of alternations
    pub max_iter: usize,
    /// Relative objective tolerance
    pub eps: f64,
}

impl Default for SimplePpt {
    fn default() -> Self {
        SimplePpt {
            sigma: 0.01,
            lambda: 1.0,
            max_iter: 10,
            eps: 1e-5,
        }
    }
}

impl SimplePpt {
    /// Fit a principal tree to the rows of `x`, starting from the node positions in `init`.
    pub fn fit(&self, x: ArrayView2<f64>, init: Array2<f64>) -> Result<PrincipalTree, Error> {
        if self.sigma.is_nan() || self.sigma <= 0.0 {
            bail!("sigma must be positive, got {}", self.sigma);
        }
        if self.lambda.is_nan() || self.lambda < 0.0 {
            bail!("lambda must be non-negative, got {}", self.lambda);
        }
        if x.nrows() == 0 || init.nrows() == 0 {
            bail!("cannot fit a principal tree with {} points and {} nodes", x.nrows(), init.nrows());
        }
        if x.ncols() != init.ncols() {
            bail!("points have {} dimensions but nodes have {}", x.ncols(), init.ncols());
        }

        let mut nodes = init;
        if nodes.nrows() == 1 {
            return Ok(PrincipalTree::from_nodes(x, nodes));
        }

        let mut prev_objective = f64::INFINITY;
        for iter in 0..self.max_iter {
            let edges = minimum_spanning_tree(nodes.view());
            let (r, fit) = self.soft_assign(x, nodes.view());

            let tree_length: f64 = edges.iter().map(|&(a, b)| sq_dist(nodes.row(a), nodes.row(b))).sum();
            let objective = fit + self.lambda * tree_length;

            nodes = self.update_nodes(x, &r, &edges)?;

            let rel_change = (prev_objective - objective).abs() / objective.abs().max(f64::MIN_POSITIVE);
            debug!("SimplePPT iteration {}: objective {:.6}, relative change {:.3e}", iter, objective, rel_change);
            if rel_change < self.eps {
                break;
            }
            prev_objective = objective;
        }

        Ok(PrincipalTree::from_nodes(x, nodes))
    }

    /// Row-normalised assignment matrix and the fit + entropy part of the objective.
    fn soft_assign(&self, x: ArrayView2<f64>, nodes: ArrayView2<f64>) -> (Array2<f64>, f64) {
        let mut r = Array2::<f64>::zeros((x.nrows(), nodes.nrows()));
        let sigma = self.sigma;
        // collected before summing so the objective does not depend on the thread count
        let fit: f64 = r
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(x.axis_iter(Axis(0)).into_par_iter())
            .map(|(mut ri, xi)| {
                for (j, c) in nodes.outer_iter().enumerate() {
                    ri[j] = sq_dist(xi, c);
                }
                let phi = ri.to_owned();
                let min = phi.fold(f64::INFINITY, |m, &v| m.min(v));
                ri.mapv_inplace(|v| (-(v - min) / sigma).exp());
                let total = ri.sum();
                ri /= total;

                let mut row_objective = 0.0;
                for (&rij, &p) in ri.iter().zip(phi.iter()) {
                    if rij > 0.0 {
                        row_objective += rij * p + sigma * rij * rij.ln();
                    }
                }
                row_objective
            })
            .collect::<Vec<f64>>()
            .iter()
            .sum();
        (r, fit)
    }

    fn update_nodes(&self, x: ArrayView2<f64>, r: &Array2<f64>, edges: &[(usize, usize)]) -> Result<Array2<f64>, Error> {
        let k = r.ncols();
        let dim = x.ncols();

        let weight = r.sum_axis(Axis(0));
        let mut a = DMatrix::<f64>::zeros(k, k);
        for j in 0..k {
            a[(j, j)] = weight[j];
        }
        for &(i, j) in edges {
            a[(i, i)] += self.lambda;
            a[(j, j)] += self.lambda;
            a[(i, j)] -= self.lambda;
            a[(j, i)] -= self.lambda;
        }

        let rx = r.t().dot(&x);
        let b = DMatrix::from_fn(k, dim, |i, j| rx[(i, j)]);
        let solved = a
            .lu()
            .solve(&b)
            .ok_or_else(|| format_err!("singular system updating {} principal nodes", k))?;

        Ok(Array2::from_shape_fn((k, dim), |(i, j)| solved[(i, j)]))
    }
}
