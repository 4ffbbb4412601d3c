use crate::dist::Q;
use log::info;
use ndarray::{Array2, ArrayView1};
use sprs::{CsMat, TriMat};

const BANDWIDTH: Q = 1.0;
const N_ITER: usize = 64;
const SMOOTH_K_TOLERANCE: Q = 1e-5;
const MIN_K_DIST_SCALE: Q = 1e-3;

/// Fuzzy simplicial set (a weighted graph over the points) from their nearest neighbours.
///
/// Distances of each point are normalised by the distance to its closest neighbour (`rho`) and a
/// per-point bandwidth (`sigma`); the directed memberships are then combined by fuzzy union
/// (`set_op_mix_ratio = 1`) or intersection (`0`).
pub fn fuzzy_simplicial_set(
    knn_indices: &Array2<usize>,
    knn_distances: &Array2<Q>,
    local_connectivity: Q,
    set_op_mix_ratio: Q,
) -> CsMat<Q> {
    let n_points = knn_indices.nrows();
    let (sigmas, rhos) = smooth_knn_distances(knn_distances, local_connectivity);
    let (rows, cols, values) = membership_strengths(knn_indices, knn_distances, &sigmas, &rhos);

    let directed: CsMat<Q> = TriMat::from_triplets((n_points, n_points), rows, cols, values).to_csr();
    let transpose: CsMat<Q> = directed.transpose_view().to_csr();

    // elementwise product
    let product = sprs::binop::mul_mat_same_storage(&directed, &transpose);
    let union = &(&(&directed + &transpose) - &product) * set_op_mix_ratio;
    let intersection = &product * (1.0 - set_op_mix_ratio);
    let graph = &union + &intersection;

    info!("fuzzy simplicial set has {} non-zero entries", graph.nnz());
    graph
}

/// Per-point `(sigma, rho)`
pub(crate) fn smooth_knn_distances(knn_distances: &Array2<Q>, local_connectivity: Q) -> (Vec<Q>, Vec<Q>) {
    let (n_points, k) = knn_distances.dim();
    let global_mean = knn_distances.mean().unwrap_or(0.0);
    let mut sigmas = vec![0.0; n_points];
    let mut rhos = vec![0.0; n_points];

    for i in 0..n_points {
        let row = knn_distances.row(i);
        let non_zero: Vec<Q> = row.iter().copied().filter(|&d| d > 0.0).collect();

        if non_zero.len() as Q >= local_connectivity {
            let index = local_connectivity.floor() as usize;
            let interpolation = local_connectivity - local_connectivity.floor();
            if index > 0 {
                rhos[i] = non_zero[index - 1];
                if interpolation > SMOOTH_K_TOLERANCE {
                    rhos[i] += interpolation * (non_zero[index] - non_zero[index - 1]);
                }
            } else {
                rhos[i] = interpolation * non_zero[0];
            }
        } else if !non_zero.is_empty() {
            rhos[i] = non_zero.iter().copied().fold(Q::MIN, Q::max);
        }

        let mut sigma = smooth_knn_dist(row, rhos[i], k);
        let floor = if rhos[i] > 0.0 {
            MIN_K_DIST_SCALE * row.mean().unwrap_or(0.0)
        } else {
            MIN_K_DIST_SCALE * global_mean
        };
        if sigma < floor {
            sigma = floor;
        }
        sigmas[i] = sigma;
    }
    (sigmas, rhos)
}

/// Binary search for the bandwidth at which the memberships of a point sum to `log2(k)`
fn smooth_knn_dist(distances: ArrayView1<Q>, rho: Q, k: usize) -> Q {
    let target = (k as Q).log2() * BANDWIDTH;
    let mut lo = 0.0;
    let mut mid = 1.0;
    let mut hi = Q::INFINITY;

    for _ in 0..N_ITER {
        let psum: Q = distances.iter().map(|&d| (-((d - rho).max(0.0) / mid)).exp()).sum();
        if (psum - target).abs() < SMOOTH_K_TOLERANCE {
            break;
        }
        if psum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            mid = if hi.is_infinite() { mid * 2.0 } else { (lo + hi) / 2.0 };
        }
    }
    mid
}

fn membership_strengths(
    knn_indices: &Array2<usize>,
    knn_distances: &Array2<Q>,
    sigmas: &[Q],
    rhos: &[Q],
) -> (Vec<usize>, Vec<usize>, Vec<Q>) {
    let (n_points, k) = knn_indices.dim();
    let mut rows = Vec::with_capacity(n_points * k);
    let mut cols = Vec::with_capacity(n_points * k);
    let mut values = Vec::with_capacity(n_points * k);

    for i in 0..n_points {
        for c in 0..k {
            let j = knn_indices[[i, c]];
            if j == i {
                continue;
            }
            let d = knn_distances[[i, c]] - rhos[i];
            let v = if d <= 0.0 || sigmas[i] == 0.0 {
                1.0
            } else {
                (-d / sigmas[i]).exp()
            };
            rows.push(i);
            cols.push(j);
            values.push(v);
        }
    }
    (rows, cols, values)
}
