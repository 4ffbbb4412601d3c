use anyhow::Error;
use leiden::Network;
use ndarray::{Array2, ArrayView2};
use std::collections::{BTreeMap, HashSet};
use umap_rs::knn::nearest_neighbors;
use umap_rs::DistanceType;

/// Compute the `k` nearest neighbors of each row in `v`, using Euclidean distance. Each row represents a n-dimensional
/// vector where n is the number of columns in `v`. Equally distant neighbors are ordered by index and a row is never
/// its own neighbor. Fails unless `k` is smaller than the number of rows.
pub fn knn(v: &ArrayView2<f64>, k: usize) -> Result<Array2<usize>, Error> {
    let (indices, _) = nearest_neighbors(v.view(), k, DistanceType::Euclidean)?;
    Ok(indices)
}

/// Undirected edges of a kNN graph, each pair once as `(a, b, weight)` with `a < b`. Unweighted
/// edges have weight 1; weighted edges carry the Jaccard index of the two neighbourhoods, where
/// each neighbourhood includes the point itself.
pub fn knn_edges(neighbors: &Array2<usize>, weighted: bool) -> Vec<(usize, usize, f64)> {
    let sets: Vec<HashSet<usize>> = neighbors
        .outer_iter()
        .enumerate()
        .map(|(i, row)| std::iter::once(i).chain(row.iter().copied()).collect())
        .collect();

    let mut edges = BTreeMap::new();
    for (i, row) in neighbors.outer_iter().enumerate() {
        for &j in row {
            let key = (i.min(j), i.max(j));
            if edges.contains_key(&key) {
                continue;
            }
            let w = if weighted {
                let shared = sets[i].intersection(&sets[j]).count();
                shared as f64 / (sets[i].len() + sets[j].len() - shared) as f64
            } else {
                1.0
            };
            edges.insert(key, w);
        }
    }
    edges.into_iter().map(|((a, b), w)| (a, b, w)).collect()
}

/// [`leiden::Network`] of the `k`-nearest-neighbour graph of the rows of `v`
pub fn knn_network(v: &ArrayView2<f64>, k: usize, weighted: bool) -> Result<Network, Error> {
    let neighbors = knn(v, k)?;
    Ok(Network::from_edges(v.nrows(), knn_edges(&neighbors, weighted)))
}
