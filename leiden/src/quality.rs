use crate::{Clustering, Network};
use rayon::prelude::*;

/// Modularity of `clustering` with a resolution parameter:
///
/// `Q = 1/(2m) * sum_ij (A_ij - resolution * k_i * k_j / (2m)) * [c_i == c_j]`
///
/// where `k_i` is the node weight, which is the weighted degree for networks built with
/// [`Network::from_edges`]. A network without edges has quality 0.
pub fn modularity(resolution: f64, network: &Network, clustering: &Clustering) -> f64 {
    let m = network.total_edge_weight();
    if m == 0.0 {
        return 0.0;
    }

    // Chunk partial sums are reduced in order so the result does not depend on thread count.
    let chunk_size = std::cmp::max(1, network.nodes() / 64);
    let nodes: Vec<usize> = (0..network.nodes()).collect();
    let internal: Vec<f64> = nodes
        .par_chunks(chunk_size)
        .map(|chunk| {
            let mut acc = 0.0;
            for &i in chunk {
                let c_i = clustering.get(i);
                for (j, w) in network.neighbors(i) {
                    if clustering.get(j) == c_i {
                        acc += w;
                    }
                }
            }
            acc
        })
        .collect();
    let internal: f64 = internal.iter().sum();

    let mut cluster_weights = vec![0.0; clustering.num_clusters()];
    for i in 0..network.nodes() {
        cluster_weights[clustering.get(i)] += network.weight(i);
    }
    let expected: f64 = cluster_weights.iter().map(|k| k * k).sum::<f64>() * resolution / (2.0 * m);

    (internal - expected) / (2.0 * m)
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn two_triangles() {
        // two triangles joined by a single bridge
        let n = Network::from_edges(
            6,
            vec![(0, 1, 1.0), (1, 2, 1.0), (0, 2, 1.0), (3, 4, 1.0), (4, 5, 1.0), (3, 5, 1.0), (2, 3, 1.0)],
        );
        let c = Clustering::from_labels(&[0, 0, 0, 1, 1, 1]);
        // m = 7, internal = 12, K = (7, 7)
        assert_abs_diff_eq!(modularity(1.0, &n, &c), (12.0 - 98.0 / 14.0) / 14.0, epsilon = 1e-12);
        assert_abs_diff_eq!(modularity(1.0, &n, &Clustering::single(6)), 0.0, epsilon = 1e-12);
        assert_eq!(modularity(1.0, &Network::from_edges(3, vec![]), &Clustering::single(3)), 0.0);
    }
}
