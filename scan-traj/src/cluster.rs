use crate::dataset::{Dataset, ReductionMethod};
use crate::error::PipelineError;
use crate::nn::knn_network;
use diff_exp::adjusted_pvalue_bh;
use diff_exp::stat::normal_upper_tail;
use leiden::leiden::DEFAULT_RANDOMNESS;
use leiden::quality::modularity;
use leiden::{Clustering, Leiden, Network};
use log::{info, warn};
use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const STAGE: &str = "cluster_cells";

/// Parameters of [`cluster_cells`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    /// Embedding the kNN graph is built on
    pub reduction: ReductionMethod,
    /// Neighbours per cell
    pub k: usize,
    /// Leiden resolution; smaller values give fewer, larger clusters
    pub resolution: f64,
    /// Jaccard edge weights instead of unit weights
    pub weighted: bool,
    /// Significance threshold for joining two clusters into one partition
    pub partition_qval: f64,
    /// Maximum Leiden iterations
    pub max_iterations: usize,
    /// Seed of the Leiden random generator
    pub seed: u64,
}

impl Default for ClusterParams {
    fn default() -> Self {
        ClusterParams {
            reduction: ReductionMethod::Umap,
            k: 20,
            resolution: 1.0,
            weighted: false,
            partition_qval: 0.05,
            max_iterations: 10,
            seed: 0,
        }
    }
}

/// Cluster and partition label of every cell. Label 0 is the largest cluster (partition).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Clusters {
    /// Cluster of each cell
    pub clusters: Vec<usize>,
    /// Partition of each cell
    pub partitions: Vec<usize>,
    /// Resolution the clusters were computed at
    pub resolution: f64,
    /// Modularity of the clustering on the kNN graph
    pub modularity: f64,
}

impl Clusters {
    /// Number of clusters
    pub fn num_clusters(&self) -> usize {
        self.clusters.iter().max().map_or(0, |m| m + 1)
    }

    /// Number of partitions
    pub fn num_partitions(&self) -> usize {
        self.partitions.iter().max().map_or(0, |m| m + 1)
    }

    /// Cells of `partition`, in cell order
    pub fn cells_in_partition(&self, partition: usize) -> Vec<usize> {
        (0..self.partitions.len())
            .filter(|&c| self.partitions[c] == partition)
            .collect()
    }

    /// Number of distinct clusters among the cells of `partition`
    pub fn clusters_in_partition(&self, partition: usize) -> usize {
        let mut seen: Vec<usize> = self
            .cells_in_partition(partition)
            .into_iter()
            .map(|c| self.clusters[c])
            .collect();
        seen.sort_unstable();
        seen.dedup();
        seen.len()
    }
}

/// Group clusters into partitions. Inter-cluster links of `network` are counted per pair of
/// clusters and compared, with a one-sided normal approximation, to the count expected from each
/// cluster's share of all inter-cluster links. Pairs significant after Benjamini-Hochberg
/// adjustment at `qval` are joined. Returns the partition of every cluster, labelled by first
/// appearance.
pub(crate) fn partition_clusters(network: &Network, clustering: &Clustering, qval: f64) -> Vec<usize> {
    let n_clusters = clustering.num_clusters();
    let reduced = network.reduce(clustering);
    let total = 2.0 * reduced.total_edge_weight();
    if n_clusters <= 1 || total <= 0.0 {
        // no links between clusters
        return (0..n_clusters).collect();
    }

    let links: HashMap<(usize, usize), f64> = reduced.edge_list().map(|(a, b, w)| ((a, b), w)).collect();
    let share: Vec<f64> = (0..n_clusters).map(|c| reduced.edge_weight_of(c) / total).collect();

    let mut pairs = Vec::new();
    let mut pvalues = Vec::new();
    for a in 0..n_clusters {
        for b in (a + 1)..n_clusters {
            let observed = links.get(&(a, b)).copied().unwrap_or(0.0);
            let theta = share[a] * share[b];
            let var = theta * (1.0 - theta) / total;
            let p = if observed <= 0.0 || var <= 0.0 {
                1.0
            } else {
                normal_upper_tail((observed / total - theta) / var.sqrt())
            };
            pvalues.push((pairs.len(), p));
            pairs.push((a, b));
        }
    }

    let mut sets = UnionFind::new(n_clusters);
    for (i, q) in adjusted_pvalue_bh(&pvalues) {
        if q < qval {
            let (a, b) = pairs[i];
            sets.union(a, b);
        }
    }
    Clustering::from_labels(&sets.into_labeling()).into_labels()
}

/// Leiden clustering of a network followed by [`partition_clusters`], both relabelled by size.
pub(crate) fn leiden_with_partitions(
    network: &Network,
    resolution: f64,
    max_iterations: usize,
    seed: u64,
    partition_qval: f64,
) -> Clusters {
    let mut clustering = Leiden::new(resolution, DEFAULT_RANDOMNESS, seed).run(network, max_iterations);
    clustering.order_by_size();
    let quality = modularity(1.0, network, &clustering);

    let cluster_partition = partition_clusters(network, &clustering, partition_qval);
    let mut partitions = Clustering::from_labels(
        &clustering
            .labels()
            .iter()
            .map(|&c| cluster_partition[c])
            .collect::<Vec<_>>(),
    );
    partitions.order_by_size();

    Clusters {
        clusters: clustering.into_labels(),
        partitions: partitions.into_labels(),
        resolution,
        modularity: quality,
    }
}

/// Cluster cells with Leiden on the kNN graph of an embedding and group the clusters into
/// partitions.
pub fn cluster_cells(mut ds: Dataset, params: &ClusterParams) -> Result<Dataset, PipelineError> {
    if !(params.resolution > 0.0 && params.resolution.is_finite()) {
        return Err(PipelineError::parameter(
            "resolution",
            params.resolution,
            "must be positive",
        ));
    }
    if params.k == 0 {
        return Err(PipelineError::parameter("k", params.k, "need at least one neighbour"));
    }
    if !(0.0..=1.0).contains(&params.partition_qval) {
        return Err(PipelineError::parameter(
            "partition_qval",
            params.partition_qval,
            "must lie in [0, 1]",
        ));
    }

    let embedding = ds.require_embedding(STAGE, params.reduction)?;
    let n = embedding.nrows();
    if n < 2 {
        return Err(PipelineError::parameter("k", params.k, format!("{n} cells are too few for a kNN graph")));
    }
    let k = if params.k >= n {
        warn!("k = {} is not smaller than the number of cells, using {}", params.k, n - 1);
        n - 1
    } else {
        params.k
    };

    info!(
        "clustering {n} cells on the {} embedding: k = {k}, resolution = {}",
        params.reduction, params.resolution
    );
    let network =
        knn_network(&embedding.view(), k, params.weighted).map_err(|e| PipelineError::numerical(STAGE, e))?;
    let clusters = leiden_with_partitions(
        &network,
        params.resolution,
        params.max_iterations,
        params.seed,
        params.partition_qval,
    );
    info!(
        "found {} clusters in {} partitions, modularity {:.4}",
        clusters.num_clusters(),
        clusters.num_partitions(),
        clusters.modularity
    );

    ds.set_clusters(params.reduction, clusters);
    Ok(ds)
}
