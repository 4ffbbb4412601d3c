use crate::dataset::{Dataset, ReductionMethod};
use crate::error::PipelineError;
use anyhow::Error;
use log::{debug, info};
use ndarray::{concatenate, Array2, ArrayView2, Axis};
use principal_graph::{kmeans, PrincipalTree, SimplePpt};
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const STAGE: &str = "learn_graph";
const KMEANS_ITER: usize = 50;

/// Parameters of [`learn_graph`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnGraphParams {
    /// Embedding the graph is fitted in
    pub reduction: ReductionMethod,
    /// Fit one tree per partition so no edge joins two partitions
    pub use_partition: bool,
    /// Principal nodes per tree; `round(clusters · 15 · log10(cells))` when `None`
    pub ncenter: Option<usize>,
    /// Bandwidth of the soft assignment of cells to nodes
    pub sigma: f64,
    /// Weight of the tree length penalty; `0.01 · cells` when `None`
    pub lambda: Option<f64>,
    /// Maximum SimplePPT iterations
    pub max_iter: usize,
    /// Relative objective tolerance
    pub eps: f64,
    /// Leaf branches with fewer nodes are pruned
    pub minimal_branch_len: usize,
    /// Prune short leaf branches
    pub prune_graph: bool,
    /// Join nearby leaves into loops
    pub close_loop: bool,
    /// Leaves closer than this multiple of the longest edge may be joined
    pub euclidean_distance_ratio: f64,
    /// Leaves joined must be at least this fraction of the diameter apart along the graph
    pub geodesic_distance_ratio: f64,
    /// Seed of the k-means initialisation
    pub seed: u64,
}

impl Default for LearnGraphParams {
    fn default() -> Self {
        LearnGraphParams {
            reduction: ReductionMethod::Umap,
            use_partition: true,
            ncenter: None,
            sigma: 0.01,
            lambda: None,
            max_iter: 10,
            eps: 1e-5,
            minimal_branch_len: 10,
            prune_graph: true,
            close_loop: false,
            euclidean_distance_ratio: 1.0,
            geodesic_distance_ratio: 1.0 / 3.0,
            seed: 0,
        }
    }
}

/// Undirected edge between two principal nodes
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// First node
    pub a: usize,
    /// Second node
    pub b: usize,
    /// Euclidean length in the embedding
    pub length: f64,
}

/// Principal graph over all partitions, in the coordinates of one embedding
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrincipalGraph {
    /// Embedding the graph lives in
    pub reduction: ReductionMethod,
    /// Node positions, nodes × dimensions
    pub nodes: Array2<f64>,
    /// Partition of every node
    pub node_partition: Vec<usize>,
    /// Edges, sorted
    pub edges: Vec<GraphEdge>,
    /// Closest node of every cell
    pub closest_node: Vec<usize>,
}

impl PrincipalGraph {
    /// Number of principal nodes
    pub fn n_nodes(&self) -> usize {
        self.nodes.nrows()
    }

    /// Edges as `(a, b, length)`
    pub fn weighted_edges(&self) -> Vec<(usize, usize, f64)> {
        self.edges.iter().map(|e| (e.a, e.b, e.length)).collect()
    }

    /// Number of edges at every node
    pub fn degrees(&self) -> Vec<usize> {
        let mut deg = vec![0; self.n_nodes()];
        for e in &self.edges {
            deg[e.a] += 1;
            deg[e.b] += 1;
        }
        deg
    }

    /// Nodes with a single edge
    pub fn leaves(&self) -> Vec<usize> {
        let deg = self.degrees();
        (0..deg.len()).filter(|&i| deg[i] == 1).collect()
    }

    /// Nodes with three or more edges
    pub fn branch_points(&self) -> Vec<usize> {
        let deg = self.degrees();
        (0..deg.len()).filter(|&i| deg[i] >= 3).collect()
    }

    /// Endpoints of every edge, smaller node first, for constant-time adjacency lookups
    pub fn edge_set(&self) -> HashSet<(usize, usize)> {
        self.edges.iter().map(|e| (e.a.min(e.b), e.a.max(e.b))).collect()
    }
}

/// Fits a principal tree to a set of points
pub trait GraphLearner {
    /// Fit a tree with `n_centers` nodes to the rows of `x`
    fn learn(&self, x: ArrayView2<f64>, n_centers: usize, lambda: f64, seed: u64) -> Result<PrincipalTree, Error>;
}

/// SimplePPT initialised with k-means centres
#[derive(Clone, Debug, Default)]
pub struct SimplePptLearner {
    /// Bandwidth of the soft assignment
    pub sigma: f64,
    /// Maximum iterations
    pub max_iter: usize,
    /// Relative objective tolerance
    pub eps: f64,
}

impl SimplePptLearner {
    /// Learner with the SimplePPT settings of `params`
    pub fn new(params: &LearnGraphParams) -> Self {
        SimplePptLearner {
            sigma: params.sigma,
            max_iter: params.max_iter,
            eps: params.eps,
        }
    }
}

impl GraphLearner for SimplePptLearner {
    fn learn(&self, x: ArrayView2<f64>, n_centers: usize, lambda: f64, seed: u64) -> Result<PrincipalTree, Error> {
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        let init = kmeans(x, n_centers, KMEANS_ITER, &mut rng)?;
        let ppt = SimplePpt {
            sigma: self.sigma,
            lambda,
            max_iter: self.max_iter,
            eps: self.eps,
        };
        ppt.fit(x, init.centers)
    }
}

fn validate(params: &LearnGraphParams) -> Result<(), PipelineError> {
    if params.ncenter == Some(0) {
        return Err(PipelineError::parameter("ncenter", 0, "need at least one principal node"));
    }
    if !(params.sigma > 0.0 && params.sigma.is_finite()) {
        return Err(PipelineError::parameter("sigma", params.sigma, "must be positive"));
    }
    if let Some(lambda) = params.lambda {
        if !(lambda >= 0.0 && lambda.is_finite()) {
            return Err(PipelineError::parameter("lambda", lambda, "must be non-negative"));
        }
    }
    if params.close_loop && !(params.euclidean_distance_ratio >= 0.0 && params.geodesic_distance_ratio >= 0.0) {
        return Err(PipelineError::parameter(
            "euclidean_distance_ratio",
            params.euclidean_distance_ratio,
            format!(
                "loop closing ratios must be non-negative (geodesic_distance_ratio = {})",
                params.geodesic_distance_ratio
            ),
        ));
    }
    Ok(())
}

/// Learn a principal graph with [`SimplePptLearner`].
pub fn learn_graph(ds: Dataset, params: &LearnGraphParams) -> Result<Dataset, PipelineError> {
    let learner = SimplePptLearner::new(params);
    learn_graph_with(ds, params, &learner)
}

/// Learn a principal graph with any [`GraphLearner`], one tree per partition when
/// `use_partition` is set and a single tree otherwise.
pub fn learn_graph_with(mut ds: Dataset, params: &LearnGraphParams, learner: &impl GraphLearner) -> Result<Dataset, PipelineError> {
    validate(params)?;
    let x = ds.require_embedding(STAGE, params.reduction)?;
    let clusters = ds.require_clusters(STAGE, params.reduction)?;
    let n_cells = x.nrows();

    let groups: Vec<Vec<usize>> = if params.use_partition {
        (0..clusters.num_partitions())
            .map(|p| clusters.cells_in_partition(p))
            .collect()
    } else {
        vec![(0..n_cells).collect()]
    };

    let mut node_blocks = Vec::new();
    let mut node_partition = Vec::new();
    let mut edges = Vec::new();
    let mut closest_node = vec![0; n_cells];
    let mut offset = 0;

    for (part, cells) in groups.iter().enumerate() {
        let n_part = cells.len();
        let n_clusters = if params.use_partition {
            clusters.clusters_in_partition(part)
        } else {
            clusters.num_clusters()
        };
        let auto = (n_clusters as f64 * 15.0 * (n_part as f64).log10()).round() as usize;
        let n_centers = params.ncenter.unwrap_or(auto).clamp(1, n_part.max(1));
        let lambda = params.lambda.unwrap_or(0.01 * n_part as f64);
        debug!("partition {part}: {n_part} cells, {n_centers} principal nodes, lambda = {lambda}");

        let points = x.select(Axis(0), cells);
        let mut tree = learner
            .learn(points.view(), n_centers, lambda, params.seed.wrapping_add(part as u64))
            .map_err(|e| PipelineError::numerical(STAGE, e))?;
        if params.prune_graph {
            tree.prune(points.view(), params.minimal_branch_len);
        }
        if params.close_loop {
            tree.close_loops(params.euclidean_distance_ratio, params.geodesic_distance_ratio);
        }

        for (a, b, length) in tree.edge_lengths() {
            edges.push(GraphEdge {
                a: offset + a.min(b),
                b: offset + a.max(b),
                length,
            });
        }
        for (&cell, &node) in cells.iter().zip(&tree.closest) {
            closest_node[cell] = offset + node;
        }
        node_partition.extend(std::iter::repeat(part).take(tree.n_nodes()));
        offset += tree.n_nodes();
        node_blocks.push(tree.nodes);
    }

    let views: Vec<ArrayView2<f64>> = node_blocks.iter().map(|b| b.view()).collect();
    let nodes = concatenate(Axis(0), &views).map_err(|e| PipelineError::numerical(STAGE, e.into()))?;
    edges.sort_by_key(|e| (e.a, e.b));

    let graph = PrincipalGraph {
        reduction: params.reduction,
        nodes,
        node_partition,
        edges,
        closest_node,
    };
    info!(
        "principal graph on {}: {} nodes, {} edges, {} leaves, {} branch points",
        params.reduction,
        graph.n_nodes(),
        graph.edges.len(),
        graph.leaves().len(),
        graph.branch_points().len()
    );
    ds.set_principal_graph(graph);
    Ok(ds)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cluster::Clusters;
    use crate::test::dataset_with_embedding;
    use ndarray_rand::RandomExt;
    use rand_distr::Normal;

    /// Two noisy horizontal segments far apart, each its own partition and cluster
    fn two_segments() -> Dataset {
        let n = 100;
        let mut rng = Pcg64Mcg::seed_from_u64(9);
        let noise = Array2::random_using((2 * n, 2), Normal::new(0.0, 0.05).unwrap(), &mut rng);
        let mut x = Array2::<f64>::zeros((2 * n, 2));
        for i in 0..2 * n {
            x[(i, 0)] = (i % n) as f64 / 10.0 + noise[(i, 0)];
            x[(i, 1)] = if i < n { 0.0 } else { 50.0 } + noise[(i, 1)];
        }
        let mut ds = dataset_with_embedding(x, ReductionMethod::Umap);
        let labels: Vec<usize> = (0..2 * n).map(|i| usize::from(i >= n)).collect();
        ds.set_clusters(
            ReductionMethod::Umap,
            Clusters {
                clusters: labels.clone(),
                partitions: labels,
                resolution: 1.0,
                modularity: 0.5,
            },
        );
        ds
    }

    #[test]
    fn edges_stay_inside_partitions() {
        let params = LearnGraphParams {
            ncenter: Some(12),
            ..Default::default()
        };
        let ds = learn_graph(two_segments(), &params).unwrap();
        let g = ds.principal_graph().unwrap();

        assert_eq!(g.n_nodes(), 24);
        assert_eq!(g.node_partition.iter().filter(|&&p| p == 0).count(), 12);
        for e in &g.edges {
            assert_eq!(g.node_partition[e.a], g.node_partition[e.b]);
            assert!(e.a < e.b && e.length > 0.0);
        }
        // a tree per partition
        assert_eq!(g.edges.len(), 22);
        for (cell, &node) in g.closest_node.iter().enumerate() {
            assert_eq!(g.node_partition[node], usize::from(cell >= 100));
        }
        // each segment is a path
        assert_eq!(g.leaves().len(), 4);
        assert!(g.branch_points().is_empty());

        let edge_set = g.edge_set();
        assert_eq!(edge_set.len(), 22);
        for e in &g.edges {
            assert!(edge_set.contains(&(e.a, e.b)));
        }
        let leaf = g.leaves()[0];
        assert!(!edge_set.contains(&(leaf, leaf)));
    }

    #[test]
    fn single_tree_without_partitions() {
        let params = LearnGraphParams {
            use_partition: false,
            ncenter: Some(10),
            prune_graph: false,
            ..Default::default()
        };
        let ds = learn_graph(two_segments(), &params).unwrap();
        let g = ds.principal_graph().unwrap();
        assert_eq!(g.n_nodes(), 10);
        assert_eq!(g.edges.len(), 9);
        assert!(g.node_partition.iter().all(|&p| p == 0));
    }

    struct FirstPoints;

    impl GraphLearner for FirstPoints {
        fn learn(&self, x: ArrayView2<f64>, n_centers: usize, _lambda: f64, _seed: u64) -> Result<PrincipalTree, Error> {
            let nodes = x.slice(ndarray::s![..n_centers, ..]).to_owned();
            Ok(PrincipalTree::from_nodes(x, nodes))
        }
    }

    #[test]
    fn custom_learner() {
        let params = LearnGraphParams {
            ncenter: Some(3),
            prune_graph: false,
            ..Default::default()
        };
        let ds = learn_graph_with(two_segments(), &params, &FirstPoints).unwrap();
        let g = ds.principal_graph().unwrap();
        assert_eq!(g.n_nodes(), 6);
        assert_eq!(g.edges.len(), 4);
    }

    #[test]
    fn precursors_and_parameters() {
        let x = Array2::<f64>::zeros((10, 2));
        let ds = dataset_with_embedding(x, ReductionMethod::Umap);
        assert!(matches!(
            learn_graph(ds, &LearnGraphParams::default()),
            Err(PipelineError::PrecursorMissing { .. })
        ));

        let params = LearnGraphParams {
            ncenter: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            learn_graph(two_segments(), &params),
            Err(PipelineError::Parameter { name: "ncenter", .. })
        ));
    }
}
