use crate::Clustering;
use fxhash::FxHashMap;

/// Weighted, undirected network stored as a compressed adjacency list.
///
/// Every undirected edge is stored twice, once from each endpoint. Self-loops are not stored.
/// Node weights default to the weighted degree, which makes the quality function used by
/// [`crate::Leiden`] the modularity of the network.
#[derive(Debug, Clone, Default)]
pub struct Network {
    node_weights: Vec<f64>,
    offsets: Vec<usize>,
    targets: Vec<usize>,
    weights: Vec<f64>,
    total_edge_weight: f64,
}

impl Network {
    /// Build a network over `n_nodes` nodes from `(a, b, weight)` triples. Parallel edges are merged
    /// by summing their weights; self-loops and zero-weight edges are skipped.
    pub fn from_edges<I>(n_nodes: usize, edges: I) -> Network
    where
        I: IntoIterator<Item = (usize, usize, f64)>,
    {
        let mut adjacency = vec![Vec::new(); n_nodes];
        for (a, b, w) in edges {
            assert!(a < n_nodes && b < n_nodes, "edge ({a}, {b}) outside network of {n_nodes} nodes");
            if a == b || w == 0.0 {
                continue;
            }
            adjacency[a].push((b, w));
            adjacency[b].push((a, w));
        }

        let node_weights = adjacency
            .iter()
            .map(|list: &Vec<(usize, f64)>| list.iter().map(|(_, w)| w).sum())
            .collect();
        Network::from_adjacency(node_weights, adjacency)
    }

    fn from_adjacency(node_weights: Vec<f64>, mut adjacency: Vec<Vec<(usize, f64)>>) -> Network {
        let mut offsets = Vec::with_capacity(adjacency.len() + 1);
        let mut targets = Vec::new();
        let mut weights = Vec::new();
        offsets.push(0);

        for list in adjacency.iter_mut() {
            list.sort_unstable_by_key(|(t, _)| *t);
            let start = targets.len();
            for &(t, w) in list.iter() {
                if targets.len() > start && targets[targets.len() - 1] == t {
                    let last = weights.len() - 1;
                    weights[last] += w;
                } else {
                    targets.push(t);
                    weights.push(w);
                }
            }
            offsets.push(targets.len());
        }

        let total_edge_weight = weights.iter().sum::<f64>() / 2.0;
        Network {
            node_weights,
            offsets,
            targets,
            weights,
            total_edge_weight,
        }
    }

    /// Number of nodes in the network
    pub fn nodes(&self) -> usize {
        self.node_weights.len()
    }

    /// Number of undirected edges
    pub fn edges(&self) -> usize {
        self.targets.len() / 2
    }

    /// Weight of `node`
    pub fn weight(&self, node: usize) -> f64 {
        self.node_weights[node]
    }

    /// Iterate over `(neighbor, edge weight)` pairs of `node`
    pub fn neighbors(&self, node: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.offsets[node]..self.offsets[node + 1];
        self.targets[range.clone()].iter().copied().zip(self.weights[range].iter().copied())
    }

    /// Iterate over every undirected edge once, as `(a, b, weight)` with `a < b`.
    pub fn edge_list(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.nodes()).flat_map(move |a| {
            self.neighbors(a)
                .filter(move |(b, _)| a < *b)
                .map(move |(b, w)| (a, b, w))
        })
    }

    /// Sum of all node weights
    pub fn total_node_weight(&self) -> f64 {
        self.node_weights.iter().sum()
    }

    /// Sum of all edge weights, counting each undirected edge once
    pub fn total_edge_weight(&self) -> f64 {
        self.total_edge_weight
    }

    /// Total weight of the edges incident to `node`
    pub fn edge_weight_of(&self, node: usize) -> f64 {
        self.weights[self.offsets[node]..self.offsets[node + 1]].iter().sum()
    }

    /// Collapse every cluster of `clustering` into one node. Node weights are summed, edges between
    /// clusters are summed, and edges inside a cluster are dropped.
    pub fn reduce(&self, clustering: &Clustering) -> Network {
        let num_clusters = clustering.num_clusters();
        let mut node_weights = vec![0.0; num_clusters];
        for i in 0..self.nodes() {
            node_weights[clustering.get(i)] += self.weight(i);
        }

        let mut memo: FxHashMap<(usize, usize), f64> = FxHashMap::default();
        for (a, b, w) in self.edge_list() {
            let (ca, cb) = (clustering.get(a), clustering.get(b));
            if ca != cb {
                *memo.entry((ca.min(cb), ca.max(cb))).or_insert(0.0) += w;
            }
        }

        let mut adjacency = vec![Vec::new(); num_clusters];
        for ((ca, cb), w) in memo {
            adjacency[ca].push((cb, w));
            adjacency[cb].push((ca, w));
        }
        Network::from_adjacency(node_weights, adjacency)
    }

    /// Split the network into one subnetwork per cluster, keeping only intra-cluster edges.
    /// Node `k` of subnetwork `c` is the `k`-th entry of `clustering.nodes_per_cluster()[c]`.
    pub fn subnetworks(&self, clustering: &Clustering) -> Vec<Network> {
        let members = clustering.nodes_per_cluster();
        let mut local_id = vec![0; self.nodes()];
        for nodes in &members {
            for (k, &node) in nodes.iter().enumerate() {
                local_id[node] = k;
            }
        }

        members
            .iter()
            .map(|nodes| {
                let node_weights = nodes.iter().map(|&n| self.weight(n)).collect();
                let adjacency = nodes
                    .iter()
                    .map(|&n| {
                        let c = clustering.get(n);
                        self.neighbors(n)
                            .filter(|(m, _)| clustering.get(*m) == c)
                            .map(|(m, w)| (local_id[m], w))
                            .collect()
                    })
                    .collect();
                Network::from_adjacency(node_weights, adjacency)
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn path() -> Network {
        Network::from_edges(4, vec![(0, 1, 1.0), (1, 2, 2.0), (2, 3, 1.0), (1, 0, 1.0), (3, 3, 5.0)])
    }

    #[test]
    fn merges_parallel_edges() {
        let n = path();
        assert_eq!(n.nodes(), 4);
        assert_eq!(n.edges(), 3);
        assert_eq!(n.neighbors(0).collect::<Vec<_>>(), vec![(1, 2.0)]);
        assert_eq!(n.total_edge_weight(), 5.0);
        assert_eq!(n.weight(1), 4.0);
        assert_eq!(n.total_node_weight(), 10.0);
    }

    #[test]
    fn reduce_and_split() {
        let n = path();
        let c = Clustering::from_labels(&[0, 0, 1, 1]);

        let reduced = n.reduce(&c);
        assert_eq!(reduced.nodes(), 2);
        assert_eq!(reduced.edge_list().collect::<Vec<_>>(), vec![(0, 1, 2.0)]);
        assert_eq!(reduced.weight(0), 6.0);

        let subs = n.subnetworks(&c);
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].edge_list().collect::<Vec<_>>(), vec![(0, 1, 2.0)]);
        assert_eq!(subs[1].edge_list().collect::<Vec<_>>(), vec![(0, 1, 1.0)]);
        // subnetworks keep the parent's node weights
        assert_eq!(subs[1].weight(0), 3.0);
    }
}
