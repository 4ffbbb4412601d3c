use crate::{Clustering, Network, ZeroVec};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::VecDeque;

/// Queue-based local moving: nodes are visited in random order and moved to the neighbouring
/// cluster with the largest quality increment. When a node moves, its neighbours outside the new
/// cluster are queued again.
#[derive(Default)]
pub(crate) struct LocalMoving {
    /// Resolution already divided by twice the total edge weight of the top-level network.
    resolution: f64,
    cluster_weights: Vec<f64>,
    nodes_per_cluster: Vec<usize>,
    unused_clusters: Vec<usize>,
    edge_weight_per_cluster: Vec<f64>,
    neighboring_clusters: Vec<usize>,
    queued: Vec<bool>,
}

impl LocalMoving {
    pub fn new(resolution: f64) -> Self {
        LocalMoving {
            resolution,
            ..LocalMoving::default()
        }
    }

    pub fn iterate(&mut self, n: &Network, c: &mut Clustering, rng: &mut impl Rng) -> bool {
        let num_nodes = n.nodes();
        if num_nodes == 0 {
            return false;
        }

        self.cluster_weights.zero_len(num_nodes);
        self.nodes_per_cluster.zero_len(num_nodes);
        for i in 0..num_nodes {
            self.cluster_weights[c.get(i)] += n.weight(i);
            self.nodes_per_cluster[c.get(i)] += 1;
        }

        self.unused_clusters.clear();
        for l in (0..num_nodes).rev() {
            if self.nodes_per_cluster[l] == 0 {
                self.unused_clusters.push(l);
            }
        }

        let mut order: Vec<usize> = (0..num_nodes).collect();
        order.shuffle(rng);
        let mut queue: VecDeque<usize> = order.into_iter().collect();
        self.queued.clear();
        self.queued.resize(num_nodes, true);

        self.edge_weight_per_cluster.zero_len(num_nodes);
        self.neighboring_clusters.clear();

        let mut update = false;
        while let Some(j) = queue.pop_front() {
            self.queued[j] = false;
            let current = c.get(j);
            let w_j = n.weight(j);

            self.cluster_weights[current] -= w_j;
            self.nodes_per_cluster[current] -= 1;
            if self.nodes_per_cluster[current] == 0 {
                self.unused_clusters.push(current);
            }

            // An empty cluster is always a candidate, so a node can always be split off.
            let empty = self.unused_clusters.last().copied();
            self.neighboring_clusters.clear();
            if let Some(e) = empty {
                self.neighboring_clusters.push(e);
            }
            for (k, w) in n.neighbors(j) {
                let l = c.get(k);
                if self.edge_weight_per_cluster[l] == 0.0 {
                    self.neighboring_clusters.push(l);
                }
                self.edge_weight_per_cluster[l] += w;
            }

            let mut best = current;
            let mut best_gain =
                self.edge_weight_per_cluster[current] - w_j * self.cluster_weights[current] * self.resolution;
            for &l in &self.neighboring_clusters {
                let gain = self.edge_weight_per_cluster[l] - w_j * self.cluster_weights[l] * self.resolution;
                if gain > best_gain {
                    best = l;
                    best_gain = gain;
                }
            }
            for &l in &self.neighboring_clusters {
                self.edge_weight_per_cluster[l] = 0.0;
            }

            self.cluster_weights[best] += w_j;
            self.nodes_per_cluster[best] += 1;
            if Some(best) == empty {
                self.unused_clusters.pop();
            }

            if best != current {
                c.set(j, best);
                update = true;
                for (k, _) in n.neighbors(j) {
                    if !self.queued[k] && c.get(k) != best {
                        self.queued[k] = true;
                        queue.push_back(k);
                    }
                }
            }
        }

        if update {
            c.remove_empty_clusters();
        }
        update
    }
}
