use crate::{Clustering, Network, ZeroVec};
use rand::seq::SliceRandom;
use rand::Rng;

/// Refinement phase of Leiden. Starting from singletons inside one cluster of the coarse
/// partition, well-connected singleton nodes are merged into well-connected sub-clusters. The
/// target is drawn at random with probability proportional to `exp(gain / randomness)`, so
/// refined clusters are never split and always stay inside their parent cluster.
pub(crate) struct Refinement {
    resolution: f64,
    randomness: f64,
    cluster_weights: Vec<f64>,
    external_edge_weight: Vec<f64>,
    non_singleton: Vec<bool>,
    edge_weight_per_cluster: Vec<f64>,
    neighboring_clusters: Vec<usize>,
    cumulative: Vec<f64>,
}

impl Refinement {
    pub fn new(resolution: f64, randomness: f64) -> Self {
        Refinement {
            resolution,
            randomness,
            cluster_weights: Vec::new(),
            external_edge_weight: Vec::new(),
            non_singleton: Vec::new(),
            edge_weight_per_cluster: Vec::new(),
            neighboring_clusters: Vec::new(),
            cumulative: Vec::new(),
        }
    }

    pub fn run(&mut self, n: &Network, rng: &mut impl Rng) -> Clustering {
        let num_nodes = n.nodes();
        let mut c = Clustering::singletons(num_nodes);
        if num_nodes <= 1 {
            return c;
        }

        let total_node_weight = n.total_node_weight();
        self.cluster_weights.clear();
        self.cluster_weights.extend((0..num_nodes).map(|i| n.weight(i)));
        self.external_edge_weight.clear();
        self.external_edge_weight.extend((0..num_nodes).map(|i| n.edge_weight_of(i)));
        self.non_singleton.clear();
        self.non_singleton.resize(num_nodes, false);
        self.edge_weight_per_cluster.zero_len(num_nodes);

        let mut order: Vec<usize> = (0..num_nodes).collect();
        order.shuffle(rng);

        let resolution = self.resolution;
        let well_connected = |ext: f64, cw: f64| ext >= cw * (total_node_weight - cw) * resolution;

        let mut update = false;
        for j in order {
            let w_j = n.weight(j);

            if self.non_singleton[j] || !well_connected(self.external_edge_weight[j], self.cluster_weights[j]) {
                continue;
            }

            // take j out of its singleton
            self.cluster_weights[j] = 0.0;
            self.external_edge_weight[j] = 0.0;

            self.neighboring_clusters.clear();
            self.neighboring_clusters.push(j);
            for (k, w) in n.neighbors(j) {
                let l = c.get(k);
                if self.edge_weight_per_cluster[l] == 0.0 {
                    self.neighboring_clusters.push(l);
                }
                self.edge_weight_per_cluster[l] += w;
            }

            let mut best = j;
            let mut best_gain = 0.0;
            let mut total = 0.0;
            self.cumulative.clear();
            for &l in &self.neighboring_clusters {
                if well_connected(self.external_edge_weight[l], self.cluster_weights[l]) {
                    let gain = self.edge_weight_per_cluster[l] - w_j * self.cluster_weights[l] * self.resolution;
                    if gain > best_gain {
                        best = l;
                        best_gain = gain;
                    }
                    if gain >= 0.0 {
                        total += (gain / self.randomness).exp();
                    }
                }
                self.cumulative.push(total);
            }
            for &l in &self.neighboring_clusters {
                self.edge_weight_per_cluster[l] = 0.0;
            }

            // Overflowing weights degrade to the greedy choice.
            let mut chosen = best;
            if total.is_finite() && total > 0.0 {
                let r = total * rng.gen::<f64>();
                if let Some(pos) = self.cumulative.iter().position(|&cum| cum >= r) {
                    chosen = self.neighboring_clusters[pos];
                }
            }

            self.cluster_weights[chosen] += w_j;
            for (k, w) in n.neighbors(j) {
                if c.get(k) == chosen {
                    self.external_edge_weight[chosen] -= w;
                } else {
                    self.external_edge_weight[chosen] += w;
                }
            }

            if chosen != j {
                c.set(j, chosen);
                self.non_singleton[chosen] = true;
                update = true;
            }
        }

        if update {
            c.remove_empty_clusters();
        }
        c
    }
}
