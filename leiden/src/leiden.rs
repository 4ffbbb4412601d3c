use crate::local_moving::LocalMoving;
use crate::quality::modularity;
use crate::refine::Refinement;
use crate::{Clustering, Network};
use log::debug;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// Default randomness of the refinement phase
pub const DEFAULT_RANDOMNESS: f64 = 0.01;

/// Leiden community detection maximising modularity with a resolution parameter.
/// Smaller resolutions give fewer, larger clusters.
pub struct Leiden {
    resolution: f64,
    randomness: f64,
    rng: ChaCha20Rng,
}

impl Leiden {
    /// Initialize the algorithm. All randomness is drawn from a generator seeded with `seed`, so
    /// the same network, parameters and seed always give the same clustering.
    pub fn new(resolution: f64, randomness: f64, seed: u64) -> Leiden {
        Leiden {
            resolution,
            randomness,
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }

    /// Run up to `max_iterations` Leiden iterations from singletons, stopping early once an
    /// iteration leaves the labels unchanged.
    pub fn run(&mut self, n: &Network, max_iterations: usize) -> Clustering {
        let mut c = Clustering::singletons(n.nodes());
        if n.total_edge_weight() == 0.0 {
            return c;
        }

        for i in 0..max_iterations {
            let updated = self.iterate(n, &mut c);
            debug!(
                "leiden iteration {}: {} clusters, quality {:.6}",
                i,
                c.num_clusters(),
                modularity(self.resolution, n, &c)
            );
            if !updated {
                break;
            }
        }
        c
    }

    /// Iterate the algorithm one step, starting from clustering `c`. Returns true if labels changed.
    pub fn iterate(&mut self, n: &Network, c: &mut Clustering) -> bool {
        let m = n.total_edge_weight();
        if m == 0.0 {
            return false;
        }
        // Local moving and refinement work with a resolution scaled by 1/(2m) of the original network.
        self.iterate_level(n, c, self.resolution / (2.0 * m))
    }

    fn iterate_level(&mut self, n: &Network, c: &mut Clustering, resolution: f64) -> bool {
        let mut update = LocalMoving::new(resolution).iterate(n, c, &mut self.rng);

        if c.num_clusters() == n.nodes() {
            return update;
        }

        // Refine each cluster separately; refined sub-clusters become the nodes of the next level.
        let subnetworks = n.subnetworks(c);
        let members = c.nodes_per_cluster();
        let mut refinement = Refinement::new(resolution, self.randomness);

        let mut refined = Clustering::single(n.nodes());
        let mut parent_of_refined = Vec::new();
        let mut next_label = 0;
        for (cluster, sub) in subnetworks.iter().enumerate() {
            let sub_clustering = refinement.run(sub, &mut self.rng);
            for (k, &node) in members[cluster].iter().enumerate() {
                refined.set(node, next_label + sub_clustering.get(k));
            }
            next_label += sub_clustering.num_clusters();
            parent_of_refined.extend(std::iter::repeat(cluster).take(sub_clustering.num_clusters()));
        }

        if refined.num_clusters() == n.nodes() {
            // Refinement merged nothing, so aggregate the unrefined clusters instead.
            let reduced = n.reduce(c);
            let mut reduced_clustering = Clustering::singletons(reduced.nodes());
            update |= self.iterate_level(&reduced, &mut reduced_clustering, resolution);
            c.merge_clusters(&reduced_clustering);
            return update;
        }

        let reduced = n.reduce(&refined);

        // The aggregate network starts from the unrefined clustering.
        let mut reduced_clustering = Clustering::from_labels(&parent_of_refined);
        update |= self.iterate_level(&reduced, &mut reduced_clustering, resolution);

        refined.merge_clusters(&reduced_clustering);
        *c = refined;
        update
    }
}
