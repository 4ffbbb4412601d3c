use crate::geodesic::{adjacency, connected_components, hop_distances};
use crate::kmeans::assign;
use crate::sq_dist;
use itertools::Itertools;
use log::debug;
use ndarray::{Array2, ArrayView2, Axis};
use petgraph::algo::min_spanning_tree;
use petgraph::data::Element;
use petgraph::graph::{NodeIndex, UnGraph};

/// A principal graph fitted to a set of points: node positions, undirected edges `(a, b)` with
/// `a < b`, and the closest node of every point.
#[derive(Clone, Debug, PartialEq)]
pub struct PrincipalTree {
    /// `nodes × dim` node positions
    pub nodes: Array2<f64>,
    /// Sorted edge list
    pub edges: Vec<(usize, usize)>,
    /// Closest node of every point the tree was fitted to
    pub closest: Vec<usize>,
}

impl PrincipalTree {
    /// Connect `nodes` by their Euclidean minimum spanning tree and assign every row of `x` to its
    /// closest node.
    pub fn from_nodes(x: ArrayView2<f64>, nodes: Array2<f64>) -> PrincipalTree {
        let edges = minimum_spanning_tree(nodes.view());
        let closest = assign(x, nodes.view());
        PrincipalTree { nodes, edges, closest }
    }

    /// Number of nodes
    pub fn n_nodes(&self) -> usize {
        self.nodes.nrows()
    }

    /// Edges with their Euclidean lengths
    pub fn edge_lengths(&self) -> Vec<(usize, usize, f64)> {
        self.edges
            .iter()
            .map(|&(a, b)| (a, b, sq_dist(self.nodes.row(a), self.nodes.row(b)).sqrt()))
            .collect()
    }

    /// Number of edges at every node
    pub fn degrees(&self) -> Vec<usize> {
        let mut deg = vec![0; self.n_nodes()];
        for &(a, b) in &self.edges {
            deg[a] += 1;
            deg[b] += 1;
        }
        deg
    }

    /// Nodes with exactly one edge
    pub fn leaves(&self) -> Vec<usize> {
        self.degrees().iter().positions(|&d| d == 1).collect()
    }

    /// Nodes with three or more edges
    pub fn branch_points(&self) -> Vec<usize> {
        self.degrees().iter().positions(|&d| d >= 3).collect()
    }

    /// Remove leaf branches with fewer than `minimal_branch_len` nodes between the leaf and the
    /// branch point they hang from. The two ends of the longest path in every component are never
    /// removed. Points of `x` are reassigned to the remaining nodes. Returns the number of nodes
    /// removed.
    pub fn prune(&mut self, x: ArrayView2<f64>, minimal_branch_len: usize) -> usize {
        let n = self.n_nodes();
        let deg = self.degrees();
        if deg.iter().all(|&d| d < 3) {
            return 0;
        }

        let adj = adjacency(n, &self.edges);
        let hops = hop_distances(n, &self.edges);
        let protected: Vec<usize> = diameter_ends(&hops, &connected_components(n, &self.edges))
            .into_iter()
            .flat_map(|(a, b)| [a, b])
            .collect();

        let mut remove = vec![false; n];
        for leaf in deg.iter().positions(|&d| d == 1) {
            if protected.contains(&leaf) {
                continue;
            }
            let mut path = vec![leaf];
            let mut prev = leaf;
            let mut cur = adj[leaf][0];
            let reaches_branch = loop {
                if deg[cur] >= 3 {
                    break true;
                }
                if deg[cur] == 1 {
                    break false;
                }
                path.push(cur);
                match adj[cur].iter().copied().find(|&v| v != prev) {
                    Some(next) => {
                        prev = cur;
                        cur = next;
                    }
                    None => break false,
                }
            };
            if reaches_branch && path.len() < minimal_branch_len {
                for i in path {
                    remove[i] = true;
                }
            }
        }

        let removed = remove.iter().filter(|&&r| r).count();
        if removed == 0 {
            return 0;
        }

        let keep: Vec<usize> = (0..n).filter(|&i| !remove[i]).collect();
        let mut new_index = vec![usize::MAX; n];
        for (new, &old) in keep.iter().enumerate() {
            new_index[old] = new;
        }
        self.nodes = self.nodes.select(Axis(0), &keep);
        self.edges = self
            .edges
            .iter()
            .filter(|&&(a, b)| !remove[a] && !remove[b])
            .map(|&(a, b)| (new_index[a], new_index[b]))
            .collect();
        self.closest = assign(x, self.nodes.view());
        debug!("pruned {} of {} principal nodes", removed, n);
        removed
    }

    /// Join pairs of leaves of the same component that are close in space but far apart along the
    /// graph: Euclidean distance at most `euclidean_distance_ratio` times the longest edge, and
    /// path length at least `geodesic_distance_ratio` times the component diameter (in edges).
    /// Each leaf is joined at most once, closest pairs first. Returns the number of edges added.
    pub fn close_loops(&mut self, euclidean_distance_ratio: f64, geodesic_distance_ratio: f64) -> usize {
        let n = self.n_nodes();
        let max_edge = self
            .edge_lengths()
            .iter()
            .map(|e| e.2)
            .fold(0.0, f64::max);
        if max_edge == 0.0 {
            return 0;
        }

        let hops = hop_distances(n, &self.edges);
        let components = connected_components(n, &self.edges);
        let mut diameter = vec![0usize; n];
        for (i, row) in hops.iter().enumerate() {
            for &h in row.iter().filter(|&&h| h != usize::MAX) {
                diameter[components[i]] = diameter[components[i]].max(h);
            }
        }

        let leaves = self.leaves();
        let mut candidates = Vec::new();
        for (ia, &a) in leaves.iter().enumerate() {
            for &b in &leaves[ia + 1..] {
                if components[a] != components[b] || hops[a][b] <= 1 {
                    continue;
                }
                let dist = sq_dist(self.nodes.row(a), self.nodes.row(b)).sqrt();
                let far_along_graph = hops[a][b] as f64 >= geodesic_distance_ratio * diameter[components[a]] as f64;
                if dist <= euclidean_distance_ratio * max_edge && far_along_graph {
                    candidates.push((dist, a, b));
                }
            }
        }
        candidates.sort_by(|x, y| x.0.total_cmp(&y.0).then((x.1, x.2).cmp(&(y.1, y.2))));

        let mut used = vec![false; n];
        let mut added = 0;
        for (_, a, b) in candidates {
            if used[a] || used[b] {
                continue;
            }
            used[a] = true;
            used[b] = true;
            self.edges.push((a, b));
            added += 1;
        }
        self.edges.sort_unstable();
        added
    }
}

/// Edges of the Euclidean minimum spanning tree over the rows of `nodes`, sorted.
pub(crate) fn minimum_spanning_tree(nodes: ArrayView2<f64>) -> Vec<(usize, usize)> {
    let k = nodes.nrows();
    let mut g = UnGraph::<(), f64>::with_capacity(k, k * k.saturating_sub(1) / 2);
    for _ in 0..k {
        g.add_node(());
    }
    for i in 0..k {
        for j in (i + 1)..k {
            let d = sq_dist(nodes.row(i), nodes.row(j)).sqrt();
            g.add_edge(NodeIndex::new(i), NodeIndex::new(j), d);
        }
    }

    let mut edges: Vec<(usize, usize)> = min_spanning_tree(&g)
        .filter_map(|e| match e {
            Element::Edge { source, target, .. } => Some((source.min(target), source.max(target))),
            Element::Node { .. } => None,
        })
        .collect();
    edges.sort_unstable();
    edges
}

/// Endpoints of the longest shortest path in every component
fn diameter_ends(hops: &[Vec<usize>], components: &[usize]) -> Vec<(usize, usize)> {
    let n_components = components.iter().max().map_or(0, |m| m + 1);
    let mut best: Vec<Option<(usize, usize, usize)>> = vec![None; n_components];
    for (i, row) in hops.iter().enumerate() {
        for (j, &h) in row.iter().enumerate().skip(i + 1) {
            if h == usize::MAX {
                continue;
            }
            let slot = &mut best[components[i]];
            if slot.map_or(true, |(bh, _, _)| h > bh) {
                *slot = Some((h, i, j));
            }
        }
    }
    best.into_iter().flatten().map(|(_, a, b)| (a, b)).collect()
}
