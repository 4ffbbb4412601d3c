use petgraph::algo::dijkstra;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;

/// Shortest-path distance from the nearest of `sources` to every node of an undirected graph with
/// `n` nodes and non-negative weighted `edges`. Nodes not reachable from any source get
/// `f64::INFINITY`.
pub fn geodesic_distances(n: usize, edges: &[(usize, usize, f64)], sources: &[usize]) -> Vec<f64> {
    // a virtual node joined to every source turns this into a single-source problem
    let mut g = UnGraph::<(), f64>::with_capacity(n + 1, edges.len() + sources.len());
    for _ in 0..=n {
        g.add_node(());
    }
    for &(a, b, w) in edges {
        g.add_edge(NodeIndex::new(a), NodeIndex::new(b), w);
    }
    let start = NodeIndex::new(n);
    for &s in sources {
        g.add_edge(start, NodeIndex::new(s), 0.0);
    }

    let dist = dijkstra(&g, start, None, |e| *e.weight());
    (0..n)
        .map(|i| dist.get(&NodeIndex::new(i)).copied().unwrap_or(f64::INFINITY))
        .collect()
}

/// Number of edges on the shortest path between every pair of nodes, `usize::MAX` if unconnected.
pub(crate) fn hop_distances(n: usize, edges: &[(usize, usize)]) -> Vec<Vec<usize>> {
    let adj = adjacency(n, edges);
    (0..n)
        .map(|s| {
            let mut d = vec![usize::MAX; n];
            d[s] = 0;
            let mut queue = std::collections::VecDeque::from([s]);
            while let Some(i) = queue.pop_front() {
                for &j in &adj[i] {
                    if d[j] == usize::MAX {
                        d[j] = d[i] + 1;
                        queue.push_back(j);
                    }
                }
            }
            d
        })
        .collect()
}

/// Sorted neighbour lists
pub(crate) fn adjacency(n: usize, edges: &[(usize, usize)]) -> Vec<Vec<usize>> {
    let mut adj = vec![Vec::new(); n];
    for &(a, b) in edges {
        adj[a].push(b);
        adj[b].push(a);
    }
    for list in &mut adj {
        list.sort_unstable();
        list.dedup();
    }
    adj
}

/// Connected component label of every node. Labels are consecutive, in order of first node.
pub fn connected_components(n: usize, edges: &[(usize, usize)]) -> Vec<usize> {
    let mut uf = UnionFind::new(n);
    for &(a, b) in edges {
        uf.union(a, b);
    }
    let roots = uf.into_labeling();
    let mut relabel = vec![usize::MAX; n];
    let mut next = 0;
    roots
        .iter()
        .map(|&r| {
            if relabel[r] == usize::MAX {
                relabel[r] = next;
                next += 1;
            }
            relabel[r]
        })
        .collect()
}
