/// Assignment of every node to a single integer cluster label.
///
/// Labels are kept dense (`0..num_clusters`) by [`Clustering::remove_empty_clusters`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clustering {
    labels: Vec<usize>,
    num_clusters: usize,
}

impl Clustering {
    /// Every node in its own cluster
    pub fn singletons(num_nodes: usize) -> Self {
        Clustering {
            labels: (0..num_nodes).collect(),
            num_clusters: num_nodes,
        }
    }

    /// Every node in cluster 0
    pub fn single(num_nodes: usize) -> Self {
        Clustering {
            labels: vec![0; num_nodes],
            num_clusters: usize::from(num_nodes > 0),
        }
    }

    /// Clustering with known labels. Unused labels are squeezed out.
    pub fn from_labels(labels: &[usize]) -> Self {
        let num_clusters = labels.iter().max().map_or(0, |m| m + 1);
        let mut c = Clustering {
            labels: labels.to_vec(),
            num_clusters,
        };
        c.remove_empty_clusters();
        c
    }

    /// Label of `node`
    pub fn get(&self, node: usize) -> usize {
        self.labels[node]
    }

    /// Set the label of `node`, growing the label range if needed
    pub fn set(&mut self, node: usize, label: usize) {
        self.labels[node] = label;
        if label >= self.num_clusters {
            self.num_clusters = label + 1;
        }
    }

    /// Number of nodes
    pub fn nodes(&self) -> usize {
        self.labels.len()
    }

    /// Number of labels in use (an upper bound until empty clusters are removed)
    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    /// Labels of all nodes
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Consume the clustering and return the labels
    pub fn into_labels(self) -> Vec<usize> {
        self.labels
    }

    /// Members of each cluster, in node order
    pub fn nodes_per_cluster(&self) -> Vec<Vec<usize>> {
        let mut lists = vec![Vec::new(); self.num_clusters];
        for (node, &label) in self.labels.iter().enumerate() {
            lists[label].push(node);
        }
        lists
    }

    /// Number of nodes in each cluster
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.num_clusters];
        for &l in &self.labels {
            sizes[l] += 1;
        }
        sizes
    }

    /// Relabel so that labels are dense, preserving the order of first appearance of label values
    pub fn remove_empty_clusters(&mut self) {
        let sizes = self.cluster_sizes();
        let mut new_label = vec![usize::MAX; sizes.len()];
        let mut next = 0;
        for (old, &size) in sizes.iter().enumerate() {
            if size > 0 {
                new_label[old] = next;
                next += 1;
            }
        }
        for l in self.labels.iter_mut() {
            *l = new_label[*l];
        }
        self.num_clusters = next;
    }

    /// Replace each label `l` by `higher.get(l)`, i.e. apply a clustering of the clusters.
    pub fn merge_clusters(&mut self, higher: &Clustering) {
        for l in self.labels.iter_mut() {
            *l = higher.get(*l);
        }
        self.num_clusters = higher.num_clusters();
        self.remove_empty_clusters();
    }

    /// Relabel so that cluster 0 is the largest. Ties go to the cluster whose first node comes first.
    pub fn order_by_size(&mut self) {
        let sizes = self.cluster_sizes();
        let mut first_node = vec![usize::MAX; sizes.len()];
        for (node, &l) in self.labels.iter().enumerate().rev() {
            first_node[l] = node;
        }

        let mut order: Vec<usize> = (0..sizes.len()).collect();
        order.sort_by(|&a, &b| sizes[b].cmp(&sizes[a]).then(first_node[a].cmp(&first_node[b])));

        let mut new_label = vec![0; sizes.len()];
        for (rank, &old) in order.iter().enumerate() {
            new_label[old] = rank;
        }
        for l in self.labels.iter_mut() {
            *l = new_label[*l];
        }
    }
}
