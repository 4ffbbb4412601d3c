use crate::dataset::Dataset;
use crate::error::PipelineError;
use log::{info, warn};
use principal_graph::geodesic_distances;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const STAGE: &str = "order_cells";

/// Where pseudotime starts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootSelection {
    /// Cell identifiers; their closest principal nodes become the roots
    Cells(Vec<String>),
    /// Principal node indices
    Nodes(Vec<usize>),
    /// The node chosen by [`earliest_principal_node`] for a cell metadata value
    Annotation {
        /// Cell metadata column
        column: String,
        /// Value marking the earliest cells
        value: String,
    },
}

/// Parameters of [`order_cells`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCellsParams {
    /// Root cells or nodes
    pub roots: RootSelection,
}

/// Pseudotime of every cell. Cells not connected to any root have `f64::INFINITY`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pseudotime {
    #[serde(with = "infinite_as_null")]
    values: Vec<f64>,
    root_nodes: Vec<usize>,
}

impl Pseudotime {
    /// Pseudotime of every cell
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Pseudotime of one cell
    pub fn get(&self, cell: usize) -> f64 {
        self.values[cell]
    }

    /// Principal nodes the distances are measured from
    pub fn root_nodes(&self) -> &[usize] {
        &self.root_nodes
    }

    /// True if the cell is connected to a root
    pub fn is_reachable(&self, cell: usize) -> bool {
        self.values[cell].is_finite()
    }

    /// Number of cells without a path to any root
    pub fn n_unreachable(&self) -> usize {
        self.values.iter().filter(|v| !v.is_finite()).count()
    }

    /// Largest finite pseudotime, 0 if there is none
    pub fn max_finite(&self) -> f64 {
        self.values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(0.0, f64::max)
    }
}

/// JSON has no infinity, so unreachable cells are stored as `null`.
mod infinite_as_null {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(values: &[f64], s: S) -> Result<S::Ok, S::Error> {
        let opt: Vec<Option<f64>> = values.iter().map(|&v| v.is_finite().then_some(v)).collect();
        opt.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<f64>, D::Error> {
        let opt = Vec::<Option<f64>>::deserialize(d)?;
        Ok(opt.into_iter().map(|v| v.unwrap_or(f64::INFINITY)).collect())
    }
}

/// Assign each cell the geodesic distance, along the principal graph, from its closest node to
/// the nearest root node.
pub fn order_cells(mut ds: Dataset, params: &OrderCellsParams) -> Result<Dataset, PipelineError> {
    let graph = ds.require_principal_graph(STAGE)?;

    let mut root_nodes = match &params.roots {
        RootSelection::Cells(ids) => {
            let mut nodes = Vec::with_capacity(ids.len());
            for id in ids {
                let cell = ds
                    .cell_index(id)
                    .ok_or_else(|| PipelineError::parameter("root cell", id, "unknown cell identifier"))?;
                nodes.push(graph.closest_node[cell]);
            }
            nodes
        }
        RootSelection::Nodes(nodes) => {
            if let Some(&bad) = nodes.iter().find(|&&n| n >= graph.n_nodes()) {
                return Err(PipelineError::parameter(
                    "root node",
                    bad,
                    format!("the principal graph has {} nodes", graph.n_nodes()),
                ));
            }
            nodes.clone()
        }
        RootSelection::Annotation { column, value } => vec![earliest_principal_node(&ds, column, value)?],
    };
    root_nodes.sort_unstable();
    root_nodes.dedup();
    if root_nodes.is_empty() {
        return Err(PipelineError::parameter("roots", "[]", "need at least one root"));
    }

    let node_distance = geodesic_distances(graph.n_nodes(), &graph.weighted_edges(), &root_nodes);
    let values: Vec<f64> = graph.closest_node.iter().map(|&n| node_distance[n]).collect();

    let pseudotime = Pseudotime { values, root_nodes };
    let unreachable = pseudotime.n_unreachable();
    info!(
        "ordered {} cells from {} root nodes, max pseudotime {:.3}",
        ds.n_cells(),
        pseudotime.root_nodes.len(),
        pseudotime.max_finite()
    );
    if unreachable > 0 {
        warn!("{unreachable} cells are not connected to any root and have infinite pseudotime");
    }
    ds.set_pseudotime(pseudotime);
    Ok(ds)
}

/// The principal node that is closest to the most cells whose metadata `column` equals `value`.
/// Ties go to the lower node index.
pub fn earliest_principal_node(ds: &Dataset, column: &str, value: &str) -> Result<usize, PipelineError> {
    let graph = ds.require_principal_graph("earliest_principal_node")?;
    let values = ds
        .cells()
        .column(column)
        .ok_or_else(|| PipelineError::parameter("root column", column, "no such cell metadata column"))?;

    let mut counts = BTreeMap::new();
    for (cell, v) in values.iter().enumerate() {
        if v == value {
            *counts.entry(graph.closest_node[cell]).or_insert(0usize) += 1;
        }
    }
    let mut best: Option<(usize, usize)> = None;
    for (node, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((node, count));
        }
    }
    best.map(|(node, _)| node).ok_or_else(|| {
        PipelineError::parameter("root value", value, format!("no cell has this value in column {column}"))
    })
}
