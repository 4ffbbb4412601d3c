use crate::dataset::{Dataset, ReductionMethod};
use crate::error::PipelineError;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const STAGE: &str = "cells_plot";

/// What the cells are coloured by
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorBy {
    /// Values of a cell metadata column
    CellColumn(String),
    /// Cluster labels
    #[default]
    Cluster,
    /// Partition labels
    Partition,
    /// Pseudotime
    Pseudotime,
}

/// What [`cells_plot`] draws
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    /// Embedding to draw, its first two dimensions
    pub reduction: ReductionMethod,
    /// Colouring of the cells
    pub color_by: ColorBy,
    /// Overlay the principal graph
    pub show_trajectory_graph: bool,
    /// Label every group at the median of its cells
    pub label_groups: bool,
    /// Label the leaves of the principal graph
    pub label_leaves: bool,
    /// Label the branch points of the principal graph
    pub label_branch_points: bool,
    /// Label the root nodes of the pseudotime
    pub label_roots: bool,
}

impl Default for PlotConfig {
    fn default() -> Self {
        PlotConfig {
            reduction: ReductionMethod::Umap,
            color_by: ColorBy::Cluster,
            show_trajectory_graph: true,
            label_groups: true,
            label_leaves: true,
            label_branch_points: true,
            label_roots: true,
        }
    }
}

/// Colour value of a cell
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PointColor {
    /// A categorical value
    Category(String),
    /// A continuous value
    Value(f64),
    /// Pseudotime of a cell not connected to any root
    Unreachable,
}

/// One cell
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// First embedding coordinate
    pub x: f64,
    /// Second embedding coordinate, 0 for one-dimensional embeddings
    pub y: f64,
    /// Colour value
    pub color: PointColor,
}

/// An edge of the principal graph
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Start
    pub from: [f64; 2],
    /// End
    pub to: [f64; 2],
}

/// Kind of a text label
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelKind {
    /// A cell group
    Group,
    /// A leaf of the principal graph
    Leaf,
    /// A branch point of the principal graph
    BranchPoint,
    /// A root node
    Root,
}

/// A text label at a position
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Label {
    /// Kind
    pub kind: LabelKind,
    /// Text
    pub text: String,
    /// Position
    pub at: [f64; 2],
}

/// Everything a renderer needs to draw the cells of a dataset
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellsPlot {
    /// One point per cell, in cell order
    pub points: Vec<Point>,
    /// Principal graph edges
    pub segments: Vec<Segment>,
    /// Group and graph labels
    pub labels: Vec<Label>,
}

fn categories(names: Vec<String>, labels: &[usize]) -> Vec<PointColor> {
    labels.iter().map(|&l| PointColor::Category(names[l].clone())).collect()
}

fn median(mut v: Vec<f64>) -> f64 {
    v.sort_by(f64::total_cmp);
    let n = v.len();
    match n {
        0 => f64::NAN,
        _ if n % 2 == 1 => v[n / 2],
        _ => 0.5 * (v[n / 2 - 1] + v[n / 2]),
    }
}

/// Lay out the cells of `ds` in an embedding, coloured and labelled as configured. The principal
/// graph overlay and its labels are skipped, with a warning, when no graph was learned on the
/// chosen embedding.
pub fn cells_plot(ds: &Dataset, cfg: &PlotConfig) -> Result<CellsPlot, PipelineError> {
    let embedding = ds.require_embedding(STAGE, cfg.reduction)?;
    let xy = |row: usize| -> [f64; 2] {
        let r = embedding.row(row);
        [r[0], r.get(1).copied().unwrap_or(0.0)]
    };

    let colors = match &cfg.color_by {
        ColorBy::Cluster => {
            let c = ds.require_clusters(STAGE, cfg.reduction)?;
            categories((0..c.num_clusters()).map(|l| l.to_string()).collect(), &c.clusters)
        }
        ColorBy::Partition => {
            let c = ds.require_clusters(STAGE, cfg.reduction)?;
            categories((0..c.num_partitions()).map(|l| l.to_string()).collect(), &c.partitions)
        }
        ColorBy::CellColumn(name) => ds
            .cells()
            .column(name)
            .ok_or_else(|| PipelineError::parameter("color_by", name, "no such cell metadata column"))?
            .iter()
            .map(|v| PointColor::Category(v.clone()))
            .collect(),
        ColorBy::Pseudotime => ds
            .require_pseudotime(STAGE)?
            .values()
            .iter()
            .map(|&t| if t.is_finite() { PointColor::Value(t) } else { PointColor::Unreachable })
            .collect(),
    };

    let points: Vec<Point> = colors
        .into_iter()
        .enumerate()
        .map(|(cell, color)| {
            let [x, y] = xy(cell);
            Point { x, y, color }
        })
        .collect();

    let mut labels = Vec::new();
    if cfg.label_groups {
        let mut members: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (cell, p) in points.iter().enumerate() {
            if let PointColor::Category(name) = &p.color {
                members.entry(name.as_str()).or_default().push(cell);
            }
        }
        for (name, cells) in members {
            let x = median(cells.iter().map(|&c| points[c].x).collect());
            let y = median(cells.iter().map(|&c| points[c].y).collect());
            labels.push(Label {
                kind: LabelKind::Group,
                text: name.to_string(),
                at: [x, y],
            });
        }
    }

    let mut segments = Vec::new();
    let graph = match ds.principal_graph() {
        Some(g) if g.reduction == cfg.reduction => Some(g),
        Some(g) => {
            warn!(
                "the principal graph was learned on the {} embedding, not drawing it on {}",
                g.reduction, cfg.reduction
            );
            None
        }
        None => None,
    };
    if let Some(graph) = graph {
        let node = |n: usize| -> [f64; 2] {
            let r = graph.nodes.row(n);
            [r[0], r.get(1).copied().unwrap_or(0.0)]
        };
        if cfg.show_trajectory_graph {
            segments.extend(graph.edges.iter().map(|e| Segment {
                from: node(e.a),
                to: node(e.b),
            }));
        }

        let mut numbered = |kind: LabelKind, nodes: &[usize]| {
            labels.extend(nodes.iter().enumerate().map(|(i, &n)| Label {
                kind,
                text: (i + 1).to_string(),
                at: node(n),
            }));
        };
        if cfg.label_leaves {
            numbered(LabelKind::Leaf, &graph.leaves());
        }
        if cfg.label_branch_points {
            numbered(LabelKind::BranchPoint, &graph.branch_points());
        }
        if cfg.label_roots {
            if let Some(pt) = ds.pseudotime() {
                numbered(LabelKind::Root, pt.root_nodes());
            }
        }
    } else if cfg.show_trajectory_graph && ds.principal_graph().is_none() {
        warn!("no principal graph has been learned, drawing cells only");
    }

    Ok(CellsPlot {
        points,
        segments,
        labels,
    })
}

/// Fraction of variance explained by each principal component, for an elbow plot
pub fn variance_explained(ds: &Dataset) -> Result<Vec<f64>, PipelineError> {
    Ok(ds.require_pca("variance_explained")?.variance_ratio.to_vec())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cluster::Clusters;
    use crate::pseudotime::{order_cells, OrderCellsParams, RootSelection};
    use crate::test::dataset_with_embedding;
    use crate::trajectory::{GraphEdge, PrincipalGraph};
    use ndarray::array;

    /// Six cells, two clusters; a Y-shaped graph and a separate node
    fn annotated() -> Dataset {
        let x = array![[0.0, 0.0], [1.0, 0.0], [2.0, 1.0], [2.0, -1.0], [9.0, 9.0], [9.0, 11.0]];
        let mut ds = dataset_with_embedding(x, ReductionMethod::Umap);
        ds.set_clusters(
            ReductionMethod::Umap,
            Clusters {
                clusters: vec![0, 0, 0, 0, 1, 1],
                partitions: vec![0, 0, 0, 0, 1, 1],
                resolution: 1.0,
                modularity: 0.5,
            },
        );
        let edge = |a, b, length| GraphEdge { a, b, length };
        ds.set_principal_graph(PrincipalGraph {
            reduction: ReductionMethod::Umap,
            nodes: array![[0.0, 0.0], [1.0, 0.0], [2.0, 1.0], [2.0, -1.0], [9.0, 10.0]],
            node_partition: vec![0, 0, 0, 0, 1],
            edges: vec![edge(0, 1, 1.0), edge(1, 2, 1.5), edge(1, 3, 1.5)],
            closest_node: vec![0, 1, 2, 3, 4, 4],
        });
        ds
    }

    #[test]
    fn clusters_with_graph() {
        let plot = cells_plot(&annotated(), &PlotConfig::default()).unwrap();
        assert_eq!(plot.points.len(), 6);
        assert_eq!(plot.points[4].color, PointColor::Category("1".into()));
        assert_eq!(plot.segments.len(), 3);
        assert_eq!(plot.segments[0].to, [1.0, 0.0]);

        let of = |kind| plot.labels.iter().filter(|l| l.kind == kind).count();
        assert_eq!(of(LabelKind::Group), 2);
        assert_eq!(of(LabelKind::Leaf), 3);
        assert_eq!(of(LabelKind::BranchPoint), 1);
        assert_eq!(of(LabelKind::Root), 0);
        let group1 = plot.labels.iter().find(|l| l.kind == LabelKind::Group && l.text == "1").unwrap();
        assert_eq!(group1.at, [9.0, 10.0]);
    }

    #[test]
    fn pseudotime_marks_unreachable_cells() {
        let params = OrderCellsParams {
            roots: RootSelection::Nodes(vec![0]),
        };
        let ds = order_cells(annotated(), &params).unwrap();
        let cfg = PlotConfig {
            color_by: ColorBy::Pseudotime,
            ..Default::default()
        };
        let plot = cells_plot(&ds, &cfg).unwrap();
        assert_eq!(plot.points[2].color, PointColor::Value(2.5));
        assert_eq!(plot.points[5].color, PointColor::Unreachable);
        assert!(plot.labels.iter().all(|l| l.kind != LabelKind::Group));
        assert_eq!(
            plot.labels.iter().filter(|l| l.kind == LabelKind::Root).count(),
            1
        );
    }

    #[test]
    fn missing_inputs() {
        let ds = annotated();
        let cases = [
            PlotConfig {
                reduction: ReductionMethod::Tsne,
                ..Default::default()
            },
            PlotConfig {
                color_by: ColorBy::Pseudotime,
                ..Default::default()
            },
        ];
        for cfg in cases {
            assert!(matches!(
                cells_plot(&ds, &cfg),
                Err(PipelineError::PrecursorMissing { .. })
            ));
        }
        let cfg = PlotConfig {
            color_by: ColorBy::CellColumn("nope".into()),
            ..Default::default()
        };
        assert!(matches!(cells_plot(&ds, &cfg), Err(PipelineError::Parameter { .. })));
        assert!(variance_explained(&ds).is_err());
    }
}
