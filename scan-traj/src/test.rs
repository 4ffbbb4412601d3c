use crate::cluster::{cluster_cells, ClusterParams};
use crate::dataset::{CellMetadata, Dataset, ExpressionMatrix, GeneMetadata, ReductionMethod};
use crate::graph_test::{graph_test, GraphTestParams};
use crate::markers::{top_markers, MarkerParams};
use crate::pipeline::{run_pipeline, PipelineConfig};
use crate::preprocess::{preprocess, PreprocessParams};
use crate::pseudotime::{order_cells, OrderCellsParams, RootSelection};
use crate::reduce::{reduce_dimension, ReduceParams, TsneParams, UmapParams};
use crate::trajectory::{learn_graph, LearnGraphParams};
use ndarray::{Array2, ArrayView2};
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, Poisson};
use rand_pcg::Pcg64Mcg;

pub(crate) fn ids(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i}")).collect()
}

/// Dataset over a dense genes × cells count matrix: cells `cell{i}`, genes `gene{i}` named `G{i}`
pub(crate) fn dataset_from_dense(counts: ArrayView2<f64>) -> Dataset {
    let (n_genes, n_cells) = counts.dim();
    let matrix = ExpressionMatrix::from_dense(counts, ids("gene", n_genes), ids("cell", n_cells)).unwrap();
    let genes = GeneMetadata::new(ids("gene", n_genes), ids("G", n_genes)).unwrap();
    Dataset::new(matrix, CellMetadata::new(ids("cell", n_cells)), genes).unwrap()
}

/// The same dataset with one more cell metadata column, derived fields included
pub(crate) fn with_cell_column(ds: Dataset, name: &str, values: Vec<String>) -> Dataset {
    let cells = ds.cells().clone().with_column(name, values).unwrap();
    let mut out = Dataset::new(ds.matrix().clone(), cells, ds.genes().clone()).unwrap();
    if let Some(pca) = ds.pca() {
        out.set_pca(pca.clone());
    }
    for method in [ReductionMethod::Umap, ReductionMethod::Tsne] {
        if let Some(e) = ds.embedding(method) {
            out.set_embedding(method, e.clone());
        }
        if let Some(c) = ds.clusters(method) {
            out.set_clusters(method, c.clone());
        }
    }
    if let Some(g) = ds.principal_graph() {
        out.set_principal_graph(g.clone());
    }
    if let Some(p) = ds.pseudotime() {
        out.set_pseudotime(p.clone());
    }
    out
}

/// A dataset with three genes whose `method` embedding is `x` (cells × dimensions)
pub(crate) fn dataset_with_embedding(x: Array2<f64>, method: ReductionMethod) -> Dataset {
    let counts = Array2::from_shape_fn((3, x.nrows()), |(g, c)| ((g + c) % 4 + 1) as f64);
    let mut ds = dataset_from_dense(counts.view());
    ds.set_embedding(method, x);
    ds
}

/// Normally distributed 2-d points, `n` around each center
pub(crate) fn blobs(centers: &[(usize, [f64; 2])], sd: f64, seed: u64) -> Array2<f64> {
    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let noise = Normal::new(0.0, sd).unwrap();
    let total = centers.iter().map(|(n, _)| n).sum();
    let mut x = Array2::zeros((total, 2));
    let mut row = 0;
    for &(n, center) in centers {
        for _ in 0..n {
            for d in 0..2 {
                x[(row, d)] = center[d] + noise.sample(&mut rng);
            }
            row += 1;
        }
    }
    x
}

/// Poisson counts of two populations of equal size. The first tenth of the genes is high in the
/// first half of the cells (population A), the second tenth in the second half (B); all other
/// genes have the same rate everywhere. Cells carry a `population` column.
pub(crate) fn two_population_dataset(n_cells: usize, n_genes: usize, seed: u64) -> Dataset {
    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let high = Poisson::new(8.0).unwrap();
    let low = Poisson::new(0.2).unwrap();
    let base = Poisson::new(1.0).unwrap();
    let tenth = n_genes / 10;
    let half = n_cells / 2;

    let counts = Array2::from_shape_fn((n_genes, n_cells), |(g, c)| {
        let in_a = c < half;
        let dist = if g < tenth {
            if in_a {
                &high
            } else {
                &low
            }
        } else if g < 2 * tenth {
            if in_a {
                &low
            } else {
                &high
            }
        } else {
            &base
        };
        dist.sample(&mut rng)
    });
    let population = (0..n_cells).map(|c| (if c < half { "A" } else { "B" }).to_string()).collect();
    with_cell_column(dataset_from_dense(counts.view()), "population", population)
}

#[test]
fn two_clusters_of_five_hundred_cells() {
    let ds = two_population_dataset(500, 2000, 42);
    let ds = preprocess(
        ds,
        &PreprocessParams {
            num_dim: 10,
            ..Default::default()
        },
    )
    .unwrap();

    let params = ClusterParams {
        reduction: ReductionMethod::Pca,
        resolution: 1e-3,
        seed: 7,
        ..Default::default()
    };
    let a = cluster_cells(ds.clone(), &params).unwrap();
    let b = cluster_cells(ds, &params).unwrap();
    let ca = a.clusters(ReductionMethod::Pca).unwrap();
    let cb = b.clusters(ReductionMethod::Pca).unwrap();

    assert_eq!(ca.num_clusters(), 2);
    assert!((1..=2).contains(&ca.num_partitions()));
    assert_eq!(ca.clusters, cb.clusters);
    // the clusters are the populations
    assert!(ca.clusters[..250].iter().all(|&l| l == ca.clusters[0]));
    assert!(ca.clusters[250..].iter().all(|&l| l != ca.clusters[0]));

    let markers = top_markers(
        &a,
        &MarkerParams {
            reduction: ReductionMethod::Pca,
            workers: 2,
            ..Default::default()
        },
    )
    .unwrap();
    let top = markers.top_per_group(0.5, 3);
    for group in markers.groups() {
        let n = top.rows().iter().filter(|r| &r.group == group).count();
        assert_eq!(n, 3);
    }
    // every top marker belongs to the population of its cluster
    for r in top.rows() {
        let cluster: usize = r.group.parse().unwrap();
        let first_half = cluster == ca.clusters[0];
        let expected = if first_half { 0..200 } else { 200..400 };
        assert!(expected.contains(&r.gene_index), "{r:?}");
    }
    assert!(markers.exclusive_only().len() <= markers.len());
}

#[test]
fn two_populations_with_umap_and_default_clustering() {
    let ds = two_population_dataset(500, 2000, 42);
    let ds = preprocess(
        ds,
        &PreprocessParams {
            num_dim: 10,
            ..Default::default()
        },
    )
    .unwrap();
    let ds = reduce_dimension(ds, &ReduceParams::default()).unwrap();

    let params = ClusterParams::default();
    let a = cluster_cells(ds.clone(), &params).unwrap();
    let b = cluster_cells(ds, &params).unwrap();
    let ca = a.clusters(ReductionMethod::Umap).unwrap();
    assert_eq!(ca, b.clusters(ReductionMethod::Umap).unwrap());

    // the populations are the partitions; no cluster mixes them
    assert_eq!(ca.num_partitions(), 2);
    assert!(ca.partitions[..250].iter().all(|&p| p == ca.partitions[0]));
    assert!(ca.partitions[250..].iter().all(|&p| p != ca.partitions[0]));
    assert!(ca.num_clusters() >= 2);
    for c in 0..ca.num_clusters() {
        let cells: Vec<usize> = (0..500).filter(|&i| ca.clusters[i] == c).collect();
        assert!(cells.iter().all(|&i| (i < 250) == (cells[0] < 250)), "cluster {c} mixes populations");
    }
}

/// 60 cells along a stem ending at (60, 0), then 40 along each of two arms leaving it upwards and
/// downwards
fn branched_embedding() -> Array2<f64> {
    let mut x = blobs(&[(140, [0.0, 0.0])], 0.3, 11);
    for i in 0..140 {
        let (px, py) = match i {
            0..=59 => (i as f64, 0.0),
            60..=99 => (60.0 + (i - 59) as f64, (i - 59) as f64),
            _ => (60.0 + (i - 99) as f64, -((i - 99) as f64)),
        };
        x[(i, 0)] += px;
        x[(i, 1)] += py;
    }
    x
}

#[test]
fn pseudotime_on_branched_graph() {
    let ds = dataset_with_embedding(branched_embedding(), ReductionMethod::Umap);
    let ds = cluster_cells(
        ds,
        &ClusterParams {
            k: 10,
            resolution: 1e-3,
            ..Default::default()
        },
    )
    .unwrap();
    let ds = learn_graph(
        ds,
        &LearnGraphParams {
            ncenter: Some(30),
            minimal_branch_len: 3,
            ..Default::default()
        },
    )
    .unwrap();
    let ds = order_cells(
        ds,
        &OrderCellsParams {
            roots: RootSelection::Cells(vec!["cell0".into()]),
        },
    )
    .unwrap();

    let graph = ds.principal_graph().unwrap();
    let pt = ds.pseudotime().unwrap();
    assert!(!graph.branch_points().is_empty());
    assert_eq!(pt.get(0), 0.0);

    // pseudotime of each principal node, read off the cells closest to it
    let mut node_pt = vec![None; graph.n_nodes()];
    for (cell, &node) in graph.closest_node.iter().enumerate() {
        match node_pt[node] {
            None => node_pt[node] = Some(pt.get(cell)),
            Some(v) => assert_eq!(v, pt.get(cell), "cells of node {node} disagree"),
        }
    }
    for &root in pt.root_nodes() {
        assert!(node_pt[root].map_or(true, |v| v == 0.0));
    }
    let mut edges_checked = 0;
    for e in &graph.edges {
        if graph.node_partition[e.a] != graph.node_partition[e.b] {
            continue;
        }
        if let (Some(pa), Some(pb)) = (node_pt[e.a], node_pt[e.b]) {
            assert!((pa - pb).abs() <= e.length + 1e-9, "edge {e:?}: {pa} vs {pb}");
            edges_checked += 1;
        }
    }
    assert!(edges_checked > 0);
    // the arm tips are further from the root than the end of the stem
    assert!(pt.get(99) > pt.get(59) && pt.get(139) > pt.get(59));
}

#[test]
fn disconnected_cells_have_infinite_pseudotime() {
    // 80 cells along a line and 20 cells far away
    let mut x = blobs(&[(80, [0.0, 0.0]), (20, [500.0, 500.0])], 1.0, 3);
    for i in 0..80 {
        x[(i, 0)] = i as f64;
        x[(i, 1)] *= 0.2;
    }
    let ds = dataset_with_embedding(x, ReductionMethod::Umap);
    let ds = cluster_cells(
        ds,
        &ClusterParams {
            k: 10,
            resolution: 1e-3,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(ds.clusters(ReductionMethod::Umap).unwrap().num_partitions(), 2);

    let ds = learn_graph(
        ds,
        &LearnGraphParams {
            ncenter: Some(10),
            ..Default::default()
        },
    )
    .unwrap();
    let graph = ds.principal_graph().unwrap();
    let partitions = &ds.clusters(ReductionMethod::Umap).unwrap().partitions;
    for e in &graph.edges {
        assert_eq!(graph.node_partition[e.a], graph.node_partition[e.b]);
    }
    for (cell, &node) in graph.closest_node.iter().enumerate() {
        assert_eq!(graph.node_partition[node], partitions[cell]);
    }

    let ds = order_cells(
        ds,
        &OrderCellsParams {
            roots: RootSelection::Cells(vec!["cell0".into()]),
        },
    )
    .unwrap();
    let pt = ds.pseudotime().unwrap();
    assert_eq!(pt.get(0), 0.0);
    assert!((0..80).all(|c| pt.is_reachable(c)));
    assert!((80..100).all(|c| pt.get(c) == f64::INFINITY));
    assert_eq!(pt.n_unreachable(), 20);
    // pseudotime grows along the line
    assert!(pt.get(79) > pt.get(40) && pt.get(40) > pt.get(5));

    let table = graph_test(
        &ds,
        &GraphTestParams {
            k: 10,
            reachable_only: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(table.len(), ds.n_genes());
}

#[test]
fn whole_pipeline() {
    let ds = two_population_dataset(120, 300, 9);
    let mut cfg = PipelineConfig {
        preprocess: PreprocessParams {
            num_dim: 10,
            ..Default::default()
        },
        reduce: ReduceParams::Umap(UmapParams {
            n_epochs: Some(100),
            ..Default::default()
        }),
        order_cells: Some(OrderCellsParams {
            roots: RootSelection::Cells(vec!["cell0".into()]),
        }),
        ..Default::default()
    }
    .with_workers(2);
    cfg.cluster.k = 10;
    cfg.graph_test.k = 10;
    cfg.modules.k = 5;

    let out = run_pipeline(ds, &cfg).unwrap();
    let ds = &out.dataset;
    assert_eq!((ds.n_cells(), ds.n_genes()), (120, 300));
    assert!(ds.pca().is_some());
    assert!(ds.embedding(ReductionMethod::Umap).is_some());
    assert!(ds.clusters(ReductionMethod::Umap).is_some());
    assert!(ds.principal_graph().is_some());
    assert_eq!(ds.pseudotime().unwrap().get(0), 0.0);

    assert!(!out.markers.is_empty());
    assert_eq!(out.graph_test.len(), 300);
    let significant = out.graph_test.significant_genes(cfg.module_qval);
    assert_eq!(out.modules.len(), significant.len());
}

#[test]
fn whole_pipeline_on_tsne() {
    let ds = two_population_dataset(120, 300, 9);
    let mut cfg = PipelineConfig {
        preprocess: PreprocessParams {
            num_dim: 10,
            ..Default::default()
        },
        reduce: ReduceParams::Tsne(TsneParams {
            perplexity: 10.0,
            max_iter: 300,
            ..Default::default()
        }),
        order_cells: Some(OrderCellsParams {
            roots: RootSelection::Cells(vec!["cell0".into()]),
        }),
        ..Default::default()
    };
    cfg.cluster.reduction = ReductionMethod::Tsne;
    cfg.markers.reduction = ReductionMethod::Tsne;
    cfg.learn_graph.reduction = ReductionMethod::Tsne;
    cfg.graph_test.reduction = ReductionMethod::Tsne;
    cfg.cluster.k = 10;
    cfg.graph_test.k = 10;
    cfg.modules.k = 5;

    let out = run_pipeline(ds, &cfg).unwrap();
    let ds = &out.dataset;
    assert!(ds.embedding(ReductionMethod::Tsne).is_some());
    assert!(ds.embedding(ReductionMethod::Umap).is_none());
    assert!(ds.clusters(ReductionMethod::Tsne).is_some());
    assert_eq!(ds.principal_graph().unwrap().reduction, ReductionMethod::Tsne);
    assert_eq!(ds.pseudotime().unwrap().get(0), 0.0);
    assert_eq!(out.graph_test.len(), 300);
}

#[test]
fn stage_on_missing_embedding_fails_before_preprocess() {
    let ds = two_population_dataset(40, 50, 1);
    let cfg = PipelineConfig {
        // num_dim would fail preprocess, so only the configuration check can produce this error
        preprocess: PreprocessParams {
            num_dim: 1000,
            ..Default::default()
        },
        reduce: ReduceParams::Tsne(TsneParams::default()),
        ..Default::default()
    };
    let err = run_pipeline(ds, &cfg).unwrap_err();
    assert!(
        matches!(err, crate::error::PipelineError::Parameter { name: "cluster.reduction", .. }),
        "{err}"
    );
}

#[test]
fn misaligned_metadata_is_rejected() {
    let counts = Array2::<f64>::ones((3, 4));
    let matrix = ExpressionMatrix::from_dense(counts.view(), ids("gene", 3), ids("cell", 4)).unwrap();
    let genes = GeneMetadata::new(ids("gene", 3), ids("G", 3)).unwrap();

    let mut swapped = ids("cell", 4);
    swapped.swap(1, 2);
    for cells in [ids("cell", 3), swapped, ids("c", 4)] {
        let err = Dataset::new(matrix.clone(), CellMetadata::new(cells), genes.clone()).unwrap_err();
        assert!(matches!(err, crate::error::PipelineError::Alignment(_)), "{err}");
    }
    let err = Dataset::new(matrix, CellMetadata::new(ids("cell", 4)), GeneMetadata::new(ids("g", 3), ids("G", 3)).unwrap()).unwrap_err();
    assert!(matches!(err, crate::error::PipelineError::Alignment(_)));
}
