use crate::cluster::{cluster_cells, ClusterParams};
use crate::dataset::{Dataset, ReductionMethod};
use crate::error::PipelineError;
use crate::graph_test::{graph_test, GraphTestParams, GraphTestTable, NeighborGraph};
use crate::markers::{top_markers, GroupBy, MarkerParams, MarkerTable};
use crate::modules::{find_gene_modules, GeneModuleTable, ModuleParams};
use crate::preprocess::{preprocess, PreprocessParams};
use crate::pseudotime::{order_cells, OrderCellsParams};
use crate::reduce::{reduce_dimension, ReduceParams};
use crate::trajectory::{learn_graph, LearnGraphParams};
use log::info;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Parameters of every stage. Missing fields in a JSON config take their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Normalisation and PCA
    pub preprocess: PreprocessParams,
    /// Non-linear embedding
    pub reduce: ReduceParams,
    /// Clustering and partitioning
    pub cluster: ClusterParams,
    /// Marker genes
    pub markers: MarkerParams,
    /// Principal graph
    pub learn_graph: LearnGraphParams,
    /// Pseudotime roots; pseudotime is skipped when `None`
    pub order_cells: Option<OrderCellsParams>,
    /// Autocorrelation test
    pub graph_test: GraphTestParams,
    /// Gene modules. When no genes are listed, the genes with a graph test q-value below
    /// `module_qval` are used.
    pub modules: ModuleParams,
    /// Graph test significance threshold for module genes
    pub module_qval: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            preprocess: PreprocessParams::default(),
            reduce: ReduceParams::default(),
            cluster: ClusterParams::default(),
            markers: MarkerParams::default(),
            learn_graph: LearnGraphParams::default(),
            order_cells: None,
            graph_test: GraphTestParams::default(),
            modules: ModuleParams::default(),
            module_qval: 0.05,
        }
    }
}

impl PipelineConfig {
    /// Check that every stage reads an embedding the pipeline computes, and that stages reading
    /// clusters or the principal graph use the embedding those were computed on.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let computed = [ReductionMethod::Pca, self.reduce.method()];
        let stages = [
            ("cluster.reduction", self.cluster.reduction),
            ("markers.reduction", self.markers.reduction),
            ("learn_graph.reduction", self.learn_graph.reduction),
            ("graph_test.reduction", self.graph_test.reduction),
        ];
        for (name, reduction) in stages {
            if !computed.contains(&reduction) {
                return Err(PipelineError::parameter(
                    name,
                    reduction,
                    format!("only the {} and {} embeddings are computed", computed[0], computed[1]),
                ));
            }
        }

        let on_clusters = |name, reduction: ReductionMethod| {
            if reduction == self.cluster.reduction {
                Ok(())
            } else {
                Err(PipelineError::parameter(
                    name,
                    reduction,
                    format!("clusters are computed on the {} embedding", self.cluster.reduction),
                ))
            }
        };
        on_clusters("learn_graph.reduction", self.learn_graph.reduction)?;
        if matches!(self.markers.group_by, GroupBy::Cluster | GroupBy::Partition) {
            on_clusters("markers.reduction", self.markers.reduction)?;
        }
        if self.graph_test.neighbor_graph == NeighborGraph::PrincipalGraph
            && self.graph_test.reduction != self.learn_graph.reduction
        {
            return Err(PipelineError::parameter(
                "graph_test.reduction",
                self.graph_test.reduction,
                format!("the principal graph is fitted on the {} embedding", self.learn_graph.reduction),
            ));
        }
        Ok(())
    }

    /// Use `workers` threads in the parallel stages.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.markers.workers = workers;
        self.graph_test.workers = workers;
        self
    }
}

/// The dataset with every derived field and the result tables
#[derive(Clone, Debug)]
pub struct PipelineOutput {
    /// Dataset after the last stage
    pub dataset: Dataset,
    /// Marker genes per group
    pub markers: MarkerTable,
    /// Autocorrelation of every gene
    pub graph_test: GraphTestTable,
    /// Modules of the trajectory genes
    pub modules: GeneModuleTable,
}

fn timed<T>(stage: &str, f: impl FnOnce() -> Result<T, PipelineError>) -> Result<T, PipelineError> {
    let start = Instant::now();
    let out = f()?;
    info!("{stage} finished in {:.1?}", start.elapsed());
    Ok(out)
}

/// Run every stage in order on `ds`.
pub fn run_pipeline(ds: Dataset, cfg: &PipelineConfig) -> Result<PipelineOutput, PipelineError> {
    cfg.validate()?;
    info!("running the pipeline on {} cells x {} genes", ds.n_cells(), ds.n_genes());
    let ds = timed("preprocess", || preprocess(ds, &cfg.preprocess))?;
    let ds = timed("reduce_dimension", || reduce_dimension(ds, &cfg.reduce))?;
    let ds = timed("cluster_cells", || cluster_cells(ds, &cfg.cluster))?;
    let markers = timed("top_markers", || top_markers(&ds, &cfg.markers))?;
    let ds = timed("learn_graph", || learn_graph(ds, &cfg.learn_graph))?;
    let ds = match &cfg.order_cells {
        Some(params) => timed("order_cells", || order_cells(ds, params))?,
        None => {
            info!("no pseudotime roots given, skipping order_cells");
            ds
        }
    };
    let graph_test = timed("graph_test", || graph_test(&ds, &cfg.graph_test))?;

    let mut module_params = cfg.modules.clone();
    if module_params.genes.is_empty() {
        module_params.genes = graph_test.significant_genes(cfg.module_qval);
        info!(
            "{} genes with graph test q < {} go into modules",
            module_params.genes.len(),
            cfg.module_qval
        );
    }
    let modules = timed("find_gene_modules", || find_gene_modules(&ds, &module_params))?;

    Ok(PipelineOutput {
        dataset: ds,
        markers,
        graph_test,
        modules,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_config() {
        let cfg: PipelineConfig = serde_json::from_str(
            r#"{
                "cluster": { "resolution": 0.01, "k": 10 },
                "reduce": { "tsne": { "perplexity": 5.0 } },
                "order_cells": { "roots": { "cells": ["c1", "c2"] } }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.cluster.resolution, 0.01);
        assert_eq!(cfg.cluster.k, 10);
        assert_eq!(cfg.cluster.partition_qval, ClusterParams::default().partition_qval);
        match &cfg.reduce {
            ReduceParams::Tsne(t) => {
                assert_eq!(t.perplexity, 5.0);
                assert_eq!(t.max_iter, 1000);
            }
            other => panic!("expected t-SNE, got {other:?}"),
        }
        assert!(cfg.order_cells.is_some());
        assert_eq!(cfg.preprocess, PreprocessParams::default());

        let workers = PipelineConfig::default().with_workers(4);
        assert_eq!((workers.markers.workers, workers.graph_test.workers), (4, 4));
    }

    #[test]
    fn default_config_round_trips() {
        let cfg = PipelineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
