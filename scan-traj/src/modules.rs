use crate::cluster::{leiden_with_partitions, Clusters};
use crate::dataset::{Dataset, ReductionMethod};
use crate::dim_red::rand_svd::RandSvd;
use crate::dim_red::{Pca, ScaledSparse};
use crate::error::PipelineError;
use crate::markers::{resolve_groups, GroupBy};
use crate::nn::knn_network;
use crate::normalization::{normalize_sparse, normalized_row, NormMethod};
use kodama::{linkage, Method};
use log::{debug, info, warn};
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const STAGE: &str = "find_gene_modules";

/// Parameters of [`find_gene_modules`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleParams {
    /// Identifiers of the genes to group, typically the significant genes of a graph test
    pub genes: Vec<String>,
    /// Leiden resolutions to try
    pub resolutions: Vec<f64>,
    /// Principal components of the gene profiles, capped by the number of genes and cells
    pub num_dim: usize,
    /// Neighbours per gene
    pub k: usize,
    /// Significance threshold for joining modules into supermodules
    pub partition_qval: f64,
    /// Maximum Leiden iterations
    pub max_iterations: usize,
    /// Seed of the SVD and of Leiden
    pub seed: u64,
}

impl Default for ModuleParams {
    fn default() -> Self {
        ModuleParams {
            genes: Vec::new(),
            resolutions: vec![0.25, 0.5, 1.0, 2.0],
            num_dim: 50,
            k: 20,
            partition_qval: 0.05,
            max_iterations: 10,
            seed: 0,
        }
    }
}

/// Module of one gene
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneModuleRow {
    /// Gene identifier
    pub gene_id: String,
    /// Gene short name
    pub gene_short_name: String,
    /// Module label, 0 is the largest module
    pub module: usize,
    /// Supermodule (group of linked modules) label
    pub supermodule: usize,
}

/// Module assignment of every requested gene, in request order
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneModuleTable {
    rows: Vec<GeneModuleRow>,
    resolution: f64,
    modularity: f64,
}

impl GeneModuleTable {
    /// All rows
    pub fn rows(&self) -> &[GeneModuleRow] {
        &self.rows
    }

    /// Number of genes
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if no gene was assigned
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Resolution the assignment was selected at
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Modularity of the selected assignment
    pub fn modularity(&self) -> f64 {
        self.modularity
    }

    /// Number of modules
    pub fn num_modules(&self) -> usize {
        self.rows.iter().map(|r| r.module + 1).max().unwrap_or(0)
    }

    /// Genes of `module`, in request order
    pub fn genes_in_module(&self, module: usize) -> Vec<&str> {
        self.rows
            .iter()
            .filter(|r| r.module == module)
            .map(|r| r.gene_id.as_str())
            .collect()
    }
}

/// Group co-varying genes. Each gene's scaled log expression across cells is reduced with a
/// randomized SVD, genes are linked to their nearest neighbours and clustered with Leiden at every
/// resolution of the sweep; the assignment with the highest modularity wins.
pub fn find_gene_modules(ds: &Dataset, params: &ModuleParams) -> Result<GeneModuleTable, PipelineError> {
    if params.resolutions.is_empty() {
        return Err(PipelineError::parameter("resolutions", "[]", "need at least one resolution"));
    }
    if let Some(&bad) = params.resolutions.iter().find(|r| !(**r > 0.0 && r.is_finite())) {
        return Err(PipelineError::parameter("resolutions", bad, "must be positive"));
    }
    if params.k == 0 {
        return Err(PipelineError::parameter("k", params.k, "need at least one neighbour"));
    }
    if params.num_dim == 0 {
        return Err(PipelineError::parameter("num_dim", params.num_dim, "need at least one component"));
    }

    let mut seen = HashSet::new();
    let mut genes = Vec::with_capacity(params.genes.len());
    for id in &params.genes {
        let g = ds
            .gene_index(id)
            .ok_or_else(|| PipelineError::parameter("genes", id, "unknown gene identifier"))?;
        if seen.insert(g) {
            genes.push(g);
        } else {
            warn!("gene {id} is listed more than once");
        }
    }

    let rows_for = |modules: &[usize], supermodules: &[usize]| -> Vec<GeneModuleRow> {
        genes
            .iter()
            .enumerate()
            .map(|(i, &g)| GeneModuleRow {
                gene_id: ds.genes().ids()[g].clone(),
                gene_short_name: ds.genes().short_names()[g].clone(),
                module: modules[i],
                supermodule: supermodules[i],
            })
            .collect()
    };

    if genes.len() < 3 {
        info!("{} genes are too few to cluster, using a single module", genes.len());
        let zeros = vec![0; genes.len()];
        return Ok(GeneModuleTable {
            rows: rows_for(&zeros, &zeros),
            resolution: params.resolutions[0],
            modularity: 0.0,
        });
    }

    let x = normalize_sparse(ds.matrix().counts(), ds.size_factors(), &genes, NormMethod::Log, 1.0);
    let x = ScaledSparse::new(x, true);

    let num_dim = params.num_dim.min(genes.len()).min(ds.n_cells());
    info!(
        "embedding {} genes over {} cells with {num_dim} components",
        genes.len(),
        ds.n_cells()
    );
    // genes are the columns of `x`, so their embedding is `V·S`
    let (_, s, v) = RandSvd::with_seed(params.seed)
        .run_pca(&x, num_dim)
        .map_err(|e| PipelineError::numerical(STAGE, e))?;
    let embedding = &v * &s;

    let k = params.k.min(genes.len() - 1);
    let network =
        knn_network(&embedding.view(), k, false).map_err(|e| PipelineError::numerical(STAGE, e))?;

    let mut best: Option<Clusters> = None;
    for &resolution in &params.resolutions {
        let clusters = leiden_with_partitions(
            &network,
            resolution,
            params.max_iterations,
            params.seed,
            params.partition_qval,
        );
        debug!(
            "resolution {resolution}: {} modules, modularity {:.4}",
            clusters.num_clusters(),
            clusters.modularity
        );
        if best.as_ref().map_or(true, |b| clusters.modularity > b.modularity) {
            best = Some(clusters);
        }
    }
    let best = best.ok_or_else(|| PipelineError::parameter("resolutions", "[]", "need at least one resolution"))?;
    info!(
        "selected resolution {}: {} modules in {} supermodules",
        best.resolution,
        best.num_clusters(),
        best.num_partitions()
    );

    Ok(GeneModuleTable {
        rows: rows_for(&best.clusters, &best.partitions),
        resolution: best.resolution,
        modularity: best.modularity,
    })
}

/// Cell groups the module scores are averaged over
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellGrouping {
    /// Grouping of cells
    pub group_by: GroupBy,
    /// Embedding whose clusters are used
    pub reduction: ReductionMethod,
}

/// Mean module score of every cell group
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModuleAggregate {
    /// Module labels, the rows of `values`
    pub modules: Vec<usize>,
    /// Group names, the columns of `values`
    pub groups: Vec<String>,
    /// modules × groups
    pub values: Array2<f64>,
}

impl ModuleAggregate {
    /// Row and column order that places similar modules and similar groups next to each other
    /// (Ward linkage).
    pub fn heatmap_order(&self) -> (Vec<usize>, Vec<usize>) {
        let rows = leaf_order(self.values.outer_iter().collect());
        let cols = leaf_order(self.values.axis_iter(Axis(1)).collect());
        (rows, cols)
    }
}

/// Leaf order of the Ward dendrogram of `points`, lower cluster labels on the left of each merge.
fn leaf_order(points: Vec<ArrayView1<f64>>) -> Vec<usize> {
    let n = points.len();
    if n < 2 {
        return (0..n).collect();
    }
    let mut condensed = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            let d: f64 = (&points[j] - &points[i]).mapv(|v| v * v).sum();
            condensed.push(d.sqrt());
        }
    }
    let dendrogram = linkage(&mut condensed, n, Method::Ward);

    // cluster n + i is created by step i
    let children: Vec<(usize, usize)> = dendrogram
        .steps()
        .iter()
        .map(|s| (s.cluster1.min(s.cluster2), s.cluster1.max(s.cluster2)))
        .collect();
    let mut order = Vec::with_capacity(n);
    let mut stack = vec![n + children.len() - 1];
    while let Some(node) = stack.pop() {
        if node < n {
            order.push(node);
        } else {
            let (left, right) = children[node - n];
            stack.push(right);
            stack.push(left);
        }
    }
    order
}

/// Average each module's scaled expression over the cells of every group. Expression is log
/// normalised and scaled per gene across cells, clipped to `[-scale_max, scale_max]`, averaged over
/// the genes of a module and then over the cells of a group.
pub fn aggregate_gene_expression(
    ds: &Dataset,
    modules: &GeneModuleTable,
    grouping: &CellGrouping,
    scale_max: f64,
) -> Result<ModuleAggregate, PipelineError> {
    if !(scale_max > 0.0) {
        return Err(PipelineError::parameter("scale_max", scale_max, "must be positive"));
    }
    let (groups, cell_group) = resolve_groups(ds, "aggregate_gene_expression", &grouping.group_by, grouping.reduction)?;

    let mut genes = Vec::with_capacity(modules.len());
    for row in modules.rows() {
        let g = ds
            .gene_index(&row.gene_id)
            .ok_or_else(|| PipelineError::parameter("modules", &row.gene_id, "unknown gene identifier"))?;
        genes.push(g);
    }
    let n_modules = modules.num_modules();
    let mut module_sizes = vec![0usize; n_modules];
    for row in modules.rows() {
        module_sizes[row.module] += 1;
    }
    let mut group_sizes = vec![0usize; groups.len()];
    for &g in &cell_group {
        group_sizes[g] += 1;
    }

    // one gene at a time, so only a single dense row is alive
    let n = ds.n_cells() as f64;
    let mut values = Array2::<f64>::zeros((n_modules, groups.len()));
    for (row, &g) in modules.rows().iter().zip(&genes) {
        let mut expr = normalized_row(ds.matrix().counts(), ds.size_factors(), g);
        expr.mapv_inplace(|v| NormMethod::Log.apply(v, 1.0));
        let mean = expr.sum() / n;
        expr.mapv_inplace(|v| v - mean);
        let sd = (expr.iter().map(|v| v * v).sum::<f64>() / (n - 1.0).max(1.0)).sqrt();
        if !(sd > 0.0 && sd.is_finite()) {
            continue;
        }
        let weight = 1.0 / module_sizes[row.module] as f64;
        for (cell, &v) in expr.iter().enumerate() {
            values[(row.module, cell_group[cell])] += (v / sd).clamp(-scale_max, scale_max) * weight;
        }
    }
    for (mut col, &size) in values.axis_iter_mut(Axis(1)).zip(&group_sizes) {
        if size > 0 {
            col.mapv_inplace(|v| v / size as f64);
        }
    }

    Ok(ModuleAggregate {
        modules: (0..n_modules).collect(),
        groups,
        values,
    })
}
