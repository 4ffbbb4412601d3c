use crate::dataset::{Dataset, ReductionMethod};
use crate::error::PipelineError;
use crate::normalization::normalized_row;
use crate::parallel::{map_units, thread_pool};
use diff_exp::{adjusted_pvalue_bh, jensen_shannon_specificity, rank_sum_greater};
use log::{debug, info};
use rand::seq::index::sample;
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const STAGE: &str = "top_markers";

/// How cells are grouped when scoring markers
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    /// Cluster labels on the chosen embedding
    #[default]
    Cluster,
    /// Partition labels on the chosen embedding
    Partition,
    /// Values of a cell metadata column
    CellColumn(String),
}

/// Parameters of [`top_markers`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerParams {
    /// Grouping of the cells
    pub group_by: GroupBy,
    /// Embedding whose clusters or partitions are used
    pub reduction: ReductionMethod,
    /// Candidate genes kept per group, by marker score
    pub genes_to_test_per_group: usize,
    /// Run the rank-sum test on the candidates
    pub marker_sig_test: bool,
    /// Size of the random reference subsample
    pub reference_cells: usize,
    /// A cell expresses a gene when its raw count exceeds this value
    pub detection_threshold: f64,
    /// Worker threads
    pub workers: usize,
    /// Seed of the reference subsample
    pub seed: u64,
}

impl Default for MarkerParams {
    fn default() -> Self {
        MarkerParams {
            group_by: GroupBy::Cluster,
            reduction: ReductionMethod::Umap,
            genes_to_test_per_group: 25,
            marker_sig_test: true,
            reference_cells: 1000,
            detection_threshold: 0.0,
            workers: 1,
            seed: 0,
        }
    }
}

/// One candidate marker gene of one group
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerRow {
    /// Row of the gene in the expression matrix
    pub gene_index: usize,
    /// Gene identifier
    pub gene_id: String,
    /// Gene short name
    pub gene_short_name: String,
    /// Group label
    pub group: String,
    /// Mean size-normalised expression in the group
    pub mean_expression: f64,
    /// Fraction of group cells above the detection threshold
    pub fraction_expressing: f64,
    /// Jensen-Shannon specificity of the gene for the group
    pub specificity: f64,
    /// `specificity * fraction_expressing`
    pub marker_score: f64,
    /// Rank-sum p-value against the reference cells
    pub p_value: Option<f64>,
    /// Benjamini-Hochberg adjusted p-value
    pub q_value: Option<f64>,
}

/// Candidate markers, sorted by group then gene. A gene may appear once per group.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkerTable {
    groups: Vec<String>,
    rows: Vec<MarkerRow>,
}

impl MarkerTable {
    /// Group labels in table order
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// All rows
    pub fn rows(&self) -> &[MarkerRow] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if the table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of groups each gene is a candidate marker for
    pub fn gene_occurrences(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for r in &self.rows {
            *counts.entry(r.gene_id.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Genes listed for more than one group
    pub fn non_exclusive_genes(&self) -> BTreeSet<String> {
        self.gene_occurrences()
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(g, _)| g)
            .collect()
    }

    /// The table without the rows of non-exclusive genes
    pub fn exclusive_only(&self) -> MarkerTable {
        let shared = self.non_exclusive_genes();
        self.filtered(|r| !shared.contains(&r.gene_id))
    }

    /// Rows with `fraction_expressing >= min_fraction`, ordered by decreasing specificity within
    /// each group and truncated to `k` rows per group. Equal specificities keep gene order.
    pub fn top_per_group(&self, min_fraction: f64, k: usize) -> MarkerTable {
        let mut rows = Vec::new();
        for group in &self.groups {
            let mut in_group: Vec<&MarkerRow> = self
                .rows
                .iter()
                .filter(|r| &r.group == group && r.fraction_expressing >= min_fraction)
                .collect();
            in_group.sort_by(|a, b| {
                b.specificity
                    .total_cmp(&a.specificity)
                    .then(a.gene_index.cmp(&b.gene_index))
            });
            rows.extend(in_group.into_iter().take(k).cloned());
        }
        MarkerTable {
            groups: self.groups.clone(),
            rows,
        }
    }

    fn filtered(&self, keep: impl Fn(&MarkerRow) -> bool) -> MarkerTable {
        MarkerTable {
            groups: self.groups.clone(),
            rows: self.rows.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }
}

/// Group names and the group of every cell
pub(crate) fn resolve_groups(
    ds: &Dataset,
    stage: &'static str,
    group_by: &GroupBy,
    reduction: ReductionMethod,
) -> Result<(Vec<String>, Vec<usize>), PipelineError> {
    let numbered = |labels: &[usize]| -> (Vec<String>, Vec<usize>) {
        let n = labels.iter().max().map_or(0, |m| m + 1);
        ((0..n).map(|l| l.to_string()).collect(), labels.to_vec())
    };
    match group_by {
        GroupBy::Cluster => Ok(numbered(&ds.require_clusters(stage, reduction)?.clusters)),
        GroupBy::Partition => Ok(numbered(&ds.require_clusters(stage, reduction)?.partitions)),
        GroupBy::CellColumn(name) => {
            let values = ds
                .cells()
                .column(name)
                .ok_or_else(|| PipelineError::parameter("group_by", name, "no such cell metadata column"))?;
            let names: Vec<String> = values.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
            let index: BTreeMap<&str, usize> = names.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
            let groups = values.iter().map(|v| index[v.as_str()]).collect();
            Ok((names, groups))
        }
    }
}

struct GeneStats {
    mean: Vec<f64>,
    fraction: Vec<f64>,
    specificity: Vec<f64>,
}

fn gene_stats(ds: &Dataset, gene: usize, cell_group: &[usize], group_sizes: &[usize], threshold: f64) -> GeneStats {
    let n_groups = group_sizes.len();
    let mut sum = vec![0.0; n_groups];
    let mut expressing = vec![0usize; n_groups];
    let sf = ds.size_factors();
    if let Some(row) = ds.matrix().counts().outer_view(gene) {
        for (cell, &v) in row.iter() {
            let g = cell_group[cell];
            sum[g] += v / sf[cell];
            if v > threshold {
                expressing[g] += 1;
            }
        }
    }
    let mean: Vec<f64> = sum.iter().zip(group_sizes).map(|(s, &n)| s / n as f64).collect();
    let fraction = expressing.iter().zip(group_sizes).map(|(&e, &n)| e as f64 / n as f64).collect();
    let log_mean: Vec<f64> = mean.iter().map(|m| (1.0 + m).log2()).collect();
    GeneStats {
        mean,
        fraction,
        specificity: jensen_shannon_specificity(&log_mean),
    }
}

/// Score every gene for every group and keep the best `genes_to_test_per_group` per group,
/// optionally with rank-sum significance against a random reference subsample.
pub fn top_markers(ds: &Dataset, params: &MarkerParams) -> Result<MarkerTable, PipelineError> {
    if params.detection_threshold.is_nan() || params.detection_threshold < 0.0 {
        return Err(PipelineError::parameter(
            "detection_threshold",
            params.detection_threshold,
            "must be non-negative",
        ));
    }
    if params.marker_sig_test && params.reference_cells == 0 {
        return Err(PipelineError::parameter(
            "reference_cells",
            params.reference_cells,
            "need at least one reference cell",
        ));
    }
    let (groups, cell_group) = resolve_groups(ds, STAGE, &params.group_by, params.reduction)?;
    let pool = thread_pool(STAGE, params.workers)?;

    let mut group_sizes = vec![0usize; groups.len()];
    for &g in &cell_group {
        group_sizes[g] += 1;
    }
    info!(
        "scoring {} genes in {} groups with {} workers",
        ds.n_genes(),
        groups.len(),
        params.workers
    );

    let genes: Vec<usize> = (0..ds.n_genes()).collect();
    let stats = map_units(
        &pool,
        STAGE,
        &genes,
        |&g| format!("gene {}", ds.genes().ids()[g]),
        |&g| Ok(gene_stats(ds, g, &cell_group, &group_sizes, params.detection_threshold)),
    )?;

    // candidates per group, best marker score first, ties by gene index
    let mut units = Vec::new();
    for group in 0..groups.len() {
        let mut ranked: Vec<usize> = genes.clone();
        let score = |g: usize| stats[g].specificity[group] * stats[g].fraction[group];
        ranked.sort_by(|&a, &b| score(b).total_cmp(&score(a)).then(a.cmp(&b)));
        ranked.truncate(params.genes_to_test_per_group);
        ranked.sort_unstable();
        units.extend(ranked.into_iter().map(|g| (group, g)));
    }

    let pvalues: Vec<Option<f64>> = if params.marker_sig_test {
        let n_ref = params.reference_cells.min(ds.n_cells());
        let mut rng = Pcg64Mcg::seed_from_u64(params.seed);
        let mut reference = sample(&mut rng, ds.n_cells(), n_ref).into_vec();
        reference.sort_unstable();
        let reference_by_group: Vec<Vec<usize>> = (0..groups.len())
            .map(|group| reference.iter().copied().filter(|&c| cell_group[c] != group).collect())
            .collect();
        let members: Vec<Vec<usize>> = (0..groups.len())
            .map(|group| (0..cell_group.len()).filter(|&c| cell_group[c] == group).collect())
            .collect();
        debug!("testing {} candidates against {n_ref} reference cells", units.len());

        let tested = map_units(
            &pool,
            STAGE,
            &units,
            |&(group, g)| format!("gene {} in group {}", ds.genes().ids()[g], groups[group]),
            |&(group, g)| {
                let reference = &reference_by_group[group];
                if reference.is_empty() {
                    return Ok(1.0);
                }
                let x = normalized_row(ds.matrix().counts(), ds.size_factors(), g);
                let in_group: Vec<f64> = members[group].iter().map(|&c| x[c]).collect();
                let out_group: Vec<f64> = reference.iter().map(|&c| x[c]).collect();
                Ok(rank_sum_greater(&in_group, &out_group)?.p_value)
            },
        )?;
        tested.into_iter().map(Some).collect()
    } else {
        vec![None; units.len()]
    };

    let qvalues: Vec<Option<f64>> = if params.marker_sig_test {
        let indexed: Vec<(usize, f64)> = pvalues
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.map(|p| (i, p)))
            .collect();
        let mut q = vec![None; units.len()];
        for (i, v) in adjusted_pvalue_bh(&indexed) {
            q[i] = Some(v);
        }
        q
    } else {
        vec![None; units.len()]
    };

    let rows = units
        .iter()
        .zip(pvalues.into_iter().zip(qvalues))
        .map(|(&(group, g), (p_value, q_value))| {
            let s = &stats[g];
            MarkerRow {
                gene_index: g,
                gene_id: ds.genes().ids()[g].clone(),
                gene_short_name: ds.genes().short_names()[g].clone(),
                group: groups[group].clone(),
                mean_expression: s.mean[group],
                fraction_expressing: s.fraction[group],
                specificity: s.specificity[group],
                marker_score: s.specificity[group] * s.fraction[group],
                p_value,
                q_value,
            }
        })
        .collect::<Vec<_>>();

    info!("{} marker rows for {} groups", rows.len(), groups.len());
    Ok(MarkerTable { groups, rows })
}
