use crate::cluster::Clusters;
use crate::error::PipelineError;
use crate::normalization::size_factors;
use crate::preprocess::PcaResult;
use crate::pseudotime::Pseudotime;
use crate::trajectory::PrincipalGraph;
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Embedding methods. Embeddings, clusterings and principal graphs are keyed by the method that
/// produced the coordinates they were computed on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReductionMethod {
    /// Principal components
    Pca,
    /// Uniform manifold approximation and projection
    #[default]
    Umap,
    /// t-distributed stochastic neighbour embedding
    Tsne,
}

impl fmt::Display for ReductionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReductionMethod::Pca => "PCA",
            ReductionMethod::Umap => "UMAP",
            ReductionMethod::Tsne => "tSNE",
        })
    }
}

/// Raw counts, genes × cells, stored as CSR with genes as the outer dimension
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpressionMatrix {
    counts: CsMat<f64>,
    gene_ids: Vec<String>,
    cell_ids: Vec<String>,
}

impl ExpressionMatrix {
    /// Wrap a sparse count matrix with its row (gene) and column (cell) identifiers.
    pub fn new(
        counts: CsMat<f64>,
        gene_ids: Vec<String>,
        cell_ids: Vec<String>,
    ) -> Result<Self, PipelineError> {
        let counts = if counts.is_csr() { counts } else { counts.to_csr() };
        let m = ExpressionMatrix {
            counts,
            gene_ids,
            cell_ids,
        };
        m.check()?;
        Ok(m)
    }

    fn check(&self) -> Result<(), PipelineError> {
        let (rows, cols) = self.counts.shape();
        if rows != self.gene_ids.len() || cols != self.cell_ids.len() {
            return Err(PipelineError::Alignment(format!(
                "matrix is {rows} x {cols} but has {} gene and {} cell identifiers",
                self.gene_ids.len(),
                self.cell_ids.len()
            )));
        }
        if !self.counts.is_csr() {
            return Err(PipelineError::Alignment("counts must be stored by gene".to_string()));
        }
        if let Some(&bad) = self.counts.data().iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(PipelineError::parameter(
                "matrix value",
                bad,
                "counts must be finite and non-negative",
            ));
        }
        Ok(())
    }

    /// Build from `(gene, cell, value)` triplets; repeated coordinates are summed.
    pub fn from_triplets(
        triplets: impl IntoIterator<Item = (usize, usize, f64)>,
        gene_ids: Vec<String>,
        cell_ids: Vec<String>,
    ) -> Result<Self, PipelineError> {
        let shape = (gene_ids.len(), cell_ids.len());
        let mut tri = TriMat::new(shape);
        for (g, c, v) in triplets {
            if g >= shape.0 || c >= shape.1 {
                return Err(PipelineError::Alignment(format!(
                    "entry ({g}, {c}) lies outside the {} x {} matrix",
                    shape.0, shape.1
                )));
            }
            if v != 0.0 {
                tri.add_triplet(g, c, v);
            }
        }
        ExpressionMatrix::new(tri.to_csr(), gene_ids, cell_ids)
    }

    /// Build from a dense genes × cells array.
    pub fn from_dense(
        values: ArrayView2<f64>,
        gene_ids: Vec<String>,
        cell_ids: Vec<String>,
    ) -> Result<Self, PipelineError> {
        if values.dim() != (gene_ids.len(), cell_ids.len()) {
            return Err(PipelineError::Alignment(format!(
                "matrix is {:?} but has {} gene and {} cell identifiers",
                values.dim(),
                gene_ids.len(),
                cell_ids.len()
            )));
        }
        let triplets = values
            .indexed_iter()
            .filter(|(_, v)| **v != 0.0)
            .map(|((g, c), &v)| (g, c, v))
            .collect::<Vec<_>>();
        ExpressionMatrix::from_triplets(triplets, gene_ids, cell_ids)
    }

    /// Count of `gene` in `cell`
    pub fn get(&self, gene: usize, cell: usize) -> f64 {
        self.counts.get(gene, cell).copied().unwrap_or(0.0)
    }

    /// The sparse count matrix
    pub fn counts(&self) -> &CsMat<f64> {
        &self.counts
    }

    /// Row identifiers
    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    /// Column identifiers
    pub fn cell_ids(&self) -> &[String] {
        &self.cell_ids
    }

    /// Number of rows
    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    /// Number of columns
    pub fn n_cells(&self) -> usize {
        self.cell_ids.len()
    }
}

/// Per-cell annotations, one record per matrix column
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CellMetadata {
    ids: Vec<String>,
    columns: BTreeMap<String, Vec<String>>,
}

impl CellMetadata {
    /// Metadata with identifiers only
    pub fn new(ids: Vec<String>) -> Self {
        CellMetadata {
            ids,
            columns: BTreeMap::new(),
        }
    }

    /// Add (or replace) an annotation column with one value per cell.
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        values: Vec<String>,
    ) -> Result<Self, PipelineError> {
        let name = name.into();
        check_column(&name, values.len(), self.ids.len(), "cells")?;
        self.columns.insert(name, values);
        Ok(self)
    }

    /// Cell identifiers
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True if there are no cells
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Values of an annotation column
    pub fn column(&self, name: &str) -> Option<&[String]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Names of the annotation columns
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }
}

/// Per-gene annotations, one record per matrix row, with a short (display) name for every gene
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneMetadata {
    ids: Vec<String>,
    short_names: Vec<String>,
    columns: BTreeMap<String, Vec<String>>,
}

impl GeneMetadata {
    /// Identifiers and short names, which must have the same length.
    pub fn new(ids: Vec<String>, short_names: Vec<String>) -> Result<Self, PipelineError> {
        check_column("gene_short_name", short_names.len(), ids.len(), "genes")?;
        Ok(GeneMetadata {
            ids,
            short_names,
            columns: BTreeMap::new(),
        })
    }

    /// Add (or replace) an annotation column with one value per gene.
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        values: Vec<String>,
    ) -> Result<Self, PipelineError> {
        let name = name.into();
        check_column(&name, values.len(), self.ids.len(), "genes")?;
        self.columns.insert(name, values);
        Ok(self)
    }

    /// Gene identifiers
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Short names, in identifier order
    pub fn short_names(&self) -> &[String] {
        &self.short_names
    }

    /// Number of genes
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True if there are no genes
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Values of an annotation column
    pub fn column(&self, name: &str) -> Option<&[String]> {
        self.columns.get(name).map(Vec::as_slice)
    }
}

fn check_column(name: &str, len: usize, expected: usize, what: &str) -> Result<(), PipelineError> {
    if len != expected {
        return Err(PipelineError::Alignment(format!(
            "column {name} has {len} values for {expected} {what}"
        )));
    }
    Ok(())
}

fn check_ids(
    kind: &str,
    matrix_ids: &[String],
    metadata_ids: &[String],
) -> Result<(), PipelineError> {
    if matrix_ids.len() != metadata_ids.len() {
        return Err(PipelineError::Alignment(format!(
            "matrix has {} {kind} but the {kind} metadata has {}",
            matrix_ids.len(),
            metadata_ids.len()
        )));
    }
    if let Some(i) = (0..matrix_ids.len()).find(|&i| matrix_ids[i] != metadata_ids[i]) {
        return Err(PipelineError::Alignment(format!(
            "{kind} identifier {i} is {:?} in the matrix but {:?} in the metadata",
            matrix_ids[i], metadata_ids[i]
        )));
    }
    let mut seen = HashSet::with_capacity(matrix_ids.len());
    if let Some(dup) = matrix_ids.iter().find(|id| !seen.insert(id.as_str())) {
        return Err(PipelineError::Alignment(format!("duplicate {kind} identifier {dup:?}")));
    }
    Ok(())
}

/// Expression matrix, cell and gene metadata, and everything the pipeline stages derive from them.
///
/// The matrix and metadata never change after construction. Each stage adds or replaces only
/// its own derived fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    matrix: ExpressionMatrix,
    cells: CellMetadata,
    genes: GeneMetadata,
    size_factors: Array1<f64>,
    pca: Option<PcaResult>,
    embeddings: BTreeMap<ReductionMethod, Array2<f64>>,
    clusters: BTreeMap<ReductionMethod, Clusters>,
    principal_graph: Option<PrincipalGraph>,
    pseudotime: Option<Pseudotime>,
}

impl Dataset {
    /// Assemble a dataset. Cell metadata must list the matrix columns and gene metadata the
    /// matrix rows, in the same order and without duplicates.
    pub fn new(
        matrix: ExpressionMatrix,
        cells: CellMetadata,
        genes: GeneMetadata,
    ) -> Result<Dataset, PipelineError> {
        check_ids("cells", matrix.cell_ids(), cells.ids())?;
        check_ids("genes", matrix.gene_ids(), genes.ids())?;
        let size_factors = size_factors(matrix.counts());
        Ok(Dataset {
            matrix,
            cells,
            genes,
            size_factors,
            pca: None,
            embeddings: BTreeMap::new(),
            clusters: BTreeMap::new(),
            principal_graph: None,
            pseudotime: None,
        })
    }

    /// Re-run the construction checks, and check that every derived field has one entry per cell
    /// (or gene). Needed for datasets that did not come from [`Dataset::new`], such as
    /// deserialised checkpoints.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.matrix.check()?;
        check_ids("cells", self.matrix.cell_ids(), self.cells.ids())?;
        check_ids("genes", self.matrix.gene_ids(), self.genes.ids())?;
        for (name, values) in &self.cells.columns {
            check_column(name, values.len(), self.n_cells(), "cells")?;
        }
        check_column("gene_short_name", self.genes.short_names.len(), self.n_genes(), "genes")?;
        for (name, values) in &self.genes.columns {
            check_column(name, values.len(), self.n_genes(), "genes")?;
        }
        check_column("size_factors", self.size_factors.len(), self.n_cells(), "cells")?;

        let n = self.n_cells();
        if let Some(pca) = &self.pca {
            check_column("pca embedding", pca.embedding.nrows(), n, "cells")?;
            check_column("pca loadings", pca.loadings.nrows(), self.n_genes(), "genes")?;
        }
        for (method, e) in &self.embeddings {
            check_column(&format!("{method} embedding"), e.nrows(), n, "cells")?;
        }
        for (method, c) in &self.clusters {
            check_column(&format!("{method} clusters"), c.clusters.len(), n, "cells")?;
            check_column(&format!("{method} partitions"), c.partitions.len(), n, "cells")?;
        }
        if let Some(g) = &self.principal_graph {
            check_column("closest principal node", g.closest_node.len(), n, "cells")?;
            check_column("node partition", g.node_partition.len(), g.n_nodes(), "principal nodes")?;
            let bad_node = g.closest_node.iter().chain(g.edges.iter().flat_map(|e| [&e.a, &e.b]));
            if let Some(node) = bad_node.copied().find(|&v| v >= g.n_nodes()) {
                return Err(PipelineError::Alignment(format!(
                    "principal node {node} is out of range for {} nodes",
                    g.n_nodes()
                )));
            }
        }
        if let Some(pt) = &self.pseudotime {
            check_column("pseudotime", pt.values().len(), n, "cells")?;
        }
        Ok(())
    }

    /// Raw counts
    pub fn matrix(&self) -> &ExpressionMatrix {
        &self.matrix
    }

    /// Cell metadata
    pub fn cells(&self) -> &CellMetadata {
        &self.cells
    }

    /// Gene metadata
    pub fn genes(&self) -> &GeneMetadata {
        &self.genes
    }

    /// Number of cells
    pub fn n_cells(&self) -> usize {
        self.matrix.n_cells()
    }

    /// Number of genes
    pub fn n_genes(&self) -> usize {
        self.matrix.n_genes()
    }

    /// Per-cell size factors: column totals divided by their geometric mean
    pub fn size_factors(&self) -> &Array1<f64> {
        &self.size_factors
    }

    /// Column index of a cell identifier
    pub fn cell_index(&self, id: &str) -> Option<usize> {
        self.cells.ids().iter().position(|c| c == id)
    }

    /// Row index of a gene identifier
    pub fn gene_index(&self, id: &str) -> Option<usize> {
        self.genes.ids().iter().position(|g| g == id)
    }

    /// Principal components, if computed
    pub fn pca(&self) -> Option<&PcaResult> {
        self.pca.as_ref()
    }

    /// Embedding computed by `method`, cells × components
    pub fn embedding(&self, method: ReductionMethod) -> Option<&Array2<f64>> {
        self.embeddings.get(&method)
    }

    /// Clusters and partitions computed on the `method` embedding
    pub fn clusters(&self, method: ReductionMethod) -> Option<&Clusters> {
        self.clusters.get(&method)
    }

    /// Principal graph, if learned
    pub fn principal_graph(&self) -> Option<&PrincipalGraph> {
        self.principal_graph.as_ref()
    }

    /// Pseudotime, if cells were ordered
    pub fn pseudotime(&self) -> Option<&Pseudotime> {
        self.pseudotime.as_ref()
    }

    pub(crate) fn require_pca(&self, stage: &'static str) -> Result<&PcaResult, PipelineError> {
        self.pca().ok_or_else(|| PipelineError::missing(stage, "a PCA embedding"))
    }

    pub(crate) fn require_embedding(
        &self,
        stage: &'static str,
        method: ReductionMethod,
    ) -> Result<&Array2<f64>, PipelineError> {
        self.embedding(method)
            .ok_or_else(|| PipelineError::missing(stage, format!("a {method} embedding")))
    }

    pub(crate) fn require_clusters(
        &self,
        stage: &'static str,
        method: ReductionMethod,
    ) -> Result<&Clusters, PipelineError> {
        self.clusters(method).ok_or_else(|| {
            PipelineError::missing(stage, format!("clusters on the {method} embedding"))
        })
    }

    pub(crate) fn require_principal_graph(
        &self,
        stage: &'static str,
    ) -> Result<&PrincipalGraph, PipelineError> {
        self.principal_graph()
            .ok_or_else(|| PipelineError::missing(stage, "a principal graph"))
    }

    pub(crate) fn require_pseudotime(
        &self,
        stage: &'static str,
    ) -> Result<&Pseudotime, PipelineError> {
        self.pseudotime()
            .ok_or_else(|| PipelineError::missing(stage, "pseudotime"))
    }

    pub(crate) fn set_pca(&mut self, pca: PcaResult) {
        self.embeddings.insert(ReductionMethod::Pca, pca.embedding.clone());
        self.pca = Some(pca);
    }

    pub(crate) fn set_embedding(&mut self, method: ReductionMethod, embedding: Array2<f64>) {
        self.embeddings.insert(method, embedding);
    }

    pub(crate) fn set_clusters(&mut self, method: ReductionMethod, clusters: Clusters) {
        self.clusters.insert(method, clusters);
    }

    pub(crate) fn set_principal_graph(&mut self, graph: PrincipalGraph) {
        self.principal_graph = Some(graph);
    }

    pub(crate) fn set_pseudotime(&mut self, pseudotime: Pseudotime) {
        self.pseudotime = Some(pseudotime);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    fn matrix() -> ExpressionMatrix {
        let values = array![[1.0, 0.0, 3.0], [0.0, 5.0, 6.0]];
        ExpressionMatrix::from_dense(values.view(), ids("g", 2), ids("c", 3)).unwrap()
    }

    fn genes() -> GeneMetadata {
        GeneMetadata::new(ids("g", 2), vec!["A".into(), "B".into()]).unwrap()
    }

    #[test]
    fn aligned_construction_preserves_values() {
        let ds = Dataset::new(matrix(), CellMetadata::new(ids("c", 3)), genes()).unwrap();
        assert_eq!(ds.n_cells(), 3);
        assert_eq!(ds.n_genes(), 2);
        assert_eq!(ds.cells().len(), ds.matrix().counts().cols());
        assert_eq!(ds.genes().len(), ds.matrix().counts().rows());
        let expected = array![[1.0, 0.0, 3.0], [0.0, 5.0, 6.0]];
        for ((g, c), v) in expected.indexed_iter() {
            assert_eq!(ds.matrix().get(g, c), *v);
        }
        assert_eq!(ds.cell_index("c2"), Some(2));
        assert_eq!(ds.gene_index("g9"), None);
    }

    #[test]
    fn misaligned_identifiers_fail() {
        let reordered = vec!["c1".to_string(), "c0".to_string(), "c2".to_string()];
        for cells in [CellMetadata::new(reordered), CellMetadata::new(ids("c", 2)), CellMetadata::new(ids("x", 3))] {
            let err = Dataset::new(matrix(), cells, genes()).unwrap_err();
            assert!(matches!(err, PipelineError::Alignment(_)), "{err}");
        }

        let swapped = GeneMetadata::new(vec!["g1".into(), "g0".into()], vec!["B".into(), "A".into()]).unwrap();
        let err = Dataset::new(matrix(), CellMetadata::new(ids("c", 3)), swapped).unwrap_err();
        assert!(matches!(err, PipelineError::Alignment(_)));
    }

    #[test]
    fn duplicates_and_bad_values() {
        let dup = vec!["c0".to_string(), "c0".to_string(), "c2".to_string()];
        let m = ExpressionMatrix::from_dense(array![[1.0, 2.0, 3.0]].view(), ids("g", 1), dup.clone()).unwrap();
        let g = GeneMetadata::new(ids("g", 1), ids("G", 1)).unwrap();
        let err = Dataset::new(m, CellMetadata::new(dup), g).unwrap_err();
        assert!(matches!(err, PipelineError::Alignment(_)));

        let err = ExpressionMatrix::from_dense(array![[1.0, -2.0]].view(), ids("g", 1), ids("c", 2)).unwrap_err();
        assert!(matches!(err, PipelineError::Parameter { .. }));
        let err = ExpressionMatrix::from_dense(array![[f64::NAN, 1.0]].view(), ids("g", 1), ids("c", 2)).unwrap_err();
        assert!(matches!(err, PipelineError::Parameter { .. }));

        let err = ExpressionMatrix::from_triplets([(2, 0, 1.0)], ids("g", 2), ids("c", 2)).unwrap_err();
        assert!(matches!(err, PipelineError::Alignment(_)));
    }

    #[test]
    fn metadata_columns() {
        let cells = CellMetadata::new(ids("c", 3))
            .with_column("time", vec!["0h".into(), "6h".into(), "6h".into()])
            .unwrap();
        assert_eq!(cells.column("time").unwrap()[1], "6h");
        assert!(cells.column("batch").is_none());
        assert!(cells.clone().with_column("batch", vec!["a".into()]).is_err());
        assert_eq!(cells.column_names().collect::<Vec<_>>(), vec!["time"]);

        assert!(GeneMetadata::new(ids("g", 2), ids("G", 1)).is_err());
    }

    #[test]
    fn size_factors_are_computed() {
        let ds = Dataset::new(matrix(), CellMetadata::new(ids("c", 3)), genes()).unwrap();
        let sf = ds.size_factors();
        assert_eq!(sf.len(), 3);
        // totals 1, 5, 9 over their geometric mean
        let gm = (1.0f64 * 5.0 * 9.0).powf(1.0 / 3.0);
        assert!((sf[1] - 5.0 / gm).abs() < 1e-12);
    }
}
