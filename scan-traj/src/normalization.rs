use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};

/// How raw counts are transformed before PCA
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormMethod {
    /// Divide by the cell size factor and apply `x -> log2(x + pseudo_count)`
    #[default]
    Log,
    /// Divide by the cell size factor only
    SizeOnly,
}

/// Size factor of every cell: its total count divided by the geometric mean of the non-zero
/// totals. Cells without counts get a size factor of 1.
pub fn size_factors(counts: &CsMat<f64>) -> Array1<f64> {
    let mut totals = Array1::<f64>::zeros(counts.cols());
    for (&v, (_, c)) in counts.iter() {
        totals[c] += v;
    }

    let positive: Vec<f64> = totals.iter().copied().filter(|&t| t > 0.0).collect();
    if positive.is_empty() {
        return Array1::ones(counts.cols());
    }
    let log_mean = positive.iter().map(|t| t.ln()).sum::<f64>() / positive.len() as f64;
    let geo_mean = log_mean.exp();
    totals.mapv_into(|t| if t > 0.0 { t / geo_mean } else { 1.0 })
}

/// Size-normalised counts of one gene (a CSR row) across all cells, dense.
pub fn normalized_row(counts: &CsMat<f64>, size_factors: &Array1<f64>, gene: usize) -> Array1<f64> {
    let mut row = Array1::<f64>::zeros(counts.cols());
    if let Some(vec) = counts.outer_view(gene) {
        for (c, &v) in vec.iter() {
            row[c] = v / size_factors[c];
        }
    }
    row
}

impl NormMethod {
    /// Transform one size-normalised value
    #[inline]
    pub fn apply(self, x: f64, pseudo_count: f64) -> f64 {
        match self {
            NormMethod::Log => (x + pseudo_count).log2(),
            NormMethod::SizeOnly => x,
        }
    }
}

/// Sparse cells × genes matrix of normalised expression for the genes in `genes`, in that order.
/// Every value is shifted by the transform of zero (`log2(pseudo_count)` for [`NormMethod::Log`])
/// so that zero counts stay implicit. Centring removes the shift.
pub fn normalize_sparse(
    counts: &CsMat<f64>,
    size_factors: &Array1<f64>,
    genes: &[usize],
    method: NormMethod,
    pseudo_count: f64,
) -> CsMat<f64> {
    let zero = method.apply(0.0, pseudo_count);
    let mut t = TriMat::new((counts.cols(), genes.len()));
    for (j, &g) in genes.iter().enumerate() {
        if let Some(vec) = counts.outer_view(g) {
            for (c, &v) in vec.iter() {
                let x = method.apply(v / size_factors[c], pseudo_count) - zero;
                if x != 0.0 {
                    t.add_triplet(c, j, x);
                }
            }
        }
    }
    t.to_csr()
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn counts() -> CsMat<f64> {
        // genes x cells
        let mut t = TriMat::new((3, 4));
        t.add_triplet(0, 0, 2.0);
        t.add_triplet(0, 1, 4.0);
        t.add_triplet(1, 1, 4.0);
        t.add_triplet(2, 2, 8.0);
        t.to_csr()
    }

    #[test]
    fn test_size_factors() {
        let sf = size_factors(&counts());
        // totals 2, 8, 8, 0; geometric mean of the non-zero totals is 2^(7/3)
        let gm = 2f64.powf(7.0 / 3.0);
        assert_abs_diff_eq!(sf, array![2.0 / gm, 8.0 / gm, 8.0 / gm, 1.0], epsilon = 1e-12);
    }

    #[test]
    fn test_normalize() {
        let m = counts();
        let sf = array![1.0, 2.0, 4.0, 1.0];
        assert_eq!(normalized_row(&m, &sf, 0), array![2.0, 2.0, 0.0, 0.0]);

        let x = normalize_sparse(&m, &sf, &[2, 0], NormMethod::Log, 1.0).to_dense();
        assert_eq!(x.dim(), (4, 2));
        assert_abs_diff_eq!(x.column(0), array![0.0, 0.0, 3f64.log2(), 0.0], epsilon = 1e-12);
        assert_abs_diff_eq!(x.column(1), array![3f64.log2(), 3f64.log2(), 0.0, 0.0], epsilon = 1e-12);

        let y = normalize_sparse(&m, &sf, &[1], NormMethod::SizeOnly, 1.0);
        assert_eq!(y.nnz(), 1);
        assert_eq!(y.to_dense().column(0), array![0.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn log_shift_keeps_zeros_implicit() {
        let m = counts();
        let sf = array![1.0, 1.0, 1.0, 1.0];
        let x = normalize_sparse(&m, &sf, &[0, 1, 2], NormMethod::Log, 0.5);
        assert_eq!(x.nnz(), m.nnz());
        // log2(2 + 0.5) - log2(0.5)
        assert_abs_diff_eq!(x.to_dense()[(0, 0)], 5f64.log2(), epsilon = 1e-12);
    }
}
