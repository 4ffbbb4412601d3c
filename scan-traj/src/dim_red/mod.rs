#![allow(non_snake_case)]

//! Truncated SVD used for PCA of cells and for gene embeddings.
//!
//! The algorithms only need to multiply the data matrix by dense matrices from the left and the
//! right, so they are generic over any `DataMat` that supports those products. Small dense
//! factorisations (QR and the SVD of the projected matrix) go through `nalgebra`.
//!
//! Expression matrices stay sparse: [`ScaledSparse`] applies centring and scaling inside the
//! products, so the dense centred matrix is never built.

use anyhow::{format_err, Error};
use nalgebra::DMatrix;
use ndarray::linalg::Dot;
use ndarray::{Array1, Array2, ArrayBase, ArrayView2, Axis, Data, Ix2};
use sprs::CsMat;

/// Randomized SVD method
pub mod rand_svd;

#[cfg(test)]
pub(crate) mod test;

/// `(U, S, V)` of a rank-k factorisation `A ≈ U diag(S) Vᵀ`, with `U` m × k, `V` n × k and `S`
/// sorted in decreasing order
pub type PcaResult = (Array2<f64>, Array1<f64>, Array2<f64>);

/// Trait for getting the dimensions of a matrix
pub trait DataMat {
    /// Get the shape of the matrix
    fn shape(&self) -> [usize; 2];
}

impl DataMat for ArrayView2<'_, f64> {
    fn shape(&self) -> [usize; 2] {
        [self.nrows(), self.ncols()]
    }
}

impl DataMat for Array2<f64> {
    fn shape(&self) -> [usize; 2] {
        [self.nrows(), self.ncols()]
    }
}

/// Perform a SVD of a `matrix`, retaining `k` components.
/// This trait always performs the pure SVD of the matrix. Special cases of SVD
/// such as PCA can be achieved by the appropriate shifts and scaling of `matrix`
pub trait Pca<T> {
    /// Compute a rank `k` decomposition of `matrix`
    fn run_pca(&self, matrix: &T, k: usize) -> Result<PcaResult, Error>;
}

/// A sparse cells × genes matrix `X` seen as `(X - 1 μᵀ) D`, where `μ` holds the column means
/// and `D` is diagonal with the inverse column standard deviations. Constant columns get a zero
/// scale, so they are zero in the centred matrix.
pub struct ScaledSparse {
    x: CsMat<f64>,
    xt: CsMat<f64>,
    mean: Array1<f64>,
    inv_sd: Array1<f64>,
    sum_sq: Array1<f64>,
}

impl ScaledSparse {
    /// Centre every column and, if `scale`, scale it to unit sample variance.
    pub fn new(x: CsMat<f64>, scale: bool) -> ScaledSparse {
        let x = x.to_csr();
        let xt = x.transpose_view().to_csr();
        let n = x.rows();
        let mut mean = Array1::<f64>::zeros(x.cols());
        let mut inv_sd = Array1::<f64>::zeros(x.cols());
        let mut sum_sq = Array1::<f64>::zeros(x.cols());

        for (j, col) in xt.outer_iterator().enumerate() {
            let values = col.data();
            let mu = values.iter().sum::<f64>() / n as f64;
            let implicit = n - values.len();
            let ss = values.iter().map(|v| (v - mu) * (v - mu)).sum::<f64>() + implicit as f64 * mu * mu;

            let mut lo = values.iter().copied().fold(f64::INFINITY, f64::min);
            let mut hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if implicit > 0 {
                lo = lo.min(0.0);
                hi = hi.max(0.0);
            }
            mean[j] = mu;
            let var = ss / (n as f64 - 1.0).max(1.0);
            if hi > lo && var > 0.0 && var.is_finite() {
                inv_sd[j] = if scale { 1.0 / var.sqrt() } else { 1.0 };
                sum_sq[j] = ss;
            }
        }
        ScaledSparse {
            x,
            xt,
            mean,
            inv_sd,
            sum_sq,
        }
    }

    /// Columns with non-zero variance
    pub fn varying(&self) -> Vec<usize> {
        (0..self.inv_sd.len()).filter(|&j| self.inv_sd[j] > 0.0).collect()
    }

    /// Sum of squares of all entries of the centred, scaled matrix
    pub fn total_variance(&self) -> f64 {
        self.sum_sq.iter().zip(&self.inv_sd).map(|(ss, d)| ss * d * d).sum()
    }

    /// `A·b` for a dense genes × l `b`
    fn right_mul(&self, b: ArrayView2<f64>) -> Array2<f64> {
        let bs = &b * &self.inv_sd.view().insert_axis(Axis(1));
        let mut out: Array2<f64> = &self.x * &bs;
        out -= &self.mean.dot(&bs);
        out
    }

    /// `c·A` for a dense l × cells `c`
    fn left_mul(&self, c: ArrayView2<f64>) -> Array2<f64> {
        let ct = c.t().as_standard_layout().into_owned();
        let mut out: Array2<f64> = (&self.xt * &ct).reversed_axes();
        let c_sums = c.sum_axis(Axis(1));
        for (mut row, &c_sum) in out.outer_iter_mut().zip(&c_sums) {
            row.scaled_add(-c_sum, &self.mean);
        }
        out *= &self.inv_sd;
        out
    }
}

impl DataMat for ScaledSparse {
    fn shape(&self) -> [usize; 2] {
        [self.x.rows(), self.x.cols()]
    }
}

impl<DS> Dot<ArrayBase<DS, Ix2>> for ScaledSparse
where
    DS: Data<Elem = f64>,
{
    type Output = Array2<f64>;

    fn dot(&self, rhs: &ArrayBase<DS, Ix2>) -> Array2<f64> {
        self.right_mul(rhs.view())
    }
}

impl<DS> Dot<ScaledSparse> for ArrayBase<DS, Ix2>
where
    DS: Data<Elem = f64>,
{
    type Output = Array2<f64>;

    fn dot(&self, rhs: &ScaledSparse) -> Array2<f64> {
        rhs.left_mul(self.view())
    }
}

pub(crate) fn to_nalgebra(a: ArrayView2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[(i, j)])
}

pub(crate) fn from_nalgebra(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Orthonormal basis of the column space of `a` (the thin Q of its QR decomposition)
pub(crate) fn orthonormalize(a: &Array2<f64>) -> Array2<f64> {
    from_nalgebra(&to_nalgebra(a.view()).qr().q())
}

/// Full thin SVD of a small dense matrix, singular values in decreasing order.
pub(crate) fn dense_svd(a: &Array2<f64>) -> Result<PcaResult, Error> {
    let svd = to_nalgebra(a.view()).svd(true, true);
    let u = svd.u.as_ref().ok_or_else(|| format_err!("SVD did not produce U"))?;
    let v_t = svd.v_t.as_ref().ok_or_else(|| format_err!("SVD did not produce Vᵀ"))?;
    if svd.singular_values.iter().any(|s| !s.is_finite()) {
        return Err(format_err!("SVD produced non-finite singular values"));
    }

    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));

    let u = from_nalgebra(u).select(Axis(1), &order);
    let s = order.iter().map(|&i| svd.singular_values[i]).collect();
    let v = from_nalgebra(v_t).select(Axis(0), &order).reversed_axes();
    Ok((u, s, v))
}
