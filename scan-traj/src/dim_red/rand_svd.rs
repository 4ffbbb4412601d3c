#![allow(non_snake_case)]

use super::{dense_svd, orthonormalize, DataMat, Pca, PcaResult};
use anyhow::{format_err, Error};
use ndarray::linalg::Dot;
use ndarray::{s, Array2, ArrayView2};
use ndarray_rand::RandomExt;
use rand::distributions::Uniform;
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

/// Settings for Randomized PCA
pub struct RandSvd {
    /// Multiple of the requested k to use in randomized projections
    pub l_multiplier: f64,

    /// Number of power iteration to perform
    pub n_iter: usize,

    /// Seed of the random projection
    pub seed: u64,
}

impl RandSvd {
    /// Create a new RandSvd with default settings.
    pub fn new() -> RandSvd {
        RandSvd {
            l_multiplier: 2.0,
            n_iter: 4,
            seed: 0,
        }
    }

    /// Default settings with the given seed
    pub fn with_seed(seed: u64) -> RandSvd {
        RandSvd {
            seed,
            ..RandSvd::new()
        }
    }
}

impl Default for RandSvd {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Pca<T> for RandSvd
where
    T: DataMat + for<'a> Dot<ArrayView2<'a, f64>, Output = Array2<f64>> + Dot<Array2<f64>, Output = Array2<f64>>,
    for<'a> ArrayView2<'a, f64>: Dot<T, Output = Array2<f64>>,
    Array2<f64>: Dot<T, Output = Array2<f64>>,
{
    fn run_pca(&self, array: &T, k: usize) -> Result<PcaResult, Error> {
        let [m, n] = array.shape();
        let l = std::cmp::max(k + 10, ((k as f64) * self.l_multiplier) as usize).min(m.min(n));
        svd_rand(array, k, l, self.n_iter, self.seed)
    }
}

/// Perform an SVD of matrix `A`, making a rank `k` approximation. Use `l` projection dimensions and `n_iter` power iterations.
#[inline(never)]
pub fn svd_rand<T>(
    A: &T,
    k: usize, // svd rank
    l: usize,
    n_iter: usize, // power iterations
    seed: u64,
) -> Result<PcaResult, Error>
where
    T: DataMat + for<'a> Dot<ArrayView2<'a, f64>, Output = Array2<f64>> + Dot<Array2<f64>, Output = Array2<f64>>,
    for<'a> ArrayView2<'a, f64>: Dot<T, Output = Array2<f64>>,
    Array2<f64>: Dot<T, Output = Array2<f64>>,
{
    let [m, n] = A.shape();

    if m < 2 || n < 2 {
        return Err(format_err!("The input matrix must be at least 2x2."));
    }

    if k == 0 || k > std::cmp::min(m, n) {
        return Err(format_err!("invalid k = {} for a {} x {} matrix", k, m, n));
    }
    let l = l.clamp(k, m.min(n));

    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let unif = Uniform::new(-1.0, 1.0);

    // range finder on the column space of A, with normalised power iterations
    let omega = Array2::random_using((n, l), unif, &mut rng);
    let mut Q = orthonormalize(&A.dot(&omega));
    for _ in 0..n_iter {
        let Z = orthonormalize(&Q.t().dot(A).reversed_axes());
        Q = orthonormalize(&A.dot(&Z));
    }

    let B: Array2<f64> = Q.t().dot(A);
    let (Ub, sigma, Vb) = dense_svd(&B)?;

    let U: Array2<f64> = Dot::<ArrayView2<f64>>::dot(&Q, &Ub.slice(s![.., ..k]));
    Ok((U, sigma.slice(s![..k]).to_owned(), Vb.slice(s![.., ..k]).to_owned()))
}
