use crate::sq_dist;
use anyhow::{bail, Error};
use log::debug;
use ndarray::parallel::prelude::*;
use ndarray::{Array2, ArrayView2, Axis};
use rand::Rng;

/// Result of a k-means run
#[derive(Clone, Debug)]
pub struct KMeans {
    /// `k × dim` cluster centres
    pub centers: Array2<f64>,
    /// Index of the closest centre for every row of the input
    pub labels: Vec<usize>,
}

/// Lloyd's k-means over the rows of `x`, seeded with k-means++. A centre that loses all its
/// points keeps its previous position.
pub fn kmeans(x: ArrayView2<f64>, k: usize, max_iter: usize, rng: &mut impl Rng) -> Result<KMeans, Error> {
    let n = x.nrows();
    if k == 0 || k > n {
        bail!("k-means needs 0 < k <= {} points, got k = {}", n, k);
    }

    let mut centers = plus_plus_init(x, k, rng);
    let mut labels = assign(x, centers.view());

    for iter in 0..max_iter {
        let mut sums = Array2::<f64>::zeros(centers.raw_dim());
        let mut counts = vec![0usize; k];
        for (row, &l) in x.outer_iter().zip(&labels) {
            let mut s = sums.row_mut(l);
            s += &row;
            counts[l] += 1;
        }
        for (c, &count) in counts.iter().enumerate() {
            if count > 0 {
                let mean = &sums.row(c) / count as f64;
                centers.row_mut(c).assign(&mean);
            }
        }

        let next = assign(x, centers.view());
        let changed = next.iter().zip(&labels).filter(|(a, b)| a != b).count();
        labels = next;
        debug!("k-means iteration {}: {} reassigned", iter, changed);
        if changed == 0 {
            break;
        }
    }

    Ok(KMeans { centers, labels })
}

fn plus_plus_init(x: ArrayView2<f64>, k: usize, rng: &mut impl Rng) -> Array2<f64> {
    let n = x.nrows();
    let mut centers = Array2::zeros((k, x.ncols()));
    let first = rng.gen_range(0..n);
    centers.row_mut(0).assign(&x.row(first));

    let mut d2: Vec<f64> = x.outer_iter().map(|r| sq_dist(r, x.row(first))).collect();
    for c in 1..k {
        let total: f64 = d2.iter().sum();
        let pick = if total > 0.0 {
            let target = total * rng.gen::<f64>();
            let mut acc = 0.0;
            d2.iter()
                .position(|&d| {
                    acc += d;
                    acc >= target && d > 0.0
                })
                .unwrap_or(n - 1)
        } else {
            rng.gen_range(0..n)
        };
        centers.row_mut(c).assign(&x.row(pick));
        for (i, d) in d2.iter_mut().enumerate() {
            *d = d.min(sq_dist(x.row(i), x.row(pick)));
        }
    }
    centers
}

/// Index of the closest row of `centers` for every row of `x`; ties go to the lower index.
pub(crate) fn assign(x: ArrayView2<f64>, centers: ArrayView2<f64>) -> Vec<usize> {
    x.axis_iter(Axis(0))
        .into_par_iter()
        .map(|row| {
            let mut best = 0;
            let mut best_d = f64::INFINITY;
            for (c, center) in centers.outer_iter().enumerate() {
                let d = sq_dist(row, center);
                if d < best_d {
                    best = c;
                    best_d = d;
                }
            }
            best
        })
        .collect()
}
