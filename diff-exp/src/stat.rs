//! statistics
//!
//! * `Statistics` trait: `mean`, `var` over slices of numbers
//! * Benjamini-Hochberg adjustment
//! * normal tail probabilities

use num_traits::ToPrimitive;
use statrs::function::erf::erfc;
use std::f64::consts::SQRT_2;

/// Summary statistics of a slice of numbers
pub trait Statistics {
    /// Arithmetic mean. NaN for an empty slice.
    fn mean(&self) -> f64;
    /// Variance with `ddof` delta degrees of freedom. 0 when there are not enough values.
    fn var(&self, ddof: f64) -> f64;
}

impl<T: ToPrimitive + Copy> Statistics for [T] {
    fn mean(&self) -> f64 {
        let sum: f64 = self.iter().map(|v| v.to_f64().unwrap_or(f64::NAN)).sum();
        sum / self.len() as f64
    }

    fn var(&self, ddof: f64) -> f64 {
        if (self.len() as f64) <= ddof {
            return 0.0;
        }
        let mean = self.mean();
        let ss: f64 = self
            .iter()
            .map(|v| {
                let d = v.to_f64().unwrap_or(f64::NAN) - mean;
                d * d
            })
            .sum();
        ss / (self.len() as f64 - ddof)
    }
}

/// Benjamini-Hochberg adjusted p-values of `(index, p-value)` pairs.
/// Returns `(index, q-value)` pairs sorted by index.
pub fn adjusted_pvalue_bh(pvalues: &[(usize, f64)]) -> Vec<(usize, f64)> {
    let mut arr = pvalues.to_vec();
    // largest p-value first, so the running minimum realises q_i = min_{j >= i} p_j * n / j
    arr.sort_by(|a, b| b.1.total_cmp(&a.1));

    let n = arr.len() as f64;
    let mut running = f64::INFINITY;
    for (from_top, (_, p)) in arr.iter_mut().enumerate() {
        let rank = n - from_top as f64;
        running = running.min(*p * n / rank);
        *p = running.min(1.0);
    }

    arr.sort_by_key(|&(i, _)| i);
    arr
}

/// `P(Z > z)` for a standard normal `Z`
pub fn normal_upper_tail(z: f64) -> f64 {
    0.5 * erfc(z / SQRT_2)
}

/// `P(Z < z)` for a standard normal `Z`
pub fn normal_lower_tail(z: f64) -> f64 {
    0.5 * erfc(-z / SQRT_2)
}
