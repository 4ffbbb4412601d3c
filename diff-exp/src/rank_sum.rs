use crate::stat::normal_upper_tail;
use anyhow::{bail, Error};

/// One-sided Wilcoxon rank-sum (Mann-Whitney U) test result
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RankSumResult {
    /// Mann-Whitney U of the first sample
    pub u: f64,
    /// Normal approximation statistic, with tie and continuity correction
    pub z: f64,
    /// `P(U >= u)` under the null hypothesis
    pub p_value: f64,
}

/// Test whether values in `group` tend to be larger than values in `reference`.
///
/// Uses the normal approximation with tie-corrected variance and a continuity correction of 0.5.
/// When every value is tied the statistic is undefined and the p-value is 1.
pub fn rank_sum_greater(group: &[f64], reference: &[f64]) -> Result<RankSumResult, Error> {
    if group.is_empty() || reference.is_empty() {
        bail!(
            "rank-sum test needs two non-empty samples, got {} and {}",
            group.len(),
            reference.len()
        );
    }
    if group.iter().chain(reference).any(|v| !v.is_finite()) {
        bail!("rank-sum test input contains non-finite values");
    }

    let n1 = group.len() as f64;
    let n2 = reference.len() as f64;
    let n = n1 + n2;

    let mut pooled: Vec<(f64, bool)> = group
        .iter()
        .map(|&v| (v, true))
        .chain(reference.iter().map(|&v| (v, false)))
        .collect();
    pooled.sort_by(|a, b| a.0.total_cmp(&b.0));

    // average ranks over runs of ties
    let mut rank_sum = 0.0;
    let mut tie_term = 0.0;
    let mut start = 0;
    while start < pooled.len() {
        let mut end = start + 1;
        while end < pooled.len() && pooled[end].0 == pooled[start].0 {
            end += 1;
        }
        let t = (end - start) as f64;
        let avg_rank = (start + end + 1) as f64 / 2.0;
        rank_sum += avg_rank * pooled[start..end].iter().filter(|x| x.1).count() as f64;
        tie_term += t * t * t - t;
        start = end;
    }

    let u = rank_sum - n1 * (n1 + 1.0) / 2.0;
    let mean = n1 * n2 / 2.0;
    let var = n1 * n2 / 12.0 * ((n + 1.0) - tie_term / (n * (n - 1.0)));
    if var <= 0.0 {
        return Ok(RankSumResult { u, z: 0.0, p_value: 1.0 });
    }

    let z = (u - mean - 0.5) / var.sqrt();
    Ok(RankSumResult {
        u,
        z,
        p_value: normal_upper_tail(z),
    })
}
