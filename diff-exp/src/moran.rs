use crate::stat::{normal_lower_tail, normal_upper_tail};

/// Direction of the alternative hypothesis for a spatial autocorrelation test
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Alternative {
    /// Positive autocorrelation: neighbours look alike
    #[default]
    Greater,
    /// Negative autocorrelation
    Less,
    /// Either direction
    TwoSided,
}

/// Row-standardised spatial weights. Every node with at least one neighbour gives each of its
/// neighbours the weight `1 / degree`.
#[derive(Clone, Debug)]
pub struct SpatialWeights {
    neighbors: Vec<Vec<usize>>,
    s0: f64,
    s1: f64,
    s2: f64,
}

impl SpatialWeights {
    /// Build weights from neighbour lists. Self references and duplicates are dropped.
    pub fn from_neighbors(mut neighbors: Vec<Vec<usize>>) -> SpatialWeights {
        for (i, list) in neighbors.iter_mut().enumerate() {
            list.retain(|&j| j != i);
            list.sort_unstable();
            list.dedup();
        }

        let weight = |i: usize, j: usize, lists: &[Vec<usize>]| -> f64 {
            let list = &lists[i];
            if list.binary_search(&j).is_ok() {
                1.0 / list.len() as f64
            } else {
                0.0
            }
        };

        let n = neighbors.len();
        let mut s0 = 0.0;
        let mut s1 = 0.0;
        let mut col_sums = vec![0.0; n];
        for (i, list) in neighbors.iter().enumerate() {
            for &j in list {
                let w_ij = weight(i, j, &neighbors);
                s0 += w_ij;
                col_sums[j] += w_ij;
                // pairs with w_ji only are added when visiting row j
                let w_ji = weight(j, i, &neighbors);
                if w_ji > 0.0 {
                    s1 += 0.5 * (w_ij + w_ji).powi(2);
                } else {
                    s1 += w_ij * w_ij;
                }
            }
        }
        let s2 = neighbors
            .iter()
            .zip(&col_sums)
            .map(|(list, col)| {
                let row = if list.is_empty() { 0.0 } else { 1.0 };
                (row + col).powi(2)
            })
            .sum();

        SpatialWeights { neighbors, s0, s1, s2 }
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    /// True if there are no nodes
    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Sorted neighbours of node `i`
    pub fn neighbors(&self, i: usize) -> &[usize] {
        &self.neighbors[i]
    }
}

/// Moran's I statistic with its moments under the randomization null hypothesis
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MoranResult {
    /// Observed Moran's I
    pub i: f64,
    /// Expected value, `-1 / (n - 1)`
    pub expected: f64,
    /// Variance under randomization
    pub variance: f64,
    /// Standardised statistic
    pub z: f64,
    /// p-value for the requested alternative
    pub p_value: f64,
}

/// Compute Moran's I of `x` over the weights `w`. Returns `None` when `x` is constant, when fewer
/// than four nodes are present or when there are no weighted pairs, as the statistic is undefined.
pub fn morans_i(x: &[f64], w: &SpatialWeights, alternative: Alternative) -> Option<MoranResult> {
    assert_eq!(x.len(), w.len(), "values and weights must cover the same nodes");
    let n = x.len();
    if n <= 3 || w.s0 == 0.0 {
        return None;
    }
    let nf = n as f64;
    let mean = x.iter().sum::<f64>() / nf;
    let z: Vec<f64> = x.iter().map(|v| v - mean).collect();
    let m2 = z.iter().map(|v| v * v).sum::<f64>() / nf;
    if m2 <= f64::EPSILON * mean.abs().max(1.0) {
        return None;
    }
    let m4 = z.iter().map(|v| v.powi(4)).sum::<f64>() / nf;

    let mut cross = 0.0;
    for (i, list) in w.neighbors.iter().enumerate() {
        if list.is_empty() {
            continue;
        }
        let wi = 1.0 / list.len() as f64;
        cross += wi * z[i] * list.iter().map(|&j| z[j]).sum::<f64>();
    }

    let i = nf / w.s0 * cross / (nf * m2);
    let expected = -1.0 / (nf - 1.0);

    let b2 = m4 / (m2 * m2);
    let s0_sq = w.s0 * w.s0;
    let a = nf * ((nf * nf - 3.0 * nf + 3.0) * w.s1 - nf * w.s2 + 3.0 * s0_sq);
    let b = b2 * ((nf * nf - nf) * w.s1 - 2.0 * nf * w.s2 + 6.0 * s0_sq);
    let c = (nf - 1.0) * (nf - 2.0) * (nf - 3.0) * s0_sq;
    let variance = (a - b) / c - expected * expected;
    if variance <= 0.0 {
        return None;
    }

    let zscore = (i - expected) / variance.sqrt();
    let p_value = match alternative {
        Alternative::Greater => normal_upper_tail(zscore),
        Alternative::Less => normal_lower_tail(zscore),
        Alternative::TwoSided => (2.0 * normal_upper_tail(zscore.abs())).min(1.0),
    };

    Some(MoranResult {
        i,
        expected,
        variance,
        z: zscore,
        p_value,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn line(n: usize) -> SpatialWeights {
        let lists = (0..n)
            .map(|i| {
                let mut l = Vec::new();
                if i > 0 {
                    l.push(i - 1);
                }
                if i + 1 < n {
                    l.push(i + 1);
                }
                l
            })
            .collect();
        SpatialWeights::from_neighbors(lists)
    }

    #[test]
    fn gradient_on_a_line() {
        let w = line(6);
        let x = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let r = morans_i(&x, &w, Alternative::Greater).unwrap();
        assert_approx_eq!(r.i, 0.7142857142857143, 1e-12);
        assert_approx_eq!(r.expected, -0.2, 1e-12);
        assert_approx_eq!(r.variance, 0.16780952380952377, 1e-10);
        assert_approx_eq!(r.z, 2.2318943432277276, 1e-9);
        assert_approx_eq!(r.p_value, 0.012810973426618827, 1e-9);

        let less = morans_i(&x, &w, Alternative::Less).unwrap();
        assert_approx_eq!(less.p_value, 1.0 - r.p_value, 1e-12);
        let both = morans_i(&x, &w, Alternative::TwoSided).unwrap();
        assert_approx_eq!(both.p_value, 2.0 * r.p_value, 1e-12);
    }

    #[test]
    fn alternating_values_are_negative() {
        let w = line(8);
        let x = [0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0];
        let r = morans_i(&x, &w, Alternative::Greater).unwrap();
        assert!(r.i < r.expected);
        assert!(r.p_value > 0.5);
    }

    #[test]
    fn undefined_cases() {
        let w = line(6);
        assert!(morans_i(&[2.0; 6], &w, Alternative::Greater).is_none());
        assert!(morans_i(&[1.0, 2.0, 3.0], &line(3), Alternative::Greater).is_none());

        let isolated = SpatialWeights::from_neighbors(vec![Vec::new(); 5]);
        assert!(morans_i(&[1.0, 2.0, 3.0, 4.0, 5.0], &isolated, Alternative::Greater).is_none());
    }
}
