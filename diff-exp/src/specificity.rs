/// Specificity of an expression profile for each group: `1 - sqrt(JSD(p, e_g))`, where `p` is the
/// profile normalised to sum to one, `e_g` is the distribution concentrated on group `g`, and the
/// Jensen-Shannon divergence uses base-2 logarithms. Values lie in `[0, 1]`; 1 means the gene is
/// expressed in group `g` only. A profile with no expression has specificity 0 everywhere.
pub fn jensen_shannon_specificity(profile: &[f64]) -> Vec<f64> {
    let total: f64 = profile.iter().filter(|v| **v > 0.0).sum();
    if total <= 0.0 {
        return vec![0.0; profile.len()];
    }
    let p: Vec<f64> = profile.iter().map(|&v| v.max(0.0) / total).collect();
    let h_p = entropy(p.iter().copied());

    (0..p.len())
        .map(|g| {
            // entropy of the midpoint between p and the indicator of g; H(e_g) = 0
            let h_m = entropy(
                p.iter()
                    .enumerate()
                    .map(|(k, &v)| if k == g { (v + 1.0) / 2.0 } else { v / 2.0 }),
            );
            let jsd = (h_m - h_p / 2.0).max(0.0);
            1.0 - jsd.sqrt()
        })
        .collect()
}

fn entropy(p: impl Iterator<Item = f64>) -> f64 {
    -p.filter(|&v| v > 0.0).map(|v| v * v.log2()).sum::<f64>()
}
