use crate::dist::Q;
use log::debug;

const MAX_ITERATIONS: usize = 200;

/// Fit `a` and `b` of the low-dimensional membership curve `1 / (1 + a * x^(2b))` to the
/// target curve that is 1 below `min_dist` and decays as `exp(-(x - min_dist) / spread)` above it.
/// Levenberg-Marquardt on the 300-point grid `(0, 3 * spread)`.
pub fn find_ab_params(spread: Q, min_dist: Q) -> (Q, Q) {
    let xs: Vec<Q> = (1..=300).map(|i| i as Q * 3.0 * spread / 300.0).collect();
    let ys: Vec<Q> = xs
        .iter()
        .map(|&x| if x < min_dist { 1.0 } else { (-(x - min_dist) / spread).exp() })
        .collect();

    let chi2 = |a: Q, b: Q| -> Q {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| {
                let r = 1.0 / (1.0 + a * x.powf(2.0 * b)) - y;
                r * r
            })
            .sum()
    };

    let (mut a, mut b) = (1.0, 1.0);
    let mut lambda = 1e-3;
    let mut current = chi2(a, b);

    for iteration in 0..MAX_ITERATIONS {
        // normal equations of the linearised problem
        let (mut jaa, mut jab, mut jbb, mut ga, mut gb) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (&x, &y) in xs.iter().zip(&ys) {
            let p = x.powf(2.0 * b);
            let denom = (1.0 + a * p) * (1.0 + a * p);
            let da = -p / denom;
            let db = -2.0 * a * p * x.ln() / denom;
            let r = 1.0 / (1.0 + a * p) - y;
            jaa += da * da;
            jab += da * db;
            jbb += db * db;
            ga += da * r;
            gb += db * r;
        }

        let maa = jaa * (1.0 + lambda);
        let mbb = jbb * (1.0 + lambda);
        let det = maa * mbb - jab * jab;
        if det.abs() < Q::EPSILON {
            break;
        }
        let step_a = -(mbb * ga - jab * gb) / det;
        let step_b = -(maa * gb - jab * ga) / det;

        let (na, nb) = (a + step_a, b + step_b);
        let candidate = if na > 0.0 && nb > 0.0 { chi2(na, nb) } else { Q::INFINITY };
        if candidate < current {
            let improvement = current - candidate;
            a = na;
            b = nb;
            current = candidate;
            lambda /= 10.0;
            if improvement < 1e-12 * (1.0 + current) {
                debug!("a/b fit converged after {iteration} iterations");
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e12 {
                break;
            }
        }
    }
    (a, b)
}
