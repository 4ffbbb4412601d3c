use super::rand_svd::RandSvd;
use super::*;
use ndarray::linalg::Dot;
use ndarray::{s, Array, Array1, Array2, ArrayView2, Axis};
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, Uniform};
use rand_pcg::Pcg64Mcg;
use sprs::{CsMat, TriMat};

fn seeded_rng() -> Pcg64Mcg {
    Pcg64Mcg::seed_from_u64(0)
}

/// Root-mean-square value of the entries of `a`
fn frobenius(a: &ArrayView2<f64>) -> f64 {
    let mut acc = 0.0;
    for v in a {
        acc += v * v;
    }
    let sz = (a.nrows() * a.ncols()) as f64;
    (acc / sz).sqrt()
}

/// Compare a truncated SVD against the dense SVD. Returns `(||AV - US||, max relative singular
/// value error, max relative error of |AV|)`.
fn cmp_svd(a: &Array2<f64>, nu: usize, pca: &impl Pca<Array2<f64>>) -> (f64, f64, f64) {
    let (u, s, v) = pca.run_pca(a, nu).unwrap();
    assert_eq!(u.dim(), (a.nrows(), nu));
    assert_eq!(v.dim(), (a.ncols(), nu));

    let av = a.dot(&v);
    let us = &u * &s;
    let frob_err = frobenius(&(&av - &us).view());
    println!("||Av - Us||_frob = {frob_err}");

    let (_, s_gt, v_gt) = dense_svd(a).unwrap();
    let s_gt = s_gt.slice(s![0..nu]);
    let s_err = ((&s - &s_gt) / s_gt).mapv(f64::abs).fold(-1.0f64, |mm, &v| v.max(mm));
    println!("||S_tsvd - S_svd||_inf = {s_err}");

    let av = av.mapv(f64::abs);
    let av_gt = a.dot(&v_gt.slice(s![.., 0..nu])).mapv(f64::abs);
    let proj_err = ((&av - &av_gt) / &av_gt)
        .mapv(f64::abs)
        .fold(-1.0f64, |mm, &v| v.max(mm));
    println!("||AV_tsvd - AV_svd||_inf = {proj_err}");

    (frob_err, s_err, proj_err)
}

fn fast_test_battery() -> Vec<Array2<f64>> {
    vec![
        simple_deterministic_ex(100, 300),
        simple_deterministic_ex(300, 100),
        complex_ex(100, 300, 20),
        gene_exp_sim_real_ex(300, 100, 20),
    ]
}

#[test]
fn rsvd_fast_test() {
    let rsvd = RandSvd {
        l_multiplier: 10.0,
        n_iter: 2,
        seed: 0,
    };
    for (i, a) in fast_test_battery().iter().enumerate() {
        let (frob_err, s_err, proj_err) = cmp_svd(a, 10, &rsvd);
        assert!(frob_err < 0.001);
        assert!(s_err < 0.001);
        // the periodic examples have repeated singular values, so only their subspaces are unique
        if i >= 2 {
            assert!(proj_err < 0.001);
        }
    }
}

#[test]
fn rsvd_default_on_clustered_data() {
    let a = gene_exp_sim_real_ex(500, 200, 8);
    let (_, s_err, _) = cmp_svd(&a, 5, &RandSvd::new());
    assert!(s_err < 0.001);
}

#[test]
fn rsvd_u_is_orthonormal_and_sorted() {
    let a = gene_exp_sim_real_ex(200, 80, 6);
    let (u, s, _) = RandSvd::with_seed(3).run_pca(&a, 6).unwrap();
    let gram = u.t().dot(&u);
    for i in 0..6 {
        for j in 0..6 {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!((gram[(i, j)] - expected).abs() < 1e-8);
        }
    }
    assert!(s.windows(2).into_iter().all(|w| w[0] >= w[1]));
}

#[test]
fn rsvd_rejects_bad_rank() {
    let a = simple_deterministic_ex(10, 5);
    assert!(RandSvd::new().run_pca(&a, 6).is_err());
    assert!(RandSvd::new().run_pca(&a, 0).is_err());
    let tiny = Array2::<f64>::zeros((1, 5));
    assert!(RandSvd::new().run_pca(&tiny, 1).is_err());
}

#[test]
fn dense_svd_reconstructs() {
    let a = complex_ex(30, 12, 3);
    let (u, s, v) = dense_svd(&a).unwrap();
    let recon = (&u * &s).dot(&v.t());
    assert!(frobenius(&(&recon - &a).view()) < 1e-10);
}

// sparse counts-like matrix with a constant column (2) and an all-zero column (4)
fn sparse_ex(m: usize, n: usize) -> CsMat<f64> {
    let mut rng = seeded_rng();
    let unif = Uniform::new(0.0f64, 1.0);
    let mut t = TriMat::new((m, n));
    for i in 0..m {
        t.add_triplet(i, 2, 3.0);
        for j in (0..n).filter(|&j| j != 2 && j != 4) {
            if unif.sample(&mut rng) < 0.3 {
                t.add_triplet(i, j, (unif.sample(&mut rng) * 10.0).floor() + 1.0);
            }
        }
    }
    t.to_csr()
}

fn dense_centered(x: &CsMat<f64>, scale: bool) -> Array2<f64> {
    let mut d = x.to_dense();
    let n = d.nrows() as f64;
    for mut col in d.axis_iter_mut(Axis(1)) {
        let mean = col.sum() / n;
        col.mapv_inplace(|v| v - mean);
        let sd = (col.iter().map(|v| v * v).sum::<f64>() / (n - 1.0)).sqrt();
        if sd > 1e-12 {
            if scale {
                col.mapv_inplace(|v| v / sd);
            }
        } else {
            col.fill(0.0);
        }
    }
    d
}

#[test]
fn scaled_sparse_products_match_dense() {
    let x = sparse_ex(40, 12);
    let mut rng = seeded_rng();
    let unif = Uniform::new(-1.0f64, 1.0);
    let b = Array2::from_shape_simple_fn((12, 5), || unif.sample(&mut rng));
    let c = Array2::from_shape_simple_fn((5, 40), || unif.sample(&mut rng));

    for scale in [true, false] {
        let a = ScaledSparse::new(x.clone(), scale);
        let d = dense_centered(&x, scale);
        assert_eq!(a.shape(), [40, 12]);
        assert_eq!(a.varying(), vec![0, 1, 3, 5, 6, 7, 8, 9, 10, 11]);

        assert!(frobenius(&(&a.dot(&b) - &d.dot(&b)).view()) < 1e-12);
        assert!(frobenius(&(&a.dot(&b.view()) - &d.dot(&b)).view()) < 1e-12);
        assert!(frobenius(&(&c.dot(&a) - &c.dot(&d)).view()) < 1e-12);
        assert!(frobenius(&(&c.t().t().dot(&a) - &c.dot(&d)).view()) < 1e-12);

        let total: f64 = d.iter().map(|v| v * v).sum();
        assert!((a.total_variance() - total).abs() < 1e-9 * total);
    }
}

#[test]
fn rsvd_on_scaled_sparse() {
    let x = sparse_ex(120, 30);
    let a = ScaledSparse::new(x.clone(), true);
    let d = dense_centered(&x, true);
    // l covers every column, so the decomposition is exact
    let rsvd = RandSvd {
        l_multiplier: 10.0,
        n_iter: 2,
        seed: 1,
    };
    let (_, s, v) = rsvd.run_pca(&a, 5).unwrap();
    let (_, s_gt, _) = dense_svd(&d).unwrap();
    for i in 0..5 {
        assert!((s[i] - s_gt[i]).abs() < 1e-6 * s_gt[0]);
    }
    // constant and empty columns do not load
    assert!(v.row(2).iter().all(|x| x.abs() < 1e-12));
    assert!(v.row(4).iter().all(|x| x.abs() < 1e-12));
}

// deterministic matrix (useful for comparing w/ python)
fn simple_deterministic_ex(m: usize, n: usize) -> Array2<f64> {
    let mut v = Vec::new();
    for x in 0..(m * n) {
        let val = x % 7 + x % 4 + x % 50 + x % 47 + x % 12;
        v.push(val as f64);
    }

    Array::from_shape_vec((m, n), v).unwrap()
}

// random matrix with `fix_cols` columns set to be random linear combinations of
// other columns.
fn complex_ex(m: usize, n: usize, fix_cols: usize) -> Array2<f64> {
    let mut rng = seeded_rng();
    let r = Normal::new(0.0f64, 1.0f64).unwrap();
    let mut a: Array2<f64> = Array2::from_shape_simple_fn((m, n), || r.sample(&mut rng));

    for i in 0..fix_cols {
        let mix = Array1::from_shape_simple_fn(n, || r.sample(&mut rng));
        let new_col = a.dot(&mix);
        a.column_mut(i).assign(&new_col);
    }

    a
}

// simulate a gene expression matrix with `nc` clusters
fn gene_exp_sim_real_ex(m: usize, n: usize, nc: usize) -> Array2<f64> {
    let mut rng = seeded_rng();

    let mut clusters = Vec::new();
    for _ in 0..nc {
        let r = Normal::new(0.0f64, 10.0f64).unwrap();
        let a = Array1::from_shape_simple_fn(n, || r.sample(&mut rng));
        clusters.push(a);
    }

    let mut a: Array2<f64> = Array2::<f64>::zeros((m, n));
    let jitter = Normal::new(0.0f64, 1.0f64).unwrap();

    let c = Uniform::new(0, clusters.len());
    for i in 0..m {
        let cluster_id = c.sample(&mut rng);
        let row = &clusters[cluster_id];
        let new_row = row + &Array1::from_shape_simple_fn(n, || jitter.sample(&mut rng));
        a.row_mut(i).assign(&new_row);
    }

    a
}
