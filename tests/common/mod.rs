//! Shared helpers: a direct einsum reference evaluator and tolerance
//! assertions.

#![allow(dead_code)]

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub type Sizes = HashMap<i64, usize>;

pub fn sizes(pairs: &[(i64, usize)]) -> Sizes {
    pairs.iter().copied().collect()
}

pub fn dim(c: char) -> i64 {
    c as i64
}

pub fn dims(s: &str) -> Vec<i64> {
    s.chars().map(dim).collect()
}

fn dense_strides(ids: &[i64], sizes: &Sizes) -> Vec<usize> {
    let mut strides = vec![0usize; ids.len()];
    let mut stride = 1usize;
    for i in (0..ids.len()).rev() {
        strides[i] = stride;
        stride *= sizes[&ids[i]];
    }
    strides
}

fn decode(mut flat: usize, extents: &[usize]) -> Vec<usize> {
    let mut vals = vec![0usize; extents.len()];
    for i in (0..extents.len()).rev() {
        vals[i] = flat % extents[i];
        flat /= extents[i];
    }
    vals
}

macro_rules! naive_impl {
    ($name:ident, $t:ty) => {
        /// Direct evaluation of one binary contraction: for every
        /// output element, sum the operand products over all
        /// contracted index values.
        pub fn $name(
            left_ids: &[i64],
            a: &[$t],
            right_ids: &[i64],
            b: &[$t],
            out_ids: &[i64],
            sizes: &Sizes,
        ) -> Vec<$t> {
            let k_ids: Vec<i64> = left_ids
                .iter()
                .copied()
                .filter(|d| right_ids.contains(d) && !out_ids.contains(d))
                .collect();

            let out_extents: Vec<usize> = out_ids.iter().map(|d| sizes[d]).collect();
            let k_extents: Vec<usize> = k_ids.iter().map(|d| sizes[d]).collect();
            let out_total = out_extents.iter().product::<usize>().max(1);
            let k_total = k_extents.iter().product::<usize>().max(1);

            let l_strides = dense_strides(left_ids, sizes);
            let r_strides = dense_strides(right_ids, sizes);

            let mut out = vec![0.0 as $t; out_total];
            for oi in 0..out_total {
                let out_vals = decode(oi, &out_extents);
                let mut acc: $t = 0.0;
                for ki in 0..k_total {
                    let k_vals = decode(ki, &k_extents);
                    let value = |d: i64| {
                        out_ids
                            .iter()
                            .position(|&x| x == d)
                            .map(|i| out_vals[i])
                            .unwrap_or_else(|| {
                                k_vals[k_ids.iter().position(|&x| x == d).unwrap()]
                            })
                    };
                    let la: usize = left_ids
                        .iter()
                        .zip(&l_strides)
                        .map(|(&d, &s)| value(d) * s)
                        .sum();
                    let rb: usize = right_ids
                        .iter()
                        .zip(&r_strides)
                        .map(|(&d, &s)| value(d) * s)
                        .sum();
                    acc += a[la] * b[rb];
                }
                out[oi] = acc;
            }
            out
        }
    };
}

naive_impl!(naive_f32, f32);
naive_impl!(naive_f64, f64);

pub fn random_f32(len: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect()
}

pub fn random_f64(len: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.random::<f64>() * 2.0 - 1.0).collect()
}

pub fn assert_close_f32(got: &[f32], want: &[f32], rel_tol: f32) {
    assert_eq!(got.len(), want.len(), "length mismatch");
    for (i, (&g, &w)) in got.iter().zip(want.iter()).enumerate() {
        let tol = rel_tol * w.abs().max(1.0);
        assert!(
            (g - w).abs() <= tol,
            "element {i}: got {g}, want {w} (tolerance {tol})"
        );
    }
}

pub fn assert_close_f64(got: &[f64], want: &[f64], rel_tol: f64) {
    assert_eq!(got.len(), want.len(), "length mismatch");
    for (i, (&g, &w)) in got.iter().zip(want.iter()).enumerate() {
        let tol = rel_tol * w.abs().max(1.0);
        assert!(
            (g - w).abs() <= tol,
            "element {i}: got {g}, want {w} (tolerance {tol})"
        );
    }
}
