//! Raw f64 slice kernels behind the legacy benchmark hooks
//!
//! These back the `nd_simd_*` entry points kept for regression scaffolding.
//! The loops are written lane-wise over fixed-width chunks so the compiler
//! can vectorize them; correctness never depends on that happening.

/// Lanes processed per unrolled iteration; reported by the width hook.
pub const F64_LANES: usize = 4;

/// `out[i] = a[i] + b[i]`. Slices must have equal length.
pub fn simd_add_f64(a: &[f64], b: &[f64], out: &mut [f64]) {
    debug_assert_eq!(a.len(), b.len());
    debug_assert_eq!(a.len(), out.len());

    let chunks = a.len() / F64_LANES * F64_LANES;
    let (a_main, a_tail) = a.split_at(chunks);
    let (b_main, b_tail) = b.split_at(chunks);
    let (o_main, o_tail) = out.split_at_mut(chunks);

    for ((av, bv), ov) in a_main
        .chunks_exact(F64_LANES)
        .zip(b_main.chunks_exact(F64_LANES))
        .zip(o_main.chunks_exact_mut(F64_LANES))
    {
        for lane in 0..F64_LANES {
            ov[lane] = av[lane] + bv[lane];
        }
    }
    for ((x, y), o) in a_tail.iter().zip(b_tail).zip(o_tail) {
        *o = x + y;
    }
}

/// Lane-accumulated sum of a slice.
pub fn simd_sum_f64(data: &[f64]) -> f64 {
    let mut lanes = [0.0f64; F64_LANES];
    let chunks = data.len() / F64_LANES * F64_LANES;
    for chunk in data[..chunks].chunks_exact(F64_LANES) {
        for lane in 0..F64_LANES {
            lanes[lane] += chunk[lane];
        }
    }
    let mut total = lanes.iter().sum::<f64>();
    for &x in &data[chunks..] {
        total += x;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_matches_scalar() {
        let n = 1037; // Deliberately not a lane multiple.
        let a: Vec<f64> = (0..n).map(|i| i as f64 * 1.5).collect();
        let b: Vec<f64> = (0..n).map(|i| i as f64 * 2.5).collect();
        let mut out = vec![0.0; n];
        simd_add_f64(&a, &b, &mut out);
        for i in 0..n {
            assert_eq!(out[i], a[i] + b[i]);
        }
    }

    #[test]
    fn test_sum_close_to_sequential() {
        let n = 100_000;
        let data: Vec<f64> = (0..n).map(|i| i as f64 * 0.001).collect();
        let sequential: f64 = data.iter().sum();
        let laned = simd_sum_f64(&data);
        assert!((laned - sequential).abs() < 1e-6 * sequential.abs().max(1.0));
    }

    #[test]
    fn test_empty_inputs() {
        simd_add_f64(&[], &[], &mut []);
        assert_eq!(simd_sum_f64(&[]), 0.0);
    }
}
