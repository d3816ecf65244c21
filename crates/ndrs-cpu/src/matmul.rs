//! Matrix multiplication
//!
//! Rank rules follow the usual conventions: 2-D x 2-D is (M,K)x(K,N);
//! a 1-D left operand acts as a 1xK row, a 1-D right operand as a Kx1
//! column (the unit axis is dropped from the result), and 1-D x 1-D is a
//! dot product with a rank-0 result.
//!
//! Inputs are packed into dense row-major buffers in the promoted dtype
//! before the blocked kernel runs; packing also absorbs strided and
//! broadcast-free mixed-dtype inputs. The i/k/j blocked loop accumulates
//! each output element strictly in ascending k order, so results are
//! deterministic for identical inputs regardless of blocking.
//!
//! The kernel checks a cooperative cancel flag at block boundaries; the
//! job executor uses this for best-effort cancellation.

use std::sync::atomic::{AtomicBool, Ordering};

use ndrs_core::dtype::promote;
use ndrs_core::{DType, NdError, Result};

use crate::array::NdArray;
use crate::iter::{zip_offsets, Operand};

/// Edge length of one gemm block.
const BLOCK: usize = 64;

struct MatDims {
    m: usize,
    k: usize,
    n: usize,
    out_shape: Vec<usize>,
}

fn resolve_dims(a: &NdArray, b: &NdArray) -> Result<MatDims> {
    let (m, ka, a_vec) = match a.shape() {
        [k] => (1, *k, true),
        [m, k] => (*m, *k, false),
        other => {
            return Err(NdError::InvalidShape(format!(
                "matmul left operand must be rank 1 or 2, got shape {other:?}"
            )))
        }
    };
    let (kb, n, b_vec) = match b.shape() {
        [k] => (*k, 1, true),
        [k, n] => (*k, *n, false),
        other => {
            return Err(NdError::InvalidShape(format!(
                "matmul right operand must be rank 1 or 2, got shape {other:?}"
            )))
        }
    };
    if ka != kb {
        return Err(NdError::InvalidShape(format!(
            "matmul inner dimensions differ: {ka} vs {kb}"
        )));
    }
    let out_shape = match (a_vec, b_vec) {
        (false, false) => vec![m, n],
        (true, false) => vec![n],
        (false, true) => vec![m],
        (true, true) => vec![],
    };
    Ok(MatDims {
        m,
        k: ka,
        n,
        out_shape,
    })
}

/// Gather an operand into a dense row-major buffer, converting to f64.
fn pack_f64(a: &NdArray) -> Vec<f64> {
    let op = Operand::direct(a);
    let mut out = Vec::with_capacity(a.elem_count());
    zip_offsets(a.shape(), &[&op], |offs| {
        out.push(unsafe { op.f64_at(offs[0]) });
    });
    out
}

fn pack_f32(a: &NdArray) -> Vec<f32> {
    let op = Operand::direct(a);
    let mut out = Vec::with_capacity(a.elem_count());
    zip_offsets(a.shape(), &[&op], |offs| {
        out.push(unsafe { op.f32_at(offs[0]) });
    });
    out
}

fn pack_i32(a: &NdArray) -> Vec<i32> {
    let op = Operand::direct(a);
    let mut out = Vec::with_capacity(a.elem_count());
    zip_offsets(a.shape(), &[&op], |offs| {
        out.push(unsafe { op.i32_at(offs[0]) });
    });
    out
}

fn cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
}

/// Blocked gemm for float elements. Returns false when cancellation was
/// observed at a block boundary (the output is then abandoned).
fn gemm_float<T>(
    a: &[T],
    b: &[T],
    c: &mut [T],
    m: usize,
    k: usize,
    n: usize,
    cancel: Option<&AtomicBool>,
) -> bool
where
    T: Copy + std::ops::Mul<Output = T> + std::ops::AddAssign,
{
    for ib in (0..m).step_by(BLOCK) {
        let i_end = (ib + BLOCK).min(m);
        for kb in (0..k).step_by(BLOCK) {
            if cancelled(cancel) {
                return false;
            }
            let k_end = (kb + BLOCK).min(k);
            for jb in (0..n).step_by(BLOCK) {
                let j_end = (jb + BLOCK).min(n);
                for i in ib..i_end {
                    for kk in kb..k_end {
                        let aik = a[i * k + kk];
                        let b_row = &b[kk * n..kk * n + n];
                        let c_row = &mut c[i * n..i * n + n];
                        for j in jb..j_end {
                            let mut acc = c_row[j];
                            acc += aik * b_row[j];
                            c_row[j] = acc;
                        }
                    }
                }
            }
        }
    }
    true
}

fn gemm_i32(
    a: &[i32],
    b: &[i32],
    c: &mut [i32],
    m: usize,
    k: usize,
    n: usize,
    cancel: Option<&AtomicBool>,
) -> bool {
    for ib in (0..m).step_by(BLOCK) {
        let i_end = (ib + BLOCK).min(m);
        for kb in (0..k).step_by(BLOCK) {
            if cancelled(cancel) {
                return false;
            }
            let k_end = (kb + BLOCK).min(k);
            for jb in (0..n).step_by(BLOCK) {
                let j_end = (jb + BLOCK).min(n);
                for i in ib..i_end {
                    for kk in kb..k_end {
                        let aik = a[i * k + kk];
                        let b_row = &b[kk * n..kk * n + n];
                        let c_row = &mut c[i * n..i * n + n];
                        for j in jb..j_end {
                            c_row[j] = c_row[j].wrapping_add(aik.wrapping_mul(b_row[j]));
                        }
                    }
                }
            }
        }
    }
    true
}

/// Matrix multiply with promotion. Fresh C-contiguous output.
pub fn matmul(a: &NdArray, b: &NdArray) -> Result<NdArray> {
    // Without a cancel flag the kernel always runs to completion.
    matmul_cancellable(a, b, None)?
        .ok_or_else(|| NdError::Internal("matmul reported cancellation without a flag".into()))
}

/// Matrix multiply that gives up at the next block boundary once `cancel`
/// is set. `Ok(None)` reports observed cancellation.
pub fn matmul_cancellable(
    a: &NdArray,
    b: &NdArray,
    cancel: Option<&AtomicBool>,
) -> Result<Option<NdArray>> {
    let dims = resolve_dims(a, b)?;
    let dtype = promote(a.dtype(), b.dtype());
    let (m, k, n) = (dims.m, dims.k, dims.n);

    match dtype {
        DType::F64 => {
            let pa = pack_f64(a);
            let pb = pack_f64(b);
            let mut c = vec![0.0f64; m * n];
            if !gemm_float(&pa, &pb, &mut c, m, k, n, cancel) {
                return Ok(None);
            }
            Ok(Some(NdArray::from_f64(&c, &dims.out_shape)?))
        }
        DType::F32 => {
            let pa = pack_f32(a);
            let pb = pack_f32(b);
            let mut c = vec![0.0f32; m * n];
            if !gemm_float(&pa, &pb, &mut c, m, k, n, cancel) {
                return Ok(None);
            }
            Ok(Some(NdArray::from_f32(&c, &dims.out_shape)?))
        }
        DType::I32 => {
            let pa = pack_i32(a);
            let pb = pack_i32(b);
            let mut c = vec![0i32; m * n];
            if !gemm_i32(&pa, &pb, &mut c, m, k, n, cancel) {
                return Ok(None);
            }
            Ok(Some(NdArray::from_i32(&c, &dims.out_shape)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_2x2() {
        let a = NdArray::from_f64(&[1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let b = NdArray::from_f64(&[5.0, 6.0, 7.0, 8.0], &[2, 2]).unwrap();
        let c = matmul(&a, &b).unwrap();
        assert_eq!(c.shape(), &[2, 2]);
        assert_eq!(c.to_f64_vec(), vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_rectangular() {
        let a = NdArray::from_f64(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let b = NdArray::from_f64(&[7.0, 8.0, 9.0, 10.0, 11.0, 12.0], &[3, 2]).unwrap();
        let c = matmul(&a, &b).unwrap();
        assert_eq!(c.shape(), &[2, 2]);
        assert_eq!(c.to_f64_vec(), vec![58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_matmul_dot_product_is_rank_0() {
        let a = NdArray::from_f64(&[1.0, 2.0, 3.0], &[3]).unwrap();
        let b = NdArray::from_f64(&[4.0, 5.0, 6.0], &[3]).unwrap();
        let c = matmul(&a, &b).unwrap();
        assert_eq!(c.ndim(), 0);
        assert_eq!(c.to_f64_vec(), vec![32.0]);
    }

    #[test]
    fn test_matmul_vec_times_matrix() {
        let a = NdArray::from_f64(&[1.0, 2.0], &[2]).unwrap();
        let b = NdArray::from_f64(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let c = matmul(&a, &b).unwrap();
        assert_eq!(c.shape(), &[3]);
        assert_eq!(c.to_f64_vec(), vec![9.0, 12.0, 15.0]);
    }

    #[test]
    fn test_matmul_matrix_times_vec() {
        let a = NdArray::from_f64(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let b = NdArray::from_f64(&[1.0, 1.0, 1.0], &[3]).unwrap();
        let c = matmul(&a, &b).unwrap();
        assert_eq!(c.shape(), &[2]);
        assert_eq!(c.to_f64_vec(), vec![6.0, 15.0]);
    }

    #[test]
    fn test_matmul_inner_dim_mismatch() {
        let a = NdArray::zeroed(DType::F64, &[2, 3]).unwrap();
        let b = NdArray::zeroed(DType::F64, &[2, 2]).unwrap();
        assert!(matches!(
            matmul(&a, &b).unwrap_err(),
            NdError::InvalidShape(_)
        ));
    }

    #[test]
    fn test_matmul_rejects_high_rank() {
        let a = NdArray::zeroed(DType::F64, &[2, 2, 2]).unwrap();
        let b = NdArray::zeroed(DType::F64, &[2, 2]).unwrap();
        assert!(matmul(&a, &b).is_err());
        let s = NdArray::zeroed(DType::F64, &[]).unwrap();
        assert!(matmul(&s, &b).is_err());
    }

    #[test]
    fn test_matmul_promotes_dtypes() {
        let a = NdArray::from_i32(&[1, 2, 3, 4], &[2, 2]).unwrap();
        let b = NdArray::from_f64(&[1.0, 0.0, 0.0, 1.0], &[2, 2]).unwrap();
        let c = matmul(&a, &b).unwrap();
        assert_eq!(c.dtype(), DType::F64);
        assert_eq!(c.to_f64_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_matmul_integer_wraps() {
        let a = NdArray::from_i32(&[i32::MAX, 1], &[1, 2]).unwrap();
        let b = NdArray::from_i32(&[1, 1], &[2, 1]).unwrap();
        let c = matmul(&a, &b).unwrap();
        assert_eq!(c.to_i32_vec(), vec![i32::MIN]);
    }

    #[test]
    fn test_matmul_strided_inputs() {
        // Multiplying by a transposed view matches the densified product.
        let a = NdArray::from_f64(&[1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let t = a.transpose(None).unwrap();
        let via_view = matmul(&a, &t).unwrap();
        let via_dense = matmul(&a, &t.make_contiguous().unwrap()).unwrap();
        assert_eq!(via_view.to_f64_vec(), via_dense.to_f64_vec());
    }

    #[test]
    fn test_matmul_empty_k_is_zero_matrix() {
        let a = NdArray::zeroed(DType::F64, &[2, 0]).unwrap();
        let b = NdArray::zeroed(DType::F64, &[0, 3]).unwrap();
        let c = matmul(&a, &b).unwrap();
        assert_eq!(c.shape(), &[2, 3]);
        assert!(c.to_f64_vec().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_matmul_blocking_is_deterministic() {
        // Larger than one block in every dimension.
        let m = 70;
        let data: Vec<f64> = (0..m * m).map(|i| ((i % 17) as f64) * 0.37 + 0.11).collect();
        let a = NdArray::from_f64(&data, &[m, m]).unwrap();
        let c1 = matmul(&a, &a).unwrap();
        let c2 = matmul(&a, &a).unwrap();
        let v1 = c1.to_f64_vec();
        let v2 = c2.to_f64_vec();
        assert!(v1
            .iter()
            .zip(v2.iter())
            .all(|(x, y)| x.to_bits() == y.to_bits()));
    }

    #[test]
    fn test_matmul_pre_cancelled_returns_none() {
        let a = NdArray::zeroed(DType::F64, &[128, 128]).unwrap();
        let flag = AtomicBool::new(true);
        let out = matmul_cancellable(&a, &a, Some(&flag)).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_matmul_uncancelled_flag_completes() {
        let a = NdArray::from_f64(&[1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let flag = AtomicBool::new(false);
        let out = matmul_cancellable(&a, &a, Some(&flag)).unwrap();
        assert!(out.is_some());
    }
}
