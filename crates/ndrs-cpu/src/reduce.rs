//! Reductions
//!
//! Sums keep the input dtype (no widening). Integer accumulation wraps
//! and is order-independent; float accumulation uses pairwise (tree)
//! summation over row-major logical order, which makes the result
//! independent of the input's memory layout - summing a transposed view
//! of A equals summing a densified copy of that view.

use ndrs_core::{DType, NdError, Result};

use crate::array::NdArray;
use crate::iter::{zip_offsets, Operand};

/// Sequential base-case size for pairwise summation.
const PAIRWISE_BASE: usize = 8;

fn pairwise_f64(get: &dyn Fn(usize) -> f64, start: usize, n: usize) -> f64 {
    if n <= PAIRWISE_BASE {
        let mut acc = 0.0;
        for i in 0..n {
            acc += get(start + i);
        }
        acc
    } else {
        let half = n / 2;
        pairwise_f64(get, start, half) + pairwise_f64(get, start + half, n - half)
    }
}

fn pairwise_f32(get: &dyn Fn(usize) -> f32, start: usize, n: usize) -> f32 {
    if n <= PAIRWISE_BASE {
        let mut acc = 0.0f32;
        for i in 0..n {
            acc += get(start + i);
        }
        acc
    } else {
        let half = n / 2;
        pairwise_f32(get, start, half) + pairwise_f32(get, start + half, n - half)
    }
}

/// Sum every element into a rank-0 array of the same dtype. An empty
/// input yields the additive identity.
pub fn sum_all(a: &NdArray) -> Result<NdArray> {
    let out = NdArray::uninit(a.dtype(), &[])?;
    let n = a.elem_count();
    let base = a.base_ptr();
    let layout = a.layout().clone();

    match a.dtype() {
        DType::F64 => {
            let get = |i: usize| unsafe { *(base.offset(layout.offset_at(i)) as *const f64) };
            let total = pairwise_f64(&get, 0, n);
            unsafe { *(out.base_ptr_mut() as *mut f64) = total };
        }
        DType::F32 => {
            let get = |i: usize| unsafe { *(base.offset(layout.offset_at(i)) as *const f32) };
            let total = pairwise_f32(&get, 0, n);
            unsafe { *(out.base_ptr_mut() as *mut f32) = total };
        }
        DType::I32 => {
            let op = Operand::direct(a);
            let mut acc = 0i32;
            zip_offsets(a.shape(), &[&op], |offs| {
                acc = acc.wrapping_add(unsafe { op.i32_at(offs[0]) });
            });
            unsafe { *(out.base_ptr_mut() as *mut i32) = acc };
        }
    }
    Ok(out)
}

/// Sum along one axis (negative counts from the end). The axis is
/// removed from the result; dtype and summation discipline match
/// [`sum_all`].
pub fn sum_axis(a: &NdArray, axis: i32) -> Result<NdArray> {
    let ndim = a.ndim() as i64;
    let axis = axis as i64;
    let resolved = if axis < 0 { axis + ndim } else { axis };
    if resolved < 0 || resolved >= ndim {
        return Err(NdError::InvalidArg(format!(
            "axis {axis} out of range for rank {ndim}"
        )));
    }
    let axis = resolved as usize;

    let mut out_shape = a.shape().to_vec();
    out_shape.remove(axis);
    let axis_len = a.shape()[axis];
    let axis_stride = a.strides()[axis];

    let out = NdArray::uninit(a.dtype(), &out_shape)?;

    // Iterate the kept axes with the input's remaining strides; the inner
    // loop walks the reduced axis directly.
    let mut kept = Operand::direct(a);
    kept.strides.remove(axis);
    let kept_shape = out_shape;

    let base = a.base_ptr();
    match a.dtype() {
        DType::F64 => {
            let mut dst = out.base_ptr_mut() as *mut f64;
            zip_offsets(&kept_shape, &[&kept], |offs| {
                let first = offs[0];
                let get =
                    |j: usize| unsafe { *(base.offset(first + j as isize * axis_stride) as *const f64) };
                unsafe {
                    *dst = pairwise_f64(&get, 0, axis_len);
                    dst = dst.add(1);
                }
            });
        }
        DType::F32 => {
            let mut dst = out.base_ptr_mut() as *mut f32;
            zip_offsets(&kept_shape, &[&kept], |offs| {
                let first = offs[0];
                let get =
                    |j: usize| unsafe { *(base.offset(first + j as isize * axis_stride) as *const f32) };
                unsafe {
                    *dst = pairwise_f32(&get, 0, axis_len);
                    dst = dst.add(1);
                }
            });
        }
        DType::I32 => {
            let mut dst = out.base_ptr_mut() as *mut i32;
            zip_offsets(&kept_shape, &[&kept], |offs| {
                let first = offs[0];
                let mut acc = 0i32;
                for j in 0..axis_len {
                    acc = acc.wrapping_add(unsafe {
                        *(base.offset(first + j as isize * axis_stride) as *const i32)
                    });
                }
                unsafe {
                    *dst = acc;
                    dst = dst.add(1);
                }
            });
        }
    }
    Ok(out)
}
