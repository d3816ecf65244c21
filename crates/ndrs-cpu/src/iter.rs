//! Strided iteration over broadcast shapes
//!
//! Kernels drive every operand from the result shape with per-operand
//! byte strides (possibly 0 for broadcast axes, negative for reversed
//! views). The odometer below visits elements in row-major order and
//! maintains one running byte offset per operand, so broadcast inputs are
//! never materialized.

use ndrs_core::broadcast::broadcast_strides;
use ndrs_core::DType;

use crate::array::NdArray;

/// One input of a kernel loop: base pointer plus strides mapped onto the
/// kernel's iteration shape.
pub(crate) struct Operand {
    base: *const u8,
    pub offset: isize,
    pub strides: Vec<isize>,
    pub dtype: DType,
}

impl Operand {
    /// Map `arr` onto a broadcast iteration shape.
    pub fn broadcast(arr: &NdArray, iter_shape: &[usize]) -> Operand {
        Operand {
            base: arr.base_ptr(),
            offset: arr.byte_offset() as isize,
            strides: broadcast_strides(arr.shape(), arr.strides(), iter_shape),
            dtype: arr.dtype(),
        }
    }

    /// Use `arr`'s own shape as the iteration shape.
    pub fn direct(arr: &NdArray) -> Operand {
        Operand {
            base: arr.base_ptr(),
            offset: arr.byte_offset() as isize,
            strides: arr.strides().to_vec(),
            dtype: arr.dtype(),
        }
    }

    /// Read the element at an absolute byte offset, converting to f64.
    ///
    /// # Safety
    ///
    /// `off` must come from iterating a layout validated against this
    /// operand's storage.
    #[inline]
    pub unsafe fn f64_at(&self, off: isize) -> f64 {
        match self.dtype {
            DType::F64 => *(self.base.offset(off) as *const f64),
            DType::F32 => *(self.base.offset(off) as *const f32) as f64,
            DType::I32 => *(self.base.offset(off) as *const i32) as f64,
        }
    }

    /// Read the element at an absolute byte offset, converting to f32.
    /// Only meaningful when the promoted dtype is F32 (operands are F32 or
    /// I32).
    #[inline]
    pub unsafe fn f32_at(&self, off: isize) -> f32 {
        match self.dtype {
            DType::F32 => *(self.base.offset(off) as *const f32),
            DType::I32 => *(self.base.offset(off) as *const i32) as f32,
            DType::F64 => *(self.base.offset(off) as *const f64) as f32,
        }
    }

    /// Read an i32 element. The operand must actually be I32.
    #[inline]
    pub unsafe fn i32_at(&self, off: isize) -> i32 {
        debug_assert_eq!(self.dtype, DType::I32);
        *(self.base.offset(off) as *const i32)
    }
}

/// Visit every element of `shape` in row-major order, passing the current
/// absolute byte offset of each operand to `f`.
///
/// A rank-0 shape yields exactly one visit; a shape with any zero extent
/// yields none.
pub(crate) fn zip_offsets<F>(shape: &[usize], operands: &[&Operand], mut f: F)
where
    F: FnMut(&[isize]),
{
    if shape.contains(&0) {
        return;
    }
    let ndim = shape.len();
    let mut offsets: Vec<isize> = operands.iter().map(|o| o.offset).collect();
    if ndim == 0 {
        f(&offsets);
        return;
    }

    let mut index = vec![0usize; ndim];
    loop {
        f(&offsets);

        // Advance the odometer from the innermost axis outward.
        let mut axis = ndim;
        loop {
            if axis == 0 {
                return;
            }
            axis -= 1;
            index[axis] += 1;
            if index[axis] < shape[axis] {
                for (k, op) in operands.iter().enumerate() {
                    offsets[k] += op.strides[axis];
                }
                break;
            }
            // Axis rolled over: rewind its contribution.
            index[axis] = 0;
            for (k, op) in operands.iter().enumerate() {
                offsets[k] -= op.strides[axis] * (shape[axis] as isize - 1);
            }
        }
    }
}
