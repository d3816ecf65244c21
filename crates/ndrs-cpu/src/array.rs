//! Array views over shared storage
//!
//! An `NdArray` couples an `Arc<Storage>` with a [`Layout`]. View
//! operations (reshape, transpose, slice, make_contiguous on contiguous
//! input) share storage and only rewrite the layout; everything else
//! allocates fresh storage. Arrays are logically immutable once built -
//! kernels read inputs and write only into outputs that nothing else can
//! see yet.

use std::sync::Arc;

use ndrs_core::layout::{checked_elem_count, MAX_NDIM};
use ndrs_core::{DType, Layout, NdError, Result, SliceSpec};

use crate::iter::{zip_offsets, Operand};
use crate::storage::Storage;

/// A typed, shaped, strided view over a [`Storage`].
#[derive(Debug, Clone)]
pub struct NdArray {
    storage: Arc<Storage>,
    dtype: DType,
    layout: Layout,
    readonly: bool,
}

fn check_shape(shape: &[usize]) -> Result<()> {
    if shape.len() > MAX_NDIM {
        return Err(NdError::InvalidArg(format!(
            "rank {} exceeds the supported maximum of {MAX_NDIM}",
            shape.len()
        )));
    }
    Ok(())
}

fn checked_byte_len(shape: &[usize], dtype: DType) -> Result<usize> {
    checked_elem_count(shape)
        .and_then(|n| n.checked_mul(dtype.width()))
        .ok_or_else(|| NdError::Oom(format!("shape {shape:?} overflows addressable memory")))
}

impl NdArray {
    /// Allocate a zero-filled C-contiguous array.
    pub fn alloc(dtype: DType, shape: &[usize], readonly: bool) -> Result<NdArray> {
        check_shape(shape)?;
        let byte_len = checked_byte_len(shape, dtype)?;
        let storage = Storage::zeroed(byte_len, dtype, readonly)?;
        Ok(NdArray {
            storage: Arc::new(storage),
            dtype,
            layout: Layout::contiguous(shape.to_vec(), dtype.width()),
            readonly,
        })
    }

    /// Allocate a zero-filled writable array.
    pub fn zeroed(dtype: DType, shape: &[usize]) -> Result<NdArray> {
        Self::alloc(dtype, shape, false)
    }

    /// Allocate without initializing; the caller fills every element.
    pub(crate) fn uninit(dtype: DType, shape: &[usize]) -> Result<NdArray> {
        check_shape(shape)?;
        let byte_len = checked_byte_len(shape, dtype)?;
        let storage = Storage::uninit(byte_len, dtype)?;
        Ok(NdArray {
            storage: Arc::new(storage),
            dtype,
            layout: Layout::contiguous(shape.to_vec(), dtype.width()),
            readonly: false,
        })
    }

    /// Copy elements out of a host buffer into a fresh C-contiguous array.
    ///
    /// `src_strides` describe the **source** layout in bytes (None means
    /// C-contiguous); the engine always produces a dense row-major copy.
    ///
    /// # Safety
    ///
    /// `src` must be readable for every byte the shape/stride pattern can
    /// reach. It may only be null when the shape is empty.
    pub unsafe fn from_host_copy(
        src: *const u8,
        dtype: DType,
        shape: &[usize],
        src_strides: Option<&[isize]>,
        readonly: bool,
    ) -> Result<NdArray> {
        check_shape(shape)?;
        if let Some(strides) = src_strides {
            if strides.len() != shape.len() {
                return Err(NdError::InvalidStrides(format!(
                    "{} strides for rank {}",
                    strides.len(),
                    shape.len()
                )));
            }
        }
        let elem_count = checked_elem_count(shape)
            .ok_or_else(|| NdError::Oom(format!("shape {shape:?} overflows addressable memory")))?;
        if src.is_null() && elem_count != 0 {
            return Err(NdError::InvalidArg("null data pointer".into()));
        }

        let out = NdArray::uninit(dtype, shape)?;
        if elem_count == 0 {
            return Ok(NdArray { readonly, ..out });
        }

        let width = dtype.width();
        match src_strides {
            None => {
                std::ptr::copy_nonoverlapping(src, out.storage.as_ptr(), elem_count * width);
            }
            Some(strides) => {
                let src_layout = Layout {
                    shape: shape.to_vec(),
                    strides: strides.to_vec(),
                    byte_offset: 0,
                };
                let mut dst = out.storage.as_ptr();
                let mut visit = |off: isize| unsafe {
                    // Host strides need not be width-aligned.
                    std::ptr::copy_nonoverlapping(src.offset(off), dst, width);
                    dst = dst.add(width);
                };
                walk_layout(&src_layout, &mut visit);
            }
        }
        Ok(NdArray { readonly, ..out })
    }

    /// Convenience constructor from an f64 slice.
    pub fn from_f64(data: &[f64], shape: &[usize]) -> Result<NdArray> {
        Self::from_typed(data.as_ptr() as *const u8, data.len(), DType::F64, shape)
    }

    /// Convenience constructor from an f32 slice.
    pub fn from_f32(data: &[f32], shape: &[usize]) -> Result<NdArray> {
        Self::from_typed(data.as_ptr() as *const u8, data.len(), DType::F32, shape)
    }

    /// Convenience constructor from an i32 slice.
    pub fn from_i32(data: &[i32], shape: &[usize]) -> Result<NdArray> {
        Self::from_typed(data.as_ptr() as *const u8, data.len(), DType::I32, shape)
    }

    fn from_typed(src: *const u8, len: usize, dtype: DType, shape: &[usize]) -> Result<NdArray> {
        let expected = checked_elem_count(shape)
            .ok_or_else(|| NdError::Oom(format!("shape {shape:?} overflows addressable memory")))?;
        if len != expected {
            return Err(NdError::InvalidShape(format!(
                "data length {len} does not match shape {shape:?} (expected {expected})"
            )));
        }
        unsafe { Self::from_host_copy(src, dtype, shape, None, false) }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.layout.shape
    }

    pub fn strides(&self) -> &[isize] {
        &self.layout.strides
    }

    pub fn ndim(&self) -> usize {
        self.layout.ndim()
    }

    pub fn elem_count(&self) -> usize {
        self.layout.elem_count()
    }

    pub fn byte_len(&self) -> usize {
        self.elem_count() * self.dtype.width()
    }

    pub fn byte_offset(&self) -> usize {
        self.layout.byte_offset
    }

    pub fn is_contiguous(&self) -> bool {
        self.layout.is_contiguous(self.dtype.width())
    }

    /// Readonly if the storage is readonly or the view was created so.
    pub fn is_readonly(&self) -> bool {
        self.readonly || self.storage.readonly()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Base pointer of the underlying storage (not adjusted by the view
    /// offset).
    pub fn base_ptr(&self) -> *const u8 {
        self.storage.as_ptr()
    }

    /// First byte of the view itself.
    pub fn view_ptr(&self) -> *const u8 {
        unsafe { self.storage.as_ptr().add(self.layout.byte_offset) }
    }

    pub(crate) fn base_ptr_mut(&self) -> *mut u8 {
        self.storage.as_ptr()
    }

    fn with_layout(&self, layout: Layout) -> Result<NdArray> {
        layout.validate_bounds(self.dtype.width(), self.storage.byte_capacity())?;
        Ok(NdArray {
            storage: Arc::clone(&self.storage),
            dtype: self.dtype,
            layout,
            readonly: self.readonly,
        })
    }

    /// Reshape as a pure view over the same storage. Fails with
    /// NOT_CONTIGUOUS when the stride pattern cannot express the new
    /// shape; callers densify first.
    pub fn reshape(&self, new_shape: &[usize]) -> Result<NdArray> {
        check_shape(new_shape)?;
        let new_count = checked_elem_count(new_shape)
            .ok_or_else(|| NdError::InvalidShape(format!("shape {new_shape:?} overflows")))?;
        if new_count != self.elem_count() {
            return Err(NdError::InvalidShape(format!(
                "cannot reshape {} elements into shape {new_shape:?}",
                self.elem_count()
            )));
        }
        match self.layout.reshape(new_shape, self.dtype.width()) {
            Some(layout) => self.with_layout(layout),
            None => Err(NdError::NotContiguous(
                "reshape of this view requires a copy; call make_contiguous first".into(),
            )),
        }
    }

    /// Permute axes (a view). `None` reverses them.
    pub fn transpose(&self, perm: Option<&[i64]>) -> Result<NdArray> {
        self.with_layout(self.layout.transpose(perm)?)
    }

    /// Slice every axis (a view over shared storage).
    pub fn slice(&self, specs: &[SliceSpec]) -> Result<NdArray> {
        self.with_layout(self.layout.slice(specs)?)
    }

    /// Dense row-major copy with the same dtype and shape. The copy is
    /// always engine-owned and writable.
    pub fn deep_clone(&self) -> Result<NdArray> {
        let out = NdArray::uninit(self.dtype, self.shape())?;
        let width = self.dtype.width();
        let src = self.base_ptr();
        let mut dst = out.storage.as_ptr();
        let mut visit = |off: isize| unsafe {
            match width {
                8 => *(dst as *mut u64) = *(src.offset(off) as *const u64),
                _ => *(dst as *mut u32) = *(src.offset(off) as *const u32),
            }
            dst = dst.add(width);
        };
        walk_layout(&self.layout, &mut visit);
        Ok(out)
    }

    /// Share the view when already contiguous, otherwise densify.
    pub fn make_contiguous(&self) -> Result<NdArray> {
        if self.is_contiguous() {
            Ok(self.clone())
        } else {
            self.deep_clone()
        }
    }

    /// Gather all elements in row-major order, converted to f64.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.elem_count());
        let op = Operand::direct(self);
        zip_offsets(self.shape(), &[&op], |offs| {
            out.push(unsafe { op.f64_at(offs[0]) });
        });
        out
    }

    /// Gather all elements of an I32 array in row-major order.
    pub fn to_i32_vec(&self) -> Vec<i32> {
        debug_assert_eq!(self.dtype, DType::I32);
        let mut out = Vec::with_capacity(self.elem_count());
        let op = Operand::direct(self);
        zip_offsets(self.shape(), &[&op], |offs| {
            out.push(unsafe { op.i32_at(offs[0]) });
        });
        out
    }
}

/// Row-major walk over a layout, calling `visit` with each element's byte
/// offset.
fn walk_layout(layout: &Layout, visit: &mut dyn FnMut(isize)) {
    if layout.shape.contains(&0) {
        return;
    }
    let ndim = layout.ndim();
    let mut index = vec![0usize; ndim];
    let mut off = layout.byte_offset as isize;
    loop {
        visit(off);
        let mut axis = ndim;
        loop {
            if axis == 0 {
                return;
            }
            axis -= 1;
            index[axis] += 1;
            if index[axis] < layout.shape[axis] {
                off += layout.strides[axis];
                break;
            }
            index[axis] = 0;
            off -= layout.strides[axis] * (layout.shape[axis] as isize - 1);
        }
    }
}

// Structural equality in row-major element order; used by tests.
impl PartialEq for NdArray {
    fn eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype
            && self.shape() == other.shape()
            && self.to_f64_vec() == other.to_f64_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_zeroed() {
        let a = NdArray::zeroed(DType::F64, &[2, 3]).unwrap();
        assert_eq!(a.shape(), &[2, 3]);
        assert_eq!(a.elem_count(), 6);
        assert_eq!(a.byte_len(), 48);
        assert_eq!(a.strides(), &[24, 8]);
        assert!(a.is_contiguous());
        assert!(a.to_f64_vec().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_scalar_alloc() {
        let a = NdArray::zeroed(DType::F64, &[]).unwrap();
        assert_eq!(a.ndim(), 0);
        assert_eq!(a.elem_count(), 1);
        assert_eq!(a.to_f64_vec(), vec![0.0]);
    }

    #[test]
    fn test_empty_alloc() {
        let a = NdArray::zeroed(DType::F64, &[2, 0, 3]).unwrap();
        assert_eq!(a.elem_count(), 0);
        assert_eq!(a.byte_len(), 0);
        assert!(a.is_contiguous());
    }

    #[test]
    fn test_rank_limit() {
        let err = NdArray::zeroed(DType::F64, &[1; 9]).unwrap_err();
        assert!(matches!(err, NdError::InvalidArg(_)));
    }

    #[test]
    fn test_from_f64_shape_mismatch() {
        let err = NdArray::from_f64(&[1.0, 2.0, 3.0], &[2, 2]).unwrap_err();
        assert!(matches!(err, NdError::InvalidShape(_)));
    }

    #[test]
    fn test_reshape_is_a_view() {
        let a = NdArray::from_f64(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let r = a.reshape(&[3, 2]).unwrap();
        assert_eq!(r.shape(), &[3, 2]);
        assert!(r.is_contiguous());
        assert_eq!(r.to_f64_vec(), a.to_f64_vec());
        assert!(Arc::ptr_eq(a.storage(), r.storage()));
    }

    #[test]
    fn test_reshape_wrong_count() {
        let a = NdArray::zeroed(DType::F64, &[2, 3]).unwrap();
        assert!(matches!(
            a.reshape(&[4, 2]).unwrap_err(),
            NdError::InvalidShape(_)
        ));
    }

    #[test]
    fn test_reshape_of_transposed_needs_copy() {
        let a = NdArray::from_f64(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let t = a.transpose(None).unwrap();
        assert!(matches!(
            t.reshape(&[6]).unwrap_err(),
            NdError::NotContiguous(_)
        ));
        let dense = t.make_contiguous().unwrap();
        assert!(dense.reshape(&[6]).is_ok());
    }

    #[test]
    fn test_transpose_shares_storage() {
        let a = NdArray::from_f64(&[1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let t = a.transpose(Some(&[1, 0])).unwrap();
        assert_eq!(t.shape(), &[2, 2]);
        assert_eq!(t.strides(), &[8, 16]);
        assert!(!t.is_contiguous());
        assert_eq!(t.to_f64_vec(), vec![1.0, 3.0, 2.0, 4.0]);
        assert!(Arc::ptr_eq(a.storage(), t.storage()));
    }

    #[test]
    fn test_transpose_round_trip_is_identity() {
        let a = NdArray::from_f64(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let t = a.transpose(Some(&[1, 0])).unwrap();
        let back = t.transpose(Some(&[1, 0])).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn test_make_contiguous_shares_when_already_dense() {
        let a = NdArray::from_f64(&[1.0, 2.0], &[2]).unwrap();
        let c = a.make_contiguous().unwrap();
        assert!(Arc::ptr_eq(a.storage(), c.storage()));
    }

    #[test]
    fn test_make_contiguous_densifies_transposed() {
        let a = NdArray::from_f64(&[1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let t = a.transpose(None).unwrap();
        let dense = t.make_contiguous().unwrap();
        assert!(dense.is_contiguous());
        assert_eq!(dense.to_f64_vec(), vec![1.0, 3.0, 2.0, 4.0]);
        assert!(!Arc::ptr_eq(a.storage(), dense.storage()));
    }

    #[test]
    fn test_deep_clone_is_independent() {
        let a = NdArray::from_i32(&[1, 2, 3, 4], &[2, 2]).unwrap();
        let b = a.deep_clone().unwrap();
        assert_eq!(a, b);
        assert!(!Arc::ptr_eq(a.storage(), b.storage()));
    }

    #[test]
    fn test_slice_negative_step_reverses() {
        let a = NdArray::from_f64(&[1.0, 2.0, 3.0, 4.0], &[4]).unwrap();
        let r = a
            .slice(&[SliceSpec {
                step: Some(-1),
                ..Default::default()
            }])
            .unwrap();
        assert_eq!(r.to_f64_vec(), vec![4.0, 3.0, 2.0, 1.0]);
        let rr = r
            .slice(&[SliceSpec {
                step: Some(-1),
                ..Default::default()
            }])
            .unwrap();
        assert_eq!(rr.to_f64_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_slice_window() {
        let a = NdArray::from_f64(
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
            &[3, 3],
        )
        .unwrap();
        let s = a
            .slice(&[
                SliceSpec {
                    start: Some(0),
                    stop: Some(3),
                    step: Some(2),
                },
                SliceSpec {
                    start: Some(1),
                    ..Default::default()
                },
            ])
            .unwrap();
        assert_eq!(s.shape(), &[2, 2]);
        assert!(!s.is_contiguous());
        assert_eq!(s.to_f64_vec(), vec![2.0, 3.0, 8.0, 9.0]);
    }

    #[test]
    fn test_from_host_copy_with_input_strides() {
        // Column-major 2x3 source: strides [8, 16] over [1,4,2,5,3,6].
        let src = [1.0f64, 4.0, 2.0, 5.0, 3.0, 6.0];
        let arr = unsafe {
            NdArray::from_host_copy(
                src.as_ptr() as *const u8,
                DType::F64,
                &[2, 3],
                Some(&[8, 16]),
                false,
            )
        }
        .unwrap();
        assert!(arr.is_contiguous());
        assert_eq!(arr.to_f64_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_readonly_propagates_from_flag() {
        let a = NdArray::alloc(DType::F64, &[2], true).unwrap();
        assert!(a.is_readonly());
        // Views keep the flag.
        let t = a.transpose(None).unwrap();
        assert!(t.is_readonly());
        // Deep copies are writable again.
        assert!(!a.deep_clone().unwrap().is_readonly());
    }
}
