//! Reference-counted aligned byte buffers
//!
//! A `Storage` owns the bytes behind one or more array views. Buffers are
//! aligned to `max(dtype width, 16)` so kernels may use vector loads on
//! contiguous data. Reference counting is `Arc`; the engine drops the
//! allocation when the last view (or export context) goes away.

use std::alloc::{self, Layout as AllocLayout};
use std::ptr::NonNull;

use ndrs_core::{DType, NdError, Result};

/// Minimum buffer alignment, independent of dtype.
pub const MIN_ALIGN: usize = 16;

/// Who allocated the bytes.
///
/// External storages are borrowed from the host: always readonly, never
/// freed by the engine. Reserved for future external-borrow entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOwner {
    Engine,
    External,
}

/// A typed, aligned, heap-allocated byte buffer.
#[derive(Debug)]
pub struct Storage {
    ptr: NonNull<u8>,
    byte_capacity: usize,
    dtype: DType,
    readonly: bool,
    owner: StorageOwner,
}

// Views never mutate element data after creation (kernels write only into
// freshly allocated outputs before they are shared), so concurrent reads
// through the handle table are sound.
unsafe impl Send for Storage {}
unsafe impl Sync for Storage {}

impl Storage {
    fn alloc_layout(byte_capacity: usize, dtype: DType) -> Result<AllocLayout> {
        let align = dtype.width().max(MIN_ALIGN);
        AllocLayout::from_size_align(byte_capacity, align)
            .map_err(|_| NdError::Oom(format!("cannot lay out {byte_capacity} bytes")))
    }

    fn allocate(byte_capacity: usize, dtype: DType, readonly: bool, zeroed: bool) -> Result<Self> {
        let layout = Self::alloc_layout(byte_capacity, dtype)?;
        let ptr = if byte_capacity == 0 {
            // A zero-sized allocation is UB through std::alloc; hand out a
            // well-aligned non-null pointer that is never dereferenced.
            // Exports of empty arrays still see a non-null data pointer.
            NonNull::new(layout.align() as *mut u8).unwrap()
        } else {
            let raw = unsafe {
                if zeroed {
                    alloc::alloc_zeroed(layout)
                } else {
                    alloc::alloc(layout)
                }
            };
            NonNull::new(raw)
                .ok_or_else(|| NdError::Oom(format!("allocation of {byte_capacity} bytes failed")))?
        };
        Ok(Storage {
            ptr,
            byte_capacity,
            dtype,
            readonly,
            owner: StorageOwner::Engine,
        })
    }

    /// Allocate a zero-filled buffer.
    pub fn zeroed(byte_capacity: usize, dtype: DType, readonly: bool) -> Result<Self> {
        Self::allocate(byte_capacity, dtype, readonly, true)
    }

    /// Allocate without initializing. The caller must write every byte the
    /// views over this storage can reach before any read.
    pub(crate) fn uninit(byte_capacity: usize, dtype: DType) -> Result<Self> {
        Self::allocate(byte_capacity, dtype, false, false)
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn byte_capacity(&self) -> usize {
        self.byte_capacity
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn readonly(&self) -> bool {
        self.readonly
    }

    pub fn owner(&self) -> StorageOwner {
        self.owner
    }

    /// True when the engine may hand this buffer out zero-copy for writes:
    /// engine-owned and not readonly.
    pub fn exportable_in_place(&self) -> bool {
        self.owner == StorageOwner::Engine && !self.readonly
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if self.owner == StorageOwner::Engine && self.byte_capacity > 0 {
            // Layout construction succeeded at alloc time, it cannot fail now.
            let layout = Self::alloc_layout(self.byte_capacity, self.dtype).unwrap();
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment() {
        for dtype in [DType::F32, DType::I32, DType::F64] {
            let s = Storage::zeroed(64, dtype, false).unwrap();
            assert_eq!(s.as_ptr() as usize % MIN_ALIGN, 0);
        }
    }

    #[test]
    fn test_zero_capacity_is_non_null() {
        let s = Storage::zeroed(0, DType::F64, false).unwrap();
        assert!(!s.as_ptr().is_null());
        assert_eq!(s.byte_capacity(), 0);
    }

    #[test]
    fn test_zeroed_contents() {
        let s = Storage::zeroed(32, DType::I32, false).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(s.as_ptr(), 32) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_readonly_flag() {
        let s = Storage::zeroed(16, DType::F32, true).unwrap();
        assert!(s.readonly());
        assert!(!s.exportable_in_place());
    }
}
