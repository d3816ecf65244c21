//! Export bridge
//!
//! `nd_array_export_bytes` hands the host `[data_ptr, byte_len,
//! deallocator_fn, deallocator_ctx]`. Contiguous, engine-owned, writable
//! arrays export zero-copy: the context holds a storage reference so the
//! bytes outlive every handle. Anything else (readonly, borrowed or
//! non-contiguous) exports a freshly packed dense copy. In both cases the
//! pointer stays valid until the deallocator runs exactly once, and empty
//! arrays export a non-null pointer with length 0.

use std::os::raw::c_void;
use std::sync::Arc;

use ndrs_core::{NdError, Result};
use ndrs_cpu::{NdArray, Storage};

/// Keeps the exported bytes alive until the deallocator runs.
pub struct ExportCtx {
    _storage: Arc<Storage>,
}

/// The deallocator the host receives in `out4[2]`.
///
/// # Safety
///
/// `ctx` must be the context from the same export, passed at most once.
pub unsafe extern "C" fn export_dealloc(ctx: *mut c_void) {
    if !ctx.is_null() {
        drop(unsafe { Box::from_raw(ctx as *mut ExportCtx) });
    }
}

/// Build the out4 quadruple for an array.
pub fn export_bytes(arr: &NdArray) -> Result<[u64; 4]> {
    let exported = if arr.is_contiguous() && arr.storage().exportable_in_place() && !arr.is_readonly()
    {
        arr.clone()
    } else {
        arr.deep_clone()?
    };

    let data_ptr = exported.view_ptr() as u64;
    let byte_len = exported.byte_len() as u64;
    let ctx = Box::new(ExportCtx {
        _storage: Arc::clone(exported.storage()),
    });
    let dealloc: unsafe extern "C" fn(*mut c_void) = export_dealloc;
    Ok([
        data_ptr,
        byte_len,
        dealloc as usize as u64,
        Box::into_raw(ctx) as u64,
    ])
}

/// Run the deallocator for a context by value; the host-side convenience
/// behind `nd_export_release_ctx`.
pub fn release_ctx(ctx: u64) -> Result<()> {
    if ctx == 0 {
        return Err(NdError::InvalidArg("null export context".into()));
    }
    unsafe { export_dealloc(ctx as *mut c_void) };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndrs_core::DType;

    #[test]
    fn test_contiguous_export_is_zero_copy() {
        let arr = NdArray::from_f64(&[1.0, 2.0, 3.0], &[3]).unwrap();
        let out = export_bytes(&arr).unwrap();
        assert_eq!(out[0], arr.view_ptr() as u64);
        assert_eq!(out[1], 24);
        assert_ne!(out[2], 0);
        release_ctx(out[3]).unwrap();
    }

    #[test]
    fn test_noncontiguous_export_packs_copy() {
        let arr = NdArray::from_f64(&[1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let t = arr.transpose(None).unwrap();
        let out = export_bytes(&t).unwrap();
        assert_ne!(out[0], arr.view_ptr() as u64);
        assert_eq!(out[1], 32);
        let packed =
            unsafe { std::slice::from_raw_parts(out[0] as *const f64, 4) }.to_vec();
        assert_eq!(packed, vec![1.0, 3.0, 2.0, 4.0]);
        release_ctx(out[3]).unwrap();
    }

    #[test]
    fn test_readonly_export_copies() {
        let arr = NdArray::alloc(DType::F64, &[2], true).unwrap();
        let out = export_bytes(&arr).unwrap();
        assert_ne!(out[0], arr.view_ptr() as u64);
        release_ctx(out[3]).unwrap();
    }

    #[test]
    fn test_empty_export_is_non_null() {
        let arr = NdArray::zeroed(DType::F64, &[0]).unwrap();
        let out = export_bytes(&arr).unwrap();
        assert_ne!(out[0], 0);
        assert_eq!(out[1], 0);
        release_ctx(out[3]).unwrap();
    }

    #[test]
    fn test_export_keeps_storage_alive_after_drop() {
        let arr = NdArray::from_f64(&[7.0, 8.0], &[2]).unwrap();
        let out = export_bytes(&arr).unwrap();
        drop(arr);
        let view = unsafe { std::slice::from_raw_parts(out[0] as *const f64, 2) };
        assert_eq!(view, &[7.0, 8.0]);
        release_ctx(out[3]).unwrap();
    }

    #[test]
    fn test_release_ctx_rejects_null() {
        assert!(release_ctx(0).is_err());
    }
}
