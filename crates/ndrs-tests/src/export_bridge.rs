//! Export bridge semantics

#[cfg(test)]
mod tests {
    use crate::utils::*;
    use ndrs_ffi::abi::*;

    fn export(h: u64) -> [u64; 4] {
        let mut out4 = [0u64; 4];
        assert_eq!(unsafe { nd_array_export_bytes(h, out4.as_mut_ptr()) }, 0);
        out4
    }

    #[test]
    fn test_contiguous_export_is_zero_copy_and_writable() {
        let h = from_f64(&[1.0, 2.0, 3.0, 4.0], &[4]);
        let out4 = export(h);
        assert_eq!(out4[0], nd_array_data_ptr(h) as u64);
        assert_eq!(out4[1], 32);

        // Writes through the exported pointer are visible via the handle.
        unsafe { *(out4[0] as *mut f64).add(1) = 99.0 };
        assert_eq!(read_f64(h), vec![1.0, 99.0, 3.0, 4.0]);

        assert_eq!(nd_export_release_ctx(out4[3]), 0);
        release(h);
    }

    #[test]
    fn test_noncontiguous_export_densifies() {
        let h = from_f64(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let perm = [1i64, 0];
        let mut t = 0u64;
        assert_eq!(unsafe { nd_array_transpose(h, perm.as_ptr(), 2, &mut t) }, 0);

        let out4 = export(t);
        assert_ne!(out4[0], nd_array_data_ptr(h) as u64);
        let packed =
            unsafe { std::slice::from_raw_parts(out4[0] as *const f64, 6) }.to_vec();
        assert_eq!(packed, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);

        assert_eq!(nd_export_release_ctx(out4[3]), 0);
        release(t);
        release(h);
    }

    #[test]
    fn test_export_copy_does_not_alias_source() {
        let h = from_f64(&[5.0, 6.0, 7.0], &[3]);
        let steps = [-1i64];
        let mut rev = 0u64;
        assert_eq!(
            unsafe {
                nd_array_slice(h, std::ptr::null(), std::ptr::null(), steps.as_ptr(), 1, &mut rev)
            },
            0
        );
        let out4 = export(rev);
        unsafe { *(nd_array_data_ptr(h) as *mut f64) = 42.0 };
        let copied = unsafe { std::slice::from_raw_parts(out4[0] as *const f64, 3) };
        assert_eq!(copied, &[7.0, 6.0, 5.0]);
        assert_eq!(nd_export_release_ctx(out4[3]), 0);
        release(rev);
        release(h);
    }

    #[test]
    fn test_empty_export_is_stable() {
        let h = alloc(DT_F64, &[0]);
        let out4 = export(h);
        assert_ne!(out4[0], 0);
        assert_eq!(out4[1], 0);
        assert_eq!(nd_export_release_ctx(out4[3]), 0);
        release(h);
    }

    #[test]
    fn test_export_outlives_handle_release() {
        let h = from_f64(&[7.0, 8.0], &[2]);
        let out4 = export(h);
        release(h);
        let view = unsafe { std::slice::from_raw_parts(out4[0] as *const f64, 2) };
        assert_eq!(view, &[7.0, 8.0]);
        assert_eq!(nd_export_release_ctx(out4[3]), 0);
    }

    #[test]
    fn test_readonly_array_exports_a_copy() {
        let shape = [2i64];
        let mut h = 0u64;
        // flags bit 0 = READONLY
        assert_eq!(unsafe { nd_array_alloc(DT_F64, shape.as_ptr(), 1, 1, &mut h) }, 0);
        let out4 = export(h);
        assert_ne!(out4[0], nd_array_data_ptr(h) as u64);
        assert_eq!(nd_export_release_ctx(out4[3]), 0);
        release(h);
    }

    #[test]
    fn test_release_ctx_rejects_zero() {
        assert_eq!(nd_export_release_ctx(0), 1);
    }

    #[test]
    fn test_deallocator_fn_pointer_is_returned() {
        let h = from_f64(&[1.0], &[1]);
        let out4 = export(h);
        assert_ne!(out4[2], 0);
        // Invoke the deallocator directly, the way a C host would.
        let dealloc: unsafe extern "C" fn(*mut std::os::raw::c_void) =
            unsafe { std::mem::transmute(out4[2] as usize) };
        unsafe { dealloc(out4[3] as *mut std::os::raw::c_void) };
        release(h);
    }
}
