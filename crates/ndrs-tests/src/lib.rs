//! Shared integration suite for the ndrs engine
//!
//! These tests exercise the engine through the C ABI entry points the
//! way a host binding would: raw pointers in, status codes and handles
//! out. Kernel- and module-level unit tests live next to their code; the
//! modules here cover cross-component scenarios (lifecycle, views,
//! broadcast arithmetic, reductions, matmul, export, jobs) plus a
//! registry fuzz run and a differential check against the `ndarray`
//! crate.

pub mod abi_contract;
pub mod arithmetic;
pub mod creation;
pub mod differential;
pub mod export_bridge;
pub mod jobs;
pub mod lifecycle;
pub mod linalg;
pub mod reduce;
pub mod registry_fuzz;
pub mod views;

/// Raw-pointer helpers shared by the test modules.
pub mod utils {
    use ndrs_ffi::abi::*;

    pub const DT_F32: u32 = 1;
    pub const DT_I32: u32 = 3;
    pub const DT_F64: u32 = 4;

    fn to_i64(values: &[usize]) -> Vec<i64> {
        values.iter().map(|&v| v as i64).collect()
    }

    /// Allocate a zero-filled array, panicking on failure.
    pub fn alloc(dtype: u32, shape: &[usize]) -> u64 {
        let shape = to_i64(shape);
        let mut out = 0u64;
        let ptr = if shape.is_empty() {
            std::ptr::null()
        } else {
            shape.as_ptr()
        };
        let status =
            unsafe { nd_array_alloc(dtype, ptr, shape.len() as u8, 0, &mut out) };
        assert_eq!(status, 0, "nd_array_alloc failed with {status}");
        out
    }

    fn from_host(data: *const u8, dtype: u32, shape: &[usize]) -> u64 {
        let shape = to_i64(shape);
        let mut out = 0u64;
        let ptr = if shape.is_empty() {
            std::ptr::null()
        } else {
            shape.as_ptr()
        };
        let status = unsafe {
            nd_array_from_host_copy(
                data,
                dtype,
                ptr,
                std::ptr::null(),
                shape.len() as u8,
                0,
                &mut out,
            )
        };
        assert_eq!(status, 0, "nd_array_from_host_copy failed with {status}");
        out
    }

    pub fn from_f64(data: &[f64], shape: &[usize]) -> u64 {
        assert_eq!(data.len(), shape.iter().product::<usize>());
        from_host(data.as_ptr() as *const u8, DT_F64, shape)
    }

    pub fn from_f32(data: &[f32], shape: &[usize]) -> u64 {
        from_host(data.as_ptr() as *const u8, DT_F32, shape)
    }

    pub fn from_i32(data: &[i32], shape: &[usize]) -> u64 {
        from_host(data.as_ptr() as *const u8, DT_I32, shape)
    }

    pub fn release(handle: u64) {
        assert_eq!(nd_array_release(handle), 0);
    }

    pub fn shape_of(handle: u64) -> Vec<usize> {
        let mut ndim = 0u8;
        assert_eq!(unsafe { nd_array_ndim(handle, &mut ndim) }, 0);
        let mut shape = vec![0i64; ndim as usize];
        if ndim > 0 {
            assert_eq!(
                unsafe { nd_array_shape_copy(handle, shape.as_mut_ptr(), ndim) },
                0
            );
        }
        shape.into_iter().map(|v| v as usize).collect()
    }

    pub fn strides_of(handle: u64) -> Vec<i64> {
        let mut ndim = 0u8;
        assert_eq!(unsafe { nd_array_ndim(handle, &mut ndim) }, 0);
        let mut strides = vec![0i64; ndim as usize];
        if ndim > 0 {
            assert_eq!(
                unsafe { nd_array_strides_copy(handle, strides.as_mut_ptr(), ndim) },
                0
            );
        }
        strides
    }

    pub fn dtype_of(handle: u64) -> u32 {
        let mut dtype = 0u32;
        assert_eq!(unsafe { nd_array_dtype(handle, &mut dtype) }, 0);
        dtype
    }

    pub fn is_contiguous(handle: u64) -> bool {
        let mut out = 0u32;
        assert_eq!(unsafe { nd_array_is_contiguous(handle, &mut out) }, 0);
        out == 1
    }

    pub fn elem_count(handle: u64) -> usize {
        let mut out = 0u64;
        assert_eq!(unsafe { nd_array_elem_count(handle, &mut out) }, 0);
        out as usize
    }

    fn export(handle: u64) -> ([u64; 4], Vec<u8>) {
        let mut out4 = [0u64; 4];
        let status = unsafe { nd_array_export_bytes(handle, out4.as_mut_ptr()) };
        assert_eq!(status, 0, "nd_array_export_bytes failed with {status}");
        assert_ne!(out4[0], 0, "export produced a null data pointer");
        let bytes = unsafe {
            std::slice::from_raw_parts(out4[0] as *const u8, out4[1] as usize)
        }
        .to_vec();
        (out4, bytes)
    }

    /// Export, copy out as f64 and release the export context.
    pub fn read_f64(handle: u64) -> Vec<f64> {
        let (out4, bytes) = export(handle);
        let values = bytes
            .chunks_exact(8)
            .map(|c| f64::from_ne_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(nd_export_release_ctx(out4[3]), 0);
        values
    }

    /// Export, copy out as i32 and release the export context.
    pub fn read_i32(handle: u64) -> Vec<i32> {
        let (out4, bytes) = export(handle);
        let values = bytes
            .chunks_exact(4)
            .map(|c| i32::from_ne_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(nd_export_release_ctx(out4[3]), 0);
        values
    }

    /// Export, copy out as f32 and release the export context.
    pub fn read_f32(handle: u64) -> Vec<f32> {
        let (out4, bytes) = export(handle);
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(nd_export_release_ctx(out4[3]), 0);
        values
    }

    pub fn last_error() -> (i32, String) {
        let code = nd_last_error_code();
        let mut buf = vec![0u8; 256];
        let mut len = 0u64;
        assert_eq!(
            unsafe { nd_last_error_message(buf.as_mut_ptr(), buf.len() as u64, &mut len) },
            0
        );
        let len = (len as usize).min(buf.len());
        (code, String::from_utf8_lossy(&buf[..len]).into_owned())
    }

    pub fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
        if a.is_nan() && b.is_nan() {
            return true;
        }
        (a - b).abs() <= tol
    }

    pub const DEFAULT_TOL: f64 = 1e-10;
}
