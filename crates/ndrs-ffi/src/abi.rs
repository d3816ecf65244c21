//! C ABI entry points
//!
//! Every function here is a thin shell: screen raw pointers, decode
//! arguments, call into the engine, and fold the outcome into a status
//! code plus the thread-local error station. Out-parameters are written
//! only on success, and no Rust panic ever crosses the boundary (a panic
//! is reported as ND_E_INTERNAL).

use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};

use ndrs_core::layout::MAX_NDIM;
use ndrs_core::{DType, NdError, Result, SliceSpec};
use ndrs_cpu::{elementwise, matmul, reduce, simd, NdArray};

use crate::export;
use crate::job;
use crate::registry;
use crate::station::{self, NdStatus, ND_E_INTERNAL, ND_E_INVALID_ARG, ND_OK};

/// Monotonic ABI revision.
pub const ND_ABI_VERSION: u32 = 1;

/// Readonly bit in the flags word.
const ND_FLAG_READONLY: u32 = 1;

static BUILD_VERSION: &str = concat!("ndrs ", env!("CARGO_PKG_VERSION"), "\0");

/// Every symbol this library exports, in header order. The test suite
/// checks this list against `include/ndarray.h`.
pub const EXPORTED_SYMBOLS: &[&str] = &[
    "nd_abi_version",
    "nd_build_version_cstr",
    "nd_last_error_code",
    "nd_last_error_message",
    "nd_array_alloc",
    "nd_array_from_host_copy",
    "nd_array_retain",
    "nd_array_release",
    "nd_array_clone",
    "nd_array_make_contiguous",
    "nd_array_ndim",
    "nd_array_shape_copy",
    "nd_array_strides_copy",
    "nd_array_dtype",
    "nd_array_elem_count",
    "nd_array_byte_len",
    "nd_array_is_contiguous",
    "nd_array_reshape",
    "nd_array_transpose",
    "nd_array_slice",
    "nd_array_export_bytes",
    "nd_export_release_ctx",
    "nd_add",
    "nd_sub",
    "nd_mul",
    "nd_div",
    "nd_eq",
    "nd_lt",
    "nd_gt",
    "nd_where",
    "nd_sum_all",
    "nd_sum_axis",
    "nd_matmul",
    "nd_job_submit_matmul",
    "nd_job_poll",
    "nd_job_take_result",
    "nd_job_cancel",
    "nd_add_into",
    "nd_array_data_ptr",
    "nd_array_len",
    "nd_simd_width_f64",
    "nd_simd_add_f64_raw",
    "nd_simd_sum_f64_raw",
];

/// Run an entry point body, translating the outcome into a status code.
/// Success clears the station; failure records it.
fn api(f: impl FnOnce() -> Result<()>) -> NdStatus {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {
            station::clear();
            ND_OK
        }
        Ok(Err(err)) => {
            let code = station::status_of(&err);
            station::record(code, err.to_string());
            code
        }
        Err(_) => {
            station::record(ND_E_INTERNAL, "internal invariant violated");
            ND_E_INTERNAL
        }
    }
}

fn out_ref<'a, T>(ptr: *mut T) -> Result<&'a mut T> {
    unsafe { ptr.as_mut() }.ok_or_else(|| NdError::InvalidArg("null output pointer".into()))
}

fn shape_from_raw(shape: *const i64, ndim: u8) -> Result<Vec<usize>> {
    let ndim = ndim as usize;
    if ndim > MAX_NDIM {
        return Err(NdError::InvalidArg(format!(
            "rank {ndim} exceeds the supported maximum of {MAX_NDIM}"
        )));
    }
    if ndim == 0 {
        return Ok(Vec::new());
    }
    if shape.is_null() {
        return Err(NdError::InvalidArg("null shape pointer".into()));
    }
    let raw = unsafe { std::slice::from_raw_parts(shape, ndim) };
    raw.iter()
        .map(|&extent| {
            usize::try_from(extent)
                .map_err(|_| NdError::InvalidShape(format!("negative dimension {extent}")))
        })
        .collect()
}

fn strides_from_raw(strides: *const i64, ndim: u8) -> Option<Vec<isize>> {
    if strides.is_null() {
        return None;
    }
    let raw = unsafe { std::slice::from_raw_parts(strides, ndim as usize) };
    Some(raw.iter().map(|&s| s as isize).collect())
}

fn parse_flags(flags: u32) -> Result<bool> {
    if flags & !ND_FLAG_READONLY != 0 {
        return Err(NdError::InvalidArg(format!("unknown flags 0x{flags:x}")));
    }
    Ok(flags & ND_FLAG_READONLY != 0)
}

fn register_out(out_handle: *mut u64, array: NdArray) -> Result<()> {
    let out = out_ref(out_handle)?;
    *out = registry::insert(array)?;
    Ok(())
}

// ---- version & error station ----

#[no_mangle]
pub extern "C" fn nd_abi_version() -> u32 {
    ND_ABI_VERSION
}

#[no_mangle]
pub extern "C" fn nd_build_version_cstr() -> *const c_char {
    BUILD_VERSION.as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn nd_last_error_code() -> NdStatus {
    station::last_code()
}

/// Copy the last error message (UTF-8, possibly truncated to `cap`
/// bytes); `out_len` always receives the untruncated length. This is a
/// query: it leaves the station untouched.
///
/// # Safety
///
/// `out_utf8` must be writable for `cap` bytes when non-null.
#[no_mangle]
pub unsafe extern "C" fn nd_last_error_message(
    out_utf8: *mut u8,
    cap: u64,
    out_len: *mut u64,
) -> NdStatus {
    if out_len.is_null() {
        return ND_E_INVALID_ARG;
    }
    station::with_message(|message| {
        let bytes = message.as_bytes();
        unsafe { *out_len = bytes.len() as u64 };
        let copy_len = bytes.len().min(cap as usize);
        if copy_len > 0 && !out_utf8.is_null() {
            unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), out_utf8, copy_len) };
        }
    });
    ND_OK
}

// ---- lifecycle ----

/// # Safety
///
/// `shape` must point to `ndim` i64 values; `out_handle` must be writable.
#[no_mangle]
pub unsafe extern "C" fn nd_array_alloc(
    dtype: u32,
    shape: *const i64,
    ndim: u8,
    flags: u32,
    out_handle: *mut u64,
) -> NdStatus {
    api(|| {
        let dtype = DType::from_code(dtype)?;
        let shape = shape_from_raw(shape, ndim)?;
        let readonly = parse_flags(flags)?;
        register_out(out_handle, NdArray::alloc(dtype, &shape, readonly)?)
    })
}

/// Copy host bytes into a fresh dense array. `strides_or_null` describes
/// the source buffer layout (null means C-contiguous).
///
/// # Safety
///
/// `data` must be readable for every byte the shape/stride pattern
/// reaches; `shape`/`strides_or_null` must hold `ndim` i64 values.
#[no_mangle]
pub unsafe extern "C" fn nd_array_from_host_copy(
    data: *const u8,
    dtype: u32,
    shape: *const i64,
    strides_or_null: *const i64,
    ndim: u8,
    flags: u32,
    out_handle: *mut u64,
) -> NdStatus {
    api(|| {
        let dtype = DType::from_code(dtype)?;
        let shape = shape_from_raw(shape, ndim)?;
        let strides = strides_from_raw(strides_or_null, ndim);
        let readonly = parse_flags(flags)?;
        let array = unsafe {
            NdArray::from_host_copy(data, dtype, &shape, strides.as_deref(), readonly)?
        };
        register_out(out_handle, array)
    })
}

#[no_mangle]
pub extern "C" fn nd_array_retain(handle: u64) -> NdStatus {
    api(|| registry::retain(handle))
}

#[no_mangle]
pub extern "C" fn nd_array_release(handle: u64) -> NdStatus {
    api(|| registry::release(handle))
}

/// # Safety
///
/// `out_handle` must be writable.
#[no_mangle]
pub unsafe extern "C" fn nd_array_clone(handle: u64, out_handle: *mut u64) -> NdStatus {
    api(|| {
        let arr = registry::resolve(handle)?;
        register_out(out_handle, arr.deep_clone()?)
    })
}

/// # Safety
///
/// `out_handle` must be writable.
#[no_mangle]
pub unsafe extern "C" fn nd_array_make_contiguous(handle: u64, out_handle: *mut u64) -> NdStatus {
    api(|| {
        let arr = registry::resolve(handle)?;
        register_out(out_handle, arr.make_contiguous()?)
    })
}

// ---- metadata ----

/// # Safety
///
/// `out_ndim` must be writable.
#[no_mangle]
pub unsafe extern "C" fn nd_array_ndim(handle: u64, out_ndim: *mut u8) -> NdStatus {
    api(|| {
        let arr = registry::resolve(handle)?;
        *out_ref(out_ndim)? = arr.ndim() as u8;
        Ok(())
    })
}

/// # Safety
///
/// `out_shape` must be writable for `cap` i64 values.
#[no_mangle]
pub unsafe extern "C" fn nd_array_shape_copy(handle: u64, out_shape: *mut i64, cap: u8) -> NdStatus {
    api(|| {
        let arr = registry::resolve(handle)?;
        copy_i64s(
            out_shape,
            cap,
            &arr.shape().iter().map(|&e| e as i64).collect::<Vec<_>>(),
        )
    })
}

/// # Safety
///
/// `out_strides` must be writable for `cap` i64 values.
#[no_mangle]
pub unsafe extern "C" fn nd_array_strides_copy(
    handle: u64,
    out_strides: *mut i64,
    cap: u8,
) -> NdStatus {
    api(|| {
        let arr = registry::resolve(handle)?;
        copy_i64s(
            out_strides,
            cap,
            &arr.strides().iter().map(|&s| s as i64).collect::<Vec<_>>(),
        )
    })
}

fn copy_i64s(out: *mut i64, cap: u8, values: &[i64]) -> Result<()> {
    if (cap as usize) < values.len() {
        return Err(NdError::InvalidArg(format!(
            "output capacity {cap} below rank {}",
            values.len()
        )));
    }
    if values.is_empty() {
        return Ok(());
    }
    if out.is_null() {
        return Err(NdError::InvalidArg("null output pointer".into()));
    }
    unsafe { std::ptr::copy_nonoverlapping(values.as_ptr(), out, values.len()) };
    Ok(())
}

/// # Safety
///
/// `out_dtype` must be writable.
#[no_mangle]
pub unsafe extern "C" fn nd_array_dtype(handle: u64, out_dtype: *mut u32) -> NdStatus {
    api(|| {
        let arr = registry::resolve(handle)?;
        *out_ref(out_dtype)? = arr.dtype().code();
        Ok(())
    })
}

/// # Safety
///
/// `out_len` must be writable.
#[no_mangle]
pub unsafe extern "C" fn nd_array_elem_count(handle: u64, out_len: *mut u64) -> NdStatus {
    api(|| {
        let arr = registry::resolve(handle)?;
        *out_ref(out_len)? = arr.elem_count() as u64;
        Ok(())
    })
}

/// # Safety
///
/// `out_len` must be writable.
#[no_mangle]
pub unsafe extern "C" fn nd_array_byte_len(handle: u64, out_len: *mut u64) -> NdStatus {
    api(|| {
        let arr = registry::resolve(handle)?;
        *out_ref(out_len)? = arr.byte_len() as u64;
        Ok(())
    })
}

/// # Safety
///
/// `out_bool` must be writable.
#[no_mangle]
pub unsafe extern "C" fn nd_array_is_contiguous(handle: u64, out_bool: *mut u32) -> NdStatus {
    api(|| {
        let arr = registry::resolve(handle)?;
        *out_ref(out_bool)? = arr.is_contiguous() as u32;
        Ok(())
    })
}

// ---- view operations ----

/// # Safety
///
/// `shape` must point to `ndim` i64 values; `out_handle` must be writable.
#[no_mangle]
pub unsafe extern "C" fn nd_array_reshape(
    handle: u64,
    shape: *const i64,
    ndim: u8,
    out_handle: *mut u64,
) -> NdStatus {
    api(|| {
        let arr = registry::resolve(handle)?;
        let shape = shape_from_raw(shape, ndim)?;
        register_out(out_handle, arr.reshape(&shape)?)
    })
}

/// # Safety
///
/// `perm_or_null` must point to `ndim` i64 values when non-null;
/// `out_handle` must be writable.
#[no_mangle]
pub unsafe extern "C" fn nd_array_transpose(
    handle: u64,
    perm_or_null: *const i64,
    ndim: u8,
    out_handle: *mut u64,
) -> NdStatus {
    api(|| {
        let arr = registry::resolve(handle)?;
        let perm = if perm_or_null.is_null() {
            None
        } else {
            Some(unsafe { std::slice::from_raw_parts(perm_or_null, ndim as usize) })
        };
        register_out(out_handle, arr.transpose(perm)?)
    })
}

/// # Safety
///
/// Each non-null bound array must point to `ndim` i64 values;
/// `out_handle` must be writable.
#[no_mangle]
pub unsafe extern "C" fn nd_array_slice(
    handle: u64,
    starts_or_null: *const i64,
    stops_or_null: *const i64,
    steps_or_null: *const i64,
    ndim: u8,
    out_handle: *mut u64,
) -> NdStatus {
    api(|| {
        let arr = registry::resolve(handle)?;
        if ndim as usize > MAX_NDIM {
            return Err(NdError::InvalidArg(format!(
                "rank {ndim} exceeds the supported maximum of {MAX_NDIM}"
            )));
        }
        fn bounds<'a>(ptr: *const i64, ndim: u8) -> Option<&'a [i64]> {
            if ptr.is_null() {
                None
            } else {
                Some(unsafe { std::slice::from_raw_parts(ptr, ndim as usize) })
            }
        }
        let starts = bounds(starts_or_null, ndim);
        let stops = bounds(stops_or_null, ndim);
        let steps = bounds(steps_or_null, ndim);
        let specs: Vec<SliceSpec> = (0..ndim as usize)
            .map(|axis| SliceSpec {
                start: starts.map(|s| s[axis]),
                stop: stops.map(|s| s[axis]),
                step: steps.map(|s| s[axis]),
            })
            .collect();
        register_out(out_handle, arr.slice(&specs)?)
    })
}

// ---- export ----

/// Fill `out4` with `[data_ptr, byte_len, deallocator_fn, deallocator_ctx]`.
///
/// # Safety
///
/// `out4` must be writable for four u64 values.
#[no_mangle]
pub unsafe extern "C" fn nd_array_export_bytes(handle: u64, out4: *mut u64) -> NdStatus {
    api(|| {
        if out4.is_null() {
            return Err(NdError::InvalidArg("null output pointer".into()));
        }
        let arr = registry::resolve(handle)?;
        let quad = export::export_bytes(&arr)?;
        unsafe { std::ptr::copy_nonoverlapping(quad.as_ptr(), out4, 4) };
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn nd_export_release_ctx(ctx: u64) -> NdStatus {
    api(|| export::release_ctx(ctx))
}

// ---- elementwise & reductions ----

macro_rules! binary_entry {
    ($(#[$meta:meta])* $name:ident, $kernel:path) => {
        $(#[$meta])*
        /// # Safety
        ///
        /// `out_handle` must be writable.
        #[no_mangle]
        pub unsafe extern "C" fn $name(a: u64, b: u64, out_handle: *mut u64) -> NdStatus {
            api(|| {
                let a = registry::resolve(a)?;
                let b = registry::resolve(b)?;
                register_out(out_handle, $kernel(&a, &b)?)
            })
        }
    };
}

binary_entry!(nd_add, elementwise::add);
binary_entry!(nd_sub, elementwise::sub);
binary_entry!(nd_mul, elementwise::mul);
binary_entry!(nd_div, elementwise::div);
binary_entry!(nd_eq, elementwise::eq);
binary_entry!(nd_lt, elementwise::lt);
binary_entry!(nd_gt, elementwise::gt);
binary_entry!(nd_matmul, matmul::matmul);

/// # Safety
///
/// `out_handle` must be writable.
#[no_mangle]
pub unsafe extern "C" fn nd_where(
    cond: u64,
    x: u64,
    y: u64,
    out_handle: *mut u64,
) -> NdStatus {
    api(|| {
        let cond = registry::resolve(cond)?;
        let x = registry::resolve(x)?;
        let y = registry::resolve(y)?;
        register_out(out_handle, elementwise::where_select(&cond, &x, &y)?)
    })
}

/// # Safety
///
/// `out_handle` must be writable.
#[no_mangle]
pub unsafe extern "C" fn nd_sum_all(a: u64, out_handle: *mut u64) -> NdStatus {
    api(|| {
        let a = registry::resolve(a)?;
        register_out(out_handle, reduce::sum_all(&a)?)
    })
}

/// # Safety
///
/// `out_handle` must be writable.
#[no_mangle]
pub unsafe extern "C" fn nd_sum_axis(a: u64, axis: i32, out_handle: *mut u64) -> NdStatus {
    api(|| {
        let a = registry::resolve(a)?;
        register_out(out_handle, reduce::sum_axis(&a, axis)?)
    })
}

// ---- jobs ----

/// # Safety
///
/// `out_job_id` must be writable.
#[no_mangle]
pub unsafe extern "C" fn nd_job_submit_matmul(a: u64, b: u64, out_job_id: *mut u64) -> NdStatus {
    api(|| {
        let out = out_ref(out_job_id)?;
        *out = job::submit_matmul(a, b)?;
        Ok(())
    })
}

/// # Safety
///
/// `out_state` and `out_result_status` must be writable.
#[no_mangle]
pub unsafe extern "C" fn nd_job_poll(
    job_id: u64,
    out_state: *mut u32,
    out_result_status: *mut NdStatus,
) -> NdStatus {
    api(|| {
        let state_out = out_ref(out_state)?;
        let status_out = out_ref(out_result_status)?;
        let (state, status) = job::poll(job_id)?;
        *state_out = state;
        *status_out = status;
        Ok(())
    })
}

/// # Safety
///
/// `out_handle` must be writable.
#[no_mangle]
pub unsafe extern "C" fn nd_job_take_result(job_id: u64, out_handle: *mut u64) -> NdStatus {
    api(|| {
        let out = out_ref(out_handle)?;
        *out = job::take_result(job_id)?;
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn nd_job_cancel(job_id: u64) -> NdStatus {
    api(|| job::cancel(job_id))
}

// ---- legacy benchmark hooks ----

#[no_mangle]
pub extern "C" fn nd_add_into(a: u64, b: u64, out_handle: u64) -> NdStatus {
    api(|| {
        let a = registry::resolve(a)?;
        let b = registry::resolve(b)?;
        let out = registry::resolve(out_handle)?;
        elementwise::add_into(&a, &b, &out)
    })
}

/// Raw pointer to the first byte of a view; null (with the station set)
/// for an invalid handle.
#[no_mangle]
pub extern "C" fn nd_array_data_ptr(handle: u64) -> *mut u8 {
    match registry::resolve(handle) {
        Ok(arr) => {
            station::clear();
            arr.view_ptr() as *mut u8
        }
        Err(err) => {
            station::record(station::status_of(&err), err.to_string());
            std::ptr::null_mut()
        }
    }
}

/// # Safety
///
/// `out_len` must be writable.
#[no_mangle]
pub unsafe extern "C" fn nd_array_len(handle: u64, out_len: *mut u64) -> NdStatus {
    api(|| {
        let arr = registry::resolve(handle)?;
        *out_ref(out_len)? = arr.elem_count() as u64;
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn nd_simd_width_f64() -> u64 {
    simd::F64_LANES as u64
}

/// # Safety
///
/// `a`, `b` and `out` must each point to `len` f64 values when `len > 0`.
#[no_mangle]
pub unsafe extern "C" fn nd_simd_add_f64_raw(
    a: *const f64,
    b: *const f64,
    out: *mut f64,
    len: u64,
) -> NdStatus {
    api(|| {
        if len == 0 {
            return Ok(());
        }
        if a.is_null() || b.is_null() || out.is_null() {
            return Err(NdError::InvalidArg("null buffer pointer".into()));
        }
        let len = len as usize;
        let (a, b, out) = unsafe {
            (
                std::slice::from_raw_parts(a, len),
                std::slice::from_raw_parts(b, len),
                std::slice::from_raw_parts_mut(out, len),
            )
        };
        simd::simd_add_f64(a, b, out);
        Ok(())
    })
}

/// # Safety
///
/// `data` must point to `len` f64 values when `len > 0`; `out_sum` must
/// be writable.
#[no_mangle]
pub unsafe extern "C" fn nd_simd_sum_f64_raw(
    data: *const f64,
    len: u64,
    out_sum: *mut f64,
) -> NdStatus {
    api(|| {
        let out = out_ref(out_sum)?;
        if len == 0 {
            *out = 0.0;
            return Ok(());
        }
        if data.is_null() {
            return Err(NdError::InvalidArg("null buffer pointer".into()));
        }
        let data = unsafe { std::slice::from_raw_parts(data, len as usize) };
        *out = simd::simd_sum_f64(data);
        Ok(())
    })
}
