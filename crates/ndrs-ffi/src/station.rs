//! Thread-local error station and status codes
//!
//! Every ABI entry point returns a status; on failure the calling
//! thread's station records `(code, message)` for retrieval through
//! `nd_last_error_code` / `nd_last_error_message`. The station is
//! thread-local so worker threads cannot clobber a caller's error.

use std::cell::RefCell;

use ndrs_core::NdError;

pub type NdStatus = i32;

pub const ND_OK: NdStatus = 0;
pub const ND_E_INVALID_ARG: NdStatus = 1;
pub const ND_E_INVALID_DTYPE: NdStatus = 2;
pub const ND_E_INVALID_SHAPE: NdStatus = 3;
pub const ND_E_INVALID_STRIDES: NdStatus = 4;
pub const ND_E_INVALID_ALIGNMENT: NdStatus = 5;
pub const ND_E_STALE_HANDLE: NdStatus = 6;
pub const ND_E_OOM: NdStatus = 7;
pub const ND_E_NOT_CONTIGUOUS: NdStatus = 8;
pub const ND_E_NOT_IMPLEMENTED: NdStatus = 9;
pub const ND_E_INTERNAL: NdStatus = 255;

/// Map an engine error onto its ABI status code.
pub fn status_of(err: &NdError) -> NdStatus {
    match err {
        NdError::InvalidArg(_) => ND_E_INVALID_ARG,
        NdError::InvalidDtype(_) => ND_E_INVALID_DTYPE,
        NdError::InvalidShape(_) => ND_E_INVALID_SHAPE,
        NdError::InvalidStrides(_) => ND_E_INVALID_STRIDES,
        NdError::InvalidAlignment(_) => ND_E_INVALID_ALIGNMENT,
        NdError::StaleHandle => ND_E_STALE_HANDLE,
        NdError::Oom(_) => ND_E_OOM,
        NdError::NotContiguous(_) => ND_E_NOT_CONTIGUOUS,
        NdError::NotImplemented(_) => ND_E_NOT_IMPLEMENTED,
        NdError::Internal(_) => ND_E_INTERNAL,
    }
}

thread_local! {
    static LAST_ERROR: RefCell<(NdStatus, String)> = const { RefCell::new((ND_OK, String::new())) };
}

/// Reset after a successful entry point.
pub fn clear() {
    LAST_ERROR.with(|slot| {
        let mut slot = slot.borrow_mut();
        slot.0 = ND_OK;
        slot.1.clear();
    });
}

/// Record a failure for the calling thread.
pub fn record(code: NdStatus, message: impl Into<String>) {
    LAST_ERROR.with(|slot| {
        let mut slot = slot.borrow_mut();
        slot.0 = code;
        slot.1 = message.into();
    });
}

pub fn last_code() -> NdStatus {
    LAST_ERROR.with(|slot| slot.borrow().0)
}

/// Run `f` with the recorded message without copying it out.
pub fn with_message<R>(f: impl FnOnce(&str) -> R) -> R {
    LAST_ERROR.with(|slot| f(&slot.borrow().1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_clear() {
        record(ND_E_INVALID_DTYPE, "bad dtype");
        assert_eq!(last_code(), ND_E_INVALID_DTYPE);
        with_message(|m| assert_eq!(m, "bad dtype"));

        clear();
        assert_eq!(last_code(), ND_OK);
        with_message(|m| assert!(m.is_empty()));
    }

    #[test]
    fn test_station_is_thread_local() {
        record(ND_E_OOM, "here");
        std::thread::spawn(|| {
            assert_eq!(last_code(), ND_OK);
            record(ND_E_STALE_HANDLE, "there");
        })
        .join()
        .unwrap();
        assert_eq!(last_code(), ND_E_OOM);
    }

    #[test]
    fn test_status_mapping_covers_all_variants() {
        assert_eq!(status_of(&NdError::StaleHandle), ND_E_STALE_HANDLE);
        assert_eq!(status_of(&NdError::Oom("x".into())), ND_E_OOM);
        assert_eq!(
            status_of(&NdError::NotContiguous("x".into())),
            ND_E_NOT_CONTIGUOUS
        );
        assert_eq!(status_of(&NdError::Internal("x".into())), ND_E_INTERNAL);
    }
}
