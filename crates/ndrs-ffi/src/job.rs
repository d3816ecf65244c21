//! Asynchronous compute jobs
//!
//! A fixed worker pool runs cancellable kernels (matmul is the only
//! submit entry in the ABI). Job ids are globally monotonic and never
//! reused. Submission captures strong references to the input arrays, so
//! a job never touches the handle table mid-flight; only `take_result`
//! publishes anything back into it.
//!
//! State machine: Pending -> Running -> {Succeeded, Failed, Cancelled},
//! plus Pending -> Cancelled directly and Succeeded -> Consumed on
//! take_result. Cancellation is cooperative: the kernel checks the flag
//! at block boundaries, and a job that finishes before observing the
//! flag stays Succeeded (cancel loses the race).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ndrs_core::{NdError, Result};
use ndrs_cpu::{matmul_cancellable, NdArray};
use ndrs_pool::TaskPool;
use once_cell::sync::Lazy;

use crate::registry;
use crate::station::{self, NdStatus};

pub const JOB_STATE_PENDING: u32 = 0;
pub const JOB_STATE_RUNNING: u32 = 1;
pub const JOB_STATE_SUCCEEDED: u32 = 2;
pub const JOB_STATE_FAILED: u32 = 3;
pub const JOB_STATE_CANCELLED: u32 = 4;
pub const JOB_STATE_CONSUMED: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Consumed,
}

impl JobState {
    fn as_u32(self) -> u32 {
        match self {
            JobState::Pending => JOB_STATE_PENDING,
            JobState::Running => JOB_STATE_RUNNING,
            JobState::Succeeded => JOB_STATE_SUCCEEDED,
            JobState::Failed => JOB_STATE_FAILED,
            JobState::Cancelled => JOB_STATE_CANCELLED,
            JobState::Consumed => JOB_STATE_CONSUMED,
        }
    }
}

struct Job {
    state: JobState,
    cancel: Arc<AtomicBool>,
    result: Option<NdArray>,
    failure: NdStatus,
}

static JOBS: Lazy<Mutex<HashMap<u64, Job>>> = Lazy::new(|| Mutex::new(HashMap::new()));
static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);
static POOL: Lazy<TaskPool> = Lazy::new(TaskPool::default);

/// Queue a matmul of two handles. Both inputs are retained (by strong
/// reference) until the job reaches a terminal state.
pub fn submit_matmul(a_handle: u64, b_handle: u64) -> Result<u64> {
    let a = registry::resolve(a_handle)?;
    let b = registry::resolve(b_handle)?;

    let id = NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed);
    let cancel = Arc::new(AtomicBool::new(false));
    JOBS.lock().unwrap().insert(
        id,
        Job {
            state: JobState::Pending,
            cancel: Arc::clone(&cancel),
            result: None,
            failure: station::ND_OK,
        },
    );

    POOL.submit(move || run_job(id, a, b, cancel));
    Ok(id)
}

fn run_job(id: u64, a: Arc<NdArray>, b: Arc<NdArray>, cancel: Arc<AtomicBool>) {
    {
        let mut jobs = JOBS.lock().unwrap();
        match jobs.get_mut(&id) {
            // Cancelled while still queued; the inputs drop here.
            None => return,
            Some(job) if job.state == JobState::Cancelled => return,
            Some(job) => job.state = JobState::Running,
        }
    }

    let outcome = matmul_cancellable(&a, &b, Some(cancel.as_ref()));

    let mut jobs = JOBS.lock().unwrap();
    let Some(job) = jobs.get_mut(&id) else {
        return;
    };
    match outcome {
        Ok(Some(result)) => {
            job.result = Some(result);
            job.state = JobState::Succeeded;
        }
        Ok(None) => job.state = JobState::Cancelled,
        Err(err) => {
            job.failure = station::status_of(&err);
            job.state = JobState::Failed;
        }
    }
}

/// Non-blocking state probe. The second value carries the kernel's
/// status for Failed jobs and ND_OK otherwise.
pub fn poll(id: u64) -> Result<(u32, NdStatus)> {
    let jobs = JOBS.lock().unwrap();
    let job = jobs
        .get(&id)
        .ok_or_else(|| NdError::InvalidArg(format!("unknown job id {id}")))?;
    let status = match job.state {
        JobState::Failed => job.failure,
        _ => station::ND_OK,
    };
    Ok((job.state.as_u32(), status))
}

/// Transfer a Succeeded job's result to the caller as a fresh handle.
/// Any other state, including a second take, is INVALID_ARG.
pub fn take_result(id: u64) -> Result<u64> {
    let result = {
        let mut jobs = JOBS.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| NdError::InvalidArg(format!("unknown job id {id}")))?;
        if job.state != JobState::Succeeded {
            return Err(NdError::InvalidArg(format!(
                "job {id} has no unconsumed result"
            )));
        }
        let result = job
            .result
            .take()
            .ok_or_else(|| NdError::Internal(format!("succeeded job {id} lost its result")))?;
        job.state = JobState::Consumed;
        result
    };
    registry::insert(result)
}

/// Set the cancel flag; a Pending job cancels immediately, a Running one
/// at its next block boundary. Idempotent in every state.
pub fn cancel(id: u64) -> Result<()> {
    let mut jobs = JOBS.lock().unwrap();
    let job = jobs
        .get_mut(&id)
        .ok_or_else(|| NdError::InvalidArg(format!("unknown job id {id}")))?;
    job.cancel.store(true, Ordering::Relaxed);
    if job.state == JobState::Pending {
        job.state = JobState::Cancelled;
    }
    Ok(())
}
