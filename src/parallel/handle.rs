//! Result handles for work submitted to the pool
//!
//! A [`TaskHandle`] is the receiving end of a one-shot channel plus a shared
//! [`TaskState`] that carries the cancellation flag seen by the running task.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ChunkError, TaskError};

/// Flags shared between a handle, the pool and the running task
#[derive(Debug, Default)]
pub struct TaskState {
    cancelled: AtomicBool,
    done: AtomicBool,
}

impl TaskState {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
    }
}

/// Cooperative cancellation view handed to running work
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<TaskState>);

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// What a finished task sends back
#[derive(Debug)]
pub(crate) enum Outcome<T> {
    Completed(T),
    Failed(ChunkError),
    Panicked(String),
    Cancelled,
}

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Wrap `task` into a pool job and the handle that observes it.
///
/// The job never unwinds: panics become [`Outcome::Panicked`], and a task
/// cancelled before it starts is never run.
pub(crate) fn package<T, F>(task: F) -> (Job, TaskHandle<T>, Arc<TaskState>)
where
    T: Send + 'static,
    F: FnOnce(&CancelToken) -> Result<T, ChunkError> + Send + 'static,
{
    let (tx, rx): (Sender<Outcome<T>>, Receiver<Outcome<T>>) = bounded(1);
    let state = Arc::new(TaskState::default());
    let token = CancelToken(Arc::clone(&state));

    let job_state = Arc::clone(&state);
    let job: Job = Box::new(move || {
        let outcome = if job_state.is_cancelled() {
            Outcome::Cancelled
        } else {
            match panic::catch_unwind(AssertUnwindSafe(|| task(&token))) {
                Ok(Ok(value)) => Outcome::Completed(value),
                Ok(Err(err)) => Outcome::Failed(err),
                Err(payload) => Outcome::Panicked(panic_message(payload.as_ref())),
            }
        };
        job_state.mark_done();
        // The handle may already be gone; nobody is waiting then.
        let _ = tx.send(outcome);
    });

    let handle = TaskHandle {
        receiver: rx,
        state: Arc::clone(&state),
        consumed: false,
    };
    (job, handle, state)
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Asynchronous result of one submitted task
#[derive(Debug)]
pub struct TaskHandle<T> {
    receiver: Receiver<Outcome<T>>,
    state: Arc<TaskState>,
    consumed: bool,
}

impl<T> TaskHandle<T> {
    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// Request cancellation. Best effort: a task that already finished keeps
    /// its result, a running task stops at its next cancellation check.
    /// Returns false when the task had already completed.
    pub fn cancel(&self) -> bool {
        if self.state.is_done() {
            return false;
        }
        self.state.cancel();
        true
    }

    /// Block for at most `timeout` waiting for the task's result
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<T, TaskError> {
        if self.consumed {
            return Err(TaskError::Disconnected);
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(outcome) => self.resolve(outcome),
            Err(RecvTimeoutError::Timeout) => Err(TaskError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(self.disconnected()),
        }
    }

    pub(crate) fn receiver(&self) -> &Receiver<Outcome<T>> {
        &self.receiver
    }

    pub(crate) fn is_consumed(&self) -> bool {
        self.consumed
    }

    pub(crate) fn resolve(&mut self, outcome: Outcome<T>) -> Result<T, TaskError> {
        self.consumed = true;
        match outcome {
            Outcome::Completed(value) => Ok(value),
            Outcome::Failed(err) => Err(TaskError::Failed(err)),
            Outcome::Panicked(msg) => Err(TaskError::Panicked(msg)),
            Outcome::Cancelled => Err(TaskError::Cancelled),
        }
    }

    /// A job dropped without running (forced shutdown) surfaces as cancelled
    pub(crate) fn disconnected(&mut self) -> TaskError {
        self.consumed = true;
        if self.state.is_cancelled() {
            TaskError::Cancelled
        } else {
            TaskError::Disconnected
        }
    }
}
