//! Asynchronous completion adapter.
//!
//! A [`Callback`] pairs a success and a failure closure. Exactly one of them
//! runs, exactly once, on whichever thread completes the operation.

use std::sync::Mutex;

use log::debug;
use tokio::runtime::Handle as RuntimeHandle;
use tokio::task::JoinHandle;

use crate::error::{Error, Result, VError};
use crate::mutex_lock;

type OnSuccess<T> = Box<dyn FnOnce(T) + Send>;
type OnFailure = Box<dyn FnOnce(Error) + Send>;

pub struct Callback<T> {
    pending: Mutex<Option<(OnSuccess<T>, OnFailure)>>,
}

impl<T> Callback<T> {
    pub fn new<S, F>(on_success: S, on_failure: F) -> Self
    where
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(Error) + Send + 'static,
    {
        Callback {
            pending: Mutex::new(Some((Box::new(on_success), Box::new(on_failure)))),
        }
    }

    /// Delivers `result`. Returns false if the callback had already fired.
    pub fn complete(&self, result: Result<T>) -> bool {
        let pending = mutex_lock!(self.pending).take();
        match pending {
            Some((on_success, on_failure)) => {
                match result {
                    Ok(value) => on_success(value),
                    Err(err) => on_failure(err),
                }
                true
            }
            None => {
                debug!("callback completed more than once, ignoring");
                false
            }
        }
    }

    pub fn succeed(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    pub fn fail(&self, err: Error) -> bool {
        self.complete(Err(err))
    }

    pub fn is_completed(&self) -> bool {
        mutex_lock!(self.pending).is_none()
    }
}

impl<T> Drop for Callback<T> {
    fn drop(&mut self) {
        let pending = self
            .pending
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some((_, on_failure)) = pending {
            on_failure(VError::canceled().into());
        }
    }
}

/// Runs `work` on the blocking pool of `runtime` and completes `callback`
/// with its result. The caller does not wait.
pub fn spawn_completion<T, W>(
    runtime: &RuntimeHandle,
    callback: Callback<T>,
    work: W,
) -> JoinHandle<()>
where
    T: Send + 'static,
    W: FnOnce() -> Result<T> + Send + 'static,
{
    runtime.spawn_blocking(move || {
        callback.complete(work());
    })
}
