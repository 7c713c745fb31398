//! Cancellation and deadlines.
//!
//! A [`Context`] is the only cancellation primitive the bridge exposes.
//! Cancelling a context cancels every context derived from it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use log::debug;
use tokio::sync::Notify;

use crate::error::VError;
use crate::mutex_lock;

struct CancelState {
    root: bool,
    canceled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<CancelState>>>,
}

impl CancelState {
    fn new(root: bool) -> Arc<Self> {
        Arc::new(CancelState {
            root,
            canceled: AtomicBool::new(false),
            notify: Notify::new(),
            children: Mutex::new(Vec::new()),
        })
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        if self.canceled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();
        let children = std::mem::take(&mut *mutex_lock!(self.children));
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }

    fn adopt(&self, child: &Arc<CancelState>) {
        {
            let mut children = mutex_lock!(self.children);
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(child));
        }
        // A cancel racing with adopt may have drained the list before the push.
        if self.is_canceled() {
            child.cancel();
        }
    }
}

#[derive(Clone)]
pub struct Context {
    state: Arc<CancelState>,
    deadline: Option<Instant>,
}

impl Context {
    /// The root context: never canceled, no deadline.
    pub fn background() -> Self {
        Context {
            state: CancelState::new(true),
            deadline: None,
        }
    }

    pub fn with_cancel(&self) -> Context {
        self.derive(self.deadline)
    }

    pub fn with_timeout(&self, timeout: Duration) -> Context {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Context {
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        self.derive(Some(deadline))
    }

    fn derive(&self, deadline: Option<Instant>) -> Context {
        let state = CancelState::new(false);
        self.state.adopt(&state);
        Context { state, deadline }
    }

    /// Cancels this context and all contexts derived from it. The background
    /// context cannot be canceled.
    pub fn cancel(&self) {
        if self.state.root {
            debug!("ignoring cancel of the background context");
            return;
        }
        self.state.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_canceled(&self) -> bool {
        self.err().is_some()
    }

    /// Why the context is done, if it is.
    pub fn err(&self) -> Option<VError> {
        if self.state.is_canceled() {
            return Some(VError::canceled());
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(VError::timeout()),
            _ => None,
        }
    }

    /// Resolves once the context is canceled or its deadline passes.
    pub async fn done(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.state.is_canceled() {
                return;
            }
            match self.deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => return,
                    }
                }
                None => notified.await,
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
