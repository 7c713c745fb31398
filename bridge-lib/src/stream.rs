//! Channel-to-iterator bridge.
//!
//! A forwarding task drains a typed native channel, converts each item, and
//! pushes it into a bounded queue that the embedding side pulls from with
//! blocking reads. The queue bound gives backpressure: when the consumer
//! stops reading, the forwarding task stops pulling from the source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, trace};
use tokio::runtime::Handle as RuntimeHandle;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// The source is still open.
    Open,
    /// The source has closed; buffered items remain.
    Draining,
    /// Everything has been consumed, or the iterator was closed.
    Closed,
}

/// Closes a [`ChannelIterator`] from any thread, including while another
/// thread is blocked reading from it.
#[derive(Clone)]
pub struct CloseHandle(Arc<watch::Sender<bool>>);

impl CloseHandle {
    pub fn close(&self) {
        self.0.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.0.borrow()
    }
}

pub struct ChannelIterator<T> {
    items: mpsc::Receiver<Result<T>>,
    peeked: Option<Result<T>>,
    source_done: Arc<AtomicBool>,
    // Set once the queue has been drained to its end.
    ended: bool,
    closer: CloseHandle,
    signal: watch::Receiver<bool>,
    runtime: RuntimeHandle,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> ChannelIterator<T> {
    /// Starts forwarding `source` on `runtime` through a queue of `buffer`
    /// items, applying `convert` to each item on the forwarding task.
    pub fn spawn<S, F>(
        runtime: &RuntimeHandle,
        source: mpsc::Receiver<S>,
        buffer: usize,
        convert: F,
    ) -> Self
    where
        S: Send + 'static,
        F: FnMut(S) -> Result<T> + Send + 'static,
    {
        let (sink, items) = mpsc::channel(buffer.max(1));
        let (closer, signal) = watch::channel(false);
        let source_done = Arc::new(AtomicBool::new(false));
        let task = runtime.spawn(forward(
            source,
            sink,
            convert,
            signal.clone(),
            Arc::clone(&source_done),
        ));
        ChannelIterator {
            items,
            peeked: None,
            source_done,
            ended: false,
            closer: CloseHandle(Arc::new(closer)),
            signal,
            runtime: runtime.clone(),
            task,
        }
    }
}

impl<T> ChannelIterator<T> {
    /// Blocks until an item is available or the stream has ended.
    ///
    /// Must not be called from within an async runtime.
    pub fn has_next(&mut self) -> bool {
        if self.peeked.is_none() || self.is_closed() {
            self.peeked = self.pull();
        }
        self.peeked.is_some()
    }

    /// Blocks for the next item; `Error::EndOfStream` once the stream is exhausted.
    pub fn next_item(&mut self) -> Result<T> {
        self.pull().unwrap_or(Err(Error::EndOfStream))
    }

    pub fn state(&mut self) -> StreamState {
        if self.is_closed() {
            return StreamState::Closed;
        }
        if !self.source_done.load(Ordering::SeqCst) {
            return StreamState::Open;
        }
        if self.peeked.is_some() {
            return StreamState::Draining;
        }
        match self.items.try_recv() {
            Ok(item) => {
                self.peeked = Some(item);
                StreamState::Draining
            }
            Err(TryRecvError::Empty) => StreamState::Draining,
            Err(TryRecvError::Disconnected) => {
                self.ended = true;
                StreamState::Closed
            }
        }
    }

    /// Whether the forwarding task is still running.
    pub fn is_forwarding(&self) -> bool {
        !self.task.is_finished()
    }

    /// A handle that closes this iterator without borrowing it.
    pub fn close_handle(&self) -> CloseHandle {
        self.closer.clone()
    }

    /// Stops forwarding and discards anything buffered. Further reads report
    /// end of stream.
    pub fn close(&mut self) {
        self.closer.close();
        self.discard();
    }

    fn is_closed(&self) -> bool {
        self.ended || self.closer.is_closed()
    }

    fn discard(&mut self) {
        self.ended = true;
        self.peeked = None;
        self.items.close();
    }

    fn pull(&mut self) -> Option<Result<T>> {
        if self.is_closed() {
            self.discard();
            return None;
        }
        if let Some(item) = self.peeked.take() {
            return Some(item);
        }
        let mut signal = self.signal.clone();
        let items = &mut self.items;
        let item = self.runtime.block_on(async {
            tokio::select! {
                biased;
                _ = closed(&mut signal) => None,
                item = items.recv() => item,
            }
        });
        if item.is_none() {
            self.discard();
        }
        item
    }
}

impl<T> Iterator for ChannelIterator<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pull()
    }
}

impl<T> Drop for ChannelIterator<T> {
    fn drop(&mut self) {
        self.closer.close();
    }
}

/// Resolves once the iterator is closed or its close handle is gone.
async fn closed(signal: &mut watch::Receiver<bool>) {
    while !*signal.borrow_and_update() {
        if signal.changed().await.is_err() {
            return;
        }
    }
}

async fn forward<S, T, F>(
    mut source: mpsc::Receiver<S>,
    sink: mpsc::Sender<Result<T>>,
    mut convert: F,
    mut canceled: watch::Receiver<bool>,
    source_done: Arc<AtomicBool>,
) where
    F: FnMut(S) -> Result<T>,
{
    let mut forwarded = 0usize;
    loop {
        let item = tokio::select! {
            biased;
            _ = closed(&mut canceled) => {
                debug!("forwarding canceled after {} items", forwarded);
                return;
            }
            item = source.recv() => item,
        };
        let Some(item) = item else {
            break;
        };
        let converted = convert(item);
        let failed = converted.is_err();
        tokio::select! {
            biased;
            _ = closed(&mut canceled) => {
                debug!("forwarding canceled after {} items", forwarded);
                return;
            }
            sent = sink.send(converted) => {
                if sent.is_err() {
                    return;
                }
            }
        }
        forwarded += 1;
        if failed {
            debug!("conversion failed, ending stream after {} items", forwarded);
            break;
        }
    }
    trace!("source closed after {} items", forwarded);
    source_done.store(true, Ordering::SeqCst);
}
