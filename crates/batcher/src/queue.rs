//! Event queue between producers and the batch worker
//!
//! Producers hold cloneable [`EventQueue`] handles; the worker owns the single
//! [`QueueReceiver`]. Closing is two-sided: the shared flag makes new
//! submissions fail fast, and closing the receiver wakes any producer still
//! waiting for capacity while leaving already-queued items drainable.

use crate::stats::StatsRecorder;
use eventbatch_core::{Error, Event, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

/// Reply channel for a caller-requested flush
pub(crate) type FlushReply = oneshot::Sender<Result<usize>>;

/// Items travelling through the queue, in submission order
#[derive(Debug)]
pub(crate) enum Envelope {
    Event(Event),
    Flush(FlushReply),
}

/// Create a queue holding up to `capacity` items
pub(crate) fn channel(capacity: usize, stats: Arc<StatsRecorder>) -> (EventQueue, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let closed = Arc::new(AtomicBool::new(false));
    let queue = EventQueue {
        tx,
        closed: Arc::clone(&closed),
        stats,
    };
    (queue, QueueReceiver { rx, closed })
}

/// Producer side of the event queue
///
/// Cheap to clone; hand one to every producer. Events submitted through one
/// handle from one task reach the uploader in submission order.
#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: mpsc::Sender<Envelope>,
    closed: Arc<AtomicBool>,
    stats: Arc<StatsRecorder>,
}

impl EventQueue {
    /// Enqueue one event, waiting for capacity if the queue is full
    ///
    /// Fails with [`Error::Closed`] once shutdown has begun. An event for which
    /// this returns `Ok` is guaranteed to be flushed or reported as lost.
    pub async fn submit(&self, event: Event) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let id = event.id;
        self.tx
            .send(Envelope::Event(event))
            .await
            .map_err(|_| Error::Closed)?;
        self.stats.record_accepted();
        trace!("Queued event {}", id);
        Ok(())
    }

    /// Enqueue one event without waiting
    ///
    /// Fails with [`Error::QueueFull`] when at capacity and [`Error::Closed`]
    /// once shutdown has begun.
    pub fn try_submit(&self, event: Event) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let id = event.id;
        self.tx
            .try_send(Envelope::Event(event))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => Error::QueueFull,
                mpsc::error::TrySendError::Closed(_) => Error::Closed,
            })?;
        self.stats.record_accepted();
        trace!("Queued event {}", id);
        Ok(())
    }

    /// Whether submissions are still accepted
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }

    /// Enqueue a flush request behind everything submitted so far
    pub(crate) async fn request_flush(&self, reply: FlushReply) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        self.tx
            .send(Envelope::Flush(reply))
            .await
            .map_err(|_| Error::Closed)
    }

    /// Refuse further submissions; queued items stay available to the worker
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Worker side of the event queue
#[derive(Debug)]
pub(crate) struct QueueReceiver {
    rx: mpsc::Receiver<Envelope>,
    closed: Arc<AtomicBool>,
}

impl QueueReceiver {
    /// Next queued item; `None` once closed and empty, or once every producer is gone
    pub(crate) async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Close both sides, failing waiting producers while keeping queued items
    pub(crate) fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.rx.close();
    }
}
