//! Fan-out of completed batches to report subscribers
//!
//! # Delivery policy
//!
//! - Publishing never blocks the worker.
//! - A batch published while nobody is subscribed is dropped.
//! - Each subscriber has its own backlog of `capacity` reports (rounded up to
//!   a power of two). A subscriber that falls further behind loses its oldest
//!   reports first; it learns how many through [`ReportStream::missed`] and
//!   resumes with the oldest report still retained.
//! - There is no replay: a new subscriber sees only batches published after
//!   it subscribed.

use crate::stats::StatsRecorder;
use eventbatch_core::Batch;
use futures::Stream;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Broadcasts each completed batch to every current subscriber
#[derive(Debug)]
pub(crate) struct ReportPublisher {
    tx: broadcast::Sender<Batch>,
    finished: CancellationToken,
    stats: Arc<StatsRecorder>,
}

impl ReportPublisher {
    /// Create a publisher retaining up to `capacity` reports per subscriber
    pub(crate) fn new(capacity: usize, stats: Arc<StatsRecorder>) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            finished: CancellationToken::new(),
            stats,
        }
    }

    /// Publish a batch, returning how many subscribers will see it
    pub(crate) fn publish(&self, batch: Batch) -> usize {
        let sequence = batch.sequence();
        match self.tx.send(batch) {
            Ok(receivers) => {
                trace!("Published batch #{} to {} subscribers", sequence, receivers);
                receivers
            }
            Err(_) => {
                trace!("Dropped batch #{}: no subscribers", sequence);
                self.stats.record_unobserved_report();
                0
            }
        }
    }

    /// Subscribe to batches published from now on
    pub(crate) fn subscribe(&self) -> ReportStream {
        ReportStream {
            rx: self.tx.subscribe(),
            finished: self.finished.clone(),
            missed: 0,
        }
    }

    /// Number of live subscriptions
    pub(crate) fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Mark the report stream complete; subscribers end after their backlog
    pub(crate) fn finish(&self) {
        self.finished.cancel();
    }
}

/// One subscriber's view of the report stream
#[derive(Debug)]
pub struct ReportStream {
    rx: broadcast::Receiver<Batch>,
    finished: CancellationToken,
    missed: u64,
}

impl ReportStream {
    /// Wait for the next published batch
    ///
    /// Returns `None` once the batcher has closed and every report retained
    /// for this subscriber has been delivered.
    pub async fn recv(&mut self) -> Option<Batch> {
        loop {
            let result = tokio::select! {
                biased;
                result = self.rx.recv() => result,
                _ = self.finished.cancelled() => match self.rx.try_recv() {
                    Ok(batch) => Ok(batch),
                    Err(TryRecvError::Lagged(skipped)) => Err(RecvError::Lagged(skipped)),
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
                },
            };

            match result {
                Ok(batch) => return Some(batch),
                Err(RecvError::Lagged(skipped)) => {
                    self.missed += skipped;
                    warn!("Report subscriber lagged, {} batches dropped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Reports dropped because this subscriber fell behind
    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// Convert into a [`Stream`] of batches
    pub fn into_stream(mut self) -> impl Stream<Item = Batch> + Send + Unpin {
        Box::pin(async_stream::stream! {
            while let Some(batch) = self.recv().await {
                yield batch;
            }
        })
    }
}
