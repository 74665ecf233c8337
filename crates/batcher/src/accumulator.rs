//! Size/time flush decisions on a single dedicated worker
//!
//! The accumulator owns the buffer and the flush deadline outright; nothing
//! else touches them, so neither needs a lock. It waits on three things at
//! once: the next queued item, the flush deadline (armed only while the
//! buffer is non-empty), and the shutdown signal. Whichever is ready first
//! wins. Flushes run outside that wait, so an upload in progress is never
//! interrupted by shutdown.

use crate::publisher::ReportPublisher;
use crate::queue::{Envelope, QueueReceiver};
use crate::stats::{FlushTrigger, StatsRecorder};
use crate::uploader::Uploader;
use eventbatch_core::{Batch, BatcherConfig, Error, Event, Result};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Observable state of the accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    /// Buffer empty, no deadline armed
    Idle,
    /// Buffer non-empty, deadline running since the first event of the window
    Accumulating,
    /// Uploading and publishing a batch
    Flushing,
    /// Final drain finished; terminal
    Closed,
}

pub(crate) struct BatchAccumulator {
    batch_size: usize,
    max_delay: Duration,
    buffer: Vec<Event>,
    deadline: Option<Instant>,
    next_sequence: u64,
    queue: QueueReceiver,
    uploader: Arc<dyn Uploader>,
    publisher: Arc<ReportPublisher>,
    stats: Arc<StatsRecorder>,
    state: watch::Sender<AccumulatorState>,
    shutdown: CancellationToken,
}

impl BatchAccumulator {
    pub(crate) fn new(
        config: &BatcherConfig,
        queue: QueueReceiver,
        uploader: Arc<dyn Uploader>,
        publisher: Arc<ReportPublisher>,
        stats: Arc<StatsRecorder>,
        shutdown: CancellationToken,
    ) -> (Self, watch::Receiver<AccumulatorState>) {
        let (state, state_rx) = watch::channel(AccumulatorState::Idle);
        let accumulator = Self {
            batch_size: config.batch_size.max(1),
            max_delay: config.max_delay(),
            buffer: Vec::new(),
            deadline: None,
            next_sequence: 1,
            queue,
            uploader,
            publisher,
            stats,
            state,
            shutdown,
        };
        (accumulator, state_rx)
    }

    /// Run until shutdown is signalled or every producer handle is dropped,
    /// then drain
    ///
    /// Steady-state upload failures are logged and the loop carries on from
    /// `Idle`. Only failures during the final drain are returned.
    pub(crate) async fn run(mut self) -> Result<()> {
        debug!(
            "Batch accumulator started (batch_size: {}, max_delay: {:?})",
            self.batch_size, self.max_delay
        );

        loop {
            let deadline = self.deadline;

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("Shutdown requested, draining event queue");
                    break;
                }
                envelope = self.queue.recv() => match envelope {
                    Some(Envelope::Event(event)) => {
                        if let Err(e) = self.accept(event).await {
                            error!("Size-triggered flush failed: {e}");
                        }
                    }
                    Some(Envelope::Flush(reply)) => {
                        let result = self.flush(FlushTrigger::Manual).await;
                        if let Err(e) = &result {
                            warn!("Requested flush failed: {e}");
                        }
                        if reply.send(result).is_err() {
                            trace!("Flush requester went away before the reply");
                        }
                    }
                    None => {
                        debug!("All producer handles dropped, draining event queue");
                        break;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Err(e) = self.flush(FlushTrigger::Deadline).await {
                        error!("Deadline-triggered flush failed: {e}");
                    }
                }
            }
        }

        self.drain().await
    }

    /// Buffer one event, arming the deadline if it opens a new window
    async fn accept(&mut self, event: Event) -> Result<usize> {
        if self.buffer.is_empty() {
            self.deadline = Some(Instant::now() + self.max_delay);
            self.set_state(AccumulatorState::Accumulating);
        }
        trace!(
            "Buffered event {} ({}/{})",
            event.id,
            self.buffer.len() + 1,
            self.batch_size
        );
        self.buffer.push(event);

        if self.buffer.len() >= self.batch_size {
            return self.flush(FlushTrigger::Size).await;
        }
        Ok(0)
    }

    /// Snapshot and clear the buffer, upload it, then publish it
    ///
    /// A no-op returning `Ok(0)` when the buffer is empty. A failed upload
    /// loses the batch: nothing is re-queued and nothing is published.
    async fn flush(&mut self, trigger: FlushTrigger) -> Result<usize> {
        self.deadline = None;
        let Some(batch) = Batch::new(self.next_sequence, std::mem::take(&mut self.buffer)) else {
            return Ok(0);
        };
        self.next_sequence += 1;
        let len = batch.len();

        self.set_state(AccumulatorState::Flushing);
        debug!(
            "Flushing batch #{} of {} events ({} trigger)",
            batch.sequence(),
            len,
            trigger
        );

        let outcome = AssertUnwindSafe(self.uploader.upload(&batch))
            .catch_unwind()
            .await;
        self.set_state(AccumulatorState::Idle);

        match outcome {
            Ok(Ok(())) => {
                self.stats.record_flush(trigger, len);
                self.publisher.publish(batch);
                Ok(len)
            }
            Ok(Err(e)) => {
                self.stats.record_upload_failure(len);
                Err(Error::upload_failure(len, e.to_string()))
            }
            Err(panic) => {
                self.stats.record_upload_failure(len);
                Err(Error::upload_failure(len, panic_message(panic.as_ref())))
            }
        }
    }

    /// Take everything still queued, flush it, and finish the report stream
    async fn drain(mut self) -> Result<()> {
        self.queue.close();

        let mut failures = Vec::new();
        while let Some(envelope) = self.queue.recv().await {
            match envelope {
                Envelope::Event(event) => {
                    if let Err(e) = self.accept(event).await {
                        failures.push(e.to_string());
                    }
                }
                Envelope::Flush(reply) => {
                    let _ = reply.send(self.flush(FlushTrigger::Manual).await);
                }
            }
        }
        if let Err(e) = self.flush(FlushTrigger::Shutdown).await {
            failures.push(e.to_string());
        }

        self.set_state(AccumulatorState::Closed);
        self.publisher.finish();

        if failures.is_empty() {
            debug!("Batch accumulator drained and stopped");
            Ok(())
        } else {
            error!("{} flushes failed during the final drain", failures.len());
            Err(Error::shutdown_drain(failures.join("; ")))
        }
    }

    fn set_state(&self, state: AccumulatorState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            trace!("Accumulator state {:?} -> {:?}", previous, state);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("uploader panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("uploader panicked: {msg}")
    } else {
        "uploader panicked".to_string()
    }
}
