//! The event batcher facade
//!
//! Wires the queue, accumulator, publisher and lifecycle controller together
//! and exposes the producer-facing API.

use crate::accumulator::{AccumulatorState, BatchAccumulator};
use crate::lifecycle::LifecycleController;
use crate::publisher::{ReportPublisher, ReportStream};
use crate::queue::{self, EventQueue};
use crate::stats::{BatcherStats, StatsRecorder};
use crate::uploader::Uploader;
use eventbatch_core::{BatcherConfig, Error, Event, Result, ResultExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Collects events from many producers and flushes them in batches
///
/// A batch is flushed when `batch_size` events are buffered or when
/// `max_delay` has elapsed since the first event of the current window,
/// whichever comes first. Each flushed batch goes to the uploader and then to
/// every report subscriber.
///
/// # Example
///
/// ```no_run
/// use eventbatch_batcher::{EventBatcher, LoggingUploader};
/// use eventbatch_core::Event;
/// use std::time::Duration;
///
/// # async fn example() -> eventbatch_core::Result<()> {
/// let batcher = EventBatcher::with_limits(3, Duration::from_millis(10), LoggingUploader)?;
/// let mut reports = batcher.subscribe();
///
/// for id in 1..=3 {
///     batcher.submit(Event::new(id, "payload")).await?;
/// }
/// let batch = reports.recv().await;
/// assert_eq!(batch.map(|b| b.ids()), Some(vec![1, 2, 3]));
///
/// batcher.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct EventBatcher {
    config: BatcherConfig,
    queue: EventQueue,
    publisher: Arc<ReportPublisher>,
    stats: Arc<StatsRecorder>,
    state: watch::Receiver<AccumulatorState>,
    lifecycle: LifecycleController,
}

impl EventBatcher {
    /// Validate `config` and start the worker on the current tokio runtime
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the config fails validation, or an
    /// invalid input error when called outside a tokio runtime.
    pub fn new(config: BatcherConfig, uploader: impl Uploader + 'static) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .context("EventBatcher must be created inside a tokio runtime")?;

        let stats = Arc::new(StatsRecorder::default());
        let (queue, receiver) = queue::channel(config.queue_capacity, Arc::clone(&stats));
        let publisher = Arc::new(ReportPublisher::new(
            config.report_capacity,
            Arc::clone(&stats),
        ));
        let shutdown = CancellationToken::new();
        let (accumulator, state) = BatchAccumulator::new(
            &config,
            receiver,
            Arc::new(uploader),
            Arc::clone(&publisher),
            Arc::clone(&stats),
            shutdown.clone(),
        );

        let worker = runtime.spawn(accumulator.run());
        let lifecycle = LifecycleController::new(worker, shutdown, config.drain_timeout());
        debug!(
            "Event batcher started (batch_size: {}, max_delay: {:?})",
            config.batch_size,
            config.max_delay()
        );

        Ok(Self {
            config,
            queue,
            publisher,
            stats,
            state,
            lifecycle,
        })
    }

    /// Start a batcher with the given flush limits and default settings otherwise
    pub fn with_limits(
        batch_size: usize,
        max_delay: Duration,
        uploader: impl Uploader + 'static,
    ) -> Result<Self> {
        if max_delay.is_zero() {
            return Err(Error::invalid_input("max_delay must be greater than zero"));
        }
        let config = BatcherConfig::builder()
            .batch_size(batch_size)
            .max_delay(max_delay)
            .build();
        Self::new(config, uploader)
    }

    /// Submit one event, waiting for queue capacity if necessary
    ///
    /// Fails with [`Error::Closed`] once [`close`](Self::close) has begun.
    pub async fn submit(&self, event: Event) -> Result<()> {
        self.queue.submit(event).await
    }

    /// Submit one event without waiting
    pub fn try_submit(&self, event: Event) -> Result<()> {
        self.queue.try_submit(event)
    }

    /// A cloneable producer handle feeding this batcher
    pub fn submitter(&self) -> EventQueue {
        self.queue.clone()
    }

    /// Flush whatever is buffered now, after everything already submitted
    ///
    /// Returns the number of events flushed, `0` if there was nothing to
    /// flush. An uploader failure is returned to the caller.
    pub async fn flush(&self) -> Result<usize> {
        let (reply, response) = oneshot::channel();
        self.queue.request_flush(reply).await?;
        response.await.map_err(|_| Error::Closed)?
    }

    /// Subscribe to batches flushed from now on
    ///
    /// See [`ReportStream`] for the backlog and drop policy.
    pub fn subscribe(&self) -> ReportStream {
        self.publisher.subscribe()
    }

    /// Number of live report subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.publisher.subscriber_count()
    }

    /// Snapshot of the batcher's counters
    pub fn stats(&self) -> BatcherStats {
        self.stats.snapshot()
    }

    /// Current accumulator state
    pub fn state(&self) -> AccumulatorState {
        *self.state.borrow()
    }

    /// Whether shutdown has begun
    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_shutting_down() || self.queue.is_closed()
    }

    /// The configuration this batcher was started with
    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    /// Stop accepting events, flush everything accepted so far, and stop
    ///
    /// Waits at most `drain_timeout` for the drain. Safe to call repeatedly
    /// and from several tasks at once; every call reports the same outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownDrainFailure`] if a final flush failed or the
    /// drain did not finish within the grace period.
    pub async fn close(&self) -> Result<()> {
        self.lifecycle.close(&self.queue).await
    }
}
