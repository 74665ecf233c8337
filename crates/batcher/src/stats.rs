//! Counters describing what a batcher has done so far

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Why a flush happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The buffer reached `batch_size`
    Size,
    /// `max_delay` elapsed since the first event of the window
    Deadline,
    /// A caller asked for a flush
    Manual,
    /// The final drain during close
    Shutdown,
}

impl std::fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Size => "size",
            Self::Deadline => "deadline",
            Self::Manual => "manual",
            Self::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Point-in-time snapshot of batcher statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatcherStats {
    events_accepted: u64,
    batches_flushed: u64,
    events_flushed: u64,
    size_flushes: u64,
    deadline_flushes: u64,
    manual_flushes: u64,
    shutdown_flushes: u64,
    upload_failures: u64,
    events_lost: u64,
    reports_unobserved: u64,
}

impl BatcherStats {
    /// Events that entered the queue
    pub fn events_accepted(&self) -> u64 {
        self.events_accepted
    }

    /// Batches uploaded successfully and published
    pub fn batches_flushed(&self) -> u64 {
        self.batches_flushed
    }

    /// Events contained in successfully uploaded batches
    pub fn events_flushed(&self) -> u64 {
        self.events_flushed
    }

    /// Successful flushes caused by the given trigger
    pub fn flushes_by(&self, trigger: FlushTrigger) -> u64 {
        match trigger {
            FlushTrigger::Size => self.size_flushes,
            FlushTrigger::Deadline => self.deadline_flushes,
            FlushTrigger::Manual => self.manual_flushes,
            FlushTrigger::Shutdown => self.shutdown_flushes,
        }
    }

    /// Batches the uploader rejected
    pub fn upload_failures(&self) -> u64 {
        self.upload_failures
    }

    /// Events contained in rejected batches
    pub fn events_lost(&self) -> u64 {
        self.events_lost
    }

    /// Reports published while nobody was subscribed
    pub fn reports_unobserved(&self) -> u64 {
        self.reports_unobserved
    }
}

/// Lock-free recorder shared by the worker and the facade
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    events_accepted: AtomicU64,
    batches_flushed: AtomicU64,
    events_flushed: AtomicU64,
    size_flushes: AtomicU64,
    deadline_flushes: AtomicU64,
    manual_flushes: AtomicU64,
    shutdown_flushes: AtomicU64,
    upload_failures: AtomicU64,
    events_lost: AtomicU64,
    reports_unobserved: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn record_accepted(&self) {
        self.events_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self, trigger: FlushTrigger, events: usize) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.events_flushed
            .fetch_add(events as u64, Ordering::Relaxed);
        let counter = match trigger {
            FlushTrigger::Size => &self.size_flushes,
            FlushTrigger::Deadline => &self.deadline_flushes,
            FlushTrigger::Manual => &self.manual_flushes,
            FlushTrigger::Shutdown => &self.shutdown_flushes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_upload_failure(&self, events: usize) {
        self.upload_failures.fetch_add(1, Ordering::Relaxed);
        self.events_lost.fetch_add(events as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_unobserved_report(&self) {
        self.reports_unobserved.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BatcherStats {
        BatcherStats {
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            events_flushed: self.events_flushed.load(Ordering::Relaxed),
            size_flushes: self.size_flushes.load(Ordering::Relaxed),
            deadline_flushes: self.deadline_flushes.load(Ordering::Relaxed),
            manual_flushes: self.manual_flushes.load(Ordering::Relaxed),
            shutdown_flushes: self.shutdown_flushes.load(Ordering::Relaxed),
            upload_failures: self.upload_failures.load(Ordering::Relaxed),
            events_lost: self.events_lost.load(Ordering::Relaxed),
            reports_unobserved: self.reports_unobserved.load(Ordering::Relaxed),
        }
    }
}
