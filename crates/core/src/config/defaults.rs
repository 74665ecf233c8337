//! Default values and functions for configuration

/// Upper bound on the per-subscriber report backlog
pub(crate) const MAX_REPORT_CAPACITY: usize = 1 << 16;

/// Upper bound on queued events before `submit` waits
pub(crate) const MAX_QUEUE_CAPACITY: usize = 1 << 24;

pub(crate) fn default_batch_size() -> usize {
    100
}

pub(crate) fn default_max_delay_ms() -> u64 {
    500
}

pub(crate) fn default_queue_capacity() -> usize {
    10_000 // Large enough that producers rarely wait
}

pub(crate) fn default_report_capacity() -> usize {
    64
}

pub(crate) fn default_drain_timeout_ms() -> u64 {
    30_000
}
