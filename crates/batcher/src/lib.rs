#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

//! Size- and time-bounded event batching
//!
//! This crate turns a stream of discrete events from many producers into
//! ordered batches:
//! - A flush happens when `batch_size` events are buffered or `max_delay`
//!   after the first buffered event, whichever comes first
//! - One dedicated worker owns the buffer, so flushes never race each other
//! - Every flushed batch is uploaded once, then broadcast to report subscribers
//! - `close()` drains everything accepted before it and reports drain failures
//!
//! # Example
//!
//! ```no_run
//! use eventbatch_batcher::{EventBatcher, FnUploader};
//! use eventbatch_core::{Batch, BatcherConfig, Event};
//!
//! # async fn example() -> eventbatch_core::Result<()> {
//! let config = BatcherConfig::builder().batch_size(10).max_delay_ms(500).build();
//! let uploader = FnUploader::new(|batch: Batch| async move {
//!     println!("uploading {:?}", batch.ids());
//!     Ok(())
//! });
//! let batcher = EventBatcher::new(config, uploader)?;
//!
//! batcher.submit(Event::new(1, "hello")).await?;
//! batcher.close().await?;
//! # Ok(())
//! # }
//! ```

// Private implementation modules
mod accumulator;
mod batcher;
mod lifecycle;
mod publisher;
mod queue;
mod stats;
mod uploader;

// Re-export the public API
pub use accumulator::AccumulatorState;
pub use batcher::EventBatcher;
pub use publisher::ReportStream;
pub use queue::EventQueue;
pub use stats::{BatcherStats, FlushTrigger};
pub use uploader::{FnUploader, LoggingUploader, Uploader};

// Re-export error types from core
pub use eventbatch_core::{Batch, BatcherConfig, Error, Event, Result};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::batcher::EventBatcher;
    pub use crate::uploader::{FnUploader, Uploader};
    pub use eventbatch_core::{Batch, BatcherConfig, Event};
}
