#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

//! Core types for the eventbatch system
//!
//! This crate provides the foundational pieces shared by the batcher and its
//! callers:
//!
//! - **Events and batches**: the immutable records that flow through a batcher
//! - **Configuration**: batcher settings with file and environment loading
//! - **Error handling**: unified error types
//!

pub mod config;
pub mod error;
pub mod event;

// Re-export main types for convenience
pub use config::{BatcherConfig, BatcherConfigBuilder, Config};
pub use error::{Error, Result, ResultExt};
pub use event::{Batch, Event};

/// Version of the core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::BatcherConfig;
    pub use crate::error::{Result, ResultExt};
    pub use crate::event::{Batch, Event};
}
