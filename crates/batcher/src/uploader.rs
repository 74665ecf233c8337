//! The downstream sink a batcher flushes into

use async_trait::async_trait;
use eventbatch_core::{Batch, Result};
use std::future::Future;
use tracing::info;

/// Receives every flushed batch exactly once
///
/// An upload runs on the batcher's single worker and is never interrupted,
/// including during shutdown. Implementations needing a hard timeout or
/// retries must provide them internally; a returned error loses the batch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Deliver one batch downstream
    async fn upload(&self, batch: &Batch) -> Result<()>;
}

/// Adapts an async closure into an [`Uploader`]
///
/// ```no_run
/// use eventbatch_batcher::FnUploader;
///
/// let uploader = FnUploader::new(|batch| async move {
///     println!("uploading {} events", batch.len());
///     Ok(())
/// });
/// ```
pub struct FnUploader<F> {
    f: F,
}

impl<F, Fut> FnUploader<F>
where
    F: Fn(Batch) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    /// Wrap a closure receiving an owned (cheaply cloned) batch
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Uploader for FnUploader<F>
where
    F: Fn(Batch) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn upload(&self, batch: &Batch) -> Result<()> {
        (self.f)(batch.clone()).await
    }
}

/// Uploader that only logs what it receives
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingUploader;

#[async_trait]
impl Uploader for LoggingUploader {
    async fn upload(&self, batch: &Batch) -> Result<()> {
        info!(
            "Batch #{} with {} events: {:?}",
            batch.sequence(),
            batch.len(),
            batch.ids()
        );
        Ok(())
    }
}
