use thiserror::Error;

/// Result type for eventbatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for eventbatch operations
#[derive(Error, Debug)]
pub enum Error {
    /// The batcher has begun shutting down and no longer accepts events
    #[error("Event queue is closed")]
    Closed,

    /// A non-blocking submission found the event queue at capacity
    #[error("Event queue is full")]
    QueueFull,

    /// The uploader rejected a batch; its events are not re-queued
    #[error("Upload of batch with {events} events failed: {message}")]
    UploadFailure { events: usize, message: String },

    /// The final drain performed by `close()` did not complete cleanly
    #[error("Shutdown drain failed: {0}")]
    ShutdownDrainFailure(String),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Creates a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an upload failure for a batch of `events` events
    pub fn upload_failure(events: usize, message: impl Into<String>) -> Self {
        Self::UploadFailure {
            events,
            message: message.into(),
        }
    }

    /// Creates a shutdown drain failure
    pub fn shutdown_drain(msg: impl Into<String>) -> Self {
        Self::ShutdownDrainFailure(msg.into())
    }

    /// Creates an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Adds context to any error
    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WithContext {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error means the event was refused at the queue boundary
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Closed | Self::QueueFull)
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::with_context(context, e))
    }
}
