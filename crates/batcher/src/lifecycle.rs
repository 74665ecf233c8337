//! Ownership of the background worker and its orderly shutdown

use crate::queue::EventQueue;
use eventbatch_core::{Error, Result};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum WorkerSlot {
    Running(JoinHandle<Result<()>>),
    /// Outcome of the drain; `Some` carries the failure description
    Finished(Option<String>),
}

/// Owns the accumulator task and the token that tells it to drain
pub(crate) struct LifecycleController {
    shutdown: CancellationToken,
    grace: Duration,
    worker: Mutex<WorkerSlot>,
}

impl LifecycleController {
    pub(crate) fn new(
        worker: JoinHandle<Result<()>>,
        shutdown: CancellationToken,
        grace: Duration,
    ) -> Self {
        Self {
            shutdown,
            grace,
            worker: Mutex::new(WorkerSlot::Running(worker)),
        }
    }

    /// Close the queue, let the worker drain, and wait for it
    ///
    /// Idempotent. Concurrent callers queue on the slot lock and all observe
    /// the outcome recorded by whichever caller waited on the worker. If the
    /// drain outlives the grace period the worker is left to finish in the
    /// background (an upload is never cut short) and the timeout is reported.
    pub(crate) async fn close(&self, queue: &EventQueue) -> Result<()> {
        queue.close();
        self.shutdown.cancel();

        let mut slot = self.worker.lock().await;
        let failure = match &mut *slot {
            WorkerSlot::Finished(failure) => failure.clone(),
            WorkerSlot::Running(handle) => {
                debug!("Waiting up to {:?} for the final drain", self.grace);
                let failure = match tokio::time::timeout(self.grace, handle).await {
                    Ok(Ok(Ok(()))) => None,
                    Ok(Ok(Err(Error::ShutdownDrainFailure(msg)))) => Some(msg),
                    Ok(Ok(Err(e))) => Some(e.to_string()),
                    Ok(Err(join_error)) => Some(format!(
                        "batch worker terminated abnormally: {join_error}"
                    )),
                    Err(_) => {
                        warn!(
                            "Final drain still running after {:?}, detaching worker",
                            self.grace
                        );
                        Some(format!("drain did not complete within {:?}", self.grace))
                    }
                };
                *slot = WorkerSlot::Finished(failure.clone());
                failure
            }
        };

        match failure {
            None => {
                info!("Event batcher closed");
                Ok(())
            }
            Some(msg) => Err(Error::shutdown_drain(msg)),
        }
    }

    /// Whether shutdown has been requested
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        // An unclosed batcher still drains in the background
        self.shutdown.cancel();
    }
}
