//! Projection worker: receive → project → apply → lag upsert → delete.
//!
//! A single cooperative loop. Per-message failures are logged and the message
//! is left undeleted so the queue redelivers it; the outer loop swallows
//! receive errors and recurs unconditionally. Throughput scales by running
//! more worker processes, each receiving disjoint messages.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use reserva_events::RecordedEvent;

use crate::projection::{ProjectionLag, ProjectionStore, ProjectionStoreError};
use crate::projector::{apply_op, project};
use crate::queue::{EventQueue, QueueError, QueueMessage, MAX_RECEIVE_BATCH};

/// Pause after a failed receive before polling again.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Pause after an empty receive from a non-long-polling queue.
const IDLE_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("message decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Projection(#[from] ProjectionStoreError),
}

/// The projection worker loop.
pub struct ProjectionWorker {
    queue: Arc<dyn EventQueue>,
    projections: Arc<dyn ProjectionStore>,
    batch_size: usize,
}

impl ProjectionWorker {
    pub fn new(queue: Arc<dyn EventQueue>, projections: Arc<dyn ProjectionStore>) -> Self {
        Self {
            queue,
            projections,
            batch_size: MAX_RECEIVE_BATCH,
        }
    }

    /// Run until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("projection worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                result = self.tick() => {
                    match result {
                        // Long-polling queues block in receive; queues that
                        // return empty immediately must not spin the loop hot.
                        Ok(0) => tokio::time::sleep(IDLE_BACKOFF).await,
                        Ok(_) => {}
                        Err(err) => {
                            warn!(error = %err, "projection worker receive failed");
                            tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }

        info!("projection worker stopped");
    }

    /// One receive-project-acknowledge round. Returns the number of messages
    /// received (zero after an empty long poll).
    pub async fn tick(&self) -> Result<usize, QueueError> {
        let messages = self.queue.receive(self.batch_size).await?;
        let received = messages.len();

        for message in messages {
            match self.process(&message).await {
                Ok(()) => {
                    if let Err(err) = self.queue.delete(&message.receipt).await {
                        // The message will come back; projection ops are
                        // idempotent, so the re-apply is harmless.
                        warn!(error = %err, "message acknowledge failed");
                    }
                }
                Err(err) => {
                    warn!(error = %err, "projection failed; message will be redelivered");
                }
            }
        }

        Ok(received)
    }

    async fn process(&self, message: &QueueMessage) -> Result<(), WorkerError> {
        let event: RecordedEvent = serde_json::from_str(&message.body)?;

        for op in project(&event) {
            apply_op(self.projections.as_ref(), op).await?;
        }

        self.projections
            .upsert_lag(ProjectionLag::main(event.occurred_at_utc))
            .await?;

        Ok(())
    }
}
