//! Infrastructure wiring for the HTTP application.

use std::sync::Arc;

use reserva_auth::{Argon2Kdf, Hs256Jwt, PasswordKdf};
use reserva_infra::blob::{InMemoryBlobStore, S3BlobStore};
use reserva_infra::config::Config;
use reserva_infra::event_store::EventStore;
use reserva_infra::idempotency::{
    DynamoIdempotencyStore, IdempotencyStore, InMemoryIdempotencyStore,
};
use reserva_infra::projection::{
    DynamoProjectionStore, InMemoryProjectionStore, ProjectionStore,
};
use reserva_infra::queue::{EventQueue, InMemoryEventQueue, SqsEventQueue};
use reserva_infra::runner::CommandRunner;

/// Shared services handed to every handler.
pub struct AppServices {
    pub runner: CommandRunner,
    pub projections: Arc<dyn ProjectionStore>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub kdf: Arc<dyn PasswordKdf>,
    pub jwt: Arc<Hs256Jwt>,
    pub admin_bootstrap_key: String,
}

impl AppServices {
    /// Production wiring: S3 events, SQS fan-out, DynamoDB query side.
    pub async fn connect(config: &Config) -> Self {
        let blob = Arc::new(S3BlobStore::connect(config).await);
        let queue: Option<Arc<dyn EventQueue>> = match SqsEventQueue::connect(config).await {
            Some(queue) => Some(Arc::new(queue)),
            None => {
                tracing::warn!("SQS_QUEUE_URL not set; event publishing is disabled");
                None
            }
        };
        let projections: Arc<dyn ProjectionStore> =
            Arc::new(DynamoProjectionStore::connect(config).await);
        let idempotency: Arc<dyn IdempotencyStore> =
            Arc::new(DynamoIdempotencyStore::connect(config).await);

        Self {
            runner: CommandRunner::from_config(EventStore::new(blob), queue, config),
            projections,
            idempotency,
            kdf: Arc::new(Argon2Kdf),
            jwt: Arc::new(Hs256Jwt::new(config.jwt_secret.clone())),
            admin_bootstrap_key: config.admin_bootstrap_key.clone(),
        }
    }

    /// In-memory wiring for tests and single-process mode.
    ///
    /// The returned queue is the same one the runner publishes to; callers
    /// drive a [`reserva_infra::worker::ProjectionWorker`] over it to feed
    /// the projections (the read-side helpers depend on that).
    pub fn in_memory(config: &Config) -> (Self, Arc<InMemoryEventQueue>) {
        let blob = Arc::new(InMemoryBlobStore::new());
        let queue = Arc::new(InMemoryEventQueue::new());
        let projections: Arc<dyn ProjectionStore> = Arc::new(InMemoryProjectionStore::new());
        let idempotency: Arc<dyn IdempotencyStore> = Arc::new(InMemoryIdempotencyStore::new());

        let services = Self {
            runner: CommandRunner::from_config(
                EventStore::new(blob),
                Some(queue.clone()),
                config,
            ),
            projections,
            idempotency,
            kdf: Arc::new(Argon2Kdf),
            jwt: Arc::new(Hs256Jwt::new(config.jwt_secret.clone())),
            admin_bootstrap_key: config.admin_bootstrap_key.clone(),
        };

        (services, queue)
    }
}
