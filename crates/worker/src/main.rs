use std::sync::Arc;

use reserva_infra::config::Config;
use reserva_infra::projection::DynamoProjectionStore;
use reserva_infra::queue::SqsEventQueue;
use reserva_infra::worker::ProjectionWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    reserva_observability::init();

    let config = Config::from_env();
    let Some(queue) = SqsEventQueue::connect(&config).await else {
        anyhow::bail!("SQS_QUEUE_URL is required for the projection worker");
    };
    let projections = Arc::new(DynamoProjectionStore::connect(&config).await);

    let worker = ProjectionWorker::new(Arc::new(queue), projections);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run(shutdown_rx).await;
    Ok(())
}
