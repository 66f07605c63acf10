use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use heroes_infra::{JobQueue, PgStore, Settings, Worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env().context("invalid configuration")?;
    heroes_observability::init(&settings.log);

    let store = PgStore::new();
    store
        .connect(&settings.postgres)
        .await
        .context("failed to connect to postgres")?;

    let queue = Arc::new(JobQueue::new());
    queue
        .connect_redis(&settings.redis, settings.worker.keep_result)
        .await
        .context("failed to connect to the job queue")?;

    let mut worker = Worker::new(store.clone(), Arc::clone(&queue), settings.worker);
    heroes_worker::register(&mut worker);
    let worker = Arc::new(worker);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(Arc::clone(&worker).run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    running.await.context("worker task panicked")?;

    if let Err(err) = queue.close().await {
        tracing::warn!(error = %err, "failed to close the job queue");
    }
    store.disconnect().await;
    Ok(())
}
