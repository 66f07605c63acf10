use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use heroes_api::app::{AppState, build_app};
use heroes_infra::queue::InMemoryJobBackend;
use heroes_infra::{JobQueue, MemoryStore, PgStore, Settings, Worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env().context("invalid configuration")?;
    heroes_observability::init(&settings.log);
    tracing::info!(
        app = %settings.app.name,
        version = %settings.app.version,
        environment = %settings.environment,
        persistent = settings.use_persistent_stores,
        "starting"
    );

    let listener = tokio::net::TcpListener::bind(settings.server.bind_addr())
        .await
        .with_context(|| format!("failed to bind {}", settings.server.bind_addr()))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    let queue = Arc::new(JobQueue::new());

    if settings.use_persistent_stores {
        let store = PgStore::new();
        store
            .connect(&settings.postgres)
            .await
            .context("failed to connect to postgres")?;
        store.migrate().await.context("failed to run migrations")?;
        queue
            .connect_redis(&settings.redis, settings.worker.keep_result)
            .await
            .context("failed to connect to the job queue")?;

        let app = build_app(AppState::new(store.clone(), Arc::clone(&queue)));
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        close_queue(&queue).await;
        store.disconnect().await;
    } else {
        // Local mode: everything in memory, jobs run in this process.
        let store = MemoryStore::new();
        queue.attach(Arc::new(InMemoryJobBackend::new()));

        let mut worker = Worker::new(store.clone(), Arc::clone(&queue), settings.worker);
        heroes_worker::register(&mut worker);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let running = tokio::spawn(Arc::new(worker).run(shutdown_rx));

        let app = build_app(AppState::new(store, Arc::clone(&queue)));
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        let _ = shutdown_tx.send(true);
        running.await.context("worker task panicked")?;
        close_queue(&queue).await;
    }

    tracing::info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

async fn close_queue(queue: &JobQueue) {
    if let Err(err) = queue.close().await {
        tracing::warn!(error = %err, "failed to close the job queue");
    }
}
