use std::{sync::Arc, time::Duration};

use engine::{DbIdempotencyStore, Engine, IdempotencySweeper, IdempotencyStore};
use migration::{Migrator, MigratorTrait};
use server::{IdempotencyConfig, ServerState};
use tokio_util::sync::CancellationToken;

mod settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = settings::Settings::new()?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "ledger={level},server={level},engine={level},migration={level}",
            level = settings.app.level
        ))
        .init();

    let db = sea_orm::Database::connect(settings.database.url.as_str()).await?;
    Migrator::up(&db, None).await?;

    let mut builder = Engine::builder().database(db.clone());
    if let Some(timeout) = settings.engine.transfer_timeout() {
        builder = builder.transfer_timeout(timeout);
    }
    let engine = builder.build().await?;

    let store: Arc<dyn IdempotencyStore> = Arc::new(DbIdempotencyStore::new(db));
    let cancel = CancellationToken::new();
    let sweeper = IdempotencySweeper::new(
        store.clone(),
        Duration::from_secs(settings.idempotency.ttl_secs),
        Duration::from_secs(settings.idempotency.sweep_interval_secs),
    )
    .spawn(cancel.child_token());

    let state = ServerState::new(
        Arc::new(engine),
        store,
        IdempotencyConfig {
            max_key_len: settings.idempotency.max_key_len,
            max_body_bytes: settings.idempotency.max_body_bytes,
        },
    );

    let addr = format!("{}:{}", settings.server.bind, settings.server.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = cancel.clone();
    let served = server::run_with_listener(state, listener, async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for shutdown signal: {err}");
        }
        tracing::info!("shutting down");
        shutdown.cancel();
    })
    .await;

    cancel.cancel();
    if let Err(err) = sweeper.await {
        tracing::error!("idempotency sweeper panicked: {err}");
    }
    served?;

    Ok(())
}
