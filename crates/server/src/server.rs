use axum::{
    Router, middleware,
    routing::{get, post},
};
use engine::{Engine, IdempotencyStore, MAX_BODY_BYTES, MAX_KEY_LEN};

use std::{future::Future, sync::Arc};

use crate::{accounts, health, idempotency, transactions};

/// Limits applied by the idempotency layer.
#[derive(Clone, Copy, Debug)]
pub struct IdempotencyConfig {
    /// Longer keys are rejected with 400.
    pub max_key_len: usize,
    /// Bigger response bodies are returned but not cached.
    pub max_body_bytes: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            max_key_len: MAX_KEY_LEN,
            max_body_bytes: MAX_BODY_BYTES,
        }
    }
}

#[derive(Clone)]
pub struct ServerState {
    pub engine: Arc<Engine>,
    pub idempotency_store: Arc<dyn IdempotencyStore>,
    pub idempotency: IdempotencyConfig,
    pub(crate) key_locks: idempotency::KeyedLocks,
}

impl ServerState {
    pub fn new(
        engine: Arc<Engine>,
        idempotency_store: Arc<dyn IdempotencyStore>,
        idempotency: IdempotencyConfig,
    ) -> Self {
        Self {
            engine,
            idempotency_store,
            idempotency,
            key_locks: idempotency::KeyedLocks::default(),
        }
    }
}

/// Build the HTTP router.
///
/// Every route except `/health` sits behind the idempotency layer, which
/// itself only acts on mutating methods.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/accounts", post(accounts::create))
        .route("/accounts/{id}", get(accounts::get))
        .route("/accounts/{id}/transactions", get(transactions::history))
        .route("/transactions", post(transactions::create))
        .route("/transactions/{id}", get(transactions::get))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            idempotency::layer,
        ))
        .route("/health", get(health::get))
        .with_state(state)
}

pub async fn run_with_listener<F>(
    state: ServerState,
    listener: tokio::net::TcpListener,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

pub fn spawn_with_listener(
    state: ServerState,
    listener: tokio::net::TcpListener,
) -> Result<std::net::SocketAddr, std::io::Error> {
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(err) = run_with_listener(state, listener, std::future::pending()).await {
            tracing::error!("server failed: {err}");
        }
    });

    Ok(addr)
}
