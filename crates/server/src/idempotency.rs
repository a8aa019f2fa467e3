//! Idempotency layer for mutating requests.
//!
//! A request carrying an `idempotency-key` header is executed once; the
//! status and body it produced are stored and replayed verbatim (flagged with
//! `idempotent-replayed: true`) for every later request with the same key.
//! Server errors and oversized bodies are not stored, so those retries run
//! the operation again.
//!
//! Within one process the miss/execute/store path is serialized per key, so
//! two simultaneous retries cannot both run the operation. Across processes
//! the store's first-write-wins rule still decides which response is kept.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderName, HeaderValue, Method, StatusCode, header::CONTENT_TYPE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Error as HeaderError, Header, HeaderMapExt};
use chrono::Utc;
use dashmap::DashMap;
use engine::CachedResponse;
use http_body_util::BodyExt;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::{ServerError, server::ServerState};

pub static IDEMPOTENCY_KEY_HEADER: HeaderName = HeaderName::from_static("idempotency-key");
pub static REPLAYED_HEADER: HeaderName = HeaderName::from_static("idempotent-replayed");

/// `TypedHeader` for the client idempotency key.
///
/// The value must be non-empty visible ASCII. The length limit is
/// configurable and checked by the layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IdempotencyKey(String);

impl IdempotencyKey {
    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl Header for IdempotencyKey {
    fn name() -> &'static HeaderName {
        &IDEMPOTENCY_KEY_HEADER
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, HeaderError>
    where
        Self: Sized,
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(HeaderError::invalid)?;
        let Ok(value) = value.to_str() else {
            return Err(HeaderError::invalid());
        };
        let value = value.trim();
        if value.is_empty() || value.chars().any(|c| !c.is_ascii_graphic()) {
            return Err(HeaderError::invalid());
        }

        Ok(IdempotencyKey(value.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        match HeaderValue::from_str(&self.0) {
            Ok(value) => values.extend(std::iter::once(value)),
            Err(_) => tracing::error!("failed to encode idempotency-key header"),
        }
    }
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Middleware entry point, installed with `middleware::from_fn_with_state`.
pub(crate) async fn layer(State(state): State<ServerState>, request: Request, next: Next) -> Response {
    if !is_mutating(request.method()) {
        return next.run(request).await;
    }

    let key = match request.headers().typed_try_get::<IdempotencyKey>() {
        Ok(Some(key)) => key,
        Ok(None) => return next.run(request).await,
        Err(_) => {
            return ServerError::Generic("invalid idempotency key".to_string()).into_response();
        }
    };
    let max_key_len = state.idempotency.max_key_len;
    if key.as_str().len() > max_key_len {
        return ServerError::Generic(format!(
            "idempotency key longer than {max_key_len} characters"
        ))
        .into_response();
    }

    match lookup(&state, &key).await {
        Ok(Some(response)) => return response,
        Ok(None) => {}
        Err(response) => return response,
    }

    let _guard = state.key_locks.lock(key.as_str()).await;
    // Another request with this key may have finished while we waited.
    match lookup(&state, &key).await {
        Ok(Some(response)) => return response,
        Ok(None) => {}
        Err(response) => return response,
    }

    let response = next.run(request).await;
    capture(&state, &key, response).await
}

/// Returns the replayed response on a hit. A failing store is answered
/// with 500 rather than running the operation without protection.
async fn lookup(state: &ServerState, key: &IdempotencyKey) -> Result<Option<Response>, Response> {
    match state.idempotency_store.get(key.as_str()).await {
        Ok(Some(cached)) => {
            tracing::debug!(key = key.as_str(), status = cached.status, "replaying response");
            Ok(Some(replay(cached)))
        }
        Ok(None) => Ok(None),
        Err(err) => Err(ServerError::from(err).into_response()),
    }
}

fn replay(cached: CachedResponse) -> Response {
    let Ok(status) = StatusCode::from_u16(cached.status) else {
        tracing::error!(status = cached.status, "cached response has an invalid status");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let mut response = Response::new(Body::from(cached.body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    if let Some(content_type) = cached
        .content_type
        .as_deref()
        .and_then(|value| HeaderValue::from_str(value).ok())
    {
        headers.insert(CONTENT_TYPE, content_type);
    }
    headers.insert(REPLAYED_HEADER.clone(), HeaderValue::from_static("true"));
    response
}

/// Buffers the response body and stores it when it is cacheable.
async fn capture(state: &ServerState, key: &IdempotencyKey, response: Response) -> Response {
    let status = response.status();
    if !(200..500).contains(&status.as_u16()) {
        tracing::debug!(key = key.as_str(), %status, "not caching server error");
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            tracing::error!(error = %err, "failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if bytes.len() > state.idempotency.max_body_bytes {
        tracing::debug!(
            key = key.as_str(),
            size = bytes.len(),
            "response too large to cache"
        );
    } else {
        let cached = CachedResponse {
            status: status.as_u16(),
            body: bytes.to_vec(),
            content_type: parts
                .headers
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned),
            created_at: Utc::now(),
        };
        match state.idempotency_store.store(key.as_str(), &cached).await {
            Ok(true) => tracing::debug!(key = key.as_str(), %status, "response cached"),
            Ok(false) => tracing::debug!(key = key.as_str(), "response already cached"),
            // The operation already ran; the client still gets its result.
            Err(err) => tracing::error!(error = %err, "failed to cache response"),
        }
    }

    Response::from_parts(parts, Body::from(bytes))
}

struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    /// Holders plus waiters.
    users: usize,
}

/// Async mutexes keyed by idempotency key.
///
/// Entries live only while someone holds or waits for them, including
/// waiters whose request was cancelled mid-wait.
#[derive(Clone, Default)]
pub(crate) struct KeyedLocks {
    slots: Arc<DashMap<String, Slot>>,
}

impl KeyedLocks {
    pub(crate) async fn lock(&self, key: &str) -> KeyGuard {
        let mutex = {
            let mut slot = self.slots.entry(key.to_string()).or_insert_with(|| Slot {
                mutex: Arc::default(),
                users: 0,
            });
            slot.users += 1;
            Arc::clone(&slot.mutex)
        };
        // Registered before the wait so a dropped future still gives back
        // its count.
        let registration = Registration {
            locks: self.clone(),
            key: key.to_string(),
        };
        KeyGuard {
            _held: mutex.lock_owned().await,
            _registration: registration,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.len()
    }
}

struct Registration {
    locks: KeyedLocks,
    key: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.locks.slots.remove_if_mut(&self.key, |_, slot| {
            slot.users -= 1;
            slot.users == 0
        });
    }
}

/// Fields drop in order: the mutex is released before the entry can go.
pub(crate) struct KeyGuard {
    _held: OwnedMutexGuard<()>,
    _registration: Registration,
}
