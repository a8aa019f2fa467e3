use api_types::ErrorBody;
use axum::{Json, http::StatusCode, response::IntoResponse};
use engine::{EngineError, ErrorCode};

pub use idempotency::{IDEMPOTENCY_KEY_HEADER, REPLAYED_HEADER};
pub use server::{IdempotencyConfig, ServerState, router, run_with_listener, spawn_with_listener};

mod accounts;
mod health;
mod idempotency;
mod server;
mod transactions;

pub mod types {
    pub use api_types::{ErrorBody, Health};

    pub mod account {
        pub use api_types::account::{AccountNew, AccountView};
    }

    pub mod transaction {
        pub use api_types::transaction::{
            HistoryQuery, TransferCreated, TransferList, TransferNew, TransferView,
        };
    }
}

pub enum ServerError {
    Engine(EngineError),
    /// Malformed request (body, path or header) rejected before the engine.
    Generic(String),
}

/// One status per code. Adding an [`ErrorCode`] without a status does not
/// compile.
fn status_for_code(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::InsufficientFunds => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Public message for `err`. Diagnostics stay in the logs.
fn message_for_engine_error(err: EngineError) -> String {
    match &err {
        EngineError::Database(db_err) => {
            tracing::error!(error = %db_err, "database error");
            return "internal server error".to_string();
        }
        EngineError::Timeout => {
            tracing::error!("transfer deadline exceeded");
            return "internal server error".to_string();
        }
        EngineError::InsufficientFunds {
            account_id,
            balance,
            amount,
        } => tracing::warn!(account_id, %balance, %amount, "insufficient funds"),
        other => tracing::warn!(code = %other.code(), "{other}"),
    }
    err.to_string()
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, error) = match self {
            ServerError::Engine(err) => {
                let code = err.code();
                (status_for_code(code), code, message_for_engine_error(err))
            }
            ServerError::Generic(err) => {
                tracing::warn!("rejected request: {err}");
                (StatusCode::BAD_REQUEST, ErrorCode::BadRequest, err)
            }
        };

        let body = ErrorBody {
            error,
            code: code.as_str().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<EngineError> for ServerError {
    fn from(value: EngineError) -> Self {
        Self::Engine(value)
    }
}
