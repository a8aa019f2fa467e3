//! Transactions API endpoints

use api_types::transaction::{
    HistoryQuery, TransferCreated, TransferList, TransferNew, TransferView,
};
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
};
use engine::{Transfer, TransferCmd};
use uuid::Uuid;

use crate::{ServerError, accounts::parse_account_id, server::ServerState};

const DEFAULT_HISTORY_LIMIT: u64 = 50;

fn transfer_view(transfer: Transfer) -> TransferView {
    TransferView {
        transaction_id: transfer.id,
        source_account_id: transfer.source_account_id,
        destination_account_id: transfer.destination_account_id,
        amount: transfer.amount.to_string(),
        created_at: transfer.created_at,
    }
}

pub async fn create(
    State(state): State<ServerState>,
    payload: Result<Json<TransferNew>, JsonRejection>,
) -> Result<(StatusCode, Json<TransferCreated>), ServerError> {
    let Json(payload) = payload.map_err(|rejection| ServerError::Generic(rejection.body_text()))?;

    let mut cmd = TransferCmd::new(
        payload.source_account_id,
        payload.destination_account_id,
        payload.amount,
    );
    if let Some(id) = payload.transaction_id {
        cmd = cmd.transaction_id(id);
    }
    let transfer = state.engine.transfer(cmd).await?;

    Ok((
        StatusCode::CREATED,
        Json(TransferCreated {
            transaction_id: transfer.id,
        }),
    ))
}

pub async fn get(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<TransferView>, ServerError> {
    let transaction_id = Uuid::parse_str(&id)
        .map_err(|_| ServerError::Generic(format!("invalid transaction id: {id}")))?;
    let transfer = state.engine.transfer_by_id(transaction_id).await?;
    Ok(Json(transfer_view(transfer)))
}

/// Newest transfers touching an account, either side.
pub async fn history(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<TransferList>, ServerError> {
    let account_id = parse_account_id(&id)?;
    let Query(query) = query.map_err(|rejection| ServerError::Generic(rejection.body_text()))?;

    let transfers = state
        .engine
        .account_transfers(account_id, query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
        .await?;

    Ok(Json(TransferList {
        transactions: transfers.into_iter().map(transfer_view).collect(),
    }))
}
