//! Accounts API endpoints

use api_types::account::{AccountNew, AccountView};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use engine::{Account, NewAccountCmd};

use crate::{ServerError, server::ServerState};

pub(crate) fn account_view(account: Account) -> AccountView {
    AccountView {
        account_id: account.id,
        balance: account.balance.to_string(),
        created_at: account.created_at,
        updated_at: account.updated_at,
    }
}

pub(crate) fn parse_account_id(raw: &str) -> Result<i64, ServerError> {
    raw.parse()
        .map_err(|_| ServerError::Generic(format!("invalid account id: {raw}")))
}

pub async fn create(
    State(state): State<ServerState>,
    payload: Result<Json<AccountNew>, JsonRejection>,
) -> Result<(StatusCode, Json<AccountView>), ServerError> {
    let Json(payload) = payload.map_err(|rejection| ServerError::Generic(rejection.body_text()))?;

    let account = state
        .engine
        .create_account(NewAccountCmd::new(
            payload.account_id,
            payload.initial_balance,
        ))
        .await?;

    Ok((StatusCode::CREATED, Json(account_view(account))))
}

pub async fn get(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<AccountView>, ServerError> {
    let account_id = parse_account_id(&id)?;
    let account = state.engine.account(account_id).await?;
    Ok(Json(account_view(account)))
}
