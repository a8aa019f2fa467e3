use chrono::{DateTime, Utc};
use sea_orm::{
    Condition, DatabaseTransaction, QueryFilter, QueryOrder, QuerySelect,
    prelude::*,
    sea_query::{Expr, Query},
};
use uuid::Uuid;

use crate::{
    AccountRole, EngineError, Money, ResultEngine, Transfer, TransferCmd, accounts, transactions,
    util::{map_unique_violation, money_value, parse_money, validate_account_id},
};

use super::{Engine, with_tx};

/// Upper bound for a single history page.
pub const MAX_HISTORY_LIMIT: u64 = 500;

/// A transfer that passed input validation and has not touched storage yet.
#[derive(Clone, Copy, Debug)]
struct TransferRequest {
    id: Uuid,
    source: i64,
    destination: i64,
    amount: Money,
}

impl TryFrom<TransferCmd> for TransferRequest {
    type Error = EngineError;

    fn try_from(cmd: TransferCmd) -> Result<Self, Self::Error> {
        if cmd.source_account_id == cmd.destination_account_id {
            return Err(EngineError::SameAccount);
        }
        let amount: Money = cmd.amount.parse()?;
        if !amount.is_positive() {
            return Err(EngineError::InvalidAmount("amount must be > 0".to_string()));
        }
        Ok(Self {
            id: cmd.transaction_id.unwrap_or_else(Uuid::new_v4),
            source: cmd.source_account_id,
            destination: cmd.destination_account_id,
            amount,
        })
    }
}

impl TransferRequest {
    /// Lock slots in ascending id order.
    fn lock_order(&self) -> (i64, i64) {
        if self.source < self.destination {
            (self.source, self.destination)
        } else {
            (self.destination, self.source)
        }
    }

    /// Which side of the request `account_id` is, independent of lock order.
    fn role_of(&self, account_id: i64) -> AccountRole {
        if account_id == self.source {
            AccountRole::Source
        } else {
            AccountRole::Destination
        }
    }
}

impl Engine {
    /// Move funds between two accounts.
    ///
    /// Validation (same account, decimal syntax, positive amount) happens
    /// before any storage access. The two balance updates and the ledger row
    /// are then written in one database transaction; on any failure nothing
    /// of it is committed.
    pub async fn transfer(&self, cmd: TransferCmd) -> ResultEngine<Transfer> {
        let request = TransferRequest::try_from(cmd)?;
        let transfer = match self.transfer_timeout {
            Some(limit) => tokio::time::timeout(limit, self.execute_transfer(request))
                .await
                .map_err(|_| {
                    tracing::warn!(
                        transaction_id = %request.id,
                        timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                        "transfer timed out, unit of work dropped"
                    );
                    EngineError::Timeout
                })??,
            None => self.execute_transfer(request).await?,
        };

        tracing::info!(
            transaction_id = %transfer.id,
            source = transfer.source_account_id,
            destination = transfer.destination_account_id,
            amount = %transfer.amount,
            "transfer committed"
        );
        Ok(transfer)
    }

    async fn execute_transfer(&self, request: TransferRequest) -> ResultEngine<Transfer> {
        with_tx!(self, |db_tx| {
            // Concurrent transfers between the same pair always lock the
            // lower id first, so two of them can never wait on each other.
            let (first, second) = request.lock_order();
            let first_row = lock_account(&db_tx, first)
                .await?
                .ok_or_else(|| EngineError::not_found(request.role_of(first), first))?;
            let second_row = lock_account(&db_tx, second)
                .await?
                .ok_or_else(|| EngineError::not_found(request.role_of(second), second))?;
            let (source_row, destination_row) = if first == request.source {
                (first_row, second_row)
            } else {
                (second_row, first_row)
            };

            let source_balance = parse_money(&source_row.balance, "account balance")?;
            if source_balance < request.amount {
                return Err(EngineError::InsufficientFunds {
                    account_id: request.source,
                    balance: source_balance.to_decimal(),
                    amount: request.amount.to_decimal(),
                });
            }
            let new_source_balance = source_balance
                .checked_sub(request.amount)
                .ok_or_else(balance_overflow)?;
            let new_destination_balance = parse_money(&destination_row.balance, "account balance")?
                .checked_add(request.amount)
                .ok_or_else(balance_overflow)?;

            let duplicate = transactions::Entity::find_by_id(request.id.to_string())
                .one(&db_tx)
                .await?
                .is_some();
            if duplicate {
                return Err(EngineError::ExistingTransfer(request.id));
            }

            let now = Utc::now();
            set_balance(&db_tx, request.source, new_source_balance, now).await?;
            set_balance(&db_tx, request.destination, new_destination_balance, now).await?;

            let transfer = Transfer {
                id: request.id,
                source_account_id: request.source,
                destination_account_id: request.destination,
                amount: request.amount,
                created_at: now,
            };
            // A concurrent transfer with the same id can still win the
            // insert; the primary key rolls this one back.
            let backend = db_tx.get_database_backend();
            let insert = Query::insert()
                .into_table(transactions::Entity)
                .columns([
                    transactions::Column::Id,
                    transactions::Column::SourceAccountId,
                    transactions::Column::DestinationAccountId,
                    transactions::Column::Amount,
                    transactions::Column::CreatedAt,
                ])
                .values([
                    transfer.id.to_string().into(),
                    transfer.source_account_id.into(),
                    transfer.destination_account_id.into(),
                    money_value(backend, transfer.amount),
                    transfer.created_at.into(),
                ])
                .map_err(|err| DbErr::Custom(err.to_string()))?
                .to_owned();
            db_tx
                .execute(backend.build(&insert))
                .await
                .map_err(|err| {
                    map_unique_violation(err, || EngineError::ExistingTransfer(request.id))
                })?;
            Ok(transfer)
        })
    }

    /// Return a ledger record.
    pub async fn transfer_by_id(&self, transaction_id: Uuid) -> ResultEngine<Transfer> {
        let model = transactions::Entity::find_by_id(transaction_id.to_string())
            .one(&self.database)
            .await?
            .ok_or(EngineError::TransferNotFound(transaction_id))?;
        Transfer::try_from(model)
    }

    /// Lists the most recent transfers touching an account, newest first.
    ///
    /// `limit` is clamped to `1..=MAX_HISTORY_LIMIT`.
    pub async fn account_transfers(&self, account_id: i64, limit: u64) -> ResultEngine<Vec<Transfer>> {
        validate_account_id(account_id)?;
        let exists = accounts::Entity::find_by_id(account_id)
            .one(&self.database)
            .await?
            .is_some();
        if !exists {
            return Err(EngineError::not_found(AccountRole::Account, account_id));
        }

        let models = transactions::Entity::find()
            .filter(
                Condition::any()
                    .add(transactions::Column::SourceAccountId.eq(account_id))
                    .add(transactions::Column::DestinationAccountId.eq(account_id)),
            )
            .order_by_desc(transactions::Column::CreatedAt)
            .order_by_desc(transactions::Column::Id)
            .limit(limit.clamp(1, MAX_HISTORY_LIMIT))
            .all(&self.database)
            .await?;

        models.into_iter().map(Transfer::try_from).collect()
    }
}

/// Locking read (`SELECT ... FOR UPDATE`) held until the transaction ends.
async fn lock_account(
    db_tx: &DatabaseTransaction,
    account_id: i64,
) -> ResultEngine<Option<accounts::Model>> {
    Ok(accounts::Entity::find_by_id(account_id)
        .lock_exclusive()
        .one(db_tx)
        .await?)
}

async fn set_balance(
    db_tx: &DatabaseTransaction,
    account_id: i64,
    balance: Money,
    now: DateTime<Utc>,
) -> ResultEngine<()> {
    accounts::Entity::update_many()
        .col_expr(
            accounts::Column::Balance,
            money_value(db_tx.get_database_backend(), balance),
        )
        .col_expr(accounts::Column::UpdatedAt, Expr::value(now))
        .filter(accounts::Column::Id.eq(account_id))
        .exec(db_tx)
        .await?;
    Ok(())
}

fn balance_overflow() -> EngineError {
    EngineError::InvalidAmount("resulting balance is out of range".to_string())
}
