//! The module contains `Account` struct and its storage model.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

use crate::{EngineError, Money, util::parse_money};

/// A ledger account.
///
/// Accounts are identified by an externally assigned positive integer and hold
/// a balance that never goes below zero. The balance only changes inside a
/// transfer's unit of work.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub id: i64,
    pub balance: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(id: i64, balance: Money, now: DateTime<Utc>) -> Self {
        Self {
            id,
            balance,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    /// Canonical decimal string; read through a text cast on every backend.
    #[sea_orm(column_type = "Text", select_as = "text")]
    pub balance: String,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Account {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let balance = parse_money(&model.balance, "account balance")?;
        if balance.is_negative() {
            return Err(EngineError::Database(DbErr::Custom(format!(
                "account {} has a negative balance",
                model.id
            ))));
        }
        Ok(Self {
            id: model.id,
            balance,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}
