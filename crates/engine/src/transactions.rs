//! Ledger primitives.
//!
//! A `Transfer` is the append-only record of one committed movement of funds
//! from a source account to a destination account. It is written in the same
//! database transaction as the two balance updates it causes and is never
//! modified afterwards.

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use uuid::Uuid;

use crate::{
    EngineError, Money,
    util::{parse_money, parse_uuid},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transfer {
    pub id: Uuid,
    pub source_account_id: i64,
    pub destination_account_id: i64,
    pub amount: Money,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub source_account_id: i64,
    pub destination_account_id: i64,
    #[sea_orm(column_type = "Text", select_as = "text")]
    pub amount: String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::accounts::Entity",
        from = "Column::SourceAccountId",
        to = "super::accounts::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Source,
    #[sea_orm(
        belongs_to = "super::accounts::Entity",
        from = "Column::DestinationAccountId",
        to = "super::accounts::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Destination,
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Transfer {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "transaction")?,
            source_account_id: model.source_account_id,
            destination_account_id: model.destination_account_id,
            amount: parse_money(&model.amount, "transfer amount")?,
            created_at: model.created_at,
        })
    }
}
