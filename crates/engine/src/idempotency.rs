//! Storage for replayable responses keyed by a client idempotency key.
//!
//! The store knows nothing about transfers: it keeps the status and body a
//! mutating request produced the first time, so a retry with the same key can
//! be answered without running the operation again.
//!
//! - at most one record per key, the first write wins;
//! - records are never updated, only swept once older than the TTL;
//! - a record that is past its TTL but not swept yet is still served.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveValue, DatabaseConnection, QueryFilter, entity::prelude::*, sea_query::OnConflict,
};

use crate::{EngineError, ResultEngine};

pub use sweeper::IdempotencySweeper;

mod sweeper;

/// Longest accepted idempotency key, in characters.
pub const MAX_KEY_LEN: usize = 255;
/// Largest response body that is cached. Bigger responses are reprocessed on
/// every retry.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// A response captured on the first execution of a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Storage contract used by the idempotency layer.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Returns the cached response for `key`, regardless of its age.
    async fn get(&self, key: &str) -> ResultEngine<Option<CachedResponse>>;

    /// Stores `response` unless `key` is already present.
    ///
    /// Returns `true` when this call inserted the record.
    async fn store(&self, key: &str, response: &CachedResponse) -> ResultEngine<bool>;

    /// Deletes records created before `older_than`; returns how many.
    async fn delete_expired(&self, older_than: DateTime<Utc>) -> ResultEngine<u64>;
}

/// [`IdempotencyStore`] backed by the `idempotency_keys` table.
#[derive(Clone, Debug)]
pub struct DbIdempotencyStore {
    database: DatabaseConnection,
}

impl DbIdempotencyStore {
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }
}

#[async_trait]
impl IdempotencyStore for DbIdempotencyStore {
    async fn get(&self, key: &str) -> ResultEngine<Option<CachedResponse>> {
        Entity::find_by_id(key.to_string())
            .one(&self.database)
            .await?
            .map(CachedResponse::try_from)
            .transpose()
    }

    async fn store(&self, key: &str, response: &CachedResponse) -> ResultEngine<bool> {
        let model = ActiveModel {
            idempotency_key: ActiveValue::Set(key.to_string()),
            status_code: ActiveValue::Set(i32::from(response.status)),
            body: ActiveValue::Set(response.body.clone()),
            content_type: ActiveValue::Set(response.content_type.clone()),
            created_at: ActiveValue::Set(response.created_at),
        };
        let inserted = Entity::insert(model)
            .on_conflict(
                OnConflict::column(Column::IdempotencyKey)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.database)
            .await?;
        Ok(inserted > 0)
    }

    async fn delete_expired(&self, older_than: DateTime<Utc>) -> ResultEngine<u64> {
        let result = Entity::delete_many()
            .filter(Column::CreatedAt.lt(older_than))
            .exec(&self.database)
            .await?;
        Ok(result.rows_affected)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "idempotency_keys")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub idempotency_key: String,
    pub status_code: i32,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for CachedResponse {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let status = u16::try_from(model.status_code).map_err(|_| {
            EngineError::Database(DbErr::Custom(format!(
                "invalid cached status code: {}",
                model.status_code
            )))
        })?;
        Ok(Self {
            status,
            body: model.body,
            content_type: model.content_type,
            created_at: model.created_at,
        })
    }
}
