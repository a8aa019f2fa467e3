use std::time::Duration;

use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr, IsolationLevel,
    TransactionTrait,
};

use crate::{EngineError, ResultEngine};

mod accounts;
mod transfers;

pub use transfers::MAX_HISTORY_LIMIT;

/// Run a block inside a DB transaction, committing on success and rolling
/// back on error.
///
/// The body runs in its own async block, so `?` and `return` inside it land
/// on the rollback path instead of leaving the transaction to be dropped.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = $self.begin().await?;
        let result: $crate::ResultEngine<_> = async { $body }.await;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = $tx.rollback().await {
                    tracing::error!(error = %rollback_err, "failed to roll back transaction");
                }
                Err(err)
            }
        }
    }};
}

pub(crate) use with_tx;

/// Account and transfer operations over a relational store.
///
/// Construct it once at startup and share it (`Arc<Engine>`); it holds no
/// state besides the connection pool, so every correctness decision is made
/// on rows read inside the current database transaction.
#[derive(Debug)]
pub struct Engine {
    database: DatabaseConnection,
    transfer_timeout: Option<Duration>,
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Check that the database answers.
    pub async fn ping(&self) -> ResultEngine<()> {
        self.database.ping().await?;
        Ok(())
    }

    /// Open a unit of work at READ COMMITTED.
    ///
    /// SQLite has no per-transaction isolation levels (writers are
    /// serialized), so the level is only requested from other backends.
    async fn begin(&self) -> ResultEngine<DatabaseTransaction> {
        let isolation = match self.database.get_database_backend() {
            DbBackend::Sqlite => None,
            _ => Some(IsolationLevel::ReadCommitted),
        };
        Ok(self.database.begin_with_config(isolation, None).await?)
    }
}

/// The builder for `Engine`
#[derive(Default)]
pub struct EngineBuilder {
    database: Option<DatabaseConnection>,
    transfer_timeout: Option<Duration>,
}

impl EngineBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> EngineBuilder {
        self.database = Some(db);
        self
    }

    /// Upper bound for one transfer's unit of work, lock waits included.
    ///
    /// When it elapses the transaction is dropped (and so rolled back) and
    /// the transfer fails with [`EngineError::Timeout`].
    pub fn transfer_timeout(mut self, timeout: Duration) -> EngineBuilder {
        self.transfer_timeout = Some(timeout);
        self
    }

    /// Construct `Engine`
    pub async fn build(self) -> ResultEngine<Engine> {
        let database = self.database.ok_or_else(|| {
            EngineError::Database(DbErr::Custom("missing database connection".to_string()))
        })?;
        database.ping().await?;
        Ok(Engine {
            database,
            transfer_timeout: self.transfer_timeout,
        })
    }
}
