//! Ledger engine: accounts, fund transfers and idempotency storage.
//!
//! Balances live in the `accounts` table and are only changed by
//! [`Engine::transfer`], which debits the source, credits the destination and
//! appends the ledger row in one database transaction. Row locks are taken in
//! ascending account id order, so opposite transfers between the same pair of
//! accounts cannot deadlock.

pub use accounts::Account;
pub use commands::{NewAccountCmd, TransferCmd};
pub use error::{AccountRole, EngineError, ErrorCode};
pub use idempotency::{
    CachedResponse, DbIdempotencyStore, IdempotencyStore, IdempotencySweeper, MAX_BODY_BYTES,
    MAX_KEY_LEN,
};
pub use money::Money;
pub use ops::{Engine, EngineBuilder, MAX_HISTORY_LIMIT};
pub use transactions::Transfer;

mod accounts;
mod commands;
mod error;
mod idempotency;
mod money;
mod ops;
mod transactions;
mod util;

type ResultEngine<T> = Result<T, EngineError>;
