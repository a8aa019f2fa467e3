//! Internal helpers for validation and storage mapping.
//!
//! These utilities are **not** part of the public API. They centralize
//! validation and mapping logic so the engine enforces consistent invariants.

use sea_orm::{
    DbBackend, DbErr, SqlErr,
    sea_query::{Expr, SimpleExpr},
};
use uuid::Uuid;

use crate::{EngineError, Money, ResultEngine};

/// Account identifiers are externally assigned and must be positive.
pub(crate) fn validate_account_id(account_id: i64) -> ResultEngine<()> {
    if account_id <= 0 {
        return Err(EngineError::InvalidAccountId(account_id));
    }
    Ok(())
}

/// Parse a UUID read back from storage.
pub(crate) fn parse_uuid(value: &str, label: &str) -> ResultEngine<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| EngineError::Database(DbErr::Custom(format!("invalid {label} id: {value}"))))
}

/// Parse a money column read back as text.
pub(crate) fn parse_money(value: &str, label: &str) -> ResultEngine<Money> {
    value
        .parse()
        .map_err(|_| EngineError::Database(DbErr::Custom(format!("invalid {label}: {value}"))))
}

/// Bind a money value for a write.
///
/// Postgres gets an exact `NUMERIC`. Any other backend gets the canonical
/// string, since binding a decimal there goes through `f64`.
pub(crate) fn money_value(backend: DbBackend, amount: Money) -> SimpleExpr {
    match backend {
        DbBackend::Postgres => Expr::val(amount.to_decimal()).into(),
        _ => Expr::val(amount.to_string()).into(),
    }
}

/// Map a unique-constraint violation to `conflict`, any other failure to a
/// database error.
pub(crate) fn map_unique_violation(err: DbErr, conflict: impl FnOnce() -> EngineError) -> EngineError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => conflict(),
        _ => EngineError::Database(err),
    }
}
