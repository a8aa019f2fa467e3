//! The module contains the errors the engine can return.
//!
//! Every [`EngineError`] maps to exactly one [`ErrorCode`]; the transport
//! layer only needs the code to pick a status. The `Display` text is safe to
//! show to clients, while the fields carried by some variants (account ids,
//! balances) are diagnostics meant for logs.
use std::fmt;

use rust_decimal::Decimal;
use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

/// Machine-readable class of an [`EngineError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    BadRequest,
    NotFound,
    Conflict,
    InsufficientFunds,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::InsufficientFunds => "insufficient_funds",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of an operation referenced a missing account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountRole {
    Source,
    Destination,
    Account,
}

impl fmt::Display for AccountRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => f.write_str("source account"),
            Self::Destination => f.write_str("destination account"),
            Self::Account => f.write_str("account"),
        }
    }
}

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("same account transfer")]
    SameAccount,
    #[error("invalid decimal amount: {0}")]
    InvalidDecimal(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("invalid account id: {0}")]
    InvalidAccountId(i64),
    #[error("{role} not found")]
    AccountNotFound { role: AccountRole, account_id: i64 },
    #[error("transaction not found")]
    TransferNotFound(Uuid),
    #[error("account already exists")]
    ExistingAccount(i64),
    #[error("transaction already exists")]
    ExistingTransfer(Uuid),
    #[error("insufficient funds")]
    InsufficientFunds {
        account_id: i64,
        balance: Decimal,
        amount: Decimal,
    },
    #[error("transaction timed out")]
    Timeout,
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl EngineError {
    pub(crate) fn not_found(role: AccountRole, account_id: i64) -> Self {
        Self::AccountNotFound { role, account_id }
    }

    /// The class of this error. The mapping is total: adding a variant
    /// without a code does not compile.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::SameAccount
            | Self::InvalidDecimal(_)
            | Self::InvalidAmount(_)
            | Self::InvalidAccountId(_) => ErrorCode::BadRequest,
            Self::AccountNotFound { .. } | Self::TransferNotFound(_) => ErrorCode::NotFound,
            Self::ExistingAccount(_) | Self::ExistingTransfer(_) => ErrorCode::Conflict,
            Self::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
            Self::Timeout | Self::Database(_) => ErrorCode::Internal,
        }
    }
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::SameAccount, Self::SameAccount) | (Self::Timeout, Self::Timeout) => true,
            (Self::InvalidDecimal(a), Self::InvalidDecimal(b)) => a == b,
            (Self::InvalidAmount(a), Self::InvalidAmount(b)) => a == b,
            (Self::InvalidAccountId(a), Self::InvalidAccountId(b)) => a == b,
            (
                Self::AccountNotFound {
                    role: ra,
                    account_id: a,
                },
                Self::AccountNotFound {
                    role: rb,
                    account_id: b,
                },
            ) => ra == rb && a == b,
            (Self::TransferNotFound(a), Self::TransferNotFound(b)) => a == b,
            (Self::ExistingAccount(a), Self::ExistingAccount(b)) => a == b,
            (Self::ExistingTransfer(a), Self::ExistingTransfer(b)) => a == b,
            (
                Self::InsufficientFunds {
                    account_id: ia,
                    balance: ba,
                    amount: aa,
                },
                Self::InsufficientFunds {
                    account_id: ib,
                    balance: bb,
                    amount: ab,
                },
            ) => ia == ib && ba == bb && aa == ab,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
