//! Command structs for engine write operations.
//!
//! Amounts travel as the decimal strings received from clients; parsing and
//! validation happen inside the engine so every caller gets the same rules.

use uuid::Uuid;

/// Create an account with a starting balance.
#[derive(Clone, Debug)]
pub struct NewAccountCmd {
    pub account_id: i64,
    pub initial_balance: String,
}

impl NewAccountCmd {
    #[must_use]
    pub fn new(account_id: i64, initial_balance: impl Into<String>) -> Self {
        Self {
            account_id,
            initial_balance: initial_balance.into(),
        }
    }
}

/// Move `amount` from the source account to the destination account.
#[derive(Clone, Debug)]
pub struct TransferCmd {
    pub source_account_id: i64,
    pub destination_account_id: i64,
    pub amount: String,
    /// Ledger id to use; generated when `None`.
    pub transaction_id: Option<Uuid>,
}

impl TransferCmd {
    #[must_use]
    pub fn new(
        source_account_id: i64,
        destination_account_id: i64,
        amount: impl Into<String>,
    ) -> Self {
        Self {
            source_account_id,
            destination_account_id,
            amount: amount.into(),
            transaction_id: None,
        }
    }

    #[must_use]
    pub fn transaction_id(mut self, id: Uuid) -> Self {
        self.transaction_id = Some(id);
        self
    }
}
