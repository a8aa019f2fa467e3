use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error body returned by every failing endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    /// Machine-readable code (`bad_request`, `not_found`, `conflict`,
    /// `insufficient_funds`, `internal`).
    pub code: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
}

pub mod account {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    pub struct AccountNew {
        pub account_id: i64,
        /// Decimal string, e.g. `"100.00"`.
        pub initial_balance: String,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct AccountView {
        pub account_id: i64,
        /// Exact decimal string, trailing zeros stripped.
        pub balance: String,
        pub created_at: DateTime<Utc>,
        pub updated_at: DateTime<Utc>,
    }
}

pub mod transaction {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    pub struct TransferNew {
        pub source_account_id: i64,
        pub destination_account_id: i64,
        /// Decimal string, strictly positive, at most 8 fractional digits.
        pub amount: String,
        /// Optional client-chosen ledger id. Generated when absent.
        #[serde(default)]
        pub transaction_id: Option<Uuid>,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TransferCreated {
        pub transaction_id: Uuid,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TransferView {
        pub transaction_id: Uuid,
        pub source_account_id: i64,
        pub destination_account_id: i64,
        pub amount: String,
        pub created_at: DateTime<Utc>,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TransferList {
        pub transactions: Vec<TransferView>,
    }

    /// Query string of `GET /accounts/{id}/transactions`.
    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct HistoryQuery {
        pub limit: Option<u64>,
    }
}
