//! Transaction domain entity.
//! Framework-agnostic representation of a ledger transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TransactionPurpose;

/// One leg of a transaction. Positive amounts credit the account, negative
/// amounts debit it. Amounts are minor currency units (cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionLine {
    pub account_id: String,
    pub purpose: TransactionPurpose,
    pub amount: i64,
}

/// Domain entity representing a ledger transaction.
///
/// Once handed to a repository the stored record belongs to the engine; this
/// value is only a copy of what was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub lines: Vec<TransactionLine>,
}

impl Transaction {
    pub fn new(lines: Vec<TransactionLine>) -> Self {
        Self::at(Utc::now(), lines)
    }

    /// Builds a transaction with an explicit timestamp, for backfilled or
    /// historical records.
    pub fn at(timestamp: DateTime<Utc>, lines: Vec<TransactionLine>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            lines,
        }
    }

    pub fn touches_account(&self, account_id: &str) -> bool {
        self.lines.iter().any(|line| line.account_id == account_id)
    }
}

/// Per-request write options handed through to the storage engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionOptions {
    /// Lets the engine take an account below zero, extending credit to the
    /// account holder.
    #[serde(default)]
    pub allow_overdraft: bool,
}
