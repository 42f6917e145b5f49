//! Storage contract the ledger logic depends on.
//!
//! Engines live under `crate::adapters`. The service only ever sees
//! `Arc<dyn TransactionRepository>`, picked once at startup through
//! [`crate::adapters::StorageRegistry`].

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{CreateTransactionOptions, Transaction};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("overdraft not allowed on account {account_id}: balance {balance}, change {change}")]
    OverdraftNotAllowed {
        account_id: String,
        balance: i64,
        change: i64,
    },

    #[error("transaction {0} already exists")]
    Conflict(String),

    #[error("storage error: {0}")]
    Backend(String),

    #[error("corrupt record: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                RepositoryError::Unavailable(err.to_string())
            }
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                RepositoryError::Conflict(db.message().to_string())
            }
            other => RepositoryError::Backend(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for RepositoryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            RepositoryError::Unavailable(err.to_string())
        } else if err.is_decode() {
            RepositoryError::Decode(err.to_string())
        } else {
            RepositoryError::Backend(err.to_string())
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Liveness probe. Must not mutate state.
    async fn ping(&self) -> RepositoryResult<()>;

    /// Releases connections and handles. Safe to call more than once.
    async fn close(&self) -> RepositoryResult<()>;

    /// Persists every line of `tx` or none of them. With
    /// `allow_overdraft == false` the engine refuses a write that would take
    /// any referenced account below zero.
    async fn create_transaction(
        &self,
        tx: &Transaction,
        opts: CreateTransactionOptions,
    ) -> RepositoryResult<()>;

    /// Transactions with at least one line on `account_id`, newest first.
    async fn get_account_transactions(&self, account_id: &str)
        -> RepositoryResult<Vec<Transaction>>;
}

/// Net change per account for a transaction, in first-seen line order.
pub(crate) fn net_changes(tx: &Transaction) -> RepositoryResult<Vec<(&str, i64)>> {
    let mut changes: Vec<(&str, i64)> = Vec::new();
    for line in &tx.lines {
        match changes
            .iter_mut()
            .find(|(account, _)| *account == line.account_id)
        {
            Some((_, total)) => {
                *total = total.checked_add(line.amount).ok_or_else(|| {
                    RepositoryError::Backend(format!(
                        "amount overflow on account {}",
                        line.account_id
                    ))
                })?;
            }
            None => changes.push((line.account_id.as_str(), line.amount)),
        }
    }
    Ok(changes)
}

/// Applies the overdraft rule for one account: only accounts the transaction
/// nets negative on are checked.
pub(crate) fn check_overdraft(account_id: &str, balance: i64, change: i64) -> RepositoryResult<()> {
    if change >= 0 {
        return Ok(());
    }
    match balance.checked_add(change) {
        Some(next) if next >= 0 => Ok(()),
        _ => Err(RepositoryError::OverdraftNotAllowed {
            account_id: account_id.to_string(),
            balance,
            change,
        }),
    }
}
