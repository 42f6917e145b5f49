//! In-memory implementation of TransactionRepository.
//!
//! Intended for tests and local development. Balances are derived from the
//! stored lines on every write.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::domain::{CreateTransactionOptions, Transaction};
use crate::ports::{
    check_overdraft, net_changes, RepositoryError, RepositoryResult, TransactionRepository,
};

#[derive(Debug, Default)]
pub struct InMemoryTransactionRepository {
    transactions: RwLock<Vec<Transaction>>,
    closed: AtomicBool,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> RepositoryResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RepositoryError::Unavailable("repository closed".to_string()));
        }
        Ok(())
    }

    fn balance(transactions: &[Transaction], account_id: &str) -> RepositoryResult<i64> {
        transactions
            .iter()
            .flat_map(|tx| tx.lines.iter())
            .filter(|line| line.account_id == account_id)
            .try_fold(0i64, |acc, line| acc.checked_add(line.amount))
            .ok_or_else(|| {
                RepositoryError::Backend(format!("balance overflow on account {}", account_id))
            })
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn ping(&self) -> RepositoryResult<()> {
        self.ensure_open()
    }

    async fn close(&self) -> RepositoryResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    async fn create_transaction(
        &self,
        tx: &Transaction,
        opts: CreateTransactionOptions,
    ) -> RepositoryResult<()> {
        self.ensure_open()?;
        let changes = net_changes(tx)?;

        // Held across the balance check and the append so both see one state.
        let mut transactions = self.transactions.write().await;

        if transactions.iter().any(|existing| existing.id == tx.id) {
            return Err(RepositoryError::Conflict(tx.id.to_string()));
        }

        if !opts.allow_overdraft {
            for (account_id, change) in changes {
                let balance = Self::balance(&transactions, account_id)?;
                check_overdraft(account_id, balance, change)?;
            }
        }

        transactions.push(tx.clone());
        Ok(())
    }

    async fn get_account_transactions(
        &self,
        account_id: &str,
    ) -> RepositoryResult<Vec<Transaction>> {
        self.ensure_open()?;
        let transactions = self.transactions.read().await;

        let mut matching: Vec<Transaction> = transactions
            .iter()
            .filter(|tx| tx.touches_account(account_id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(matching)
    }
}
