//! SQLite implementation of TransactionRepository.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{CreateTransactionOptions, Transaction, TransactionLine};
use crate::ports::{
    check_overdraft, net_changes, RepositoryError, RepositoryResult, TransactionRepository,
};

/// Embedded-SQL transaction repository.
pub struct SqliteTransactionRepository {
    pool: SqlitePool,
    // SQLite allows one writer; serializing here keeps the overdraft read and
    // the insert in the same view of the data.
    write_lock: Mutex<()>,
}

impl SqliteTransactionRepository {
    /// Opens (creating if needed) the database file and applies migrations.
    pub async fn connect(path: impl AsRef<Path>) -> RepositoryResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;

        let repo = Self::new(pool);
        repo.migrate().await?;
        Ok(repo)
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn migrate(&self) -> RepositoryResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Backend(format!("migration failed: {}", e)))?;
        tracing::debug!("sqlite migrations applied");
        Ok(())
    }
}

#[async_trait]
impl TransactionRepository for SqliteTransactionRepository {
    async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> RepositoryResult<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn create_transaction(
        &self,
        tx: &Transaction,
        opts: CreateTransactionOptions,
    ) -> RepositoryResult<()> {
        let changes = net_changes(tx)?;
        let _writer = self.write_lock.lock().await;
        let mut dbtx = self.pool.begin().await?;

        if !opts.allow_overdraft {
            for (account_id, change) in changes {
                if change >= 0 {
                    continue;
                }
                let balance: i64 = sqlx::query_scalar(
                    "SELECT COALESCE(SUM(amount), 0) FROM transaction_lines WHERE account_id = ?1",
                )
                .bind(account_id)
                .fetch_one(&mut *dbtx)
                .await?;
                check_overdraft(account_id, balance, change)?;
            }
        }

        sqlx::query("INSERT INTO transactions (id, timestamp) VALUES (?1, ?2)")
            .bind(tx.id.to_string())
            .bind(encode_timestamp(&tx.timestamp))
            .execute(&mut *dbtx)
            .await?;

        for (index, line) in tx.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO transaction_lines (transaction_id, line_index, account_id, purpose, amount)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(tx.id.to_string())
            .bind(index as i64)
            .bind(&line.account_id)
            .bind(line.purpose.as_str())
            .bind(line.amount)
            .execute(&mut *dbtx)
            .await?;
        }

        // Dropping `dbtx` on any early return above rolls the whole write back.
        dbtx.commit().await?;
        Ok(())
    }

    async fn get_account_transactions(
        &self,
        account_id: &str,
    ) -> RepositoryResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, LineRow>(
            r#"
            SELECT t.id, t.timestamp, l.account_id, l.purpose, l.amount
            FROM transactions t
            JOIN transaction_lines l ON l.transaction_id = t.id
            WHERE t.id IN (SELECT transaction_id FROM transaction_lines WHERE account_id = ?1)
            ORDER BY t.timestamp DESC, t.id, l.line_index
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        let mut transactions: Vec<Transaction> = Vec::new();
        for row in rows {
            let id = Uuid::parse_str(&row.id)
                .map_err(|e| RepositoryError::Decode(format!("transaction id {}: {}", row.id, e)))?;
            let line = row.line()?;

            match transactions.last_mut() {
                Some(current) if current.id == id => current.lines.push(line),
                _ => transactions.push(Transaction {
                    id,
                    timestamp: decode_timestamp(&row.timestamp)?,
                    lines: vec![line],
                }),
            }
        }

        Ok(transactions)
    }
}

/// Fixed-width UTC text so lexical order in SQL matches time order and the
/// round trip keeps nanoseconds.
fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_timestamp(raw: &str) -> RepositoryResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("timestamp {}: {}", raw, e)))
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct LineRow {
    id: String,
    timestamp: String,
    account_id: String,
    purpose: String,
    amount: i64,
}

impl LineRow {
    fn line(&self) -> RepositoryResult<TransactionLine> {
        let purpose = self
            .purpose
            .parse()
            .map_err(|e| RepositoryError::Decode(format!("{}", e)))?;
        Ok(TransactionLine {
            account_id: self.account_id.clone(),
            purpose,
            amount: self.amount,
        })
    }
}
