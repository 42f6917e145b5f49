//! Create and read ledger transactions.
//!
//! A create request moves through: idempotency check, validation, persist.
//! The idempotency key is marked as soon as it is checked, so a request that
//! later fails validation or storage still burns its key; clients retry with
//! a new key.

use std::sync::Arc;

use crate::context::RequestContext;
use crate::domain::Transaction;
use crate::error::AppError;
use crate::idempotency::IdempotencyRecorder;
use crate::ports::TransactionRepository;
use crate::schemas::CreateTransactionRequest;
use crate::validation::{self, ValidationResult};

pub struct TransactionService {
    repository: Arc<dyn TransactionRepository>,
    recorder: Arc<dyn IdempotencyRecorder>,
}

impl TransactionService {
    pub fn new(
        repository: Arc<dyn TransactionRepository>,
        recorder: Arc<dyn IdempotencyRecorder>,
    ) -> Self {
        Self {
            repository,
            recorder,
        }
    }

    /// `request` is the decoded body, or the reason it could not be decoded.
    /// Either way the idempotency key is checked and marked first.
    #[tracing::instrument(
        name = "create_transaction",
        skip(self, ctx, request),
        fields(user_id = %ctx.user_id)
    )]
    pub async fn create_transaction(
        &self,
        ctx: &RequestContext,
        request: ValidationResult<CreateTransactionRequest>,
    ) -> Result<Transaction, AppError> {
        match &ctx.idempotency_key {
            Some(key) => {
                if self.recorder.seen_before(key).await {
                    tracing::info!(idempotency_key = %key, "duplicate request rejected");
                    return Err(AppError::DuplicateRequest(key.to_string()));
                }
            }
            None => tracing::debug!("no idempotency key supplied, skipping duplicate check"),
        }

        let (tx, options) = request
            .and_then(|request| {
                validation::build_transaction(&request).map(|tx| (tx, request.options))
            })
            .map_err(|e| {
                tracing::info!(kind = e.kind(), "transaction rejected: {}", e);
                e
            })?;

        self.repository
            .create_transaction(&tx, options)
            .await
            .map_err(|e| {
                tracing::warn!(transaction_id = %tx.id, "failed to store transaction: {}", e);
                e
            })?;

        tracing::info!(
            transaction_id = %tx.id,
            allow_overdraft = options.allow_overdraft,
            "transaction created"
        );
        Ok(tx)
    }

    #[tracing::instrument(name = "get_account_transactions", skip(self, ctx), fields(user_id = %ctx.user_id))]
    pub async fn get_account_transactions(
        &self,
        ctx: &RequestContext,
        account_id: &str,
    ) -> Result<Vec<Transaction>, AppError> {
        validation::validate_account_id("accountId".to_string(), account_id)?;

        let transactions = self.repository.get_account_transactions(account_id).await?;
        tracing::debug!(count = transactions.len(), "loaded account transactions");
        Ok(transactions)
    }
}
