#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use general_ledger::adapters::InMemoryTransactionRepository;
use general_ledger::domain::{CreateTransactionOptions, Transaction};
use general_ledger::health::{DependencyChecker, StorageChecker};
use general_ledger::idempotency::InMemoryRecorder;
use general_ledger::ports::{RepositoryError, RepositoryResult, TransactionRepository};
use general_ledger::services::TransactionService;
use general_ledger::{create_app, AppState};

pub const USER_ID: &str = "user-1";

/// Serves the app on an ephemeral port and returns its base URL.
pub async fn spawn_app(repository: Arc<dyn TransactionRepository>) -> String {
    let service = Arc::new(TransactionService::new(
        repository.clone(),
        Arc::new(InMemoryRecorder::new()),
    ));
    let checkers: Vec<Arc<dyn DependencyChecker>> =
        vec![Arc::new(StorageChecker::new(repository))];
    let app = create_app(AppState::new(service, checkers));

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], 0));
    let server = axum::Server::bind(&addr).serve(app.into_make_service());
    let actual_addr = server.local_addr();

    tokio::spawn(async move {
        server.await.unwrap();
    });

    format!("http://{}", actual_addr)
}

pub async fn spawn_memory_app() -> String {
    spawn_app(Arc::new(InMemoryTransactionRepository::new())).await
}

/// Delegates reads to an in-memory ledger and fails every write.
pub struct FailingWrites {
    inner: InMemoryTransactionRepository,
}

impl FailingWrites {
    pub fn new() -> Self {
        Self {
            inner: InMemoryTransactionRepository::new(),
        }
    }
}

#[async_trait]
impl TransactionRepository for FailingWrites {
    async fn ping(&self) -> RepositoryResult<()> {
        self.inner.ping().await
    }

    async fn close(&self) -> RepositoryResult<()> {
        self.inner.close().await
    }

    async fn create_transaction(
        &self,
        _tx: &Transaction,
        _options: CreateTransactionOptions,
    ) -> RepositoryResult<()> {
        Err(RepositoryError::Backend("disk full".to_string()))
    }

    async fn get_account_transactions(&self, account_id: &str) -> RepositoryResult<Vec<Transaction>> {
        self.inner.get_account_transactions(account_id).await
    }
}

/// Counts every call that reaches storage.
pub struct CountingRepository {
    inner: InMemoryTransactionRepository,
    pub creates: AtomicUsize,
}

impl CountingRepository {
    pub fn new() -> Self {
        Self {
            inner: InMemoryTransactionRepository::new(),
            creates: AtomicUsize::new(0),
        }
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionRepository for CountingRepository {
    async fn ping(&self) -> RepositoryResult<()> {
        self.inner.ping().await
    }

    async fn close(&self) -> RepositoryResult<()> {
        self.inner.close().await
    }

    async fn create_transaction(
        &self,
        tx: &Transaction,
        options: CreateTransactionOptions,
    ) -> RepositoryResult<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_transaction(tx, options).await
    }

    async fn get_account_transactions(&self, account_id: &str) -> RepositoryResult<Vec<Transaction>> {
        self.inner.get_account_transactions(account_id).await
    }
}
