//! Remote ledger implementation of TransactionRepository.
//!
//! Talks to a QLedger-style REST service. Line purposes and write options do
//! not fit the remote line shape, so they ride along in the transaction's
//! free-form `data` map.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;
use uuid::Uuid;

use crate::domain::{CreateTransactionOptions, Transaction, TransactionLine, TransactionPurpose};
use crate::ports::{
    check_overdraft, net_changes, RepositoryError, RepositoryResult, TransactionRepository,
};

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RemoteTransaction {
    id: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    data: RemoteData,
    lines: Vec<RemoteLine>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RemoteData {
    #[serde(default)]
    purposes: Vec<TransactionPurpose>,
    #[serde(default)]
    allow_overdraft: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RemoteLine {
    account: String,
    delta: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct RemoteAccount {
    balance: i64,
}

impl RemoteTransaction {
    fn from_domain(tx: &Transaction, opts: CreateTransactionOptions) -> Self {
        Self {
            id: tx.id.to_string(),
            timestamp: tx.timestamp,
            data: RemoteData {
                purposes: tx.lines.iter().map(|line| line.purpose).collect(),
                allow_overdraft: opts.allow_overdraft,
            },
            lines: tx
                .lines
                .iter()
                .map(|line| RemoteLine {
                    account: line.account_id.clone(),
                    delta: line.amount,
                })
                .collect(),
        }
    }

    fn into_domain(self) -> RepositoryResult<Transaction> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Decode(format!("transaction id {}: {}", self.id, e)))?;

        if self.data.purposes.len() != self.lines.len() {
            return Err(RepositoryError::Decode(format!(
                "transaction {} has {} lines but {} purposes",
                self.id,
                self.lines.len(),
                self.data.purposes.len()
            )));
        }

        let lines = self
            .lines
            .into_iter()
            .zip(self.data.purposes)
            .map(|(line, purpose)| TransactionLine {
                account_id: line.account,
                purpose,
                amount: line.delta,
            })
            .collect();

        Ok(Transaction {
            id,
            timestamp: self.timestamp,
            lines,
        })
    }
}

/// Repository backed by a remote ledger reached over HTTP.
///
/// Calls are never retried here. A circuit breaker fails fast with
/// `Unavailable` once the remote has failed repeatedly.
///
/// The remote applies lines without a balance rule, so the overdraft check is
/// a balance read followed by a separate write. Writes through one repository
/// (and its clones) are serialized, which makes check-then-write atomic within
/// this process. Two service instances writing to the same remote accounts can
/// still both pass the check; run a single writer per ledger when overdraft
/// protection must hold.
#[derive(Clone)]
pub struct QLedgerTransactionRepository {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
    circuit_breaker: Breaker,
    write_lock: Arc<Mutex<()>>,
}

impl QLedgerTransactionRepository {
    pub fn new(endpoint: &str, auth_token: Option<String>) -> RepositoryResult<Self> {
        Self::with_circuit_breaker(endpoint, auth_token, 3, 60)
    }

    pub fn with_circuit_breaker(
        endpoint: &str,
        auth_token: Option<String>,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> RepositoryResult<Self> {
        let base_url = Url::parse(endpoint)
            .map_err(|e| RepositoryError::Backend(format!("invalid endpoint {}: {}", endpoint, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(RepositoryError::Backend(format!(
                "invalid endpoint {}: not a base URL",
                endpoint
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        Ok(Self {
            client,
            base_url,
            auth_token: auth_token.filter(|token| !token.is_empty()),
            circuit_breaker,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Returns the current state of the circuit breaker.
    pub fn circuit_state(&self) -> &'static str {
        if self.circuit_breaker.is_call_permitted() {
            "closed"
        } else {
            "open"
        }
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // `cannot_be_a_base` was rejected at construction.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let builder = self.client.request(method, self.url(segments));
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn guarded<T, F>(&self, call: F) -> RepositoryResult<T>
    where
        F: std::future::Future<Output = RepositoryResult<T>>,
    {
        // Business rejections say nothing about remote health.
        let is_failure = |e: &RepositoryError| {
            matches!(
                e,
                RepositoryError::Unavailable(_) | RepositoryError::Backend(_)
            )
        };

        match self.circuit_breaker.call_with(is_failure, call).await {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(RepositoryError::Unavailable(
                "remote ledger circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    async fn account_balance(&self, account_id: &str) -> RepositoryResult<i64> {
        let response = self
            .request(Method::GET, &["v1", "accounts", account_id])
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(0),
            status if status.is_success() => Ok(response.json::<RemoteAccount>().await?.balance),
            status => Err(status_error(status, "account lookup")),
        }
    }

    async fn post_transaction(
        &self,
        tx: &Transaction,
        opts: CreateTransactionOptions,
    ) -> RepositoryResult<()> {
        let _writer = self.write_lock.lock().await;

        if !opts.allow_overdraft {
            for (account_id, change) in net_changes(tx)? {
                if change < 0 {
                    let balance = self.account_balance(account_id).await?;
                    check_overdraft(account_id, balance, change)?;
                }
            }
        }

        let response = self
            .request(Method::POST, &["v1", "transactions"])
            .json(&RemoteTransaction::from_domain(tx, opts))
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT => Err(RepositoryError::Conflict(tx.id.to_string())),
            status if status.is_success() => Ok(()),
            status => Err(status_error(status, "create transaction")),
        }
    }

    async fn search_transactions(&self, account_id: &str) -> RepositoryResult<Vec<Transaction>> {
        let query = json!({
            "query": {
                "must": {
                    "terms": [{ "account": account_id }]
                }
            }
        });

        let response = self
            .request(Method::GET, &["v1", "transactions", "_search"])
            .json(&query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, "search transactions"));
        }

        let mut transactions = response
            .json::<Vec<RemoteTransaction>>()
            .await?
            .into_iter()
            .map(RemoteTransaction::into_domain)
            .collect::<RepositoryResult<Vec<_>>>()?;
        transactions.retain(|tx| tx.touches_account(account_id));
        transactions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(transactions)
    }
}

fn status_error(status: StatusCode, action: &str) -> RepositoryError {
    if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::GATEWAY_TIMEOUT {
        RepositoryError::Unavailable(format!("{} returned {}", action, status))
    } else {
        RepositoryError::Backend(format!("{} returned {}", action, status))
    }
}

#[async_trait]
impl TransactionRepository for QLedgerTransactionRepository {
    async fn ping(&self) -> RepositoryResult<()> {
        let response = self
            .request(Method::GET, &["ping"])
            .send()
            .await
            .map_err(|e| RepositoryError::Unavailable(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(RepositoryError::Unavailable(format!(
                "ping returned {}",
                response.status()
            )))
        }
    }

    async fn close(&self) -> RepositoryResult<()> {
        // reqwest releases pooled connections when the client drops.
        Ok(())
    }

    async fn create_transaction(
        &self,
        tx: &Transaction,
        opts: CreateTransactionOptions,
    ) -> RepositoryResult<()> {
        self.guarded(self.post_transaction(tx, opts)).await
    }

    async fn get_account_transactions(
        &self,
        account_id: &str,
    ) -> RepositoryResult<Vec<Transaction>> {
        self.guarded(self.search_transactions(account_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use mockito::Matcher;

    fn line(account_id: &str, purpose: TransactionPurpose, amount: i64) -> TransactionLine {
        TransactionLine {
            account_id: account_id.to_string(),
            purpose,
            amount,
        }
    }

    #[test]
    fn rejects_invalid_endpoint() {
        assert!(QLedgerTransactionRepository::new("not a url", None).is_err());
        assert!(QLedgerTransactionRepository::new("mailto:ops@example.com", None).is_err());
    }

    #[test]
    fn builds_urls_with_escaped_segments() {
        let repo = QLedgerTransactionRepository::new("http://ledger.local/api/", None).unwrap();
        let url = repo.url(&["v1", "accounts", "a/b c"]);
        assert_eq!(url.as_str(), "http://ledger.local/api/v1/accounts/a%2Fb%20c");
    }

    #[test]
    fn circuit_starts_closed() {
        let repo = QLedgerTransactionRepository::new("http://ledger.local", None).unwrap();
        assert_eq!(repo.circuit_state(), "closed");
    }

    #[tokio::test]
    async fn ping_reports_remote_status() {
        let mut server = mockito::Server::new_async().await;
        let ok = server.mock("GET", "/ping").with_status(200).create_async().await;

        let repo = QLedgerTransactionRepository::new(&server.url(), None).unwrap();
        repo.ping().await.unwrap();
        ok.assert_async().await;

        let mut failing = mockito::Server::new_async().await;
        failing.mock("GET", "/ping").with_status(500).create_async().await;
        let repo = QLedgerTransactionRepository::new(&failing.url(), None).unwrap();
        assert!(matches!(repo.ping().await, Err(RepositoryError::Unavailable(_))));
    }

    #[tokio::test]
    async fn posts_transaction_with_auth_and_purposes() {
        let mut server = mockito::Server::new_async().await;
        let tx = Transaction::new(vec![
            line("acct-a", TransactionPurpose::AchCredit, 4121),
            line("acct-b", TransactionPurpose::AchDebit, -4121),
        ]);

        let create = server
            .mock("POST", "/v1/transactions")
            .match_header("authorization", "Bearer secret")
            .match_body(Matcher::PartialJson(json!({
                "id": tx.id.to_string(),
                "lines": [
                    { "account": "acct-a", "delta": 4121 },
                    { "account": "acct-b", "delta": -4121 }
                ],
                "data": { "purposes": ["achcredit", "achdebit"], "allow_overdraft": true }
            })))
            .with_status(201)
            .create_async()
            .await;

        let repo =
            QLedgerTransactionRepository::new(&server.url(), Some("secret".to_string())).unwrap();
        repo.create_transaction(&tx, CreateTransactionOptions { allow_overdraft: true })
            .await
            .unwrap();
        create.assert_async().await;
    }

    #[tokio::test]
    async fn overdraft_is_checked_before_writing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/accounts/acct-b")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"acct-b","balance":100}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/v1/transactions")
            .with_status(201)
            .expect(0)
            .create_async()
            .await;

        let repo = QLedgerTransactionRepository::new(&server.url(), None).unwrap();
        let tx = Transaction::new(vec![line("acct-b", TransactionPurpose::Wire, -250)]);
        let err = repo
            .create_transaction(&tx, CreateTransactionOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RepositoryError::OverdraftNotAllowed { balance: 100, change: -250, .. }
        ));
        create.assert_async().await;
        assert_eq!(repo.circuit_state(), "closed");
    }

    #[tokio::test]
    async fn concurrent_debits_see_each_others_writes() {
        use std::sync::atomic::{AtomicI64, Ordering};

        let mut server = mockito::Server::new_async().await;
        let balance = Arc::new(AtomicI64::new(100));

        let current = balance.clone();
        server
            .mock("GET", "/v1/accounts/acct-b")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body_from_request(move |_| {
                format!(r#"{{"id":"acct-b","balance":{}}}"#, current.load(Ordering::SeqCst)).into()
            })
            .create_async()
            .await;
        let applied = balance.clone();
        server
            .mock("POST", "/v1/transactions")
            .with_status(201)
            .with_body_from_request(move |_| {
                applied.fetch_sub(80, Ordering::SeqCst);
                Vec::new()
            })
            .create_async()
            .await;

        let repo = QLedgerTransactionRepository::new(&server.url(), None).unwrap();
        let other = repo.clone();
        let first = Transaction::new(vec![line("acct-b", TransactionPurpose::Wire, -80)]);
        let second = Transaction::new(vec![line("acct-b", TransactionPurpose::Wire, -80)]);

        let (a, b) = tokio::join!(
            repo.create_transaction(&first, CreateTransactionOptions::default()),
            other.create_transaction(&second, CreateTransactionOptions::default()),
        );

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(RepositoryError::OverdraftNotAllowed { balance: 20, .. }))));
        assert_eq!(balance.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn unknown_remote_account_counts_as_zero_balance() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/accounts/fresh")
            .with_status(404)
            .create_async()
            .await;

        let repo = QLedgerTransactionRepository::new(&server.url(), None).unwrap();
        let tx = Transaction::new(vec![line("fresh", TransactionPurpose::Fee, -1)]);
        let err = repo
            .create_transaction(&tx, CreateTransactionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::OverdraftNotAllowed { balance: 0, .. }
        ));
    }

    #[tokio::test]
    async fn search_decodes_and_orders_newest_first() {
        let mut server = mockito::Server::new_async().await;
        let older = Transaction::at(
            Utc::now() - ChronoDuration::hours(48),
            vec![line("acct-a", TransactionPurpose::Transfer, 5331)],
        );
        let newer = Transaction::at(
            Utc::now() - ChronoDuration::hours(24),
            vec![line("acct-a", TransactionPurpose::Transfer, 13412)],
        );
        let body = serde_json::to_string(&vec![
            RemoteTransaction::from_domain(&older, CreateTransactionOptions::default()),
            RemoteTransaction::from_domain(&newer, CreateTransactionOptions::default()),
        ])
        .unwrap();

        server
            .mock("GET", "/v1/transactions/_search")
            .match_body(Matcher::PartialJson(json!({
                "query": { "must": { "terms": [{ "account": "acct-a" }] } }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;

        let repo = QLedgerTransactionRepository::new(&server.url(), None).unwrap();
        let found = repo.get_account_transactions("acct-a").await.unwrap();
        assert_eq!(found, vec![newer, older]);
    }

    #[tokio::test]
    async fn unavailable_remote_surfaces_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let create = server
            .mock("POST", "/v1/transactions")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        let repo = QLedgerTransactionRepository::new(&server.url(), None).unwrap();
        let tx = Transaction::new(vec![line("acct-a", TransactionPurpose::Interest, 10)]);
        let err = repo
            .create_transaction(&tx, CreateTransactionOptions { allow_overdraft: true })
            .await
            .unwrap_err();

        assert!(matches!(err, RepositoryError::Unavailable(_)));
        create.assert_async().await;
    }

    #[tokio::test]
    async fn circuit_opens_after_repeated_failures() {
        let mut server = mockito::Server::new_async().await;
        let search = server
            .mock("GET", "/v1/transactions/_search")
            .with_status(500)
            .expect(2)
            .create_async()
            .await;

        let repo =
            QLedgerTransactionRepository::with_circuit_breaker(&server.url(), None, 2, 60).unwrap();
        for _ in 0..2 {
            assert!(matches!(
                repo.get_account_transactions("acct-a").await,
                Err(RepositoryError::Backend(_))
            ));
        }

        let err = repo.get_account_transactions("acct-a").await.unwrap_err();
        assert!(matches!(err, RepositoryError::Unavailable(_)));
        assert_eq!(repo.circuit_state(), "open");
        search.assert_async().await;
    }
}
