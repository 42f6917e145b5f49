use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::idempotency::RedisRecorder;
use crate::ports::TransactionRepository;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: HashMap<String, DependencyStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyStatus {
    Healthy { status: String, latency_ms: u64 },
    Unhealthy { status: String, error: String },
}

impl DependencyStatus {
    fn healthy(start: Instant) -> Self {
        DependencyStatus::Healthy {
            status: "healthy".to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn unhealthy(error: impl ToString) -> Self {
        DependencyStatus::Unhealthy {
            status: "unhealthy".to_string(),
            error: error.to_string(),
        }
    }
}

#[async_trait]
pub trait DependencyChecker: Send + Sync {
    fn name(&self) -> &'static str;

    /// A failing critical dependency makes the whole service unhealthy; any
    /// other failure only degrades it.
    fn critical(&self) -> bool {
        false
    }

    async fn check(&self) -> DependencyStatus;
}

pub struct StorageChecker {
    repository: Arc<dyn TransactionRepository>,
}

impl StorageChecker {
    pub fn new(repository: Arc<dyn TransactionRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl DependencyChecker for StorageChecker {
    fn name(&self) -> &'static str {
        "storage"
    }

    fn critical(&self) -> bool {
        true
    }

    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match self.repository.ping().await {
            Ok(()) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e),
        }
    }
}

pub struct RedisChecker {
    recorder: RedisRecorder,
}

impl RedisChecker {
    pub fn new(recorder: RedisRecorder) -> Self {
        Self { recorder }
    }
}

#[async_trait]
impl DependencyChecker for RedisChecker {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match self.recorder.ping().await {
            Ok(()) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e),
        }
    }
}

pub async fn check_health(
    checkers: &[Arc<dyn DependencyChecker>],
    start_time: Instant,
) -> HealthResponse {
    let results = join_all(checkers.iter().map(|checker| async move {
        let status = timeout(CHECK_TIMEOUT, checker.check())
            .await
            .unwrap_or_else(|_| DependencyStatus::unhealthy("timeout"));
        (checker.name(), checker.critical(), status)
    }))
    .await;

    let overall_status = determine_overall_status(
        results
            .iter()
            .map(|(_, critical, status)| (*critical, status)),
    );

    let dependencies = results
        .into_iter()
        .map(|(name, _, status)| (name.to_string(), status))
        .collect();

    HealthResponse {
        status: overall_status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: start_time.elapsed().as_secs(),
        dependencies,
    }
}

fn determine_overall_status<'a>(
    dependencies: impl Iterator<Item = (bool, &'a DependencyStatus)>,
) -> String {
    let mut has_critical_failure = false;
    let mut has_non_critical_failure = false;

    for (critical, status) in dependencies {
        if matches!(status, DependencyStatus::Unhealthy { .. }) {
            if critical {
                has_critical_failure = true;
            } else {
                has_non_critical_failure = true;
            }
        }
    }

    if has_critical_failure {
        "unhealthy".to_string()
    } else if has_non_critical_failure {
        "degraded".to_string()
    } else {
        "healthy".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryTransactionRepository;

    struct Failing;

    #[async_trait]
    impl DependencyChecker for Failing {
        fn name(&self) -> &'static str {
            "cache"
        }

        async fn check(&self) -> DependencyStatus {
            DependencyStatus::unhealthy("connection refused")
        }
    }

    #[tokio::test]
    async fn healthy_storage_is_healthy() {
        let repo = Arc::new(InMemoryTransactionRepository::new());
        let checkers: Vec<Arc<dyn DependencyChecker>> = vec![Arc::new(StorageChecker::new(repo))];

        let health = check_health(&checkers, Instant::now()).await;
        assert_eq!(health.status, "healthy");
        assert!(matches!(
            health.dependencies["storage"],
            DependencyStatus::Healthy { .. }
        ));
    }

    #[tokio::test]
    async fn closed_storage_is_unhealthy() {
        let repo = Arc::new(InMemoryTransactionRepository::new());
        repo.close().await.unwrap();
        let checkers: Vec<Arc<dyn DependencyChecker>> = vec![Arc::new(StorageChecker::new(repo))];

        let health = check_health(&checkers, Instant::now()).await;
        assert_eq!(health.status, "unhealthy");
    }

    #[tokio::test]
    async fn non_critical_failure_degrades() {
        let repo = Arc::new(InMemoryTransactionRepository::new());
        let checkers: Vec<Arc<dyn DependencyChecker>> =
            vec![Arc::new(StorageChecker::new(repo)), Arc::new(Failing)];

        let health = check_health(&checkers, Instant::now()).await;
        assert_eq!(health.status, "degraded");
        assert_eq!(health.dependencies.len(), 2);
    }

    #[test]
    fn dependency_status_serialization() {
        let json = serde_json::to_value(DependencyStatus::Healthy {
            status: "healthy".to_string(),
            latency_ms: 42,
        })
        .unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["latency_ms"], 42);
        assert!(json.get("error").is_none());
    }
}
