use anyhow::{Context, Result};
use std::sync::Arc;

use crate::adapters::{RepositoryHandle, StorageRegistry};
use crate::config::{Config, IdempotencyBackend};
use crate::health::{DependencyChecker, RedisChecker, StorageChecker};
use crate::idempotency::{recorder_from_config, RedisRecorder};
use crate::services::TransactionService;
use crate::AppState;

pub struct ValidationReport {
    pub environment: bool,
    pub storage: bool,
    pub idempotency: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.storage && self.idempotency
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables:  {}", status(self.environment));
        println!("Transaction Storage:    {}", status(self.storage));
        println!("Idempotency Backend:    {}", status(self.idempotency));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  - {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "PASS" } else { "FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "OK" } else { "FAIL" }
}

/// Checks configuration and every backing service. Never bails early, so the
/// report lists all problems at once.
pub async fn validate_environment(
    config: &Config,
    registry: &StorageRegistry,
) -> ValidationReport {
    let mut report = ValidationReport {
        environment: true,
        storage: true,
        idempotency: true,
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config, registry) {
        report.environment = false;
        report.errors.push(format!("Environment: {:#}", e));
    }

    match registry.build(config).await {
        Ok(repository) => {
            if let Err(e) = repository.ping().await {
                report.storage = false;
                report.errors.push(format!("Storage: {}", e));
            }
            if let Err(e) = repository.close().await {
                report.storage = false;
                report.errors.push(format!("Storage close: {}", e));
            }
        }
        Err(e) => {
            report.storage = false;
            report.errors.push(format!("Storage: {}", e));
        }
    }

    if config.idempotency_backend == IdempotencyBackend::Redis {
        if let Err(e) = validate_redis(config).await {
            report.idempotency = false;
            report.errors.push(format!("Redis: {:#}", e));
        }
    }

    report
}

fn validate_env_vars(config: &Config, registry: &StorageRegistry) -> Result<()> {
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }
    if !registry.contains(&config.storage_type) {
        anyhow::bail!(
            "TRANSACTION_STORAGE_TYPE {:?} is not one of: {}",
            config.storage_type,
            registry.names().join(", ")
        );
    }
    if config.storage_type.trim().eq_ignore_ascii_case("qledger") {
        let endpoint = config
            .qledger_endpoint
            .as_deref()
            .context("QLEDGER_ENDPOINT is required for qledger storage")?;
        url::Url::parse(endpoint).context("QLEDGER_ENDPOINT is not a valid URL")?;
    }
    if config.idempotency_backend == IdempotencyBackend::Redis {
        url::Url::parse(&config.redis_url).context("REDIS_URL is not a valid URL")?;
    }

    Ok(())
}

async fn validate_redis(config: &Config) -> Result<()> {
    let recorder = RedisRecorder::new(&config.redis_url, config.idempotency_ttl_secs)
        .context("Invalid Redis URL")?;
    recorder.ping().await.context("Redis PING failed")?;
    Ok(())
}

/// Builds the storage engine, recorder and service for the HTTP server.
///
/// An unknown storage engine fails here, before anything is served.
pub async fn build_state(
    config: &Config,
    registry: &StorageRegistry,
) -> Result<(AppState, RepositoryHandle)> {
    let repository = registry
        .build(config)
        .await
        .context("transaction storage configuration")?;
    let recorder = recorder_from_config(config).context("idempotency configuration")?;

    let mut checkers: Vec<Arc<dyn DependencyChecker>> =
        vec![Arc::new(StorageChecker::new(repository.clone()))];
    if config.idempotency_backend == IdempotencyBackend::Redis {
        checkers.push(Arc::new(RedisChecker::new(RedisRecorder::new(
            &config.redis_url,
            config.idempotency_ttl_secs,
        )?)));
    }

    let service = Arc::new(TransactionService::new(repository.clone(), recorder));
    let mut state = AppState::new(service, checkers);
    state.cors_allowed_origins = config.cors_origin_headers();

    Ok((state, repository))
}
