//! Storage engines and the registry that picks one at startup.

pub mod memory_transaction_repository;
pub mod qledger_transaction_repository;
pub mod sqlite_transaction_repository;

pub use memory_transaction_repository::InMemoryTransactionRepository;
pub use qledger_transaction_repository::QLedgerTransactionRepository;
pub use sqlite_transaction_repository::SqliteTransactionRepository;

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;
use crate::ports::{RepositoryError, TransactionRepository};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown transaction storage engine {name:?} (known: {known})")]
    UnknownEngine { name: String, known: String },

    #[error("{engine} storage requires {setting}")]
    MissingSetting {
        engine: &'static str,
        setting: &'static str,
    },

    #[error("failed to initialize {engine} storage: {source}")]
    Init {
        engine: &'static str,
        #[source]
        source: RepositoryError,
    },
}

pub type RepositoryHandle = Arc<dyn TransactionRepository>;

type Factory = for<'a> fn(&'a Config) -> BoxFuture<'a, Result<RepositoryHandle, ConfigError>>;

/// Maps engine names to constructors. Lookup is case-insensitive.
pub struct StorageRegistry {
    factories: BTreeMap<String, Factory>,
}

impl Default for StorageRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("memory", memory_factory);
        registry.register("sqlite", sqlite_factory);
        registry.register("qledger", qledger_factory);
        registry
    }
}

impl StorageRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, factory: Factory) {
        self.factories.insert(name.to_lowercase(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.trim().to_lowercase())
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Builds the engine named by `config.storage_type`. An unregistered name
    /// is an error, never an empty repository.
    pub async fn build(&self, config: &Config) -> Result<RepositoryHandle, ConfigError> {
        let name = config.storage_type.trim().to_lowercase();
        let factory = self
            .factories
            .get(&name)
            .ok_or_else(|| ConfigError::UnknownEngine {
                name: config.storage_type.clone(),
                known: self.names().join(", "),
            })?;

        let repository = factory(config).await?;
        tracing::info!(engine = %name, "transaction storage initialized");
        Ok(repository)
    }
}

fn memory_factory(_config: &Config) -> BoxFuture<'_, Result<RepositoryHandle, ConfigError>> {
    async move {
        let repository: RepositoryHandle = Arc::new(InMemoryTransactionRepository::new());
        Ok(repository)
    }
    .boxed()
}

fn sqlite_factory(config: &Config) -> BoxFuture<'_, Result<RepositoryHandle, ConfigError>> {
    async move {
        let repository = SqliteTransactionRepository::connect(&config.sqlite_path)
            .await
            .map_err(|source| ConfigError::Init {
                engine: "sqlite",
                source,
            })?;
        let repository: RepositoryHandle = Arc::new(repository);
        Ok(repository)
    }
    .boxed()
}

fn qledger_factory(config: &Config) -> BoxFuture<'_, Result<RepositoryHandle, ConfigError>> {
    async move {
        let endpoint = config
            .qledger_endpoint
            .as_deref()
            .ok_or(ConfigError::MissingSetting {
                engine: "qledger",
                setting: "QLEDGER_ENDPOINT",
            })?;
        let repository =
            QLedgerTransactionRepository::new(endpoint, config.qledger_auth_token.clone())
                .map_err(|source| ConfigError::Init {
                    engine: "qledger",
                    source,
                })?;
        let repository: RepositoryHandle = Arc::new(repository);
        Ok(repository)
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(storage_type: &str) -> Config {
        Config {
            storage_type: storage_type.to_string(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn unknown_engine_is_a_configuration_error() {
        let registry = StorageRegistry::default();
        let err = registry.build(&config("mongodb")).await.err().unwrap();
        match err {
            ConfigError::UnknownEngine { name, known } => {
                assert_eq!(name, "mongodb");
                assert_eq!(known, "memory, qledger, sqlite");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn engine_names_are_case_insensitive() {
        let registry = StorageRegistry::default();
        assert!(registry.contains("QLedger"));
        let repo = registry.build(&config("MEMORY")).await.unwrap();
        repo.ping().await.unwrap();
    }

    #[tokio::test]
    async fn qledger_requires_an_endpoint() {
        let registry = StorageRegistry::default();
        let err = registry.build(&config("qledger")).await.err().unwrap();
        assert!(matches!(err, ConfigError::MissingSetting { setting: "QLEDGER_ENDPOINT", .. }));
    }

    #[tokio::test]
    async fn builds_sqlite_from_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            sqlite_path: dir.path().join("ledger.db"),
            ..config("sqlite")
        };
        let repo = StorageRegistry::default().build(&config).await.unwrap();
        repo.ping().await.unwrap();
        assert!(dir.path().join("ledger.db").exists());
    }

    #[tokio::test]
    async fn custom_engines_can_be_registered() {
        let mut registry = StorageRegistry::empty();
        assert!(registry.build(&config("memory")).await.is_err());

        registry.register("Scratch", memory_factory);
        assert!(registry.build(&config("scratch")).await.is_ok());
    }
}
