use clap::{Parser, Subcommand};

use crate::adapters::{SqliteTransactionRepository, StorageRegistry};
use crate::config::Config;
use crate::ports::TransactionRepository;
use crate::startup::validate_environment;

#[derive(Parser)]
#[command(name = "general-ledger")]
#[command(about = "General Ledger - idempotent double-entry transaction service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Create the SQLite ledger file and run migrations
    Migrate,

    /// Print the effective configuration and check every backing service.
    /// With sqlite storage this creates the database file and applies
    /// migrations if they are missing.
    Config,
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    tracing::info!(path = %config.sqlite_path.display(), "Running database migrations...");

    // connect() applies pending migrations before returning.
    let repository = SqliteTransactionRepository::connect(&config.sqlite_path).await?;
    repository.close().await?;

    tracing::info!("Database migrations completed");
    println!("✓ Database migrations completed ({})", config.sqlite_path.display());

    Ok(())
}

pub async fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Transaction Storage: {}", config.storage_type);
    println!("  SQLite Path: {}", config.sqlite_path.display());
    println!(
        "  QLedger Endpoint: {}",
        config.qledger_endpoint.as_deref().unwrap_or("-")
    );
    println!(
        "  QLedger Token: {}",
        if config.qledger_auth_token.is_some() { "****" } else { "-" }
    );
    println!("  Idempotency Backend: {:?}", config.idempotency_backend);
    println!("  Redis URL: {}", mask_password(&config.redis_url));

    let report = validate_environment(config, &StorageRegistry::default()).await;
    report.print();

    if !report.is_valid() {
        anyhow::bail!("Configuration is invalid");
    }

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
