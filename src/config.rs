use anyhow::Context;
use axum::http::HeaderValue;
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyBackend {
    Memory,
    Redis,
}

impl FromStr for IdempotencyBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "inmem" => Ok(IdempotencyBackend::Memory),
            "redis" => Ok(IdempotencyBackend::Redis),
            other => anyhow::bail!("IDEMPOTENCY_BACKEND must be 'memory' or 'redis', got {:?}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    /// Engine name looked up in the storage registry. Kept as a raw string so
    /// an unknown value surfaces as a configuration error at startup.
    pub storage_type: String,
    pub sqlite_path: PathBuf,
    pub qledger_endpoint: Option<String>,
    pub qledger_auth_token: Option<String>,
    pub idempotency_backend: IdempotencyBackend,
    pub redis_url: String,
    pub idempotency_ttl_secs: Option<u64>,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 8085,
            storage_type: "sqlite".to_string(),
            sqlite_path: PathBuf::from("gl.db"),
            qledger_endpoint: None,
            qledger_auth_token: None,
            idempotency_backend: IdempotencyBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            idempotency_ttl_secs: None,
            cors_allowed_origins: None,
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present
        let defaults = Config::default();

        Ok(Config {
            server_port: match optional_var("SERVER_PORT") {
                Some(port) => port.parse().context("SERVER_PORT must be a port number")?,
                None => defaults.server_port,
            },
            storage_type: optional_var("TRANSACTION_STORAGE_TYPE")
                .unwrap_or(defaults.storage_type),
            sqlite_path: optional_var("SQLITE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.sqlite_path),
            qledger_endpoint: optional_var("QLEDGER_ENDPOINT"),
            qledger_auth_token: optional_var("QLEDGER_AUTH_TOKEN"),
            idempotency_backend: match optional_var("IDEMPOTENCY_BACKEND") {
                Some(raw) => raw.parse()?,
                None => defaults.idempotency_backend,
            },
            redis_url: optional_var("REDIS_URL").unwrap_or(defaults.redis_url),
            idempotency_ttl_secs: optional_var("IDEMPOTENCY_TTL_SECS")
                .map(|raw| raw.parse::<u64>())
                .transpose()
                .context("IDEMPOTENCY_TTL_SECS must be a whole number of seconds")?,
            cors_allowed_origins: optional_var("CORS_ALLOWED_ORIGINS")
                .map(|raw| parse_origins(&raw)),
            log_format: match optional_var("LOG_FORMAT").as_deref() {
                Some(raw) if raw.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        })
    }

    /// Allowed CORS origins as header values, skipping entries that are not
    /// valid header text.
    pub fn cors_origin_headers(&self) -> Option<Vec<HeaderValue>> {
        self.cors_allowed_origins.as_ref().map(|origins| {
            origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok())
                .collect()
        })
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
