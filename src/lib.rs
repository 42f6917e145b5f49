pub mod adapters;
pub mod cli;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod health;
pub mod idempotency;
pub mod middleware;
pub mod ports;
pub mod schemas;
pub mod services;
pub mod startup;
pub mod validation;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::context::USER_ID_HEADER;
use crate::health::DependencyChecker;
use crate::idempotency::IDEMPOTENCY_HEADER;
use crate::services::TransactionService;

#[derive(Clone)]
pub struct AppState {
    pub transactions: Arc<TransactionService>,
    pub health_checkers: Arc<Vec<Arc<dyn DependencyChecker>>>,
    pub cors_allowed_origins: Option<Vec<HeaderValue>>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        transactions: Arc<TransactionService>,
        health_checkers: Vec<Arc<dyn DependencyChecker>>,
    ) -> Self {
        Self {
            transactions,
            health_checkers: Arc::new(health_checkers),
            cors_allowed_origins: None,
            start_time: Instant::now(),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(state.cors_allowed_origins.clone());

    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/health", get(handlers::health))
        .route(
            "/accounts/:account_id/transactions",
            get(handlers::transactions::get_account_transactions)
                .post(handlers::transactions::create_transaction),
        )
        .layer(axum::middleware::from_fn(
            middleware::request_logger_middleware,
        ))
        .layer(cors)
        .with_state(state)
}

/// Without an explicit allow-list the request's own origin is echoed back.
fn cors_layer(allowed_origins: Option<Vec<HeaderValue>>) -> CorsLayer {
    let allow_origin = match allowed_origins {
        Some(origins) => AllowOrigin::list(origins),
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(USER_ID_HEADER),
            HeaderName::from_static(IDEMPOTENCY_HEADER),
            HeaderName::from_static(middleware::request_logger::REQUEST_ID_HEADER),
        ])
}
