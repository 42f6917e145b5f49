//! Per-request caller context pulled from headers.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts, http::HeaderMap};

use crate::error::AppError;
use crate::idempotency::{IdempotencyKey, IDEMPOTENCY_HEADER};

pub const USER_ID_HEADER: &str = "x-user-id";

/// Who is calling and, optionally, which idempotency key they sent.
///
/// The user id is trusted as-is; authentication happens in front of this
/// service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: String,
    pub idempotency_key: Option<IdempotencyKey>,
}

impl RequestContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: &str) -> Self {
        self.idempotency_key = IdempotencyKey::parse(key);
        self
    }

    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let user_id = headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AppError::Forbidden(format!("missing {} header", USER_ID_HEADER)))?;

        let idempotency_key = match headers.get(IDEMPOTENCY_HEADER) {
            Some(value) => {
                let raw = value.to_str().map_err(|_| {
                    AppError::BadRequest("invalid idempotency key format".to_string())
                })?;
                IdempotencyKey::parse(raw)
            }
            None => None,
        };

        Ok(Self {
            user_id: user_id.to_string(),
            idempotency_key,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}
