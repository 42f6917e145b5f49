use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::context::RequestContext;
use crate::error::AppError;
use crate::schemas::CreateTransactionRequest;
use crate::validation::{self, ValidationResult};
use crate::AppState;

/// `POST /accounts/:account_id/transactions`
///
/// Lines may reference any account; the path account is recorded for the
/// request log only. A body that does not decode still reaches the service,
/// so its idempotency key is spent like any other rejected request.
pub async fn create_transaction(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    ctx: RequestContext,
    body: Result<Json<CreateTransactionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    tracing::debug!(account_id = %account_id, "create transaction request");
    let tx = state
        .transactions
        .create_transaction(&ctx, decode_body(body))
        .await?;
    Ok((StatusCode::OK, Json(tx)))
}

fn decode_body(
    body: Result<Json<CreateTransactionRequest>, JsonRejection>,
) -> ValidationResult<CreateTransactionRequest> {
    match body {
        Ok(Json(request)) => Ok(request),
        Err(JsonRejection::JsonDataError(e)) => {
            let text = e.body_text();
            // Drop axum's fixed preamble, keep the serde path and message.
            let detail = text.split_once(": ").map_or(text.as_str(), |(_, d)| d);
            Err(validation::malformed_body(detail))
        }
        Err(rejection) => Err(validation::malformed_body(&rejection.body_text())),
    }
}

/// `GET /accounts/:account_id/transactions`
pub async fn get_account_transactions(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, AppError> {
    let transactions = state
        .transactions
        .get_account_transactions(&ctx, &account_id)
        .await?;
    Ok(Json(transactions))
}

