//! Turns a creation request into a transaction, or says precisely why not.
//! Nothing here touches storage.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{Transaction, TransactionLine, TransactionPurpose};
use crate::schemas::{CreateTransactionLine, CreateTransactionRequest};

pub const ACCOUNT_ID_MAX_LEN: usize = 255;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("transaction must contain at least one line")]
    EmptyTransaction,

    #[error("{field}: invalid purpose {value:?}")]
    InvalidPurpose { field: String, value: String },

    #[error("{field}: {reason}")]
    InvalidAccountReference { field: String, reason: &'static str },

    #[error("{field}: amount must be a whole number of minor units")]
    InvalidAmount { field: String },

    #[error("malformed request body: {reason}")]
    MalformedBody {
        field: Option<String>,
        reason: String,
    },
}

impl ValidationError {
    /// Stable machine-readable name of the failure.
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::EmptyTransaction => "empty_transaction",
            ValidationError::InvalidPurpose { .. } => "invalid_purpose",
            ValidationError::InvalidAccountReference { .. } => "invalid_account_reference",
            ValidationError::InvalidAmount { .. } => "invalid_amount",
            ValidationError::MalformedBody { .. } => "malformed_body",
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            ValidationError::EmptyTransaction => None,
            ValidationError::MalformedBody { field, .. } => field.as_deref(),
            ValidationError::InvalidPurpose { field, .. }
            | ValidationError::InvalidAccountReference { field, .. }
            | ValidationError::InvalidAmount { field } => Some(field),
        }
    }
}

pub type ValidationResult<T = ()> = Result<T, ValidationError>;

pub fn validate_account_id(field: String, account_id: &str) -> ValidationResult {
    if account_id.trim().is_empty() {
        return Err(ValidationError::InvalidAccountReference {
            field,
            reason: "must not be empty",
        });
    }
    if account_id.len() > ACCOUNT_ID_MAX_LEN {
        return Err(ValidationError::InvalidAccountReference {
            field,
            reason: "must be at most 255 characters",
        });
    }
    if account_id.chars().any(char::is_control) {
        return Err(ValidationError::InvalidAccountReference {
            field,
            reason: "must not contain control characters",
        });
    }
    Ok(())
}

pub fn validate_purpose(field: String, raw: &str) -> ValidationResult<TransactionPurpose> {
    TransactionPurpose::validate(raw).map_err(|_| ValidationError::InvalidPurpose {
        field,
        value: raw.to_string(),
    })
}

/// Accepts only JSON integers that fit in i64. Fractions are refused, never
/// rounded.
pub fn validate_amount(field: String, amount: Option<&serde_json::Number>) -> ValidationResult<i64> {
    amount
        .and_then(serde_json::Number::as_i64)
        .ok_or(ValidationError::InvalidAmount { field })
}

fn validate_line(index: usize, line: &CreateTransactionLine) -> ValidationResult<TransactionLine> {
    let field = |name: &str| format!("lines[{}].{}", index, name);

    validate_account_id(field("accountId"), &line.account_id)?;
    let purpose = validate_purpose(field("purpose"), &line.purpose)?;
    let amount = validate_amount(field("amount"), line.amount.as_ref())?;

    Ok(TransactionLine {
        account_id: line.account_id.clone(),
        purpose,
        amount,
    })
}

pub fn validate_lines(lines: &[CreateTransactionLine]) -> ValidationResult<Vec<TransactionLine>> {
    if lines.is_empty() {
        return Err(ValidationError::EmptyTransaction);
    }
    lines
        .iter()
        .enumerate()
        .map(|(index, line)| validate_line(index, line))
        .collect()
}

/// Classifies a body that could not be decoded into a request.
///
/// `detail` is the decoder message, optionally prefixed with the path of the
/// offending value (`lines[0].amount: invalid type: ...`). A wrongly typed
/// amount reports as `InvalidAmount` like any other bad amount.
pub fn malformed_body(detail: &str) -> ValidationError {
    let (field, reason) = match detail.split_once(": ") {
        Some((path, reason)) if !path.is_empty() && !path.contains(char::is_whitespace) => {
            (Some(path.to_string()), reason)
        }
        _ => (None, detail),
    };

    match field {
        Some(field) if field.ends_with(".amount") => ValidationError::InvalidAmount { field },
        field => ValidationError::MalformedBody {
            field,
            reason: reason.to_string(),
        },
    }
}

/// Validates `request` and stamps it with a fresh id and the current time.
pub fn build_transaction(request: &CreateTransactionRequest) -> ValidationResult<Transaction> {
    build_transaction_at(request, Utc::now())
}

/// Same as [`build_transaction`] with a caller-chosen timestamp. Only trusted
/// internal paths (backfills, tests) should pick the time.
pub fn build_transaction_at(
    request: &CreateTransactionRequest,
    timestamp: DateTime<Utc>,
) -> ValidationResult<Transaction> {
    let lines = validate_lines(&request.lines)?;
    Ok(Transaction::at(timestamp, lines))
}
