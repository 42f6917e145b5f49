use serde::{Deserialize, Serialize};

use crate::domain::CreateTransactionOptions;

/// One requested line as it arrives over the wire. Fields stay loosely typed
/// so validation can say exactly which one is wrong.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionLine {
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub amount: Option<serde_json::Number>,
}

impl CreateTransactionLine {
    pub fn new(account_id: impl Into<String>, purpose: impl Into<String>, amount: i64) -> Self {
        Self {
            account_id: account_id.into(),
            purpose: purpose.into(),
            amount: Some(amount.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTransactionRequest {
    #[serde(default)]
    pub lines: Vec<CreateTransactionLine>,
    #[serde(default)]
    pub options: CreateTransactionOptions,
}
