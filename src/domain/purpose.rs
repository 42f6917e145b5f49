//! Transaction purpose tags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Why money moved on a transaction line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionPurpose {
    AchCredit,
    AchDebit,
    Fee,
    Interest,
    Transfer,
    Wire,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid transaction purpose: {0:?}")]
pub struct InvalidPurpose(pub String);

impl TransactionPurpose {
    pub const ALL: [TransactionPurpose; 6] = [
        TransactionPurpose::AchCredit,
        TransactionPurpose::AchDebit,
        TransactionPurpose::Fee,
        TransactionPurpose::Interest,
        TransactionPurpose::Transfer,
        TransactionPurpose::Wire,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionPurpose::AchCredit => "achcredit",
            TransactionPurpose::AchDebit => "achdebit",
            TransactionPurpose::Fee => "fee",
            TransactionPurpose::Interest => "interest",
            TransactionPurpose::Transfer => "transfer",
            TransactionPurpose::Wire => "wire",
        }
    }

    /// Checks a raw wire value. Matching is exact; the empty string and
    /// anything outside the six known tags are rejected.
    pub fn validate(value: &str) -> Result<Self, InvalidPurpose> {
        value.parse()
    }
}

impl FromStr for TransactionPurpose {
    type Err = InvalidPurpose;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionPurpose::ALL
            .into_iter()
            .find(|purpose| purpose.as_str() == s)
            .ok_or_else(|| InvalidPurpose(s.to_string()))
    }
}

impl fmt::Display for TransactionPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
