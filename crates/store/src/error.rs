//! Store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("rule not found: {0}")]
    RuleNotFound(i64),

    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("invalid rule: {0}")]
    InvalidRule(String),
}
