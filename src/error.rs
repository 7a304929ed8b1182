//! Error taxonomy for the trading core.
//!
//! Synchronous entry points (place order, cancel, strategy CRUD) surface the
//! first error to the caller. The background loops log and retry; only a
//! terminal exchange state or an explicit user action ends retrying.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Core trading errors.
#[derive(Debug, Error)]
pub enum TradingError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("reduction quantity {requested} exceeds position quantity {available}")]
    InsufficientQuantity {
        requested: Decimal,
        available: Decimal,
    },

    #[error("exchange rejected submission: {0}")]
    ExchangeSubmission(String),

    #[error("exchange reconciliation failed: {0}")]
    ExchangeReconciliation(String),

    #[error("no price available for {market}: {reason}")]
    PriceUnavailable { market: String, reason: String },

    #[error("database error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("strategy config serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no active API credentials for user {0}")]
    MissingCredentials(Uuid),

    #[error("unsupported strategy type: {0}")]
    UnsupportedStrategy(String),
}

impl TradingError {
    /// Shorthand for a missing entity of a given kind.
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        TradingError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TradingError>;
