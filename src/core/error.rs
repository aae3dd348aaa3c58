// src/core/error.rs
use crate::types::PositionId;
use rust_decimal::Decimal;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Every variant is recoverable: the operation that returned it left state untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Invalid quote data: {0}")]
    InvalidQuoteData(String),

    #[error("Quote unavailable for {0}")]
    QuoteUnavailable(String),

    #[error("Price unavailable for {from}/{to}")]
    PriceUnavailable { from: String, to: String },

    #[error("Insufficient {currency} balance: required {required}, available {available}")]
    InsufficientBalance {
        currency: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("Position {0} not found")]
    PositionNotFound(PositionId),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}
