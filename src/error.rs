use thiserror::Error;

use crate::types::OrderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidOrder {
    #[error("order size must be positive")]
    NonPositiveSize,
    #[error("order size exceeds the size a book level can hold")]
    SizeOverflow,
    #[error("limit price must be positive")]
    NonPositivePrice,
    #[error("timestamp must be a non-negative number")]
    NegativeTimestamp,
    #[error("latency must be a non-negative number")]
    NegativeLatency,
    #[error("order id {0:?} is already resting in the book")]
    OrderIdAlreadyExists(OrderId),
}

/// The order is not resting: it was filled, cancelled, or never existed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("order {0:?} not found")]
pub struct OrderNotFound(pub OrderId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("order book is empty")]
pub struct EmptyBook;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid `{field}`: {reason}")]
    InvalidParameter { field: &'static str, reason: String },
    #[error("could not decode configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidParameter {
            field,
            reason: reason.into(),
        }
    }
}
