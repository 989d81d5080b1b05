//! Admission reject taxonomy
//!
//! Validation failures are synchronous: the order is marked `Rejected`, no
//! event is emitted, and one of these reasons is returned to the caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an order was rejected at admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    #[error("quantity must be positive")]
    InvalidQuantity,

    #[error("limit orders require a positive price")]
    InvalidPrice,

    #[error("symbol must not be empty")]
    InvalidSymbol,

    #[error("risk check failed")]
    RiskCheckFailed,

    #[error("margin freeze failed")]
    MarginFreezeFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_reason_display() {
        assert_eq!(
            RejectReason::InvalidQuantity.to_string(),
            "quantity must be positive"
        );
    }

    #[test]
    fn test_reject_reason_wire_name() {
        assert_eq!(
            serde_json::to_string(&RejectReason::InvalidPrice).unwrap(),
            "\"INVALID_PRICE\""
        );
    }
}
