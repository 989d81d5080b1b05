//! Stateless admission rules
//!
//! The order service's default risk predicate. Account-aware checks
//! (collateral, exposure limits) plug in behind the service's `RiskCheck`
//! trait; these rules are the floor every order must clear.

use types::errors::RejectReason;
use types::numeric::{Price, Quantity};
use types::order::OrderType;

/// Validate the admission-time shape of an order.
pub fn validate(order_type: OrderType, price: Price, quantity: Quantity) -> Result<(), RejectReason> {
    if quantity.is_zero() {
        return Err(RejectReason::InvalidQuantity);
    }
    // Zero is the "take any" sentinel for market/IOC; a limit order needs a
    // real limit.
    if order_type == OrderType::Limit && price.is_zero() {
        return Err(RejectReason::InvalidPrice);
    }
    Ok(())
}
