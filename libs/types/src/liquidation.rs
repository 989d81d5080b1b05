//! System-generated liquidation orders
//!
//! Distinguished from user orders: always market, always IOC, never rests
//! on the book, and carries a machine-readable reason.

use crate::ids::{OrderId, Symbol, UserId};
use crate::numeric::Quantity;
use crate::order::{OrderType, Side};
use serde::{Deserialize, Serialize};

/// Reason tag carried by every liquidation order
pub const LIQUIDATION_REASON: &str = "LIQUIDATION";

/// Time-in-force of a liquidation order (always IOC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Ioc,
}

/// An IOC market order emitted by the liquidation path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationOrder {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub symbol: Symbol,
    /// Opposite of the position direction being closed
    pub side: Side,
    pub quantity: Quantity,
    pub order_type: OrderType,
    pub tif: TimeInForce,
    pub reason: String,
}

impl LiquidationOrder {
    /// Build a liquidation order closing `quantity` of a position
    pub fn new(order_id: OrderId, user_id: UserId, symbol: Symbol, side: Side, quantity: Quantity) -> Self {
        Self {
            order_id,
            user_id,
            symbol,
            side,
            quantity,
            order_type: OrderType::Market,
            tif: TimeInForce::Ioc,
            reason: LIQUIDATION_REASON.to_string(),
        }
    }
}
