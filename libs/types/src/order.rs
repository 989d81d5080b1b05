//! Order lifecycle types

use crate::ids::{OrderId, Symbol, UserId};
use crate::numeric::{Price, Quantity};
use serde::{Deserialize, Serialize};

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Order type
///
/// Market and IOC orders never rest on the book: any unfilled remainder is
/// discarded after the match loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
    Ioc,
}

impl OrderType {
    /// Whether an unfilled remainder may rest on the book
    pub fn can_rest(&self) -> bool {
        matches!(self, OrderType::Limit)
    }

    /// Whether the price check is bypassed (crosses any price)
    pub fn crosses_any_price(&self) -> bool {
        matches!(self, OrderType::Market | OrderType::Ioc)
    }
}

/// Order status
///
/// `Filled`, `Canceled`, and `Rejected` are terminal: the order never
/// mutates afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Submitted,
    PartFilled,
    Filled,
    Canceled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected
        )
    }
}

/// A user-submitted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Price,
    pub quantity: Quantity,
    pub filled_quantity: Quantity,
    pub status: OrderStatus,
    /// Unix nanoseconds at admission
    pub created_at: i64,
}

impl Order {
    /// Create a submitted order with an empty fill accumulator
    pub fn new(
        id: OrderId,
        user_id: UserId,
        symbol: Symbol,
        side: Side,
        order_type: OrderType,
        price: Price,
        quantity: Quantity,
        created_at: i64,
    ) -> Self {
        Self {
            id,
            user_id,
            symbol,
            side,
            order_type,
            price,
            quantity,
            filled_quantity: Quantity::zero(),
            status: OrderStatus::Submitted,
            created_at,
        }
    }

    /// Quantity still open on the order
    pub fn remaining(&self) -> Quantity {
        self.quantity.saturating_sub(self.filled_quantity)
    }

    pub fn is_filled(&self) -> bool {
        self.filled_quantity == self.quantity
    }

    /// Record a fill and transition the status
    ///
    /// # Panics
    /// Panics if the fill would exceed the order quantity or the order is
    /// already terminal.
    pub fn apply_fill(&mut self, fill: Quantity) {
        assert!(!self.status.is_terminal(), "fill on terminal order");
        let new_filled = self.filled_quantity + fill;
        assert!(
            new_filled.as_decimal() <= self.quantity.as_decimal(),
            "fill would exceed order quantity"
        );
        self.filled_quantity = new_filled;
        self.status = if self.is_filled() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartFilled
        };
    }

    /// Mark the order canceled
    ///
    /// # Panics
    /// Panics if the order is already terminal.
    pub fn cancel(&mut self) {
        assert!(!self.status.is_terminal(), "cancel on terminal order");
        self.status = OrderStatus::Canceled;
    }
}
