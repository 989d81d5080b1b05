//! Leveraged position state
//!
//! One position per (user, symbol). Quantity is signed: positive is long,
//! negative is short, zero is flat. The entry price is the weighted average
//! of the opening fills in the current direction.

use crate::ids::{Symbol, UserId};
use crate::numeric::Price;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
    Flat,
}

/// Per-(user, symbol) leveraged position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub user_id: UserId,
    pub symbol: Symbol,
    /// Signed base quantity: >0 long, <0 short, 0 flat
    pub qty: Decimal,
    /// Weighted-average entry of opening fills; zero when flat
    pub entry_price: Price,
    pub leverage: Decimal,
    /// Posted initial margin in quote units; released to zero when flat
    pub margin: Decimal,
    /// PnL realized by reducing/closing fills
    pub realized_pnl: Decimal,
}

impl Position {
    /// Map key used by the position book, system state, and snapshots
    pub fn key(&self) -> String {
        position_key(&self.symbol, self.user_id)
    }

    pub fn direction(&self) -> Direction {
        if self.qty > Decimal::ZERO {
            Direction::Long
        } else if self.qty < Decimal::ZERO {
            Direction::Short
        } else {
            Direction::Flat
        }
    }

    pub fn is_flat(&self) -> bool {
        self.qty.is_zero()
    }

    /// Gross exposure at the given mark price: `|qty| * mark`
    pub fn notional(&self, mark: Price) -> Decimal {
        self.qty.abs() * mark.as_decimal()
    }

    /// `(mark - entry) * qty` — sign-correct for shorts
    pub fn unrealized_pnl(&self, mark: Price) -> Decimal {
        (mark.as_decimal() - self.entry_price.as_decimal()) * self.qty
    }

    /// Posted margin plus unrealized PnL
    pub fn equity(&self, mark: Price) -> Decimal {
        self.margin + self.unrealized_pnl(mark)
    }
}

/// Key for a (user, symbol) pair
pub fn position_key(symbol: &Symbol, user_id: UserId) -> String {
    format!("{}:{}", symbol, user_id)
}
