//! Fill records
//!
//! Each match produces a pair of trades: the taker side first, then the
//! maker side. The execution price is always the maker's resting price.

use crate::ids::{OrderId, Symbol, TradeId, UserId};
use crate::numeric::{Price, Quantity};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::order::Side;

/// One side of a fill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: TradeId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub symbol: Symbol,
    pub side: Side,
    /// Maker's resting price (price-improvement rule)
    pub price: Price,
    pub qty: Quantity,
    pub is_maker: bool,
}

impl Trade {
    /// Gross value of the fill in quote units
    pub fn notional(&self) -> Decimal {
        self.qty.as_decimal() * self.price.as_decimal()
    }

    /// Fill quantity signed by the order side (Sell is negative)
    pub fn signed_qty(&self) -> Decimal {
        match self.side {
            Side::Buy => self.qty.as_decimal(),
            Side::Sell => -self.qty.as_decimal(),
        }
    }
}
