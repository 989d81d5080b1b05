//! Crossing detection
//!
//! A buy taker crosses a resting ask when its price is at or above the ask;
//! a sell taker crosses a resting bid when its price is at or below the
//! bid. Equality crosses. Market and IOC orders cross unconditionally.

use types::numeric::Price;
use types::order::{OrderType, Side};

/// Whether a taker at `taker_price` can trade against a maker resting at
/// `maker_price`.
pub fn taker_crosses(
    order_type: OrderType,
    side: Side,
    taker_price: Price,
    maker_price: Price,
) -> bool {
    if order_type.crosses_any_price() {
        return true;
    }
    match side {
        Side::Buy => taker_price >= maker_price,
        Side::Sell => taker_price <= maker_price,
    }
}
