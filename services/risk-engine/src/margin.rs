//! Margin and position-transition arithmetic
//!
//! The fill is applied to the existing position as one of five transitions,
//! chosen by comparing the sign of the position against the sign of the
//! fill:
//!
//! - none       → **Opened** with fresh initial margin
//! - same sign  → **Increased**: weighted-average entry, margin unchanged
//! - opposite, smaller  → **Reduced**: margin released pro rata, PnL realized
//! - opposite, equal    → **Closed**: flat, margin fully released
//! - opposite, larger   → **Flipped**: close fully, reopen the remainder
//!
//! Increasing a position deliberately does not re-margin the added quantity
//! at the new price; the posted margin stays what was frozen at entry.

use rust_decimal::Decimal;
use thiserror::Error;

use types::ids::{Symbol, UserId};
use types::numeric::Price;
use types::position::Position;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarginError {
    #[error("fill quantity must be non-zero")]
    ZeroQuantity,

    #[error("leverage must be positive, got {0}")]
    NonPositiveLeverage(Decimal),

    #[error("fill price must be positive")]
    ZeroPrice,
}

/// `|qty| * price / leverage`
pub fn initial_margin(
    qty_abs: Decimal,
    price: Price,
    leverage: Decimal,
) -> Result<Decimal, MarginError> {
    if leverage <= Decimal::ZERO {
        return Err(MarginError::NonPositiveLeverage(leverage));
    }
    Ok(qty_abs * price.as_decimal() / leverage)
}

/// Result of applying one signed fill to a position
#[derive(Debug, Clone, PartialEq)]
pub enum PositionUpdate {
    Opened(Position),
    Increased(Position),
    Reduced(Position),
    Closed(Position),
    /// Fill larger than the position: closed flat, then reopened in the new
    /// direction with the remainder.
    Flipped { closed: Position, opened: Position },
}

impl PositionUpdate {
    /// The position as it stands after the transition
    pub fn resulting(&self) -> &Position {
        match self {
            PositionUpdate::Opened(p)
            | PositionUpdate::Increased(p)
            | PositionUpdate::Reduced(p)
            | PositionUpdate::Closed(p) => p,
            PositionUpdate::Flipped { opened, .. } => opened,
        }
    }
}

/// Apply a signed fill to an optional existing position.
pub fn apply_fill(
    existing: Option<&Position>,
    user_id: UserId,
    symbol: &Symbol,
    signed_qty: Decimal,
    price: Price,
    leverage: Decimal,
) -> Result<PositionUpdate, MarginError> {
    if signed_qty.is_zero() {
        return Err(MarginError::ZeroQuantity);
    }
    if price.is_zero() {
        return Err(MarginError::ZeroPrice);
    }

    let current = match existing {
        Some(p) if !p.is_flat() => p.clone(),
        _ => {
            let position = open_position(
                user_id,
                symbol.clone(),
                signed_qty,
                price,
                leverage,
                existing.map(|p| p.realized_pnl).unwrap_or(Decimal::ZERO),
            )?;
            return Ok(PositionUpdate::Opened(position));
        }
    };

    let same_direction = current.qty.is_sign_positive() == signed_qty.is_sign_positive();
    if same_direction {
        // Weighted-average entry over the combined opening quantity.
        let combined = current.qty + signed_qty;
        let entry = (current.entry_price.as_decimal() * current.qty
            + price.as_decimal() * signed_qty)
            / combined;
        let mut next = current;
        next.entry_price = Price::new(entry);
        next.qty = combined;
        return Ok(PositionUpdate::Increased(next));
    }

    let close_qty = signed_qty.abs().min(current.qty.abs());
    let direction = if current.qty.is_sign_positive() {
        Decimal::ONE
    } else {
        Decimal::NEGATIVE_ONE
    };
    let realized =
        (price.as_decimal() - current.entry_price.as_decimal()) * close_qty * direction;

    if signed_qty.abs() < current.qty.abs() {
        // Partial close: release margin pro rata, keep the entry price.
        let released = current.margin * close_qty / current.qty.abs();
        let mut next = current;
        next.qty += signed_qty;
        next.margin -= released;
        next.realized_pnl += realized;
        return Ok(PositionUpdate::Reduced(next));
    }

    let mut closed = current.clone();
    closed.qty = Decimal::ZERO;
    closed.entry_price = Price::zero();
    closed.margin = Decimal::ZERO;
    closed.realized_pnl += realized;

    if signed_qty.abs() == current.qty.abs() {
        return Ok(PositionUpdate::Closed(closed));
    }

    // Flip: the remainder opens a fresh position in the fill's direction.
    let remainder = current.qty + signed_qty;
    let opened = open_position(
        user_id,
        symbol.clone(),
        remainder,
        price,
        leverage,
        closed.realized_pnl,
    )?;
    Ok(PositionUpdate::Flipped { closed, opened })
}

fn open_position(
    user_id: UserId,
    symbol: Symbol,
    signed_qty: Decimal,
    price: Price,
    leverage: Decimal,
    realized_pnl: Decimal,
) -> Result<Position, MarginError> {
    let margin = initial_margin(signed_qty.abs(), price, leverage)?;
    Ok(Position {
        user_id,
        symbol,
        qty: signed_qty,
        entry_price: price,
        leverage,
        margin,
        realized_pnl,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    fn symbol() -> Symbol {
        Symbol::new("BTCUSDT")
    }

    fn open_long() -> Position {
        match apply_fill(
            None,
            UserId(100),
            &symbol(),
            Decimal::from(2),
            Price::from_u64(40_000),
            Decimal::from(10),
        )
        .unwrap()
        {
            PositionUpdate::Opened(p) => p,
            other => panic!("expected Opened, got {other:?}"),
        }
    }

    #[test]
    fn test_initial_margin() {
        let margin =
            initial_margin(Decimal::from(2), Price::from_u64(40_000), Decimal::from(10)).unwrap();
        assert_eq!(margin, Decimal::from(8_000));
    }

    #[test]
    fn test_initial_margin_rejects_zero_leverage() {
        assert_eq!(
            initial_margin(Decimal::ONE, Price::from_u64(100), Decimal::ZERO),
            Err(MarginError::NonPositiveLeverage(Decimal::ZERO))
        );
    }

    #[test]
    fn test_open_long() {
        let p = open_long();
        assert_eq!(p.qty, Decimal::from(2));
        assert_eq!(p.entry_price, Price::from_u64(40_000));
        assert_eq!(p.margin, Decimal::from(8_000));
        assert_eq!(p.realized_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_increase_weighted_average_entry() {
        let p = open_long();
        let update = apply_fill(
            Some(&p),
            UserId(100),
            &symbol(),
            Decimal::from(2),
            Price::from_u64(50_000),
            Decimal::from(10),
        )
        .unwrap();

        match update {
            PositionUpdate::Increased(next) => {
                // (40000*2 + 50000*2) / 4 = 45000
                assert_eq!(next.entry_price, Price::from_u64(45_000));
                assert_eq!(next.qty, Decimal::from(4));
                // Margin untouched on increase.
                assert_eq!(next.margin, Decimal::from(8_000));
            }
            other => panic!("expected Increased, got {other:?}"),
        }
    }

    #[test]
    fn test_reduce_releases_margin_and_realizes_pnl() {
        let p = open_long();
        let update = apply_fill(
            Some(&p),
            UserId(100),
            &symbol(),
            Decimal::from(-1),
            Price::from_u64(42_000),
            Decimal::from(10),
        )
        .unwrap();

        match update {
            PositionUpdate::Reduced(next) => {
                assert_eq!(next.qty, Decimal::ONE);
                // Half the position closed: half the margin released.
                assert_eq!(next.margin, Decimal::from(4_000));
                // (42000 - 40000) * 1 = 2000 realized.
                assert_eq!(next.realized_pnl, Decimal::from(2_000));
                // Entry unchanged by a reduce.
                assert_eq!(next.entry_price, Price::from_u64(40_000));
            }
            other => panic!("expected Reduced, got {other:?}"),
        }
    }

    #[test]
    fn test_full_close_goes_flat() {
        let p = open_long();
        let update = apply_fill(
            Some(&p),
            UserId(100),
            &symbol(),
            Decimal::from(-2),
            Price::from_u64(38_000),
            Decimal::from(10),
        )
        .unwrap();

        match update {
            PositionUpdate::Closed(flat) => {
                assert!(flat.is_flat());
                assert_eq!(flat.margin, Decimal::ZERO);
                assert!(flat.entry_price.is_zero());
                // (38000 - 40000) * 2 = -4000 realized.
                assert_eq!(flat.realized_pnl, Decimal::from(-4_000));
            }
            other => panic!("expected Closed, got {other:?}"),
        }
    }

    #[test]
    fn test_flip_closes_then_reopens() {
        let p = open_long();
        let update = apply_fill(
            Some(&p),
            UserId(100),
            &symbol(),
            Decimal::from(-5),
            Price::from_u64(41_000),
            Decimal::from(10),
        )
        .unwrap();

        match update {
            PositionUpdate::Flipped { closed, opened } => {
                assert!(closed.is_flat());
                assert_eq!(closed.realized_pnl, Decimal::from(2_000));

                assert_eq!(opened.qty, Decimal::from(-3));
                assert_eq!(opened.entry_price, Price::from_u64(41_000));
                // Fresh margin on the reopened side: 3 * 41000 / 10.
                assert_eq!(opened.margin, Decimal::from(12_300));
                // Realized PnL accumulator carries across the flip.
                assert_eq!(opened.realized_pnl, Decimal::from(2_000));
            }
            other => panic!("expected Flipped, got {other:?}"),
        }
    }

    #[test]
    fn test_short_reduce_realizes_inverted() {
        let update = apply_fill(
            None,
            UserId(100),
            &symbol(),
            Decimal::from(-4),
            Price::from_u64(2_000),
            Decimal::from(10),
        )
        .unwrap();
        let short = update.resulting().clone();

        let update = apply_fill(
            Some(&short),
            UserId(100),
            &symbol(),
            Decimal::from(1),
            Price::from_u64(1_900),
            Decimal::from(10),
        )
        .unwrap();
        match update {
            PositionUpdate::Reduced(next) => {
                // Short profits when price falls: (2000 - 1900) * 1 = 100.
                assert_eq!(next.realized_pnl, Decimal::from(100));
                assert_eq!(next.qty, Decimal::from(-3));
            }
            other => panic!("expected Reduced, got {other:?}"),
        }
    }

    #[test]
    fn test_reopen_on_flat_position_keeps_realized() {
        let p = open_long();
        let flat = match apply_fill(
            Some(&p),
            UserId(100),
            &symbol(),
            Decimal::from(-2),
            Price::from_u64(42_000),
            Decimal::from(10),
        )
        .unwrap()
        {
            PositionUpdate::Closed(flat) => flat,
            other => panic!("expected Closed, got {other:?}"),
        };

        let update = apply_fill(
            Some(&flat),
            UserId(100),
            &symbol(),
            Decimal::from(1),
            Price::from_u64(43_000),
            Decimal::from(10),
        )
        .unwrap();
        match update {
            PositionUpdate::Opened(next) => {
                assert_eq!(next.qty, Decimal::ONE);
                assert_eq!(next.realized_pnl, Decimal::from(4_000));
            }
            other => panic!("expected Opened, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_fill_rejected() {
        assert_eq!(
            apply_fill(
                None,
                UserId(1),
                &symbol(),
                Decimal::ZERO,
                Price::from_u64(100),
                Decimal::from(10)
            ),
            Err(MarginError::ZeroQuantity)
        );
    }

    #[test]
    fn test_zero_price_rejected() {
        assert_eq!(
            apply_fill(
                None,
                UserId(1),
                &symbol(),
                Decimal::ONE,
                Price::zero(),
                Decimal::from(10)
            ),
            Err(MarginError::ZeroPrice)
        );
    }

    #[test]
    fn test_deterministic() {
        let run = || {
            let p = open_long();
            apply_fill(
                Some(&p),
                UserId(100),
                &symbol(),
                dec("-0.7"),
                Price::from_str("41234.56").unwrap(),
                Decimal::from(10),
            )
            .unwrap()
        };
        assert_eq!(run(), run());
    }
}
