//! In-memory authoritative system state
//!
//! The order and position maps plus the last applied event id. The event
//! bus is the only mutator; everything else holds read access. Maps are
//! `BTreeMap`s so the serialized form — and therefore the state checksum —
//! is deterministic.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

use types::ids::OrderId;
use types::order::Order;
use types::position::Position;

use crate::event::{
    Event, EventError, EventKind, OrderCanceledData, OrderCreatedData, OrderFilledData,
    PositionUpdatedData,
};

#[derive(Error, Debug)]
pub enum StateError {
    #[error(transparent)]
    Payload(#[from] EventError),

    #[error("event {event_id} fills unknown order {order_id}")]
    UnknownOrder { event_id: u64, order_id: OrderId },

    #[error("event {event_id} mutates terminal order {order_id}")]
    TerminalOrder { event_id: u64, order_id: OrderId },
}

/// The complete in-memory state of the OMS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    /// All orders ever admitted, keyed by id
    pub orders: BTreeMap<OrderId, Order>,
    /// Positions keyed by `symbol:user`
    pub positions: BTreeMap<String, Position>,
    pub last_event_id: u64,
    /// Timestamp of the last applied event, Unix nanoseconds
    pub timestamp: i64,
}

impl SystemState {
    pub fn new() -> Self {
        Self {
            orders: BTreeMap::new(),
            positions: BTreeMap::new(),
            last_event_id: 0,
            timestamp: 0,
        }
    }

    /// Apply one event.
    ///
    /// Idempotent with respect to the event id: an event at or below
    /// `last_event_id` has already been applied and is a no-op.
    pub fn apply(&mut self, event: &Event) -> Result<(), StateError> {
        if event.id != 0 && event.id <= self.last_event_id {
            return Ok(());
        }

        match event.kind {
            EventKind::OrderCreated => {
                let data: OrderCreatedData = event.decode()?;
                self.orders.insert(data.order.id, data.order);
            }
            EventKind::OrderFilled => {
                let data: OrderFilledData = event.decode()?;
                let order =
                    self.orders
                        .get_mut(&data.order_id)
                        .ok_or(StateError::UnknownOrder {
                            event_id: event.id,
                            order_id: data.order_id,
                        })?;
                if order.status.is_terminal() {
                    return Err(StateError::TerminalOrder {
                        event_id: event.id,
                        order_id: data.order_id,
                    });
                }
                // The accumulator and status transition live on Order; an
                // overfill trips its invariant and halts rather than letting
                // state and log diverge.
                order.apply_fill(data.fill_qty);
            }
            EventKind::OrderCanceled => {
                let data: OrderCanceledData = event.decode()?;
                let order =
                    self.orders
                        .get_mut(&data.order_id)
                        .ok_or(StateError::UnknownOrder {
                            event_id: event.id,
                            order_id: data.order_id,
                        })?;
                if order.status.is_terminal() {
                    return Err(StateError::TerminalOrder {
                        event_id: event.id,
                        order_id: data.order_id,
                    });
                }
                order.cancel();
            }
            EventKind::PositionOpened | EventKind::PositionUpdated | EventKind::PositionClosed => {
                let data: PositionUpdatedData = event.decode()?;
                self.positions.insert(data.position.key(), data.position);
            }
            // Durable records with no direct state mutation.
            EventKind::TradeExecuted | EventKind::Liquidation => {}
        }

        self.last_event_id = event.id;
        self.timestamp = event.timestamp;
        Ok(())
    }

    /// Deterministic SHA-256 over the canonical JSON encoding of the state
    pub fn checksum(&self) -> String {
        let bytes =
            serde_json::to_vec(self).expect("SystemState serialization cannot fail");
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("{:x}", hasher.finalize())
    }

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub fn position(&self, key: &str) -> Option<&Position> {
        self.positions.get(key)
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TradeExecutedData;
    use rust_decimal::Decimal;
    use types::ids::{Symbol, TradeId, UserId};
    use types::numeric::{Price, Quantity};
    use types::order::{OrderStatus, OrderType, Side};
    use types::trade::Trade;

    fn order(id: u64) -> Order {
        Order::new(
            OrderId(id),
            UserId(100),
            Symbol::new("BTCUSDT"),
            Side::Buy,
            OrderType::Limit,
            Price::from_u64(30_000),
            Quantity::from_str("1.0").unwrap(),
            1_708_123_456_789_000_000,
        )
    }

    fn created_event(id: u64, order_id: u64) -> Event {
        let mut event = Event::new(
            EventKind::OrderCreated,
            &OrderCreatedData {
                order: order(order_id),
            },
        )
        .unwrap();
        event.assign_id(id);
        event
    }

    #[test]
    fn test_apply_order_created() {
        let mut state = SystemState::new();
        state.apply(&created_event(1, 10)).unwrap();

        assert_eq!(state.last_event_id, 1);
        assert!(state.order(OrderId(10)).is_some());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut state = SystemState::new();
        let event = created_event(1, 10);
        state.apply(&event).unwrap();
        let checksum = state.checksum();

        state.apply(&event).unwrap();
        assert_eq!(state.checksum(), checksum);
        assert_eq!(state.orders.len(), 1);
    }

    fn fill_event(id: u64, order_id: u64, qty: &str) -> Event {
        let mut fill = Event::new(
            EventKind::OrderFilled,
            &OrderFilledData {
                order_id: OrderId(order_id),
                trade_id: TradeId(id),
                fill_qty: Quantity::from_str(qty).unwrap(),
            },
        )
        .unwrap();
        fill.assign_id(id);
        fill
    }

    #[test]
    fn test_apply_fills_accumulate_through_the_order() {
        let mut state = SystemState::new();
        state.apply(&created_event(1, 10)).unwrap();

        state.apply(&fill_event(2, 10, "0.4")).unwrap();
        let order = state.order(OrderId(10)).unwrap();
        assert_eq!(order.status, OrderStatus::PartFilled);
        assert_eq!(order.remaining(), Quantity::from_str("0.6").unwrap());

        state.apply(&fill_event(3, 10, "0.6")).unwrap();
        let order = state.order(OrderId(10)).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.is_filled());
    }

    #[test]
    fn test_fill_unknown_order_errors() {
        let mut state = SystemState::new();
        assert!(matches!(
            state.apply(&fill_event(1, 77, "1.0")),
            Err(StateError::UnknownOrder { .. })
        ));
    }

    #[test]
    fn test_fill_on_terminal_order_errors() {
        let mut state = SystemState::new();
        state.apply(&created_event(1, 10)).unwrap();
        state.apply(&fill_event(2, 10, "1.0")).unwrap();

        assert!(matches!(
            state.apply(&fill_event(3, 10, "0.1")),
            Err(StateError::TerminalOrder { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "fill would exceed order quantity")]
    fn test_overfill_trips_the_order_invariant() {
        let mut state = SystemState::new();
        state.apply(&created_event(1, 10)).unwrap();
        let _ = state.apply(&fill_event(2, 10, "1.5"));
    }

    #[test]
    fn test_cancel_terminal_order_errors() {
        let mut state = SystemState::new();
        state.apply(&created_event(1, 10)).unwrap();

        let mut cancel = Event::new(
            EventKind::OrderCanceled,
            &OrderCanceledData {
                order_id: OrderId(10),
            },
        )
        .unwrap();
        cancel.assign_id(2);
        state.apply(&cancel).unwrap();
        assert_eq!(
            state.order(OrderId(10)).unwrap().status,
            OrderStatus::Canceled
        );

        let mut again = Event::new(
            EventKind::OrderCanceled,
            &OrderCanceledData {
                order_id: OrderId(10),
            },
        )
        .unwrap();
        again.assign_id(3);
        assert!(matches!(
            state.apply(&again),
            Err(StateError::TerminalOrder { .. })
        ));
    }

    #[test]
    fn test_apply_position_events() {
        let mut state = SystemState::new();
        let position = Position {
            user_id: UserId(100),
            symbol: Symbol::new("BTCUSDT"),
            qty: Decimal::from(2),
            entry_price: Price::from_u64(40_000),
            leverage: Decimal::from(10),
            margin: Decimal::from(8_000),
            realized_pnl: Decimal::ZERO,
        };
        let mut event = Event::new(
            EventKind::PositionOpened,
            &PositionUpdatedData {
                position: position.clone(),
                reason: "TRADE".into(),
            },
        )
        .unwrap();
        event.assign_id(1);
        state.apply(&event).unwrap();

        assert_eq!(state.position("BTCUSDT:100"), Some(&position));
    }

    #[test]
    fn test_trade_executed_only_advances_cursor() {
        let mut state = SystemState::new();
        let mut event = Event::new(
            EventKind::TradeExecuted,
            &TradeExecutedData {
                trade: Trade {
                    trade_id: TradeId(1),
                    order_id: OrderId(10),
                    user_id: UserId(100),
                    symbol: Symbol::new("BTCUSDT"),
                    side: Side::Buy,
                    price: Price::from_u64(30_000),
                    qty: Quantity::from_str("1.0").unwrap(),
                    is_maker: false,
                },
            },
        )
        .unwrap();
        event.assign_id(1);
        state.apply(&event).unwrap();

        assert_eq!(state.last_event_id, 1);
        assert!(state.orders.is_empty());
        assert!(state.positions.is_empty());
    }

    #[test]
    fn test_checksum_deterministic_and_sensitive() {
        let mut a = SystemState::new();
        let mut b = SystemState::new();
        a.apply(&created_event(1, 10)).unwrap();
        b.apply(&created_event(1, 10)).unwrap();
        assert_eq!(a.checksum(), b.checksum());

        b.apply(&created_event(2, 11)).unwrap();
        assert_ne!(a.checksum(), b.checksum());
    }
}
