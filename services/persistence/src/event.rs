//! Durable event records
//!
//! Every state transition is an `Event`: a self-describing JSON record with
//! a store-assigned monotonic id and a SHA-256 checksum. The checksum covers
//! the canonical JSON encoding of `{id, type, timestamp, data}` in exactly
//! that field order, with the checksum field excluded; payload objects
//! serialize with sorted keys, so the encoding is stable across replays.
//!
//! Timestamps are Unix nanoseconds.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use types::ids::{OrderId, Symbol, TradeId, UserId};
use types::numeric::{Price, Quantity};
use types::order::Order;
use types::position::Position;
use types::trade::Trade;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("payload serialization failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("payload of {kind:?} event {id} failed to decode: {source}")]
    Decode {
        id: u64,
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Event taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "ORDER_CREATED")]
    OrderCreated,
    #[serde(rename = "ORDER_FILLED")]
    OrderFilled,
    #[serde(rename = "ORDER_CANCELED")]
    OrderCanceled,
    #[serde(rename = "TRADE_EXECUTED")]
    TradeExecuted,
    #[serde(rename = "POSITION_OPENED")]
    PositionOpened,
    #[serde(rename = "POSITION_UPDATED")]
    PositionUpdated,
    #[serde(rename = "POSITION_CLOSED")]
    PositionClosed,
    #[serde(rename = "LIQUIDATION")]
    Liquidation,
}

/// A single durable state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Assigned by the event store; strictly increasing from 1, gapless
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Unix nanoseconds
    pub timestamp: i64,
    pub data: Value,
    /// Lowercase hex SHA-256 over `{id, type, timestamp, data}`
    pub checksum: String,
}

/// The checksummed portion of an event, field order fixed.
#[derive(Serialize)]
struct ChecksumBody<'a> {
    id: u64,
    #[serde(rename = "type")]
    kind: EventKind,
    timestamp: i64,
    data: &'a Value,
}

impl Event {
    /// Create an event with id 0 (the store assigns the real id on append)
    pub fn new(kind: EventKind, payload: &impl Serialize) -> Result<Self, EventError> {
        let data = serde_json::to_value(payload).map_err(EventError::Encode)?;
        let timestamp = now_nanos();
        let mut event = Self {
            id: 0,
            kind,
            timestamp,
            data,
            checksum: String::new(),
        };
        event.checksum = event.compute_checksum();
        Ok(event)
    }

    /// Re-stamp the id and recompute the checksum (store-side, post append)
    pub(crate) fn assign_id(&mut self, id: u64) {
        self.id = id;
        self.checksum = self.compute_checksum();
    }

    pub fn compute_checksum(&self) -> String {
        let body = ChecksumBody {
            id: self.id,
            kind: self.kind,
            timestamp: self.timestamp,
            data: &self.data,
        };
        let bytes = serde_json::to_vec(&body).expect("checksum body serialization cannot fail");
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("{:x}", hasher.finalize())
    }

    /// Whether the stored checksum matches the record contents
    pub fn verify(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// Decode the payload as the type matching this event's kind
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, EventError> {
        serde_json::from_value(self.data.clone()).map_err(|source| EventError::Decode {
            id: self.id,
            kind: self.kind,
            source,
        })
    }
}

/// Current wall clock as Unix nanoseconds
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

// ── Payloads ────────────────────────────────────────────────────────

/// `ORDER_CREATED`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreatedData {
    pub order: Order,
}

/// `ORDER_FILLED` — one fill applied to an order; the accumulator and
/// status transition are derived by `Order::apply_fill` when the event is
/// applied, so the transition logic lives in one place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFilledData {
    pub order_id: OrderId,
    pub trade_id: TradeId,
    pub fill_qty: Quantity,
}

/// `ORDER_CANCELED`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCanceledData {
    pub order_id: OrderId,
}

/// `TRADE_EXECUTED` — durable trade record; does not mutate state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeExecutedData {
    pub trade: Trade,
}

/// `POSITION_OPENED` / `POSITION_UPDATED` / `POSITION_CLOSED` — carries the
/// resulting position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdatedData {
    pub position: Position,
    pub reason: String,
}

/// `LIQUIDATION` — records that a liquidation order was issued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationData {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub symbol: Symbol,
    pub quantity: Quantity,
    pub mark_price: Price,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::order::{OrderType, Side};

    fn sample_order() -> Order {
        Order::new(
            OrderId(1),
            UserId(100),
            Symbol::new("BTCUSDT"),
            Side::Buy,
            OrderType::Limit,
            Price::from_u64(30_000),
            Quantity::from_str("1.0").unwrap(),
            1_708_123_456_789_000_000,
        )
    }

    #[test]
    fn test_checksum_verifies() {
        let event = Event::new(
            EventKind::OrderCreated,
            &OrderCreatedData {
                order: sample_order(),
            },
        )
        .unwrap();
        assert!(event.verify());
        assert_eq!(event.checksum.len(), 64);
    }

    #[test]
    fn test_checksum_detects_tampered_payload() {
        let mut event = Event::new(
            EventKind::OrderCreated,
            &OrderCreatedData {
                order: sample_order(),
            },
        )
        .unwrap();
        event.data["order"]["quantity"] = Value::String("999".into());
        assert!(!event.verify());
    }

    #[test]
    fn test_id_assignment_recomputes_checksum() {
        let mut event = Event::new(
            EventKind::OrderCanceled,
            &OrderCanceledData {
                order_id: OrderId(5),
            },
        )
        .unwrap();
        let before = event.checksum.clone();
        event.assign_id(42);
        assert_ne!(event.checksum, before);
        assert!(event.verify());
    }

    #[test]
    fn test_serialize_parse_verify_roundtrip() {
        let mut event = Event::new(
            EventKind::PositionUpdated,
            &PositionUpdatedData {
                position: Position {
                    user_id: UserId(100),
                    symbol: Symbol::new("BTCUSDT"),
                    qty: rust_decimal::Decimal::from(2),
                    entry_price: Price::from_u64(40_000),
                    leverage: rust_decimal::Decimal::from(10),
                    margin: rust_decimal::Decimal::from(8_000),
                    realized_pnl: rust_decimal::Decimal::ZERO,
                },
                reason: "TRADE".into(),
            },
        )
        .unwrap();
        event.assign_id(7);

        let line = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&line).unwrap();
        assert!(parsed.verify());
        assert_eq!(parsed, event);

        let payload: PositionUpdatedData = parsed.decode().unwrap();
        assert_eq!(payload.reason, "TRADE");
    }

    #[test]
    fn test_decode_wrong_type_errors() {
        let event = Event::new(
            EventKind::OrderCanceled,
            &OrderCanceledData {
                order_id: OrderId(5),
            },
        )
        .unwrap();
        assert!(event.decode::<OrderCreatedData>().is_err());
    }

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&EventKind::PositionClosed).unwrap(),
            "\"POSITION_CLOSED\""
        );
        assert_eq!(
            serde_json::to_string(&EventKind::Liquidation).unwrap(),
            "\"LIQUIDATION\""
        );
    }
}
