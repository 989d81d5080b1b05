//! Numeric identifiers and id generation
//!
//! All entity ids are monotonic integers so that a restarted process can
//! recover the counter from the durable log. Two generators exist: a plain
//! atomic counter for order ids, and a composite millisecond/node/sequence
//! generator for trade ids whose shape survives if trade ids ever leave the
//! process.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for one side of a fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TradeId(pub u64);

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account owning orders and positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trading symbol, e.g. `BTCUSDT`
///
/// Free-form non-empty string; the sharded engine hashes its bytes for
/// routing, so the representation must stay byte-stable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a new symbol
    ///
    /// # Panics
    /// Panics if the symbol is empty
    pub fn new(s: impl Into<String>) -> Self {
        let s = s.into();
        assert!(!s.is_empty(), "Symbol must not be empty");
        Self(s)
    }

    /// Try to create a symbol, returning None if empty
    pub fn try_new(s: impl Into<String>) -> Option<Self> {
        let s = s.into();
        if s.is_empty() {
            None
        } else {
            Some(Self(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Ids below this value are reserved for fixtures and never handed out.
const ID_FLOOR: u64 = 1000;

/// Lock-free monotonic id counter for orders and liquidation orders.
///
/// Starts above a reserved range so that hand-written test fixtures can use
/// small ids without colliding with generated ones.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(ID_FLOOR),
        }
    }

    /// Resume counting after the given id (used after replay).
    pub fn starting_after(last: u64) -> Self {
        Self {
            next: AtomicU64::new(last.max(ID_FLOOR)),
        }
    }

    pub fn next_order_id(&self) -> OrderId {
        OrderId(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// Bit layout of a composite trade id: 41 bits of milliseconds since epoch,
// 10 bits of node id, 12 bits of per-millisecond sequence.
const NODE_BITS: u64 = 10;
const SEQ_BITS: u64 = 12;
const NODE_MASK: u64 = (1 << NODE_BITS) - 1;
const SEQ_MASK: u64 = (1 << SEQ_BITS) - 1;

/// Composite trade-id generator: millisecond timestamp, node id, and a
/// per-millisecond sequence, composed under a mutex.
#[derive(Debug)]
pub struct TradeIdGen {
    node: u64,
    state: Mutex<TradeIdState>,
}

#[derive(Debug)]
struct TradeIdState {
    last_millis: u64,
    sequence: u64,
}

impl TradeIdGen {
    pub fn new(node: u64) -> Self {
        Self {
            node: node & NODE_MASK,
            state: Mutex::new(TradeIdState {
                last_millis: 0,
                sequence: 0,
            }),
        }
    }

    pub fn next_trade_id(&self) -> TradeId {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut millis = current_millis();

        if millis == state.last_millis {
            state.sequence = (state.sequence + 1) & SEQ_MASK;
            // Sequence exhausted within this millisecond: spin to the next one.
            if state.sequence == 0 {
                while millis <= state.last_millis {
                    millis = current_millis();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_millis = millis;

        TradeId((millis << (NODE_BITS + SEQ_BITS)) | (self.node << SEQ_BITS) | state.sequence)
    }
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generator_monotonic() {
        let gen = IdGenerator::new();
        let a = gen.next_order_id();
        let b = gen.next_order_id();
        assert!(b.0 > a.0);
        assert!(a.0 > ID_FLOOR);
    }

    #[test]
    fn test_id_generator_resumes_after_replay() {
        let gen = IdGenerator::starting_after(5000);
        assert_eq!(gen.next_order_id(), OrderId(5001));
    }

    #[test]
    fn test_id_generator_resume_respects_floor() {
        let gen = IdGenerator::starting_after(3);
        assert!(gen.next_order_id().0 > ID_FLOOR);
    }

    #[test]
    fn test_trade_id_gen_unique() {
        let gen = TradeIdGen::new(1);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(gen.next_trade_id()), "duplicate trade id");
        }
    }

    #[test]
    fn test_trade_id_embeds_node() {
        let gen = TradeIdGen::new(7);
        let id = gen.next_trade_id();
        assert_eq!((id.0 >> SEQ_BITS) & NODE_MASK, 7);
    }

    #[test]
    fn test_symbol_rejects_empty() {
        assert!(Symbol::try_new("").is_none());
        assert!(Symbol::try_new("BTCUSDT").is_some());
    }

    #[test]
    fn test_id_serialization_transparent() {
        let id = OrderId(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        let sym = Symbol::new("ETHUSDT");
        assert_eq!(serde_json::to_string(&sym).unwrap(), "\"ETHUSDT\"");
    }
}
