//! Sharded engine: symbol-hash routing over single-writer shards
//!
//! Every order for a given symbol lands on exactly one shard and is
//! processed strictly serially there, in submission order. No ordering is
//! promised across symbols or shards.

use types::ids::{OrderId, Symbol};
use types::numeric::Price;
use types::order::{Order, Side};
use types::trade::Trade;

use crate::shard::{EngineShard, ShardError};

/// 32-bit FNV-1a.
///
/// The routing hash is a durability contract: it must stay byte-for-byte
/// reproducible across processes, so the constants are spelled out here
/// rather than delegated to a hasher with a different width.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Fixed pool of matching shards with stable symbol routing
pub struct ShardedEngine {
    shards: Vec<EngineShard>,
}

impl ShardedEngine {
    /// Create an engine with `shard_count` shards
    ///
    /// # Panics
    /// Panics if `shard_count` is zero.
    pub fn new(shard_count: usize) -> Self {
        assert!(shard_count > 0, "shard_count must be positive");
        let shards = (0..shard_count).map(EngineShard::new).collect();
        Self { shards }
    }

    /// The shard index a symbol routes to
    pub fn shard_index(&self, symbol: &Symbol) -> usize {
        fnv1a_32(symbol.as_bytes()) as usize % self.shards.len()
    }

    /// Submit an order to its symbol's shard and wait for the trades
    pub fn submit(&self, order: Order) -> Result<Vec<Trade>, ShardError> {
        let shard = &self.shards[self.shard_index(&order.symbol)];
        shard.submit(order)
    }

    /// Cancel a resting order on its symbol's shard
    pub fn cancel(
        &self,
        symbol: Symbol,
        order_id: OrderId,
        price: Price,
        side: Side,
    ) -> Result<bool, ShardError> {
        let shard = &self.shards[self.shard_index(&symbol)];
        shard.cancel(symbol, order_id, price, side)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Stop all shards: each drains its queue, then its thread is joined
    pub fn shutdown(&self) {
        for shard in &self.shards {
            shard.shutdown();
        }
    }
}

impl Drop for ShardedEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
