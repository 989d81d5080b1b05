//! Bid (buy-side) book
//!
//! Price levels sorted so the highest bid matches first. BTreeMap keeps
//! iteration deterministic; the best level is the last key.

use std::collections::BTreeMap;
use types::ids::OrderId;
use types::numeric::{Price, Quantity};

use super::price_level::{BookEntry, PriceLevel};

/// Buy side of a symbol's book
#[derive(Debug, Clone, Default)]
pub struct BidBook {
    levels: BTreeMap<Price, PriceLevel>,
}

impl BidBook {
    pub fn new() -> Self {
        Self {
            levels: BTreeMap::new(),
        }
    }

    /// Rest an entry at its price, behind earlier arrivals
    pub fn insert(&mut self, price: Price, entry: BookEntry) {
        self.levels.entry(price).or_default().push_back(entry);
    }

    /// Best bid price and the maker entry next in line
    pub fn best(&self) -> Option<(Price, BookEntry)> {
        self.levels
            .iter()
            .next_back()
            .and_then(|(price, level)| level.front().map(|e| (*price, e.clone())))
    }

    /// Consume `fill` from the front of the best level, pruning it when empty
    pub fn fill_best(&mut self, fill: Quantity) {
        if let Some((price, level)) = self.levels.iter_mut().next_back() {
            let price = *price;
            level.fill_front(fill);
            if level.is_empty() {
                self.levels.remove(&price);
            }
        }
    }

    /// Remove a resting order (cancel); true if it was found
    pub fn remove(&mut self, order_id: OrderId, price: Price) -> bool {
        let Some(level) = self.levels.get_mut(&price) else {
            return false;
        };
        let found = level.remove(order_id).is_some();
        if level.is_empty() {
            self.levels.remove(&price);
        }
        found
    }

    pub fn best_price(&self) -> Option<Price> {
        self.levels.keys().next_back().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn order_count(&self) -> usize {
        self.levels.values().map(|l| l.order_count()).sum()
    }
}
