//! Configuration surface
//!
//! A plain struct: loading it from files or flags belongs to the embedding
//! process, not this crate.

use rust_decimal::Decimal;
use std::path::PathBuf;
use std::time::Duration;

/// Tunables for an OMS instance
#[derive(Debug, Clone)]
pub struct OmsConfig {
    /// Matching shards (positive)
    pub shard_count: usize,
    /// Dispatcher workers (positive)
    pub dispatcher_workers: usize,
    pub snapshot_interval: Duration,
    /// Newest snapshots kept on disk (at least 1)
    pub snapshot_retention: usize,
    pub event_dir: PathBuf,
    pub snapshot_dir: PathBuf,
    pub maintenance_margin_rate: Decimal,
    pub default_leverage: Decimal,
}

impl Default for OmsConfig {
    fn default() -> Self {
        Self {
            shard_count: 4,
            dispatcher_workers: 4,
            snapshot_interval: Duration::from_secs(10),
            snapshot_retention: 5,
            event_dir: PathBuf::from("./data/events"),
            snapshot_dir: PathBuf::from("./data/snapshots"),
            maintenance_margin_rate: risk_engine::liquidation::default_maintenance_margin_rate(),
            default_leverage: Decimal::from(10),
        }
    }
}
