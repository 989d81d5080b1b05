//! State snapshots: gzip-compressed JSON with atomic writes and retention
//!
//! Snapshots are accelerators for replay, never the source of truth — the
//! event log alone is sufficient for recovery. Files are named
//! `snapshot_<unix_secs>_<sequence_id>.snap.gz` and written to a `.tmp`
//! sibling, fsynced, then renamed into place. The stored checksum is
//! verified on every load.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use types::ids::OrderId;
use types::order::Order;
use types::position::Position;

use crate::state::SystemState;

const NANOS_PER_SEC: i64 = 1_000_000_000;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("snapshot encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("snapshot decoding error: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("snapshot integrity failure: expected {expected}, got {actual}")]
    IntegrityFailure { expected: String, actual: String },

    #[error("no snapshots found")]
    NoSnapshots,

    #[error("snapshot with sequence {0} not found")]
    NotFound(u64),
}

/// Point-in-time capture of the system state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// `last_event_id` at capture time
    pub sequence_id: u64,
    /// State timestamp at capture time, Unix nanoseconds
    pub timestamp: i64,
    pub orders: BTreeMap<OrderId, Order>,
    pub positions: BTreeMap<String, Position>,
    /// SHA-256 over the canonical JSON of the fields above
    pub checksum: String,
}

/// The checksummed portion of a snapshot, field order fixed.
#[derive(Serialize)]
struct ChecksumBody<'a> {
    sequence_id: u64,
    timestamp: i64,
    orders: &'a BTreeMap<OrderId, Order>,
    positions: &'a BTreeMap<String, Position>,
}

impl Snapshot {
    /// Capture the current state
    pub fn from_state(state: &SystemState) -> Self {
        let mut snapshot = Self {
            sequence_id: state.last_event_id,
            timestamp: state.timestamp,
            orders: state.orders.clone(),
            positions: state.positions.clone(),
            checksum: String::new(),
        };
        snapshot.checksum = snapshot.compute_checksum();
        snapshot
    }

    /// Restore a state equal to the one this snapshot captured
    pub fn into_state(self) -> SystemState {
        SystemState {
            orders: self.orders,
            positions: self.positions,
            last_event_id: self.sequence_id,
            timestamp: self.timestamp,
        }
    }

    pub fn compute_checksum(&self) -> String {
        let body = ChecksumBody {
            sequence_id: self.sequence_id,
            timestamp: self.timestamp,
            orders: &self.orders,
            positions: &self.positions,
        };
        let bytes = serde_json::to_vec(&body).expect("snapshot body serialization cannot fail");
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("{:x}", hasher.finalize())
    }

    pub fn verify_integrity(&self) -> bool {
        self.checksum == self.compute_checksum()
    }
}

/// Metadata parsed from a snapshot filename
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub sequence_id: u64,
    pub timestamp_secs: i64,
}

/// Creates, lists, loads, and prunes snapshots in one directory
pub struct SnapshotManager {
    dir: PathBuf,
    retention: usize,
}

impl SnapshotManager {
    /// Create a manager, ensuring the directory exists
    ///
    /// `retention` is the number of newest snapshots kept after each write.
    pub fn new(dir: impl Into<PathBuf>, retention: usize) -> Result<Self, SnapshotError> {
        assert!(retention >= 1, "snapshot retention must be at least 1");
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, retention })
    }

    /// Capture `state` to disk atomically, then prune old snapshots
    pub fn take_snapshot(&self, state: &SystemState) -> Result<PathBuf, SnapshotError> {
        let snapshot = Snapshot::from_state(state);
        let filename = format!(
            "snapshot_{}_{}.snap.gz",
            snapshot.timestamp / NANOS_PER_SEC,
            snapshot.sequence_id
        );
        let final_path = self.dir.join(&filename);
        let tmp_path = self.dir.join(format!("{filename}.tmp"));

        {
            let file = File::create(&tmp_path)?;
            let mut encoder = GzEncoder::new(file, Compression::best());
            serde_json::to_writer(&mut encoder, &snapshot).map_err(SnapshotError::Encode)?;
            let file = encoder.finish()?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;

        if let Err(e) = self.cleanup_old() {
            // Retention is best-effort; the new snapshot is already durable.
            warn!(error = %e, "snapshot retention cleanup failed");
        }

        info!(sequence = snapshot.sequence_id, path = %final_path.display(), "snapshot written");
        Ok(final_path)
    }

    /// Load and verify the snapshot with the highest sequence id
    pub fn load_latest(&self) -> Result<Snapshot, SnapshotError> {
        let mut infos = self.list()?;
        infos.sort_by_key(|info| info.sequence_id);
        let latest = infos.pop().ok_or(SnapshotError::NoSnapshots)?;
        self.load(&latest.path)
    }

    /// Load and verify a specific snapshot by sequence id
    pub fn load_by_sequence(&self, sequence_id: u64) -> Result<Snapshot, SnapshotError> {
        let info = self
            .list()?
            .into_iter()
            .find(|info| info.sequence_id == sequence_id)
            .ok_or(SnapshotError::NotFound(sequence_id))?;
        self.load(&info.path)
    }

    /// Load one snapshot file, verifying its checksum
    pub fn load(&self, path: &Path) -> Result<Snapshot, SnapshotError> {
        let file = File::open(path)?;
        let mut decoder = GzDecoder::new(file);
        let mut json = Vec::new();
        decoder.read_to_end(&mut json)?;

        let snapshot: Snapshot =
            serde_json::from_slice(&json).map_err(SnapshotError::Decode)?;

        if !snapshot.verify_integrity() {
            return Err(SnapshotError::IntegrityFailure {
                expected: snapshot.checksum.clone(),
                actual: snapshot.compute_checksum(),
            });
        }
        Ok(snapshot)
    }

    /// All snapshots present on disk, unsorted
    pub fn list(&self) -> Result<Vec<SnapshotInfo>, SnapshotError> {
        let mut infos = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some((timestamp_secs, sequence_id)) = parse_snapshot_name(&name) {
                infos.push(SnapshotInfo {
                    path: entry.path(),
                    sequence_id,
                    timestamp_secs,
                });
            }
        }
        Ok(infos)
    }

    /// Delete everything but the newest `retention` snapshots
    pub fn cleanup_old(&self) -> Result<Vec<PathBuf>, SnapshotError> {
        let mut infos = self.list()?;
        if infos.len() <= self.retention {
            return Ok(Vec::new());
        }
        infos.sort_by_key(|info| info.sequence_id);
        let excess = infos.len() - self.retention;
        let mut removed = Vec::new();
        for info in infos.into_iter().take(excess) {
            fs::remove_file(&info.path)?;
            removed.push(info.path);
        }
        Ok(removed)
    }

    /// Spawn a background loop snapshotting `state` every `interval` until
    /// the shutdown channel is signalled or dropped.
    pub fn spawn_periodic(
        self: Arc<Self>,
        state: Arc<RwLock<SystemState>>,
        interval: Duration,
        shutdown: crossbeam_channel::Receiver<()>,
    ) -> JoinHandle<()> {
        std::thread::spawn(move || {
            let ticker = crossbeam_channel::tick(interval);
            loop {
                crossbeam_channel::select! {
                    recv(ticker) -> _ => {
                        let copy = state.read().unwrap_or_else(|e| e.into_inner()).clone();
                        if let Err(e) = self.take_snapshot(&copy) {
                            warn!(error = %e, "periodic snapshot failed");
                        }
                    }
                    recv(shutdown) -> _ => return,
                }
            }
        })
    }
}

fn parse_snapshot_name(name: &str) -> Option<(i64, u64)> {
    let stem = name
        .strip_prefix("snapshot_")?
        .strip_suffix(".snap.gz")?;
    let (secs, seq) = stem.split_once('_')?;
    Some((secs.parse().ok()?, seq.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventKind, OrderCreatedData};
    use tempfile::TempDir;
    use types::ids::{Symbol, UserId};
    use types::numeric::{Price, Quantity};
    use types::order::{OrderType, Side};

    fn state_with_orders(count: u64) -> SystemState {
        let mut state = SystemState::new();
        for i in 1..=count {
            let mut event = Event::new(
                EventKind::OrderCreated,
                &OrderCreatedData {
                    order: Order::new(
                        OrderId(i),
                        UserId(100),
                        Symbol::new("BTCUSDT"),
                        Side::Buy,
                        OrderType::Limit,
                        Price::from_u64(30_000),
                        Quantity::from_str("1.0").unwrap(),
                        i as i64 * NANOS_PER_SEC,
                    ),
                },
            )
            .unwrap();
            event.assign_id(i);
            state.apply(&event).unwrap();
        }
        state
    }

    #[test]
    fn test_write_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let manager = SnapshotManager::new(tmp.path(), 5).unwrap();
        let state = state_with_orders(3);

        let path = manager.take_snapshot(&state).unwrap();
        assert!(path.to_string_lossy().ends_with(".snap.gz"));

        let loaded = manager.load_latest().unwrap();
        assert_eq!(loaded.sequence_id, 3);
        assert!(loaded.verify_integrity());
        assert_eq!(loaded.into_state(), state);
    }

    #[test]
    fn test_snapshot_restore_identity() {
        // take(state) then restore, with no events applied, equals state.
        let state = state_with_orders(5);
        let snapshot = Snapshot::from_state(&state);
        let restored = snapshot.into_state();
        assert_eq!(restored.checksum(), state.checksum());
    }

    #[test]
    fn test_no_snapshots_error() {
        let tmp = TempDir::new().unwrap();
        let manager = SnapshotManager::new(tmp.path(), 5).unwrap();
        assert!(matches!(
            manager.load_latest(),
            Err(SnapshotError::NoSnapshots)
        ));
    }

    #[test]
    fn test_latest_is_highest_sequence() {
        let tmp = TempDir::new().unwrap();
        let manager = SnapshotManager::new(tmp.path(), 5).unwrap();
        for count in [2u64, 5, 3] {
            manager.take_snapshot(&state_with_orders(count)).unwrap();
        }
        assert_eq!(manager.load_latest().unwrap().sequence_id, 5);
    }

    #[test]
    fn test_retention_prunes_oldest() {
        let tmp = TempDir::new().unwrap();
        let manager = SnapshotManager::new(tmp.path(), 2).unwrap();
        for count in 1..=5u64 {
            manager.take_snapshot(&state_with_orders(count)).unwrap();
        }

        let mut infos = manager.list().unwrap();
        infos.sort_by_key(|i| i.sequence_id);
        let sequences: Vec<u64> = infos.iter().map(|i| i.sequence_id).collect();
        assert_eq!(sequences, vec![4, 5]);
    }

    #[test]
    fn test_tampered_snapshot_rejected() {
        let tmp = TempDir::new().unwrap();
        let manager = SnapshotManager::new(tmp.path(), 5).unwrap();
        let state = state_with_orders(2);
        let path = manager.take_snapshot(&state).unwrap();

        // Rewrite with a falsified sequence but the old checksum.
        let mut snapshot = manager.load(&path).unwrap();
        snapshot.sequence_id = 999;
        let file = File::create(&path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::best());
        serde_json::to_writer(&mut encoder, &snapshot).unwrap();
        encoder.finish().unwrap();

        assert!(matches!(
            manager.load(&path),
            Err(SnapshotError::IntegrityFailure { .. })
        ));
    }

    #[test]
    fn test_no_tmp_files_left_behind() {
        let tmp = TempDir::new().unwrap();
        let manager = SnapshotManager::new(tmp.path(), 5).unwrap();
        manager.take_snapshot(&state_with_orders(1)).unwrap();

        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_periodic_loop_takes_snapshots() {
        let tmp = TempDir::new().unwrap();
        let manager = Arc::new(SnapshotManager::new(tmp.path(), 5).unwrap());
        let state = Arc::new(RwLock::new(state_with_orders(2)));
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);

        let handle = Arc::clone(&manager).spawn_periodic(
            Arc::clone(&state),
            Duration::from_millis(20),
            shutdown_rx,
        );
        std::thread::sleep(Duration::from_millis(120));
        shutdown_tx.send(()).unwrap();
        handle.join().unwrap();

        assert!(!manager.list().unwrap().is_empty());
    }

    #[test]
    fn test_parse_snapshot_name() {
        assert_eq!(
            parse_snapshot_name("snapshot_1708123456_42.snap.gz"),
            Some((1_708_123_456, 42))
        );
        assert_eq!(parse_snapshot_name("snapshot_x_42.snap.gz"), None);
        assert_eq!(parse_snapshot_name("events.log"), None);
    }
}
