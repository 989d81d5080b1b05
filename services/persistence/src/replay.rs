//! Replay engine: rebuild system state from snapshot + event tail
//!
//! Recovery loads the newest snapshot (or starts empty), then applies every
//! event with an id beyond the snapshot's sequence. Any checksum failure —
//! event or snapshot — aborts recovery; the system refuses to start on a
//! log it cannot trust.

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::snapshot::{SnapshotError, SnapshotManager};
use crate::state::{StateError, SystemState};
use crate::store::{EventStore, StoreError};

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("failed to apply event during replay: {0}")]
    Apply(#[from] StateError),
}

/// Counters from a `verify` walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyReport {
    pub events: usize,
    pub snapshots: usize,
}

/// Rebuilds `SystemState` from durable storage
pub struct ReplayEngine {
    store: Arc<EventStore>,
    snapshots: Arc<SnapshotManager>,
}

impl ReplayEngine {
    pub fn new(store: Arc<EventStore>, snapshots: Arc<SnapshotManager>) -> Self {
        Self { store, snapshots }
    }

    /// Rebuild the complete state: newest snapshot plus the event tail
    pub fn replay(&self) -> Result<SystemState, ReplayError> {
        let mut state = match self.snapshots.load_latest() {
            Ok(snapshot) => snapshot.into_state(),
            Err(SnapshotError::NoSnapshots) => SystemState::new(),
            Err(e) => return Err(e.into()),
        };
        let base = state.last_event_id;

        let events = self.store.read_from(base)?;
        let replayed = events.len();
        for event in &events {
            state.apply(event)?;
        }

        info!(
            snapshot_sequence = base,
            replayed, final_sequence = state.last_event_id, "replay complete"
        );
        Ok(state)
    }

    /// Rebuild state up to and including `target_id`, from the beginning of
    /// the log (snapshots are bypassed so any historical point is reachable).
    pub fn replay_to(&self, target_id: u64) -> Result<SystemState, ReplayError> {
        let mut state = SystemState::new();
        for event in self.store.read_all()? {
            if event.id > target_id {
                break;
            }
            state.apply(&event)?;
        }
        Ok(state)
    }

    /// Verify every event checksum and every retained snapshot's integrity
    pub fn verify(&self) -> Result<VerifyReport, ReplayError> {
        // read_all verifies each record's checksum as it scans.
        let events = self.store.read_all()?.len();

        let infos = self.snapshots.list()?;
        let snapshots = infos.len();
        for info in infos {
            // load verifies the stored checksum.
            self.snapshots.load(&info.path)?;
        }

        Ok(VerifyReport { events, snapshots })
    }
}
