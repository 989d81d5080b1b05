//! Event-sourced durability layer
//!
//! Append-only event log with per-record SHA-256 checksums, a single-writer
//! event bus that makes every state transition durable before it is applied,
//! gzip-compressed snapshots with atomic writes and retention, and a replay
//! engine that rebuilds the in-memory state bit-identically after a crash.

pub mod bus;
pub mod event;
pub mod replay;
pub mod snapshot;
pub mod state;
pub mod store;

pub use bus::{BusError, EventBus};
pub use event::{Event, EventKind};
pub use replay::{ReplayEngine, ReplayError};
pub use snapshot::{Snapshot, SnapshotError, SnapshotManager};
pub use state::{StateError, SystemState};
pub use store::{EventStore, StoreError};
