//! Event bus: the single mutation path into system state
//!
//! `publish` is totally ordered by one mutex and runs append-then-apply:
//! the event is made durable (fsynced) first, then applied to the in-memory
//! state. A crash between the two steps is healed by replay on restart. An
//! append failure leaves the in-memory state untouched and surfaces as a
//! durability error the process must treat as fatal.

use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::error;

use crate::event::Event;
use crate::state::{StateError, SystemState};
use crate::store::{EventStore, StoreError};

#[derive(Error, Debug)]
pub enum BusError {
    /// The event never became durable; in-memory state is unchanged.
    #[error("durability failure: {0}")]
    Store(#[from] StoreError),

    /// The event is durable but could not be applied; memory and log now
    /// disagree and the process must halt (replay will hit the same error
    /// until the operator intervenes).
    #[error("state divergence after durable append: {0}")]
    State(#[from] StateError),
}

/// Serialized publisher over the store and the authoritative state
pub struct EventBus {
    store: Arc<EventStore>,
    state: Arc<RwLock<SystemState>>,
    publish_lock: Mutex<()>,
}

impl EventBus {
    pub fn new(store: Arc<EventStore>, state: Arc<RwLock<SystemState>>) -> Self {
        Self {
            store,
            state,
            publish_lock: Mutex::new(()),
        }
    }

    /// Durably record the event, then apply it. Returns the assigned id.
    pub fn publish(&self, mut event: Event) -> Result<u64, BusError> {
        let _ordered = self.publish_lock.lock().unwrap_or_else(|e| e.into_inner());

        let id = self.store.append(&mut event)?;

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = state.apply(&event) {
            error!(event_id = id, error = %e, "durable event failed to apply");
            return Err(e.into());
        }
        Ok(id)
    }

    /// Shared handle to the authoritative state (read access for services)
    pub fn state(&self) -> Arc<RwLock<SystemState>> {
        Arc::clone(&self.state)
    }

    pub fn store(&self) -> Arc<EventStore> {
        Arc::clone(&self.store)
    }
}
