//! Position book and position service
//!
//! The position book is a keyed view over the authoritative system state:
//! readers are concurrent, and the only writes flow through the event bus.
//! A position mutation is committed exactly when its event is durable.

use rust_decimal::Decimal;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::debug;

use persistence::event::{Event, EventError, EventKind, PositionUpdatedData};
use persistence::{BusError, EventBus, SystemState};
use risk_engine::margin::{self, MarginError, PositionUpdate};
use types::ids::{Symbol, UserId};
use types::numeric::Price;
use types::position::{position_key, Position};

#[derive(Error, Debug)]
pub enum PositionError {
    /// Position arithmetic rejected the fill; state was not touched.
    #[error("position update failed: {0}")]
    Margin(#[from] MarginError),

    #[error(transparent)]
    Encode(#[from] EventError),

    #[error(transparent)]
    Publish(#[from] BusError),
}

/// Concurrent read access to positions, keyed by (user, symbol)
#[derive(Clone)]
pub struct PositionBook {
    state: Arc<RwLock<SystemState>>,
}

impl PositionBook {
    pub fn new(state: Arc<RwLock<SystemState>>) -> Self {
        Self { state }
    }

    pub fn get(&self, user_id: UserId, symbol: &Symbol) -> Option<Position> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .position(&position_key(symbol, user_id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .positions
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Applies fills to positions and persists every transition as an event
pub struct PositionService {
    book: PositionBook,
    bus: Arc<EventBus>,
}

impl PositionService {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            book: PositionBook::new(bus.state()),
            bus,
        }
    }

    pub fn book(&self) -> &PositionBook {
        &self.book
    }

    pub fn get(&self, user_id: UserId, symbol: &Symbol) -> Option<Position> {
        self.book.get(user_id, symbol)
    }

    /// Apply one signed fill to the (user, symbol) position.
    ///
    /// Returns the position as it stands after the fill is durable.
    pub fn on_trade(
        &self,
        user_id: UserId,
        symbol: &Symbol,
        signed_qty: Decimal,
        price: Price,
        leverage: Decimal,
    ) -> Result<Position, PositionError> {
        let existing = self.book.get(user_id, symbol);
        let update =
            margin::apply_fill(existing.as_ref(), user_id, symbol, signed_qty, price, leverage)?;

        debug!(
            user = %user_id,
            symbol = %symbol,
            signed_qty = %signed_qty,
            price = %price,
            "position transition: {}",
            transition_name(&update)
        );

        match update {
            PositionUpdate::Opened(position) => {
                self.publish(EventKind::PositionOpened, &position)?;
                Ok(position)
            }
            PositionUpdate::Increased(position) | PositionUpdate::Reduced(position) => {
                self.publish(EventKind::PositionUpdated, &position)?;
                Ok(position)
            }
            PositionUpdate::Closed(position) => {
                self.publish(EventKind::PositionClosed, &position)?;
                Ok(position)
            }
            PositionUpdate::Flipped { closed, opened } => {
                self.publish(EventKind::PositionClosed, &closed)?;
                self.publish(EventKind::PositionOpened, &opened)?;
                Ok(opened)
            }
        }
    }

    fn publish(&self, kind: EventKind, position: &Position) -> Result<(), PositionError> {
        let event = Event::new(
            kind,
            &PositionUpdatedData {
                position: position.clone(),
                reason: "TRADE".to_string(),
            },
        )?;
        self.bus.publish(event)?;
        Ok(())
    }
}

fn transition_name(update: &PositionUpdate) -> &'static str {
    match update {
        PositionUpdate::Opened(_) => "opened",
        PositionUpdate::Increased(_) => "increased",
        PositionUpdate::Reduced(_) => "reduced",
        PositionUpdate::Closed(_) => "closed",
        PositionUpdate::Flipped { .. } => "flipped",
    }
}
