//! Liquidation service
//!
//! Checks positions against maintenance margin after every fill and, on
//! breach, records a LIQUIDATION event and hands an IOC market order to the
//! matching gateway. A gateway failure only drops this attempt — the next
//! trade on the position re-evaluates and may re-issue.

use rust_decimal::Decimal;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{info, warn};

use persistence::event::{Event, EventError, EventKind, LiquidationData};
use persistence::{BusError, EventBus};
use risk_engine::liquidation;
use types::ids::{IdGenerator, OrderId};
use types::liquidation::{LiquidationOrder, LIQUIDATION_REASON};
use types::numeric::{Price, Quantity};
use types::position::Position;

use crate::gateway::{MatchingGateway, NullGateway};

#[derive(Error, Debug)]
pub enum LiquidationError {
    #[error(transparent)]
    Encode(#[from] EventError),

    #[error(transparent)]
    Publish(#[from] BusError),

    #[error("cannot liquidate a flat position for user {0}")]
    FlatPosition(types::ids::UserId),
}

/// Maintenance-margin enforcement
pub struct LiquidationService {
    bus: Arc<EventBus>,
    id_gen: Arc<IdGenerator>,
    maintenance_margin_rate: Decimal,
    gateway: RwLock<Arc<dyn MatchingGateway>>,
}

impl LiquidationService {
    pub fn new(bus: Arc<EventBus>, id_gen: Arc<IdGenerator>, maintenance_margin_rate: Decimal) -> Self {
        Self {
            bus,
            id_gen,
            maintenance_margin_rate,
            gateway: RwLock::new(Arc::new(NullGateway)),
        }
    }

    /// Install the gateway; called once the matching side is wired
    pub fn set_gateway(&self, gateway: Arc<dyn MatchingGateway>) {
        *self.gateway.write().unwrap_or_else(|e| e.into_inner()) = gateway;
    }

    /// Whether the position breaches maintenance margin at `mark`
    pub fn check(&self, position: &Position, mark: Price) -> bool {
        liquidation::should_liquidate(position, mark, self.maintenance_margin_rate)
    }

    /// Record and dispatch an IOC close-out for the whole position.
    ///
    /// The LIQUIDATION event is durable before the order leaves the process.
    pub fn execute(&self, position: &Position, mark: Price) -> Result<OrderId, LiquidationError> {
        let quantity = Quantity::try_new(position.qty.abs())
            .ok_or(LiquidationError::FlatPosition(position.user_id))?;

        let order = LiquidationOrder::new(
            self.id_gen.next_order_id(),
            position.user_id,
            position.symbol.clone(),
            liquidation::close_out_side(position),
            quantity,
        );

        let event = Event::new(
            EventKind::Liquidation,
            &LiquidationData {
                order_id: order.order_id,
                user_id: order.user_id,
                symbol: order.symbol.clone(),
                quantity: order.quantity,
                mark_price: mark,
                reason: LIQUIDATION_REASON.to_string(),
            },
        )?;
        self.bus.publish(event)?;

        info!(
            order_id = %order.order_id,
            user = %order.user_id,
            symbol = %order.symbol,
            qty = %order.quantity,
            mark = %mark,
            "liquidation triggered"
        );

        let gateway = Arc::clone(&self.gateway.read().unwrap_or_else(|e| e.into_inner()));
        if let Err(e) = gateway.send_liquidation_order(&order) {
            // Dropped for this cycle; the next fill re-evaluates the position.
            warn!(order_id = %order.order_id, error = %e, "liquidation order not delivered");
        }

        Ok(order.order_id)
    }
}
