//! Order service: admission, fill ingestion, cancelation
//!
//! Admission runs the pluggable risk and margin-freeze predicates, assigns
//! the order id, and records ORDER_CREATED. Each incoming fill records
//! TRADE_EXECUTED and ORDER_FILLED, drives the position update, and then
//! evaluates liquidation against the fill price as the current mark.

use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use persistence::event::{
    now_nanos, Event, EventError, EventKind, OrderCanceledData, OrderCreatedData, OrderFilledData,
    TradeExecutedData,
};
use persistence::{BusError, EventBus};
use types::errors::RejectReason;
use types::ids::{IdGenerator, OrderId, Symbol, UserId};
use types::numeric::{Price, Quantity};
use types::order::{Order, OrderType, Side};
use types::trade::Trade;

use crate::liquidation_service::{LiquidationError, LiquidationService};
use crate::position_service::{PositionError, PositionService};

#[derive(Error, Debug)]
pub enum OrderError {
    /// Failed admission; no event was emitted.
    #[error("order rejected: {0}")]
    Rejected(#[from] RejectReason),

    #[error("unknown order {0}")]
    UnknownOrder(OrderId),

    #[error("order {0} is already terminal")]
    TerminalOrder(OrderId),

    #[error(transparent)]
    Encode(#[from] EventError),

    #[error(transparent)]
    Publish(#[from] BusError),

    #[error(transparent)]
    Position(#[from] PositionError),

    #[error(transparent)]
    Liquidation(#[from] LiquidationError),
}

/// An order as submitted by a client, before admission
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub user_id: UserId,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Price,
    pub quantity: Quantity,
}

/// Pluggable pre-trade risk predicate
pub trait RiskCheck: Send + Sync {
    fn check(&self, request: &OrderRequest) -> Result<(), RejectReason>;
}

/// Default risk predicate: the stateless admission rules
pub struct DefaultRiskCheck;

impl RiskCheck for DefaultRiskCheck {
    fn check(&self, request: &OrderRequest) -> Result<(), RejectReason> {
        risk_engine::validator::validate(request.order_type, request.price, request.quantity)
    }
}

/// Pluggable margin freeze hook, run after risk passes
pub trait MarginFreeze: Send + Sync {
    fn freeze(&self, order: &Order) -> Result<(), RejectReason>;
}

/// Default margin freeze: accepts everything
pub struct NoopMarginFreeze;

impl MarginFreeze for NoopMarginFreeze {
    fn freeze(&self, _order: &Order) -> Result<(), RejectReason> {
        Ok(())
    }
}

/// Admission and fill ingestion
pub struct OrderService {
    bus: Arc<EventBus>,
    positions: Arc<PositionService>,
    liquidator: Arc<LiquidationService>,
    risk: Box<dyn RiskCheck>,
    margin: Box<dyn MarginFreeze>,
    id_gen: Arc<IdGenerator>,
    default_leverage: Decimal,
}

impl OrderService {
    pub fn new(
        bus: Arc<EventBus>,
        positions: Arc<PositionService>,
        liquidator: Arc<LiquidationService>,
        id_gen: Arc<IdGenerator>,
        default_leverage: Decimal,
    ) -> Self {
        Self {
            bus,
            positions,
            liquidator,
            risk: Box::new(DefaultRiskCheck),
            margin: Box::new(NoopMarginFreeze),
            id_gen,
            default_leverage,
        }
    }

    /// Replace the risk predicate
    pub fn with_risk_check(mut self, risk: Box<dyn RiskCheck>) -> Self {
        self.risk = risk;
        self
    }

    /// Replace the margin freeze hook
    pub fn with_margin_freeze(mut self, margin: Box<dyn MarginFreeze>) -> Self {
        self.margin = margin;
        self
    }

    /// Admit an order: risk check, margin freeze, id assignment, durable
    /// ORDER_CREATED. Returns the admitted order.
    pub fn create_order(&self, request: OrderRequest) -> Result<Order, OrderError> {
        self.risk.check(&request)?;

        let order = Order::new(
            self.id_gen.next_order_id(),
            request.user_id,
            request.symbol,
            request.side,
            request.order_type,
            request.price,
            request.quantity,
            now_nanos(),
        );

        self.margin.freeze(&order)?;

        self.bus
            .publish(Event::new(EventKind::OrderCreated, &OrderCreatedData {
                order: order.clone(),
            })?)?;

        info!(
            order_id = %order.id,
            user = %order.user_id,
            symbol = %order.symbol,
            side = ?order.side,
            price = %order.price,
            qty = %order.quantity,
            "order admitted"
        );
        Ok(order)
    }

    /// Ingest one fill: record it, update the order, update the position,
    /// and evaluate liquidation at the fill price.
    pub fn on_trade(&self, trade: &Trade) -> Result<(), OrderError> {
        self.bus
            .publish(Event::new(EventKind::TradeExecuted, &TradeExecutedData {
                trade: trade.clone(),
            })?)?;

        let order = {
            let state = self.bus.state();
            let state = state.read().unwrap_or_else(|e| e.into_inner());
            state.order(trade.order_id).cloned()
        };

        match order {
            Some(order) if !order.status.is_terminal() => {
                // Applying the event drives Order::apply_fill, which owns
                // the accumulator and status transition.
                self.bus
                    .publish(Event::new(EventKind::OrderFilled, &OrderFilledData {
                        order_id: order.id,
                        trade_id: trade.trade_id,
                        fill_qty: trade.qty,
                    })?)?;
            }
            // Liquidation orders never enter the order map; their fills
            // only move the position.
            _ => debug!(order_id = %trade.order_id, "fill for order outside the order map"),
        }

        let position = self.positions.on_trade(
            trade.user_id,
            &trade.symbol,
            trade.signed_qty(),
            trade.price,
            self.default_leverage,
        )?;

        if self.liquidator.check(&position, trade.price) {
            self.liquidator.execute(&position, trade.price)?;
        }
        Ok(())
    }

    /// Record a cancel for a live order. The caller is responsible for
    /// removing the order from the matching book first.
    pub fn record_cancel(&self, order_id: OrderId) -> Result<(), OrderError> {
        let order = {
            let state = self.bus.state();
            let state = state.read().unwrap_or_else(|e| e.into_inner());
            state.order(order_id).cloned()
        };
        let order = order.ok_or(OrderError::UnknownOrder(order_id))?;
        if order.status.is_terminal() {
            return Err(OrderError::TerminalOrder(order_id));
        }

        self.bus
            .publish(Event::new(EventKind::OrderCanceled, &OrderCanceledData {
                order_id,
            })?)?;
        info!(order_id = %order_id, "order canceled");
        Ok(())
    }
}
