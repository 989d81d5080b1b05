//! Matching gateway boundary
//!
//! The liquidation path hands IOC orders to a `MatchingGateway` and never
//! waits for fills: they come back asynchronously through
//! `OrderService::on_trade`. The gateway holds the order service as a
//! non-owning reference, breaking the service cycle.

use std::sync::{Arc, RwLock, Weak};
use thiserror::Error;
use tracing::{info, warn};

use matching_engine::ShardedEngine;
use types::liquidation::LiquidationOrder;
use types::numeric::Price;
use types::order::{Order, OrderType};

use crate::order_service::OrderService;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("matching gateway unavailable: {0}")]
    Unavailable(String),

    #[error("liquidation order rejected by matching: {0}")]
    Rejected(String),
}

/// Consumer of liquidation orders. Fire-and-forget: fills return via the
/// order service's trade ingestion.
pub trait MatchingGateway: Send + Sync {
    fn send_liquidation_order(&self, order: &LiquidationOrder) -> Result<(), GatewayError>;
}

/// Gateway that discards liquidation orders (pre-wiring placeholder)
pub struct NullGateway;

impl MatchingGateway for NullGateway {
    fn send_liquidation_order(&self, order: &LiquidationOrder) -> Result<(), GatewayError> {
        warn!(order_id = %order.order_id, "no matching gateway wired, liquidation order dropped");
        Ok(())
    }
}

/// Gateway that submits liquidation orders straight into the local sharded
/// engine and feeds the resulting fills back into the order service.
pub struct EngineGateway {
    engine: Arc<ShardedEngine>,
    // Non-owning: the order service (indirectly) owns this gateway.
    orders: RwLock<Weak<OrderService>>,
}

impl EngineGateway {
    pub fn new(engine: Arc<ShardedEngine>) -> Self {
        Self {
            engine,
            orders: RwLock::new(Weak::new()),
        }
    }

    /// Install the fill consumer; called once after construction
    pub fn connect(&self, orders: &Arc<OrderService>) {
        *self.orders.write().unwrap_or_else(|e| e.into_inner()) = Arc::downgrade(orders);
    }

    fn order_service(&self) -> Option<Arc<OrderService>> {
        self.orders
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .upgrade()
    }
}

impl MatchingGateway for EngineGateway {
    fn send_liquidation_order(&self, order: &LiquidationOrder) -> Result<(), GatewayError> {
        let orders = self
            .order_service()
            .ok_or_else(|| GatewayError::Unavailable("order service not connected".into()))?;

        info!(
            order_id = %order.order_id,
            user = %order.user_id,
            symbol = %order.symbol,
            qty = %order.quantity,
            "liquidation order submitted"
        );

        let taker = liquidation_taker(order);
        let trades = self
            .engine
            .submit(taker)
            .map_err(|e| GatewayError::Rejected(e.to_string()))?;

        for trade in &trades {
            if let Err(e) = orders.on_trade(trade) {
                return Err(GatewayError::Rejected(e.to_string()));
            }
        }
        Ok(())
    }
}

/// The engine-facing shape of a liquidation order: a market taker at the
/// "take any" price that never rests.
fn liquidation_taker(order: &LiquidationOrder) -> Order {
    Order::new(
        order.order_id,
        order.user_id,
        order.symbol.clone(),
        order.side,
        OrderType::Market,
        Price::zero(),
        order.quantity,
        persistence::event::now_nanos(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::{OrderId, Symbol, UserId};
    use types::numeric::Quantity;
    use types::order::Side;

    #[test]
    fn test_liquidation_taker_shape() {
        let liq = LiquidationOrder::new(
            OrderId(2001),
            UserId(100),
            Symbol::new("BTCUSDT"),
            Side::Sell,
            Quantity::from_u64(2),
        );
        let taker = liquidation_taker(&liq);
        assert_eq!(taker.order_type, OrderType::Market);
        assert!(taker.price.is_zero());
        assert_eq!(taker.quantity, Quantity::from_u64(2));
        assert_eq!(taker.side, Side::Sell);
    }

    #[test]
    fn test_null_gateway_accepts() {
        let liq = LiquidationOrder::new(
            OrderId(2001),
            UserId(100),
            Symbol::new("BTCUSDT"),
            Side::Sell,
            Quantity::from_u64(2),
        );
        assert!(NullGateway.send_liquidation_order(&liq).is_ok());
    }

    #[test]
    fn test_engine_gateway_without_consumer_errors() {
        let engine = Arc::new(ShardedEngine::new(1));
        let gateway = EngineGateway::new(Arc::clone(&engine));
        let liq = LiquidationOrder::new(
            OrderId(2001),
            UserId(100),
            Symbol::new("BTCUSDT"),
            Side::Sell,
            Quantity::from_u64(2),
        );
        assert!(matches!(
            gateway.send_liquidation_order(&liq),
            Err(GatewayError::Unavailable(_))
        ));
        engine.shutdown();
    }
}
