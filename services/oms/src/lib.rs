//! Order management service layer
//!
//! Wires the sharded matching engine, the per-order dispatcher, the
//! order/position/liquidation services, and the event-sourced durability
//! layer into one process. The `Oms` facade is the embedding surface: a CLI
//! or RPC front end calls `submit_order` / `cancel_order` and everything
//! else — matching, fill ingestion, margin accounting, liquidation, WAL,
//! snapshots — happens behind it.

pub mod config;
pub mod dispatcher;
pub mod gateway;
pub mod liquidation_service;
pub mod order_service;
pub mod position_service;

pub use config::OmsConfig;
pub use dispatcher::{Dispatcher, DispatcherError};
pub use gateway::{EngineGateway, GatewayError, MatchingGateway, NullGateway};
pub use liquidation_service::{LiquidationError, LiquidationService};
pub use order_service::{
    DefaultRiskCheck, MarginFreeze, NoopMarginFreeze, OrderError, OrderRequest, OrderService,
    RiskCheck,
};
pub use position_service::{PositionBook, PositionError, PositionService};

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{error, info, warn};

use matching_engine::{ShardError, ShardedEngine};
use persistence::{
    EventBus, EventStore, ReplayEngine, ReplayError, SnapshotError, SnapshotManager, StoreError,
    SystemState,
};
use types::ids::{IdGenerator, OrderId};
use types::trade::Trade;

#[derive(Error, Debug)]
pub enum OmsError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Replay(#[from] ReplayError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Dispatch(#[from] DispatcherError),

    #[error(transparent)]
    Shard(#[from] ShardError),
}

/// A running OMS instance
pub struct Oms {
    engine: Arc<ShardedEngine>,
    dispatcher: Arc<Dispatcher>,
    bus: Arc<EventBus>,
    state: Arc<RwLock<SystemState>>,
    orders: Arc<OrderService>,
    snapshots: Arc<SnapshotManager>,
    snapshot_stop: crossbeam_channel::Sender<()>,
    snapshot_loop: Option<JoinHandle<()>>,
}

impl Oms {
    /// Recover state from the durable log, then start all subsystems.
    pub fn start(config: OmsConfig) -> Result<Self, OmsError> {
        let store = Arc::new(EventStore::open(&config.event_dir)?);
        let snapshots = Arc::new(SnapshotManager::new(
            &config.snapshot_dir,
            config.snapshot_retention,
        )?);

        let replay = ReplayEngine::new(Arc::clone(&store), Arc::clone(&snapshots));
        let recovered = replay.replay()?;
        info!(
            orders = recovered.orders.len(),
            positions = recovered.positions.len(),
            last_event_id = recovered.last_event_id,
            "state recovered"
        );

        // Resume order-id generation past everything already admitted.
        let max_order_id = recovered
            .orders
            .keys()
            .next_back()
            .map(|id| id.0)
            .unwrap_or(0);
        let id_gen = Arc::new(IdGenerator::starting_after(max_order_id));

        let state = Arc::new(RwLock::new(recovered));
        let bus = Arc::new(EventBus::new(store, Arc::clone(&state)));

        let engine = Arc::new(ShardedEngine::new(config.shard_count));
        let gateway = Arc::new(EngineGateway::new(Arc::clone(&engine)));

        let positions = Arc::new(PositionService::new(Arc::clone(&bus)));
        let liquidator = Arc::new(LiquidationService::new(
            Arc::clone(&bus),
            Arc::clone(&id_gen),
            config.maintenance_margin_rate,
        ));
        liquidator.set_gateway(Arc::clone(&gateway) as Arc<dyn MatchingGateway>);

        let orders = Arc::new(OrderService::new(
            Arc::clone(&bus),
            positions,
            liquidator,
            id_gen,
            config.default_leverage,
        ));
        gateway.connect(&orders);

        let dispatcher = Arc::new(Dispatcher::new(config.dispatcher_workers));

        let (snapshot_stop, stop_rx) = crossbeam_channel::bounded(1);
        let snapshot_loop = Arc::clone(&snapshots).spawn_periodic(
            Arc::clone(&state),
            config.snapshot_interval,
            stop_rx,
        );

        Ok(Self {
            engine,
            dispatcher,
            bus,
            state,
            orders,
            snapshots,
            snapshot_stop,
            snapshot_loop: Some(snapshot_loop),
        })
    }

    /// Admit an order, then match it and ingest its fills on the order's
    /// dispatcher lane. Returns the assigned id once the order is durable;
    /// matching happens asynchronously behind it.
    pub fn submit_order(&self, request: OrderRequest) -> Result<OrderId, OmsError> {
        let order = self.orders.create_order(request)?;
        let order_id = order.id;

        let engine = Arc::clone(&self.engine);
        let orders = Arc::clone(&self.orders);
        let dispatcher = Arc::clone(&self.dispatcher);
        self.dispatcher.dispatch(order_id.0, move || {
            let trades = match engine.submit(order) {
                Ok(trades) => trades,
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "matching engine unavailable");
                    return;
                }
            };
            for trade in trades {
                fan_out_fill(&dispatcher, &orders, trade);
            }
        })?;

        Ok(order_id)
    }

    /// Cancel a resting order: remove it from the book, then record the
    /// cancel. Runs on the order's dispatcher lane.
    pub fn cancel_order(&self, order_id: OrderId) -> Result<(), OmsError> {
        let order = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            state.order(order_id).cloned()
        };
        let order = order.ok_or(OrderError::UnknownOrder(order_id))?;

        let engine = Arc::clone(&self.engine);
        let orders = Arc::clone(&self.orders);
        self.dispatcher.dispatch(order_id.0, move || {
            match engine.cancel(order.symbol.clone(), order.id, order.price, order.side) {
                Ok(removed) => {
                    if !removed {
                        // Not resting: fully filled, never rested, or already
                        // canceled. record_cancel sorts the terminal cases.
                        info!(order_id = %order_id, "cancel target not resting on book");
                    }
                    if let Err(e) = orders.record_cancel(order_id) {
                        warn!(order_id = %order_id, error = %e, "cancel not recorded");
                    }
                }
                Err(e) => warn!(order_id = %order_id, error = %e, "cancel reached a closed shard"),
            }
        })?;
        Ok(())
    }

    /// Block until all dispatched work (including fill fan-out) has settled
    pub fn drain(&self) {
        self.dispatcher.drain();
    }

    /// Shared handle to the authoritative state
    pub fn state(&self) -> Arc<RwLock<SystemState>> {
        Arc::clone(&self.state)
    }

    pub fn order_service(&self) -> Arc<OrderService> {
        Arc::clone(&self.orders)
    }

    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// Take an immediate snapshot of the current state
    pub fn snapshot_now(&self) -> Result<PathBuf, OmsError> {
        let copy = self.state.read().unwrap_or_else(|e| e.into_inner()).clone();
        Ok(self.snapshots.take_snapshot(&copy)?)
    }

    /// Orderly shutdown: settle dispatched work, stop matching, stop the
    /// snapshot loop, and leave a final snapshot behind.
    pub fn shutdown(mut self) {
        self.dispatcher.drain();
        self.dispatcher.shutdown();
        self.engine.shutdown();

        let _ = self.snapshot_stop.try_send(());
        if let Some(handle) = self.snapshot_loop.take() {
            let _ = handle.join();
        }

        let copy = self.state.read().unwrap_or_else(|e| e.into_inner()).clone();
        if let Err(e) = self.snapshots.take_snapshot(&copy) {
            error!(error = %e, "final snapshot failed");
        }
        if let Err(e) = self.bus.store().close() {
            error!(error = %e, "event store close failed");
        }
        info!("oms stopped");
    }
}

/// Route one fill to its order's lane; maker and taker fills of the same
/// match can land on different lanes and still stay ordered per order.
fn fan_out_fill(dispatcher: &Arc<Dispatcher>, orders: &Arc<OrderService>, trade: Trade) {
    let orders = Arc::clone(orders);
    let trade_order = trade.order_id;
    if let Err(e) = dispatcher.dispatch(trade_order.0, move || {
        if let Err(e) = orders.on_trade(&trade) {
            error!(order_id = %trade_order, error = %e, "fill ingestion failed");
        }
    }) {
        error!(order_id = %trade_order, error = %e, "fill could not be dispatched");
    }
}
