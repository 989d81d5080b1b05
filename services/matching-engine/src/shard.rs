//! Matching shard: single-consumer event loop over a bounded queue
//!
//! One thread owns one shard's books, so matching needs no locks. Callers
//! enqueue a request and block on its reply channel. Senders block when the
//! queue is full (backpressure by blocking, never by dropping).
//!
//! Shutdown drains requests already enqueued before the consumer exits;
//! submissions arriving after the close signal fail with `ShardError::Closed`.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::debug;

use types::ids::{OrderId, Symbol, TradeIdGen};
use types::numeric::Price;
use types::order::{Order, Side};
use types::trade::Trade;

use crate::engine::OrderBook;

/// Bound on each shard's request queue
pub const SHARD_QUEUE_CAPACITY: usize = 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShardError {
    #[error("matching shard {0} is closed")]
    Closed(usize),
}

enum Request {
    Submit {
        order: Order,
        reply: Sender<Vec<Trade>>,
    },
    Cancel {
        symbol: Symbol,
        order_id: OrderId,
        price: Price,
        side: Side,
        reply: Sender<bool>,
    },
}

/// A single-writer matching worker owning a disjoint set of symbols
pub struct EngineShard {
    id: usize,
    requests: Sender<Request>,
    shutdown: Sender<()>,
    closed: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EngineShard {
    pub fn new(id: usize) -> Self {
        let (requests, rx) = bounded(SHARD_QUEUE_CAPACITY);
        let (shutdown, shutdown_rx) = bounded(1);
        let handle = std::thread::spawn(move || consumer_loop(id, rx, shutdown_rx));
        Self {
            id,
            requests,
            shutdown,
            closed: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Submit an order and wait for the trades it produced
    pub fn submit(&self, order: Order) -> Result<Vec<Trade>, ShardError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ShardError::Closed(self.id));
        }
        let (reply, reply_rx) = bounded(1);
        self.requests
            .send(Request::Submit { order, reply })
            .map_err(|_| ShardError::Closed(self.id))?;
        reply_rx.recv().map_err(|_| ShardError::Closed(self.id))
    }

    /// Remove a resting order; Ok(true) if it was found
    pub fn cancel(
        &self,
        symbol: Symbol,
        order_id: OrderId,
        price: Price,
        side: Side,
    ) -> Result<bool, ShardError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ShardError::Closed(self.id));
        }
        let (reply, reply_rx) = bounded(1);
        self.requests
            .send(Request::Cancel {
                symbol,
                order_id,
                price,
                side,
                reply,
            })
            .map_err(|_| ShardError::Closed(self.id))?;
        reply_rx.recv().map_err(|_| ShardError::Closed(self.id))
    }

    /// Signal the consumer to drain enqueued requests and exit, then join it
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown.try_send(());
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for EngineShard {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn consumer_loop(id: usize, requests: Receiver<Request>, shutdown: Receiver<()>) {
    // Trade ids embed the shard id as node bits.
    let trade_ids = TradeIdGen::new(id as u64);
    let mut books: HashMap<Symbol, OrderBook> = HashMap::new();

    loop {
        crossbeam_channel::select! {
            recv(requests) -> msg => match msg {
                Ok(request) => handle_request(request, &mut books, &trade_ids),
                Err(_) => return,
            },
            recv(shutdown) -> _ => {
                // Drain what was enqueued before the close signal.
                let mut drained = 0usize;
                while let Ok(request) = requests.try_recv() {
                    handle_request(request, &mut books, &trade_ids);
                    drained += 1;
                }
                debug!(shard = id, drained, "matching shard stopped");
                return;
            }
        }
    }
}

fn handle_request(
    request: Request,
    books: &mut HashMap<Symbol, OrderBook>,
    trade_ids: &TradeIdGen,
) {
    match request {
        Request::Submit { order, reply } => {
            let book = books
                .entry(order.symbol.clone())
                .or_insert_with(|| OrderBook::new(order.symbol.clone()));
            let trades = book.match_order(&order, trade_ids);
            let _ = reply.send(trades);
        }
        Request::Cancel {
            symbol,
            order_id,
            price,
            side,
            reply,
        } => {
            let removed = books
                .get_mut(&symbol)
                .map(|book| book.cancel(order_id, price, side))
                .unwrap_or(false);
            let _ = reply.send(removed);
        }
    }
}
