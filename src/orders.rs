//! Engine-side order model and the tracker seam.
//!
//! The authoritative per-order store belongs to the engine; executors
//! only drive its callbacks and read back the exchange/client ids they
//! need for cancel and replace. `MemoryOrderTracker` is a dashmap-backed
//! reference implementation used by tests and bring-up harnesses.

use crate::num::{Price, Quantity};
use crate::symbols::SymbolId;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;

pub type OrderId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy)]
pub struct Order {
    pub id: OrderId,
    pub symbol: SymbolId,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub created_at: Instant,
}

impl Order {
    pub fn new(id: OrderId, symbol: SymbolId, side: Side, price: Price, quantity: Quantity) -> Self {
        Self {
            id,
            symbol,
            side,
            price,
            quantity,
            created_at: Instant::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderState {
    pub order: Order,
    pub exchange_order_id: String,
    pub client_order_id: String,
}

/// Engine-owned per-order state store. Implementations must be
/// internally thread-safe: executor callbacks arrive from multiple
/// tasks and may be out of order with respect to submission.
pub trait OrderTracker: Send + Sync {
    fn on_submitted(&self, order: &Order, exchange_id: &str, client_id: Option<&str>);
    fn on_canceled(&self, id: OrderId);
    fn on_replaced(&self, old_id: OrderId, new_order: &Order, exchange_id: &str, client_id: Option<&str>);
    fn on_rejected(&self, id: OrderId, reason: &str);
    fn get(&self, id: OrderId) -> Option<OrderState>;
}

#[derive(Default)]
pub struct MemoryOrderTracker {
    orders: DashMap<OrderId, OrderState>,
}

impl MemoryOrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

impl OrderTracker for MemoryOrderTracker {
    fn on_submitted(&self, order: &Order, exchange_id: &str, client_id: Option<&str>) {
        self.orders.insert(
            order.id,
            OrderState {
                order: *order,
                exchange_order_id: exchange_id.to_string(),
                client_order_id: client_id.unwrap_or_default().to_string(),
            },
        );
    }

    fn on_canceled(&self, id: OrderId) {
        self.orders.remove(&id);
    }

    fn on_replaced(&self, old_id: OrderId, new_order: &Order, exchange_id: &str, client_id: Option<&str>) {
        let prior = self.orders.remove(&old_id).map(|(_, st)| st);
        let exchange_order_id = if exchange_id.is_empty() {
            prior.as_ref().map(|p| p.exchange_order_id.clone()).unwrap_or_default()
        } else {
            exchange_id.to_string()
        };
        let client_order_id = match client_id {
            Some(c) => c.to_string(),
            None => prior.map(|p| p.client_order_id).unwrap_or_default(),
        };
        self.orders.insert(
            new_order.id,
            OrderState {
                order: *new_order,
                exchange_order_id,
                client_order_id,
            },
        );
    }

    fn on_rejected(&self, id: OrderId, _reason: &str) {
        self.orders.remove(&id);
    }

    fn get(&self, id: OrderId) -> Option<OrderState> {
        self.orders.get(&id).map(|e| e.value().clone())
    }
}
