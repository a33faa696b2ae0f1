//! Bounded in-process event buses.
//!
//! Connector receive tasks publish from their own task; the engine's
//! consumers pop from theirs. Publish never blocks: when a bus is full
//! the new event is dropped and counted, which for book updates also
//! returns the pooled buffer to its slab.

use crate::events::{OrderEvent, PooledBookUpdate, TradeEvent};
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const DEFAULT_BUS_CAPACITY: usize = 8192;

pub struct EventBus<T> {
    queue: ArrayQueue<T>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl<T> EventBus<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn new_shared(capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(capacity))
    }

    pub fn publish(&self, event: T) {
        match self.queue.push(event) {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(_rejected) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

pub type BookUpdateBus = EventBus<PooledBookUpdate>;
pub type TradeBus = EventBus<TradeEvent>;
pub type OrderEventBus = EventBus<OrderEvent>;
