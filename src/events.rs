//! Market-data and execution events, plus the bounded pool that book
//! updates are carved from.
//!
//! Book updates are the only large event; they are pre-allocated in a
//! fixed slab and recycled so the receive task never allocates per
//! frame. Trades and order events are small values copied into their
//! buses.

use crate::num::{Price, Quantity};
use crate::orders::Order;
use crate::symbols::{InstrumentType, OptionType, SymbolId};
use crossbeam_queue::ArrayQueue;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const DEFAULT_BOOK_POOL_CAPACITY: usize = 2047;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookUpdateType {
    Snapshot,
    Delta,
}

#[derive(Debug)]
pub struct BookUpdateEvent {
    pub symbol: SymbolId,
    pub kind: BookUpdateType,
    pub bids: Vec<(Price, Quantity)>,
    pub asks: Vec<(Price, Quantity)>,
    pub exchange_ts_ns: u64,
    pub recv_ns: u64,
    pub publish_ns: u64,
    pub instrument: InstrumentType,
    pub strike: Option<Price>,
    pub expiry_ms: Option<i64>,
    pub option_type: Option<OptionType>,
}

impl BookUpdateEvent {
    fn empty() -> Self {
        Self {
            symbol: 0,
            kind: BookUpdateType::Snapshot,
            bids: Vec::new(),
            asks: Vec::new(),
            exchange_ts_ns: 0,
            recv_ns: 0,
            publish_ns: 0,
            instrument: InstrumentType::Spot,
            strike: None,
            expiry_ms: None,
            option_type: None,
        }
    }

    /// Clears for reuse, keeping level-vector capacity.
    fn reset(&mut self) {
        self.symbol = 0;
        self.kind = BookUpdateType::Snapshot;
        self.bids.clear();
        self.asks.clear();
        self.exchange_ts_ns = 0;
        self.recv_ns = 0;
        self.publish_ns = 0;
        self.instrument = InstrumentType::Spot;
        self.strike = None;
        self.expiry_ms = None;
        self.option_type = None;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TradeEvent {
    pub symbol: SymbolId,
    pub price: Price,
    pub quantity: Quantity,
    pub is_buy: bool,
    pub exchange_ts_ns: u64,
    pub instrument: InstrumentType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEventStatus {
    Submitted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

/// Emitted from a venue's private/user channel only.
#[derive(Debug, Clone, Copy)]
pub struct OrderEvent {
    pub order: Order,
    pub filled_qty: Quantity,
    pub status: OrderEventStatus,
}

/// Fixed-size free list of book-update buffers. Acquire fails when the
/// slab is exhausted and the caller drops the frame.
pub struct BookEventPool {
    slots: Arc<ArrayQueue<Box<BookUpdateEvent>>>,
    exhausted: AtomicBool,
}

impl BookEventPool {
    pub fn new(capacity: usize) -> Self {
        let slots = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            let _ = slots.push(Box::new(BookUpdateEvent::empty()));
        }
        Self {
            slots: Arc::new(slots),
            exhausted: AtomicBool::new(false),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_BOOK_POOL_CAPACITY)
    }

    pub fn acquire(&self) -> Option<PooledBookUpdate> {
        match self.slots.pop() {
            Some(ev) => {
                self.exhausted.store(false, Ordering::Relaxed);
                Some(PooledBookUpdate {
                    ev: Some(ev),
                    slots: Arc::clone(&self.slots),
                })
            }
            None => None,
        }
    }

    /// True the first time acquire fails after a successful acquire, so
    /// exhaustion is logged once per window rather than per frame.
    pub fn note_exhausted(&self) -> bool {
        !self.exhausted.swap(true, Ordering::Relaxed)
    }

    pub fn free(&self) -> usize {
        self.slots.len()
    }
}

/// Owning handle for a pooled book update. The buffer returns to the
/// pool when the last holder drops it, typically the bus consumer.
pub struct PooledBookUpdate {
    ev: Option<Box<BookUpdateEvent>>,
    slots: Arc<ArrayQueue<Box<BookUpdateEvent>>>,
}

impl Deref for PooledBookUpdate {
    type Target = BookUpdateEvent;

    fn deref(&self) -> &BookUpdateEvent {
        self.ev.as_deref().expect("pooled event taken")
    }
}

impl DerefMut for PooledBookUpdate {
    fn deref_mut(&mut self) -> &mut BookUpdateEvent {
        self.ev.as_deref_mut().expect("pooled event taken")
    }
}

impl Drop for PooledBookUpdate {
    fn drop(&mut self) {
        if let Some(mut ev) = self.ev.take() {
            ev.reset();
            let _ = self.slots.push(ev);
        }
    }
}

impl std::fmt::Debug for PooledBookUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self.deref(), f)
    }
}
