use std::error::Error;

pub type DynError = Box<dyn Error + Send + Sync>;

pub mod bus;
pub mod connector;
pub mod events;
pub mod execution;
pub mod net;
pub mod num;
pub mod orders;
pub mod symbols;
pub mod utils;

// Venue connectors
pub mod bitget;
pub mod bybit;
pub mod hyperliquid;
pub mod polymarket;
