//! The two seams the engine depends on: one per-venue connector for
//! market data, one executor for the order path. Concrete venues are
//! independent implementations; there is no deeper hierarchy.

use crate::orders::{Order, OrderId};
use crate::DynError;
use async_trait::async_trait;

#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    fn exchange_id(&self) -> &'static str;

    /// Validates config and spawns the session task(s). Returns an error
    /// only for invalid configuration; runtime failures are handled by
    /// the reconnect loop.
    async fn start(&self) -> Result<(), DynError>;

    /// Idempotent. After it returns, no task spawned by the connector is
    /// alive and no further callbacks fire.
    async fn stop(&self);
}

/// Order entry points are infallible by signature: failures surface as
/// log entries, tracker callbacks, or the configured timeout policy.
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn submit_order(&self, order: &Order);
    async fn cancel_order(&self, order_id: OrderId);
    async fn replace_order(&self, old_order_id: OrderId, new_order: &Order);
}
