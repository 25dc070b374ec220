//! Channel abstraction and delivery dispatch

use crate::{metrics::MESSAGE_HANDLER_FAILURES, Delivery, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Something that happened on a channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Connection established
    Open,
    /// Delivery received on a subscribed room
    Data(Delivery),
    /// Transport-level problem; the channel stays usable
    Error(String),
    /// Channel closed; no further events follow
    Closed,
}

/// Room-based pub/sub transport
#[async_trait]
pub trait Channel: Send + Sync {
    /// Join a room; later deliveries to it arrive as [`ChannelEvent::Data`]
    async fn subscribe(&self, room: &str) -> Result<()>;

    /// Leave a room
    async fn unsubscribe(&self, room: &str) -> Result<()>;

    /// Publish a delivery to its room
    async fn publish(&self, delivery: &Delivery) -> Result<()>;

    /// Take the event stream; only the first call returns it
    fn take_events(&self) -> Option<mpsc::Receiver<ChannelEvent>>;

    /// Close the channel, waiting up to `timeout` for in-flight sends
    async fn close(&self, timeout: Duration) -> Result<()>;
}

/// Consumer of channel events
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// Error produced while handling a delivery
    type Error: std::fmt::Display + Send;

    /// Connection established
    async fn on_open(&self) {}

    /// Delivery received
    async fn on_data(&self, delivery: Delivery) -> std::result::Result<(), Self::Error>;

    /// Transport error reported
    async fn on_error(&self, _error: &str) {}
}

/// Counters from one [`dispatch`] run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Deliveries the handler accepted
    pub delivered: u64,
    /// Deliveries the handler rejected
    pub failed: u64,
    /// Transport errors seen
    pub errors: u64,
}

/// Feed channel events to a handler until the channel closes
///
/// A failing delivery is logged and counted; it never stops the loop.
pub async fn dispatch<H>(mut events: mpsc::Receiver<ChannelEvent>, handler: &H) -> DispatchStats
where
    H: DeliveryHandler + ?Sized,
{
    let mut stats = DispatchStats::default();

    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Open => {
                info!("Channel open");
                handler.on_open().await;
            }
            ChannelEvent::Data(delivery) => {
                let contract_id = delivery.contract_id.clone();
                let hash = delivery.hash.clone();
                match handler.on_data(delivery).await {
                    Ok(()) => {
                        debug!(contract_id = %contract_id, hash = %hash, "Delivery handled");
                        stats.delivered += 1;
                    }
                    Err(e) => {
                        warn!(contract_id = %contract_id, hash = %hash, error = %e, "Delivery rejected");
                        MESSAGE_HANDLER_FAILURES.inc();
                        stats.failed += 1;
                    }
                }
            }
            ChannelEvent::Error(error) => {
                warn!(error = %error, "Channel error");
                handler.on_error(&error).await;
                stats.errors += 1;
            }
            ChannelEvent::Closed => {
                info!("Channel closed");
                break;
            }
        }
    }

    stats
}
