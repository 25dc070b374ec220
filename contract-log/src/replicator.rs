//! Glue between the subscription channel and the engine
//!
//! The replicator joins one room per whitelisted contract, feeds every
//! delivery into [`EngineHandle::handle_delivery`] and publishes locally
//! authored entries.

use crate::{actor::Admission, types::Entry, EngineHandle, Error, Result};
use async_trait::async_trait;
use message_bus::{dispatch, Channel, ChannelEvent, Delivery, DeliveryHandler, DispatchStats};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Subscription manager and delivery handler
#[derive(Clone)]
pub struct Replicator {
    handle: EngineHandle,
    channel: Arc<dyn Channel>,
}

impl Replicator {
    /// Create new replicator
    pub fn new(handle: EngineHandle, channel: Arc<dyn Channel>) -> Self {
        Self { handle, channel }
    }

    /// Subscribe to every whitelisted contract
    pub async fn sync_subscriptions(&self) -> Result<usize> {
        let ids = self.handle.whitelist_ids().await?;
        for id in &ids {
            self.channel.subscribe(id).await?;
        }
        info!(rooms = ids.len(), "Subscriptions synced");
        Ok(ids.len())
    }

    /// Whitelist a contract and join its room
    pub async fn follow(&self, contract_id: &str) -> Result<()> {
        self.handle.whitelist(contract_id).await?;
        self.channel.subscribe(contract_id).await?;
        Ok(())
    }

    /// Leave a contract's room and forget it
    pub async fn unfollow(&self, contract_id: &str) -> Result<()> {
        self.channel.unsubscribe(contract_id).await?;
        self.handle.remove_contract(contract_id).await
    }

    /// Publish a locally authored entry to its contract room
    ///
    /// Root entries go to the room named by their own hash.
    pub async fn publish(&self, contract_id: &str, entry: &Entry) -> Result<()> {
        let delivery = Delivery::new(
            contract_id,
            entry.to_hash(),
            serde_json::to_value(entry.record())?,
        );
        self.channel.publish(&delivery).await?;
        debug!(contract_id = %contract_id, entry = %entry, "Entry published");
        Ok(())
    }

    /// Process channel events until the channel closes
    pub async fn run(&self, events: mpsc::Receiver<ChannelEvent>) -> DispatchStats {
        let stats = dispatch(events, self).await;
        info!(
            delivered = stats.delivered,
            failed = stats.failed,
            errors = stats.errors,
            "Replication stopped"
        );
        stats
    }
}

#[async_trait]
impl DeliveryHandler for Replicator {
    type Error = Error;

    async fn on_open(&self) {
        // Rooms are joined again after every (re)connect
        if let Err(e) = self.sync_subscriptions().await {
            warn!("Subscription sync failed: {}", e);
        }
    }

    async fn on_data(&self, delivery: Delivery) -> Result<()> {
        let delivered_to = delivery.contract_id.clone();
        let Admission {
            contract_id, root, ..
        } = self.handle.handle_delivery(delivery).await?;

        // A root creates its contract under its own hash; follow that room too
        if root && contract_id != delivered_to {
            self.channel.subscribe(&contract_id).await?;
        }
        Ok(())
    }

    async fn on_error(&self, error: &str) {
        warn!(error = %error, "Subscription channel error");
    }
}
