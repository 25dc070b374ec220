//! NATS-backed channel
//!
//! Each room maps to the subject `<subject_prefix>.<room>`. A subscription
//! runs a background task that decodes payloads into [`Delivery`] values and
//! forwards them to the channel's event stream.

use crate::{
    channel::{Channel, ChannelEvent},
    message::room_subject,
    metrics::{MESSAGE_PUBLISH_TOTAL, MESSAGE_RECEIVE_TOTAL},
    Delivery, Error, Result,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const EVENT_BUFFER: usize = 1024;

/// NATS connection configuration
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// Server URL
    pub url: String,

    /// Subject prefix for rooms
    pub subject_prefix: String,

    /// Max publish attempts
    pub max_retry_attempts: u32,

    /// Initial retry delay
    pub initial_retry_delay: Duration,

    /// Max retry delay
    pub max_retry_delay: Duration,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            subject_prefix: "contracts".to_string(),
            max_retry_attempts: 3,
            initial_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Channel over a NATS connection
pub struct NatsChannel {
    client: async_nats::Client,
    config: NatsConfig,
    tx: mpsc::Sender<ChannelEvent>,
    rx: Mutex<Option<mpsc::Receiver<ChannelEvent>>>,
    subscriptions: Mutex<HashMap<String, JoinHandle<()>>>,
    closed: AtomicBool,
}

impl NatsChannel {
    /// Connect to NATS
    ///
    /// The event stream starts with [`ChannelEvent::Open`].
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        info!("Connecting to NATS at {}", config.url);

        let client = async_nats::connect(config.url.as_str())
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let _ = tx.try_send(ChannelEvent::Open);

        info!("Connected to NATS at {}", config.url);

        Ok(Self {
            client,
            config,
            tx,
            rx: Mutex::new(Some(rx)),
            subscriptions: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &NatsConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Publish with exponential backoff retry
    async fn publish_with_retry(&self, subject: &str, payload: Bytes) -> Result<()> {
        let mut attempts = 0;
        let mut delay = self.config.initial_retry_delay;

        loop {
            attempts += 1;

            match self
                .client
                .publish(subject.to_string(), payload.clone())
                .await
                .map_err(|e| Error::Publish(e.to_string()))
            {
                Ok(()) => {
                    if attempts > 1 {
                        info!(subject = %subject, attempts, "Delivery published after retry");
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempts >= self.config.max_retry_attempts {
                        error!(subject = %subject, attempts, error = %e, "Failed to publish");
                        return Err(e);
                    }

                    warn!(
                        subject = %subject,
                        attempt = attempts,
                        "Publish failed, retrying in {:?}: {}",
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;

                    delay = (delay * 2).min(self.config.max_retry_delay);
                }
            }
        }
    }
}

#[async_trait]
impl Channel for NatsChannel {
    async fn subscribe(&self, room: &str) -> Result<()> {
        self.ensure_open()?;
        let subject = room_subject(&self.config.subject_prefix, room)?;

        if self.subscriptions.lock().contains_key(room) {
            return Ok(());
        }

        let mut subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))?;

        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                let event = match Delivery::from_bytes(&msg.payload) {
                    Ok(delivery) => {
                        MESSAGE_RECEIVE_TOTAL
                            .with_label_values(&["nats", "success"])
                            .inc();
                        ChannelEvent::Data(delivery)
                    }
                    Err(e) => {
                        MESSAGE_RECEIVE_TOTAL
                            .with_label_values(&["nats", "parse_error"])
                            .inc();
                        ChannelEvent::Error(format!("undecodable payload on {}: {}", msg.subject, e))
                    }
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        let previous = self.subscriptions.lock().insert(room.to_string(), task);
        if let Some(previous) = previous {
            // Lost a race with a concurrent subscribe to the same room
            previous.abort();
        }

        info!(subject = %subject, "Subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, room: &str) -> Result<()> {
        if let Some(task) = self.subscriptions.lock().remove(room) {
            // Dropping the subscriber inside the task unsubscribes on the server
            task.abort();
            debug!(room = %room, "Unsubscribed");
        }
        Ok(())
    }

    async fn publish(&self, delivery: &Delivery) -> Result<()> {
        self.ensure_open()?;
        let subject = delivery.subject(&self.config.subject_prefix)?;
        let payload = Bytes::from(delivery.to_bytes()?);

        let result = self.publish_with_retry(&subject, payload).await;

        let status = if result.is_ok() { "success" } else { "error" };
        MESSAGE_PUBLISH_TOTAL
            .with_label_values(&["nats", status])
            .inc();

        result
    }

    fn take_events(&self) -> Option<mpsc::Receiver<ChannelEvent>> {
        self.rx.lock().take()
    }

    async fn close(&self, timeout: Duration) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let tasks: Vec<JoinHandle<()>> = self
            .subscriptions
            .lock()
            .drain()
            .map(|(_, task)| task)
            .collect();
        for task in &tasks {
            task.abort();
        }

        let flushed = tokio::time::timeout(timeout, self.client.flush()).await;
        let _ = self.tx.send(ChannelEvent::Closed).await;

        match flushed {
            Ok(Ok(())) => {
                info!(rooms = tasks.len(), "NATS channel closed");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Flush failed while closing");
                Err(Error::Publish(e.to_string()))
            }
            Err(_) => {
                warn!("Flush timed out after {:?}", timeout);
                Err(Error::Timeout(timeout.as_millis() as u64))
            }
        }
    }
}
