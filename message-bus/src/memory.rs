//! In-process channel
//!
//! A [`MemoryHub`] plays the part of the relay server: it tracks which
//! channels joined which rooms and fans every publish out to all of them,
//! the publisher included when it is subscribed.

use crate::{
    channel::{Channel, ChannelEvent},
    message::validate_room,
    metrics::{MESSAGE_PUBLISH_TOTAL, MESSAGE_RECEIVE_TOTAL},
    Delivery, Error, Result,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

const EVENT_BUFFER: usize = 1024;

#[derive(Default)]
struct HubInner {
    rooms: HashMap<String, HashMap<u64, mpsc::Sender<ChannelEvent>>>,
    next_id: u64,
}

/// Shared room registry
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    /// Create new hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a channel attached to this hub
    ///
    /// The channel's event stream starts with [`ChannelEvent::Open`].
    pub fn connect(&self) -> MemoryChannel {
        let id = {
            let mut inner = self.inner.lock();
            inner.next_id += 1;
            inner.next_id
        };

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        // Fresh channel with an empty buffer
        let _ = tx.try_send(ChannelEvent::Open);

        MemoryChannel {
            id,
            hub: self.clone(),
            tx,
            rx: Mutex::new(Some(rx)),
            rooms: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of channels subscribed to a room
    pub fn room_size(&self, room: &str) -> usize {
        self.inner
            .lock()
            .rooms
            .get(room)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    fn join(&self, room: &str, id: u64, tx: mpsc::Sender<ChannelEvent>) {
        self.inner
            .lock()
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(id, tx);
    }

    fn leave(&self, room: &str, id: u64) {
        let mut inner = self.inner.lock();
        if let Some(members) = inner.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                inner.rooms.remove(room);
            }
        }
    }

    fn members(&self, room: &str) -> Vec<mpsc::Sender<ChannelEvent>> {
        self.inner
            .lock()
            .rooms
            .get(room)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Channel backed by a [`MemoryHub`]
pub struct MemoryChannel {
    id: u64,
    hub: MemoryHub,
    tx: mpsc::Sender<ChannelEvent>,
    rx: Mutex<Option<mpsc::Receiver<ChannelEvent>>>,
    rooms: Mutex<HashSet<String>>,
    closed: AtomicBool,
    in_flight: Arc<AtomicUsize>,
}

impl MemoryChannel {
    /// Rooms this channel has joined
    pub fn rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.rooms.lock().iter().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn subscribe(&self, room: &str) -> Result<()> {
        self.ensure_open()?;
        validate_room(room)?;

        if self.rooms.lock().insert(room.to_string()) {
            self.hub.join(room, self.id, self.tx.clone());
            debug!(room = %room, channel = self.id, "Joined room");
        }
        Ok(())
    }

    async fn unsubscribe(&self, room: &str) -> Result<()> {
        if self.rooms.lock().remove(room) {
            self.hub.leave(room, self.id);
            debug!(room = %room, channel = self.id, "Left room");
        }
        Ok(())
    }

    async fn publish(&self, delivery: &Delivery) -> Result<()> {
        self.ensure_open()?;
        validate_room(&delivery.contract_id)?;
        let _guard = InFlight::enter(&self.in_flight);

        for member in self.hub.members(&delivery.contract_id) {
            let status = match member.send(ChannelEvent::Data(delivery.clone())).await {
                Ok(()) => "success",
                // Receiver side already dropped
                Err(_) => "dropped",
            };
            MESSAGE_RECEIVE_TOTAL
                .with_label_values(&["memory", status])
                .inc();
        }

        MESSAGE_PUBLISH_TOTAL
            .with_label_values(&["memory", "success"])
            .inc();
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::Receiver<ChannelEvent>> {
        self.rx.lock().take()
    }

    async fn close(&self, timeout: Duration) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let rooms: Vec<String> = self.rooms.lock().drain().collect();
        for room in &rooms {
            self.hub.leave(room, self.id);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut drained = true;
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                drained = false;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let _ = self.tx.send(ChannelEvent::Closed).await;
        info!(channel = self.id, rooms = rooms.len(), "Memory channel closed");

        if drained {
            Ok(())
        } else {
            Err(Error::Timeout(timeout.as_millis() as u64))
        }
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        for room in self.rooms.get_mut().drain() {
            self.hub.leave(&room, self.id);
        }
    }
}
