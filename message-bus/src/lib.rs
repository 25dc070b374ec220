//! Room-based pub/sub for contract deliveries
//!
//! Every contract id is a room. Subscribers to a room receive each
//! [`Delivery`] published to it as a [`ChannelEvent::Data`]. Two transports
//! implement [`Channel`]:
//! - [`MemoryHub`] / [`MemoryChannel`]: in-process fan-out
//! - [`NatsChannel`]: one NATS subject per room

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod channel;
pub mod client;
pub mod error;
pub mod memory;
pub mod message;
pub mod metrics;

pub use channel::{dispatch, Channel, ChannelEvent, DeliveryHandler, DispatchStats};
pub use client::{NatsChannel, NatsConfig};
pub use error::{Error, Result};
pub use memory::{MemoryChannel, MemoryHub};
pub use message::Delivery;
