//! Contract Log
//!
//! Event-sourced, hash-chained contract log with whitelist-gated admission.
//!
//! # Architecture
//!
//! - **Hash chain**: every entry names its predecessor's content hash
//! - **Registry**: entry type tags map to init/apply functions
//! - **Single writer**: one actor owns contracts, whitelist and the store
//! - **Replication**: deliveries arrive per contract room over `message-bus`
//!
//! # Invariants
//!
//! - Non-whitelisted deliveries leave every piece of state untouched
//! - A contract's id is the hash of its root entry
//! - Append-only: an admitted `(contract, hash)` pair is never rewritten
//! - Deterministic replay: same log, same state

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod actor;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod navigator;
pub mod registry;
pub mod replicator;
pub mod storage;
pub mod types;

// Re-exports
pub use actor::{Admission, EngineHandle};
pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};
pub use registry::{EntryKind, Registry};
pub use replicator::Replicator;
pub use storage::Storage;
pub use types::{Contract, ContractStatus, Entry, EntryRecord, JsonObject, Settings};
