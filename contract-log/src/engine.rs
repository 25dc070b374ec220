//! Admission/replay engine
//!
//! Ties the store, registry and actor together behind one API.
//!
//! # Example
//!
//! ```no_run
//! use contract_log::{Config, Engine, Registry};
//!
//! #[tokio::main]
//! async fn main() -> contract_log::Result<()> {
//!     let engine = Engine::open(Config::default(), Registry::with_defaults()).await?;
//!
//!     engine.whitelist("zGroupContractHash").await?;
//!     // deliveries arrive through engine.handle()
//!
//!     engine.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_engine_actor, ActorOptions, Admission, EngineHandle},
    metrics::Metrics,
    storage::StorageStats,
    types::{Contract, EntryRecord},
    Config, Registry, Result, Storage,
};
use std::sync::Arc;

/// Main engine interface
pub struct Engine {
    /// Actor handle for all mutation
    handle: EngineHandle,

    /// Direct storage access (stats only)
    storage: Arc<Storage>,

    /// Entry kinds this engine understands
    registry: Arc<Registry>,

    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Engine {
    /// Open the store, restore saved settings and start the actor
    pub async fn open(config: Config, registry: Registry) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let registry = Arc::new(registry);
        let metrics = Metrics::new()?;

        let handle = spawn_engine_actor(
            storage.clone(),
            registry.clone(),
            metrics.clone(),
            ActorOptions {
                mailbox_capacity: config.engine.mailbox_capacity,
                debounce: config.settings.debounce(),
                max_save_retries: config.settings.max_save_retries,
            },
        )?;

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            data_dir = ?config.data_dir,
            "Engine started"
        );

        Ok(Self {
            handle,
            storage,
            registry,
            metrics,
            config,
        })
    }

    /// Cloneable handle to the actor
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Registered entry kinds
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Engine metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Store statistics
    pub fn storage_stats(&self) -> Result<StorageStats> {
        self.storage.stats()
    }

    /// Expect events for a contract
    pub async fn whitelist(&self, contract_id: impl Into<String>) -> Result<bool> {
        self.handle.whitelist(contract_id).await
    }

    /// Admit an entry delivered for `contract_id`
    pub async fn handle_event(
        &self,
        contract_id: impl Into<String>,
        hash: impl Into<String>,
        record: &EntryRecord,
    ) -> Result<Admission> {
        self.handle.handle_event(contract_id, hash, record).await
    }

    /// Get a materialized contract
    pub async fn contract(&self, contract_id: impl Into<String>) -> Result<Contract> {
        self.handle.contract(contract_id).await
    }

    /// Replay a contract's persisted log (for verification)
    pub async fn rebuild_contract(&self, contract_id: impl Into<String>) -> Result<Contract> {
        self.handle.rebuild_contract(contract_id).await
    }

    /// Check that live state matches a fresh replay of the log
    pub async fn verify_contract(&self, contract_id: impl Into<String>) -> Result<bool> {
        let contract_id = contract_id.into();
        let live = self.handle.contract(contract_id.clone()).await?;
        let rebuilt = self.handle.rebuild_contract(contract_id).await?;
        Ok(live.state == rebuilt.state && live.head == rebuilt.head)
    }

    /// Flush pending settings and stop the actor
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("data_dir", &self.config.data_dir)
            .field("metrics", &self.metrics)
            .finish()
    }
}
