//! Single-writer admission actor
//!
//! All mutation of contracts, whitelist, navigation and the log store goes
//! through one task:
//! - `EngineHandle` (Clone) sends messages to a bounded mailbox
//! - `EngineActor` handles them one at a time, so every admission finishes
//!   its persistence write before the next message is looked at
//! - settings saves are debounced on the trailing edge and owned by the same
//!   loop, so a shutdown can flush or cancel them
//!
//! ```text
//!   Replicator / callers
//!           │
//!           ▼
//!   EngineHandle ──mpsc──▶ EngineActor ──▶ Registry (init / apply)
//!                              │      └──▶ Storage (log, settings)
//!                              └── debounce deadline ──▶ save_settings()
//! ```

use crate::{
    crypto,
    metrics::Metrics,
    navigator::Navigator,
    registry::{EntryKind, Registry},
    types::{Contract, ContractStatus, Entry, EntryRecord, Settings},
    Error, Result, Storage,
};
use chrono::Utc;
use message_bus::Delivery;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, error, info, warn};

/// Outcome of a successful admission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Contract the entry now belongs to (the entry hash for roots)
    pub contract_id: String,
    /// Admitted entry hash
    pub hash: String,
    /// Whether the entry created a contract
    pub root: bool,
}

/// Message sent to the engine actor
pub enum EngineMessage {
    /// Expect events for a contract
    Whitelist {
        contract_id: String,
        response: oneshot::Sender<Result<bool>>,
    },

    /// Admit one delivered entry
    HandleEvent {
        contract_id: String,
        hash: String,
        entry: Value,
        response: oneshot::Sender<Result<Admission>>,
    },

    /// Forget a contract
    RemoveContract {
        contract_id: String,
        response: oneshot::Sender<Result<()>>,
    },

    /// Change the navigation context
    SetCurrentContract {
        contract_id: String,
        response: oneshot::Sender<Result<()>>,
    },

    /// Get one materialized contract
    GetContract {
        contract_id: String,
        response: oneshot::Sender<Result<Contract>>,
    },

    /// Get the contract used as navigation context
    GetCurrentContract {
        response: oneshot::Sender<Option<Contract>>,
    },

    /// Get all materialized contracts
    GetContracts {
        response: oneshot::Sender<BTreeMap<String, Contract>>,
    },

    /// Get a contract's lifecycle status
    GetStatus {
        contract_id: String,
        response: oneshot::Sender<ContractStatus>,
    },

    /// Get whitelisted ids in whitelisting order
    GetWhitelist {
        response: oneshot::Sender<Vec<String>>,
    },

    /// Get the navigation position
    GetPosition {
        response: oneshot::Sender<Option<String>>,
    },

    /// Jump to an entry of the current contract
    SetPosition {
        hash: String,
        response: oneshot::Sender<Result<()>>,
    },

    /// Step to the parent of the current position
    MoveBackward {
        response: oneshot::Sender<Result<bool>>,
    },

    /// Undo the last backward step
    MoveForward {
        response: oneshot::Sender<bool>,
    },

    /// Read one log entry
    GetLogEntry {
        contract_id: String,
        hash: String,
        response: oneshot::Sender<Result<Entry>>,
    },

    /// Read a contract's log
    GetContractLog {
        contract_id: String,
        response: oneshot::Sender<Result<Vec<Entry>>>,
    },

    /// Replay a contract's persisted log
    RebuildContract {
        contract_id: String,
        response: oneshot::Sender<Result<Contract>>,
    },

    /// Write settings now, cancelling any pending debounced save
    SaveSettings {
        response: oneshot::Sender<Result<()>>,
    },

    /// Flush pending save and stop
    Shutdown {
        response: oneshot::Sender<Result<()>>,
    },
}

/// Timing knobs for the actor
#[derive(Debug, Clone, Copy)]
pub struct ActorOptions {
    /// Mailbox capacity
    pub mailbox_capacity: usize,
    /// Quiescence window before a debounced save fires
    pub debounce: Duration,
    /// Extra attempts for a failed debounced save
    pub max_save_retries: u32,
}

impl Default for ActorOptions {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1000,
            debounce: Duration::from_millis(500),
            max_save_retries: 3,
        }
    }
}

/// Actor that owns contracts, whitelist and navigation
pub struct EngineActor {
    storage: Arc<Storage>,
    registry: Arc<Registry>,
    metrics: Metrics,
    mailbox: mpsc::Receiver<EngineMessage>,

    contracts: HashMap<String, Contract>,
    whitelist: Vec<String>,
    current_contract: Option<String>,
    navigator: Navigator,

    debounce: Duration,
    max_save_retries: u32,
    save_deadline: Option<Instant>,
    save_attempts: u32,
}

impl EngineActor {
    /// Create an actor, restoring the persisted settings snapshot
    pub fn new(
        storage: Arc<Storage>,
        registry: Arc<Registry>,
        metrics: Metrics,
        mailbox: mpsc::Receiver<EngineMessage>,
        options: ActorOptions,
    ) -> Result<Self> {
        let mut actor = Self {
            storage,
            registry,
            metrics,
            mailbox,
            contracts: HashMap::new(),
            whitelist: Vec::new(),
            current_contract: None,
            navigator: Navigator::new(),
            debounce: options.debounce,
            max_save_retries: options.max_save_retries,
            save_deadline: None,
            save_attempts: 0,
        };
        actor.load_settings()?;
        Ok(actor)
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        loop {
            let deadline = self.save_deadline.unwrap_or_else(Instant::now);

            tokio::select! {
                msg = self.mailbox.recv() => {
                    match msg {
                        Some(EngineMessage::Shutdown { response }) => {
                            let result = self.teardown();
                            let _ = response.send(result);
                            break;
                        }
                        Some(msg) => self.handle_message(msg),
                        // Every handle dropped
                        None => {
                            if let Err(e) = self.teardown() {
                                error!("Final settings save failed: {}", e);
                            }
                            break;
                        }
                    }
                }

                _ = sleep_until(deadline), if self.save_deadline.is_some() => {
                    self.flush_debounced_save();
                }
            }
        }

        info!("Engine actor stopped");
    }

    fn handle_message(&mut self, msg: EngineMessage) {
        match msg {
            EngineMessage::Whitelist { contract_id, response } => {
                let _ = response.send(self.whitelist(contract_id));
            }

            EngineMessage::HandleEvent {
                contract_id,
                hash,
                entry,
                response,
            } => {
                let _ = response.send(self.handle_event(&contract_id, &hash, entry));
            }

            EngineMessage::RemoveContract { contract_id, response } => {
                let _ = response.send(self.remove_contract(&contract_id));
            }

            EngineMessage::SetCurrentContract { contract_id, response } => {
                let _ = response.send(self.set_current_contract(&contract_id));
            }

            EngineMessage::GetContract { contract_id, response } => {
                let result = self
                    .contracts
                    .get(&contract_id)
                    .cloned()
                    .ok_or(Error::ContractNotFound(contract_id));
                let _ = response.send(result);
            }

            EngineMessage::GetCurrentContract { response } => {
                let current = self
                    .current_contract
                    .as_ref()
                    .and_then(|id| self.contracts.get(id))
                    .cloned();
                let _ = response.send(current);
            }

            EngineMessage::GetContracts { response } => {
                let contracts = self
                    .contracts
                    .iter()
                    .map(|(id, contract)| (id.clone(), contract.clone()))
                    .collect();
                let _ = response.send(contracts);
            }

            EngineMessage::GetStatus { contract_id, response } => {
                let _ = response.send(self.status(&contract_id));
            }

            EngineMessage::GetWhitelist { response } => {
                let _ = response.send(self.whitelist.clone());
            }

            EngineMessage::GetPosition { response } => {
                let _ = response.send(self.navigator.position().map(str::to_string));
            }

            EngineMessage::SetPosition { hash, response } => {
                let _ = response.send(self.set_position(hash));
            }

            EngineMessage::MoveBackward { response } => {
                let _ = response.send(self.move_backward());
            }

            EngineMessage::MoveForward { response } => {
                let moved = self.current_contract.is_some() && self.navigator.move_forward();
                let _ = response.send(moved);
            }

            EngineMessage::GetLogEntry {
                contract_id,
                hash,
                response,
            } => {
                let _ = response.send(self.storage.get_log_entry(&contract_id, &hash));
            }

            EngineMessage::GetContractLog { contract_id, response } => {
                let _ = response.send(self.storage.get_contract_log(&contract_id));
            }

            EngineMessage::RebuildContract { contract_id, response } => {
                let result = self
                    .storage
                    .get_contract_log(&contract_id)
                    .and_then(|log| self.registry.replay(contract_id, &log));
                let _ = response.send(result);
            }

            EngineMessage::SaveSettings { response } => {
                self.save_deadline = None;
                self.save_attempts = 0;
                let _ = response.send(self.save_settings());
            }

            EngineMessage::Shutdown { .. } => {
                // Handled in main loop
            }
        }
    }

    // Lifecycle

    fn status(&self, contract_id: &str) -> ContractStatus {
        if self.contracts.contains_key(contract_id) {
            ContractStatus::Active
        } else if self.is_whitelisted(contract_id) {
            ContractStatus::Whitelisted
        } else {
            ContractStatus::Unknown
        }
    }

    fn is_whitelisted(&self, contract_id: &str) -> bool {
        self.whitelist.iter().any(|id| id == contract_id)
    }

    fn whitelist(&mut self, contract_id: String) -> Result<bool> {
        if contract_id.is_empty() {
            return Err(Error::InvalidEntry("empty contract id".to_string()));
        }

        let added = !self.is_whitelisted(&contract_id);
        if added {
            debug!(contract_id = %contract_id, "Whitelisted");
            self.whitelist.push(contract_id.clone());
            self.schedule_save();
        }

        // A contract left earlier, or lost with an unsaved snapshot, comes back from its log
        if !self.contracts.contains_key(&contract_id) {
            match self.replay_log(&contract_id) {
                Ok(Some(contract)) => {
                    self.restore_contract(contract);
                    self.schedule_save();
                }
                Ok(None) => {}
                Err(e) => warn!(contract_id = %contract_id, "Log replay failed: {}", e),
            }
        }

        Ok(added)
    }

    fn remove_contract(&mut self, contract_id: &str) -> Result<()> {
        let was_active = self.contracts.remove(contract_id).is_some();
        let before = self.whitelist.len();
        self.whitelist.retain(|id| id != contract_id);

        if !was_active && self.whitelist.len() == before {
            return Err(Error::ContractNotFound(contract_id.to_string()));
        }

        if self.current_contract.as_deref() == Some(contract_id) {
            self.current_contract = None;
            self.navigator.reset();
        }

        info!(contract_id = %contract_id, "Contract removed");
        self.metrics.set_contracts_active(self.contracts.len());
        self.schedule_save();
        Ok(())
    }

    fn set_current_contract(&mut self, contract_id: &str) -> Result<()> {
        let contract = self
            .contracts
            .get(contract_id)
            .ok_or_else(|| Error::ContractNotFound(contract_id.to_string()))?;

        match contract.head.clone() {
            Some(head) => self.navigator.set_position(head),
            None => self.navigator.reset(),
        }
        self.current_contract = Some(contract_id.to_string());
        self.schedule_save();
        Ok(())
    }

    // Admission

    fn handle_event(&mut self, contract_id: &str, hash: &str, entry: Value) -> Result<Admission> {
        let result = self.admit(contract_id, hash, entry);

        match &result {
            Ok(admission) => {
                self.metrics.record_admitted(admission.root);
                self.metrics.set_contracts_active(self.contracts.len());
                self.schedule_save();
            }
            Err(e) => {
                self.metrics.record_rejected(e.reason());
                match e {
                    Error::NotWhitelisted(_) => {
                        warn!(contract_id = %contract_id, hash = %hash, "Event not whitelisted")
                    }
                    _ => warn!(contract_id = %contract_id, hash = %hash, reason = e.reason(), "Event rejected: {}", e),
                }
            }
        }

        result
    }

    fn admit(&mut self, contract_id: &str, hash: &str, entry: Value) -> Result<Admission> {
        if !self.is_whitelisted(contract_id) && !self.contracts.contains_key(contract_id) {
            return Err(Error::NotWhitelisted(contract_id.to_string()));
        }

        let record: EntryRecord = serde_json::from_value(entry)
            .map_err(|e| Error::InvalidEntry(format!("malformed entry record: {}", e)))?;
        let entry = self.registry.from_object(record, hash)?;

        match self.registry.lookup(entry.entry_type())? {
            EntryKind::Root { primary, .. } => self.admit_root(contract_id, entry, primary),
            EntryKind::Action { .. } => self.admit_action(contract_id, entry),
        }
    }

    fn admit_root(&mut self, delivered_to: &str, entry: Entry, primary: bool) -> Result<Admission> {
        if let Some(parent) = entry.parent_hash() {
            return Err(Error::MalformedRoot {
                entry_type: entry.entry_type().to_string(),
                parent_hash: parent.to_string(),
            });
        }

        let id = entry.to_hash().to_string();
        let under_active = id != delivered_to && self.contracts.contains_key(delivered_to);
        if under_active {
            warn!(delivered_to = %delivered_to, contract_id = %id, "Root delivered under an active contract");
        } else if id != delivered_to {
            debug!(delivered_to = %delivered_to, contract_id = %id, "Root delivered under another id");
        }

        if !self.contracts.contains_key(&id) && self.storage.contains(&id, &id)? {
            let contract = self
                .replay_log(&id)?
                .ok_or_else(|| Error::ContractNotFound(id.clone()))?;
            self.restore_contract(contract);
            if !self.is_whitelisted(&id) {
                self.whitelist.push(id.clone());
            }
            return Ok(Admission {
                contract_id: id.clone(),
                hash: id,
                root: true,
            });
        }

        let state = self.registry.init_state(&entry)?;
        self.storage.add_log_entry(&id, &entry)?;

        self.contracts.insert(
            id.clone(),
            Contract {
                id: id.clone(),
                contract_type: entry.entry_type().to_string(),
                state,
                head: Some(id.clone()),
            },
        );
        if !self.is_whitelisted(&id) {
            self.whitelist.push(id.clone());
        }

        if primary && !under_active {
            self.current_contract = Some(id.clone());
            self.navigator.set_position(id.clone());
        }

        info!(contract_id = %id, entry_type = entry.entry_type(), "Contract created");

        Ok(Admission {
            contract_id: id.clone(),
            hash: id,
            root: true,
        })
    }

    fn admit_action(&mut self, contract_id: &str, entry: Entry) -> Result<Admission> {
        let parent = entry
            .parent_hash()
            .ok_or_else(|| {
                Error::InvalidEntry(format!("{} entry without parentHash", entry.entry_type()))
            })?
            .to_string();

        let contract = self
            .contracts
            .get(contract_id)
            .ok_or_else(|| Error::ContractNotFound(contract_id.to_string()))?;

        // Out-of-order delivery is not buffered; the entry still applies
        if contract.head.as_deref() != Some(parent.as_str()) {
            warn!(
                contract_id = %contract_id,
                hash = %entry.to_hash(),
                parent = %parent,
                head = ?contract.head,
                "Entry does not extend the log head"
            );
        }

        let mut state = contract.state.clone();
        self.registry.apply(&entry, &mut state)?;
        self.storage.add_log_entry(contract_id, &entry)?;

        let hash = entry.to_hash().to_string();
        if let Some(contract) = self.contracts.get_mut(contract_id) {
            contract.state = state;
            contract.head = Some(hash.clone());
        }

        if self.current_contract.as_deref() == Some(contract_id) {
            self.navigator.set_position(hash.clone());
        }

        debug!(contract_id = %contract_id, hash = %hash, entry_type = entry.entry_type(), "Action applied");

        Ok(Admission {
            contract_id: contract_id.to_string(),
            hash,
            root: false,
        })
    }

    // Navigation

    fn set_position(&mut self, hash: String) -> Result<()> {
        let current = self
            .current_contract
            .as_deref()
            .ok_or_else(|| Error::ContractNotFound("no current contract".to_string()))?;
        crypto::decode_hash(&hash)?;

        if !self.storage.contains(current, &hash)? {
            return Err(Error::LogEntryNotFound {
                contract_id: current.to_string(),
                hash,
            });
        }

        self.navigator.set_position(hash);
        Ok(())
    }

    fn move_backward(&mut self) -> Result<bool> {
        let current = match self.current_contract.as_deref() {
            Some(current) => current,
            None => return Ok(false),
        };
        let storage = &self.storage;

        self.navigator.move_backward(|position| {
            let entry = storage.get_log_entry(current, position)?;
            match entry.parent_hash() {
                Some(parent) if storage.contains(current, parent)? => Ok(Some(parent.to_string())),
                Some(parent) => Err(Error::LogEntryNotFound {
                    contract_id: current.to_string(),
                    hash: parent.to_string(),
                }),
                None => Ok(None),
            }
        })
    }

    // Settings

    fn snapshot(&self) -> Settings {
        Settings {
            current_group_id: self.current_contract.clone(),
            contracts: self
                .contracts
                .iter()
                .map(|(id, contract)| (id.clone(), contract.to_saved()))
                .collect(),
            whitelist: self.whitelist.clone(),
            saved_at: Some(Utc::now()),
        }
    }

    fn save_settings(&self) -> Result<()> {
        let settings = self.snapshot();
        let result = self.storage.save_settings(&settings);
        self.metrics.record_save(result.is_ok());
        if result.is_ok() {
            debug!(
                contracts = settings.contracts.len(),
                whitelist = settings.whitelist.len(),
                "Settings saved"
            );
        }
        result
    }

    fn load_settings(&mut self) -> Result<()> {
        let settings = match self.storage.load_settings()? {
            Some(settings) => settings,
            None => {
                debug!("No saved settings");
                return Ok(());
            }
        };

        for (id, saved) in settings.contracts {
            let log_head = self.storage.log_head(&id)?;
            let restored = if saved.head.is_some() && saved.head == log_head {
                self.registry.from_state(id.clone(), saved)
            } else {
                debug!(contract_id = %id, saved = ?saved.head, log = ?log_head, "Snapshot behind log, replaying");
                self.replay_log(&id)
                    .and_then(|contract| contract.ok_or_else(|| Error::ContractNotFound(id.clone())))
            };
            match restored {
                Ok(contract) => {
                    self.contracts.insert(id, contract);
                }
                Err(e) => warn!(contract_id = %id, "Skipping saved contract: {}", e),
            }
        }

        for id in settings.whitelist {
            if self.is_whitelisted(&id) {
                continue;
            }
            if !self.contracts.contains_key(&id) {
                match self.replay_log(&id) {
                    Ok(Some(contract)) => {
                        self.contracts.insert(id.clone(), contract);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(contract_id = %id, "Log replay failed: {}", e),
                }
            }
            self.whitelist.push(id);
        }

        self.current_contract = settings
            .current_group_id
            .filter(|id| self.contracts.contains_key(id));
        if let Some(head) = self
            .current_contract
            .as_ref()
            .and_then(|id| self.contracts.get(id))
            .and_then(|contract| contract.head.clone())
        {
            self.navigator.set_position(head);
        }

        self.metrics.set_contracts_active(self.contracts.len());
        info!(
            contracts = self.contracts.len(),
            whitelist = self.whitelist.len(),
            current = ?self.current_contract,
            "Settings loaded"
        );
        Ok(())
    }

    /// Materialize a contract from its persisted log, if it has one
    fn replay_log(&self, contract_id: &str) -> Result<Option<Contract>> {
        let log = self.storage.get_contract_log(contract_id)?;
        if log.is_empty() {
            return Ok(None);
        }
        self.registry.replay(contract_id, &log).map(Some)
    }

    /// Reinstate a replayed contract; a primary one becomes current only when nothing is
    fn restore_contract(&mut self, contract: Contract) {
        let id = contract.id.clone();
        if self.current_contract.is_none() && self.registry.is_primary(&contract.contract_type) {
            self.current_contract = Some(id.clone());
            match contract.head.clone() {
                Some(head) => self.navigator.set_position(head),
                None => self.navigator.reset(),
            }
        }

        info!(contract_id = %id, head = ?contract.head, "Contract restored from log");
        self.contracts.insert(id, contract);
        self.metrics.set_contracts_active(self.contracts.len());
    }

    /// Push the debounced save out to a full window from now
    fn schedule_save(&mut self) {
        self.save_deadline = Some(Instant::now() + self.debounce);
        self.save_attempts = 0;
    }

    fn flush_debounced_save(&mut self) {
        self.save_deadline = None;

        if let Err(e) = self.save_settings() {
            if self.save_attempts < self.max_save_retries {
                self.save_attempts += 1;
                warn!(attempt = self.save_attempts, "Settings save failed, retrying: {}", e);
                self.save_deadline = Some(Instant::now() + self.debounce);
            } else {
                error!(attempts = self.save_attempts + 1, "Settings save failed: {}", e);
                self.save_attempts = 0;
            }
        } else {
            self.save_attempts = 0;
        }
    }

    /// Flush a pending save; the timer never fires afterwards
    fn teardown(&mut self) -> Result<()> {
        match self.save_deadline.take() {
            Some(_) => self.save_settings(),
            None => Ok(()),
        }
    }
}

/// Handle for sending messages to the actor
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<EngineMessage>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl EngineHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<EngineMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }

    /// Expect events for a contract; `false` when it was already whitelisted
    pub async fn whitelist(&self, contract_id: impl Into<String>) -> Result<bool> {
        let contract_id = contract_id.into();
        self.request(|response| EngineMessage::Whitelist { contract_id, response })
            .await?
    }

    /// Admit an entry delivered for `contract_id`
    pub async fn handle_event(
        &self,
        contract_id: impl Into<String>,
        hash: impl Into<String>,
        record: &EntryRecord,
    ) -> Result<Admission> {
        let entry = serde_json::to_value(record)?;
        self.handle_raw(contract_id.into(), hash.into(), entry).await
    }

    /// Admit a delivery straight off the channel
    pub async fn handle_delivery(&self, delivery: Delivery) -> Result<Admission> {
        self.handle_raw(delivery.contract_id, delivery.hash, delivery.entry)
            .await
    }

    async fn handle_raw(&self, contract_id: String, hash: String, entry: Value) -> Result<Admission> {
        self.request(|response| EngineMessage::HandleEvent {
            contract_id,
            hash,
            entry,
            response,
        })
        .await?
    }

    /// Drop a contract from memory and the whitelist; its log stays
    pub async fn remove_contract(&self, contract_id: impl Into<String>) -> Result<()> {
        let contract_id = contract_id.into();
        self.request(|response| EngineMessage::RemoveContract { contract_id, response })
            .await?
    }

    /// Make an active contract the navigation context
    pub async fn set_current_contract(&self, contract_id: impl Into<String>) -> Result<()> {
        let contract_id = contract_id.into();
        self.request(|response| EngineMessage::SetCurrentContract { contract_id, response })
            .await?
    }

    /// Get a materialized contract
    pub async fn contract(&self, contract_id: impl Into<String>) -> Result<Contract> {
        let contract_id = contract_id.into();
        self.request(|response| EngineMessage::GetContract { contract_id, response })
            .await?
    }

    /// Get the navigation context, if any
    pub async fn current_contract(&self) -> Result<Option<Contract>> {
        self.request(|response| EngineMessage::GetCurrentContract { response })
            .await
    }

    /// Get all materialized contracts
    pub async fn contracts(&self) -> Result<BTreeMap<String, Contract>> {
        self.request(|response| EngineMessage::GetContracts { response })
            .await
    }

    /// Get a contract's lifecycle status
    pub async fn status(&self, contract_id: impl Into<String>) -> Result<ContractStatus> {
        let contract_id = contract_id.into();
        self.request(|response| EngineMessage::GetStatus { contract_id, response })
            .await
    }

    /// Get whitelisted contract ids
    pub async fn whitelist_ids(&self) -> Result<Vec<String>> {
        self.request(|response| EngineMessage::GetWhitelist { response })
            .await
    }

    /// Get the navigation position
    pub async fn position(&self) -> Result<Option<String>> {
        self.request(|response| EngineMessage::GetPosition { response })
            .await
    }

    /// Jump to an entry of the current contract, clearing the offset stack
    pub async fn set_position(&self, hash: impl Into<String>) -> Result<()> {
        let hash = hash.into();
        self.request(|response| EngineMessage::SetPosition { hash, response })
            .await?
    }

    /// Step back to the parent entry; `false` at the root or without context
    pub async fn move_backward(&self) -> Result<bool> {
        self.request(|response| EngineMessage::MoveBackward { response })
            .await?
    }

    /// Undo the last backward step; `false` when there is nothing to undo
    pub async fn move_forward(&self) -> Result<bool> {
        self.request(|response| EngineMessage::MoveForward { response })
            .await
    }

    /// Read one log entry
    pub async fn log_entry(
        &self,
        contract_id: impl Into<String>,
        hash: impl Into<String>,
    ) -> Result<Entry> {
        let contract_id = contract_id.into();
        let hash = hash.into();
        self.request(|response| EngineMessage::GetLogEntry {
            contract_id,
            hash,
            response,
        })
        .await?
    }

    /// Read a contract's log in admission order
    pub async fn contract_log(&self, contract_id: impl Into<String>) -> Result<Vec<Entry>> {
        let contract_id = contract_id.into();
        self.request(|response| EngineMessage::GetContractLog { contract_id, response })
            .await?
    }

    /// Replay a contract's persisted log without touching live state
    pub async fn rebuild_contract(&self, contract_id: impl Into<String>) -> Result<Contract> {
        let contract_id = contract_id.into();
        self.request(|response| EngineMessage::RebuildContract { contract_id, response })
            .await?
    }

    /// Write settings immediately
    pub async fn save_settings(&self) -> Result<()> {
        self.request(|response| EngineMessage::SaveSettings { response })
            .await?
    }

    /// Flush any pending save and stop the actor
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|response| EngineMessage::Shutdown { response })
            .await?
    }
}

/// Spawn the engine actor
pub fn spawn_engine_actor(
    storage: Arc<Storage>,
    registry: Arc<Registry>,
    metrics: Metrics,
    options: ActorOptions,
) -> Result<EngineHandle> {
    let (tx, rx) = mpsc::channel(options.mailbox_capacity);
    let actor = EngineActor::new(storage, registry, metrics, rx, options)?;

    tokio::spawn(async move {
        actor.run().await;
    });

    Ok(EngineHandle::new(tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::kinds::{GROUP_CONTRACT, IDENTITY_CONTRACT, PAYMENT};
    use crate::types::JsonObject;
    use crate::Config;
    use serde_json::json;

    fn object(value: Value) -> JsonObject {
        value.as_object().cloned().unwrap()
    }

    fn spawn(dir: &tempfile::TempDir, options: ActorOptions) -> (EngineHandle, Metrics) {
        let mut config = Config::default();
        config.data_dir = dir.path().to_path_buf();
        let storage = Arc::new(Storage::open(&config).unwrap());
        let metrics = Metrics::new().unwrap();
        let handle = spawn_engine_actor(
            storage,
            Arc::new(Registry::with_defaults()),
            metrics.clone(),
            options,
        )
        .unwrap();
        (handle, metrics)
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (handle, metrics) = spawn(&temp_dir, ActorOptions::default());

        handle.shutdown().await.unwrap();
        assert_eq!(metrics.settings_saves.get(), 0);
        assert!(matches!(
            handle.whitelist("zGroup").await,
            Err(Error::Concurrency(_))
        ));
    }

    #[tokio::test]
    async fn test_root_admission() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (handle, metrics) = spawn(
            &temp_dir,
            ActorOptions {
                debounce: Duration::from_secs(30),
                ..ActorOptions::default()
            },
        );

        let root = Entry::root(GROUP_CONTRACT, object(json!({"hello": "world"}))).unwrap();
        assert_eq!(handle.status("c1").await.unwrap(), ContractStatus::Unknown);
        assert!(handle.whitelist("c1").await.unwrap());
        assert!(!handle.whitelist("c1").await.unwrap());
        assert_eq!(handle.status("c1").await.unwrap(), ContractStatus::Whitelisted);

        let admission = handle
            .handle_event("c1", root.to_hash(), root.record())
            .await
            .unwrap();
        assert!(admission.root);
        assert_eq!(admission.contract_id, root.to_hash());

        let contract = handle.contract(root.to_hash()).await.unwrap();
        assert_eq!(contract.state["hello"], "world");
        assert_eq!(handle.status(root.to_hash()).await.unwrap(), ContractStatus::Active);
        assert_eq!(handle.position().await.unwrap().as_deref(), Some(root.to_hash()));
        assert_eq!(
            handle.whitelist_ids().await.unwrap(),
            vec!["c1".to_string(), root.to_hash().to_string()]
        );
        assert_eq!(metrics.admitted_total(), 1);

        handle.shutdown().await.unwrap();
        assert_eq!(metrics.settings_saves.get(), 1);
    }

    #[tokio::test]
    async fn test_non_primary_root_keeps_context() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (handle, _) = spawn(&temp_dir, ActorOptions::default());

        let identity = Entry::root(IDENTITY_CONTRACT, object(json!({"name": "bob"}))).unwrap();
        handle.whitelist(identity.to_hash()).await.unwrap();
        handle
            .handle_event(identity.to_hash(), identity.to_hash(), identity.record())
            .await
            .unwrap();

        assert!(handle.current_contract().await.unwrap().is_none());
        assert_eq!(handle.position().await.unwrap(), None);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejections_are_counted() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (handle, metrics) = spawn(&temp_dir, ActorOptions::default());

        let root = Entry::root(GROUP_CONTRACT, JsonObject::new()).unwrap();
        let err = handle
            .handle_event("stranger", root.to_hash(), root.record())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotWhitelisted(_)));

        handle.whitelist("c1").await.unwrap();
        let err = handle
            .handle_event("c1", "zWrongHash", root.record())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));

        let err = handle
            .handle_delivery(Delivery::new("c1", "h", json!("not an object")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEntry(_)));

        assert_eq!(metrics.rejected("not_whitelisted"), 1);
        assert_eq!(metrics.rejected("integrity"), 1);
        assert_eq!(metrics.rejected("invalid_entry"), 1);
        assert!(handle.contracts().await.unwrap().is_empty());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_action_for_inactive_contract() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (handle, _) = spawn(&temp_dir, ActorOptions::default());

        handle.whitelist("c1").await.unwrap();
        let payment = Entry::action(PAYMENT, JsonObject::new(), "zParent").unwrap();
        let err = handle
            .handle_event("c1", payment.to_hash(), payment.record())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ContractNotFound(_)));
        assert!(handle.contract_log("c1").await.unwrap().is_empty());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_contract_clears_context() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (handle, _) = spawn(&temp_dir, ActorOptions::default());

        let root = Entry::root(GROUP_CONTRACT, JsonObject::new()).unwrap();
        handle.whitelist(root.to_hash()).await.unwrap();
        handle
            .handle_event(root.to_hash(), root.to_hash(), root.record())
            .await
            .unwrap();

        handle.remove_contract(root.to_hash()).await.unwrap();
        assert_eq!(handle.status(root.to_hash()).await.unwrap(), ContractStatus::Unknown);
        assert!(handle.current_contract().await.unwrap().is_none());
        assert_eq!(handle.position().await.unwrap(), None);
        // The log is append-only
        assert_eq!(handle.contract_log(root.to_hash()).await.unwrap().len(), 1);

        assert!(matches!(
            handle.remove_contract(root.to_hash()).await,
            Err(Error::ContractNotFound(_))
        ));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_position_requires_logged_entry() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (handle, _) = spawn(&temp_dir, ActorOptions::default());

        assert!(matches!(
            handle.set_position("zAnything").await,
            Err(Error::ContractNotFound(_))
        ));

        let root = Entry::root(GROUP_CONTRACT, JsonObject::new()).unwrap();
        handle.whitelist(root.to_hash()).await.unwrap();
        handle
            .handle_event(root.to_hash(), root.to_hash(), root.record())
            .await
            .unwrap();

        assert!(matches!(
            handle.set_position("zAnything").await,
            Err(Error::InvalidEntry(_))
        ));
        assert!(matches!(
            handle.set_position(crypto::hash_str("elsewhere")).await,
            Err(Error::LogEntryNotFound { .. })
        ));
        assert_eq!(handle.position().await.unwrap().as_deref(), Some(root.to_hash()));
        handle.set_position(root.to_hash()).await.unwrap();

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_root_under_active_room_keeps_context() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (handle, _) = spawn(&temp_dir, ActorOptions::default());

        let home = Entry::root(GROUP_CONTRACT, object(json!({"groupName": "home"}))).unwrap();
        handle.whitelist(home.to_hash()).await.unwrap();
        handle
            .handle_event(home.to_hash(), home.to_hash(), home.record())
            .await
            .unwrap();

        let other = Entry::root(GROUP_CONTRACT, object(json!({"groupName": "other"}))).unwrap();
        let admission = handle
            .handle_event(home.to_hash(), other.to_hash(), other.record())
            .await
            .unwrap();
        assert_eq!(admission.contract_id, other.to_hash());
        assert_eq!(handle.status(other.to_hash()).await.unwrap(), ContractStatus::Active);

        assert_eq!(handle.current_contract().await.unwrap().unwrap().id, home.to_hash());
        assert_eq!(handle.position().await.unwrap().as_deref(), Some(home.to_hash()));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rewhitelist_restores_removed_contract() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (handle, _) = spawn(&temp_dir, ActorOptions::default());

        let root = Entry::root(GROUP_CONTRACT, JsonObject::new()).unwrap();
        let payment = Entry::action(PAYMENT, object(json!({"amount": 2})), root.to_hash()).unwrap();
        handle.whitelist(root.to_hash()).await.unwrap();
        for entry in [&root, &payment] {
            handle
                .handle_event(root.to_hash(), entry.to_hash(), entry.record())
                .await
                .unwrap();
        }
        let before = handle.contract(root.to_hash()).await.unwrap();

        handle.remove_contract(root.to_hash()).await.unwrap();
        assert_eq!(handle.status(root.to_hash()).await.unwrap(), ContractStatus::Unknown);

        assert!(handle.whitelist(root.to_hash()).await.unwrap());
        assert_eq!(handle.status(root.to_hash()).await.unwrap(), ContractStatus::Active);
        assert_eq!(handle.contract(root.to_hash()).await.unwrap(), before);
        assert_eq!(handle.current_contract().await.unwrap().unwrap().id, root.to_hash());
        assert_eq!(handle.position().await.unwrap().as_deref(), Some(payment.to_hash()));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_explicit_save_cancels_pending_debounce() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (handle, metrics) = spawn(
            &temp_dir,
            ActorOptions {
                debounce: Duration::from_millis(50),
                ..ActorOptions::default()
            },
        );

        handle.whitelist("c1").await.unwrap();
        handle.save_settings().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(metrics.settings_saves.get(), 1);

        handle.shutdown().await.unwrap();
        assert_eq!(metrics.settings_saves.get(), 1);
    }
}
