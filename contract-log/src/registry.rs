//! Contract registry
//!
//! Maps an entry's type tag to its behavior. Root kinds create a contract
//! and initialize its state; action kinds transition an existing contract's
//! state. This table is the only place type tags are interpreted: adding a
//! new contract or action kind means registering it here.

use crate::types::{Contract, Entry, EntryRecord, JsonObject, SavedContract};
use crate::{Error, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Builds initial contract state from a root entry's data
pub type InitFn = fn(&JsonObject) -> Result<Value>;

/// Applies an action entry's data to contract state in place
pub type ApplyFn = fn(&mut Value, &JsonObject) -> Result<()>;

/// Behavior registered for a type tag
#[derive(Debug, Clone, Copy)]
pub enum EntryKind {
    /// Contract-creation entry
    Root {
        /// State initializer
        init: InitFn,
        /// Admission makes this contract the current navigation context
        primary: bool,
    },
    /// Entry that transitions an existing contract
    Action {
        /// State transition
        apply: ApplyFn,
    },
}

impl EntryKind {
    /// Whether this kind creates contracts
    pub fn is_root(&self) -> bool {
        matches!(self, EntryKind::Root { .. })
    }
}

/// Type tag → behavior table
#[derive(Debug, Clone, Default)]
pub struct Registry {
    kinds: HashMap<String, EntryKind>,
}

impl Registry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in group application kinds
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (tag, kind) in kinds::defaults() {
            registry.kinds.insert(tag.to_string(), kind);
        }
        registry
    }

    /// Register a new type tag
    pub fn register(&mut self, tag: impl Into<String>, kind: EntryKind) -> Result<()> {
        let tag = tag.into();
        if self.kinds.contains_key(&tag) {
            return Err(Error::DuplicateEntryType(tag));
        }
        tracing::debug!(entry_type = %tag, root = kind.is_root(), "Entry type registered");
        self.kinds.insert(tag, kind);
        Ok(())
    }

    /// Look up a type tag
    pub fn lookup(&self, tag: &str) -> Result<EntryKind> {
        self.kinds
            .get(tag)
            .copied()
            .ok_or_else(|| Error::UnknownEntryType(tag.to_string()))
    }

    /// Whether a type tag is a primary root kind
    pub fn is_primary(&self, tag: &str) -> bool {
        matches!(self.kinds.get(tag), Some(EntryKind::Root { primary: true, .. }))
    }

    /// Rebuild a typed entry from its wire record, verifying its hash
    ///
    /// The type tag is checked before the hash so unknown kinds are reported
    /// as such rather than as integrity failures.
    pub fn from_object(&self, record: EntryRecord, expected_hash: &str) -> Result<Entry> {
        self.lookup(&record.entry_type)?;
        Entry::from_object(record, expected_hash)
    }

    /// Initial state for a root entry
    ///
    /// The returned state always carries a `type` field naming the contract
    /// type, which the settings record relies on.
    pub fn init_state(&self, entry: &Entry) -> Result<Value> {
        match self.lookup(entry.entry_type())? {
            EntryKind::Root { init, .. } => {
                let mut state = init(entry.data())?;
                let object = state.as_object_mut().ok_or_else(|| {
                    Error::InvalidEntry(format!("{} state is not an object", entry.entry_type()))
                })?;
                object.insert("type".to_string(), Value::String(entry.entry_type().to_string()));
                Ok(state)
            }
            EntryKind::Action { .. } => Err(Error::InvalidEntry(format!(
                "{} is not a contract-creation entry",
                entry.entry_type()
            ))),
        }
    }

    /// Apply an action entry to contract state
    pub fn apply(&self, entry: &Entry, state: &mut Value) -> Result<()> {
        match self.lookup(entry.entry_type())? {
            EntryKind::Action { apply } => apply(state, entry.data()),
            EntryKind::Root { .. } => Err(Error::InvalidEntry(format!(
                "{} is not an action entry",
                entry.entry_type()
            ))),
        }
    }

    /// Rehydrate a contract from persisted state
    ///
    /// Persisted settings are trusted local data, so no hash is recomputed.
    pub fn from_state(&self, id: impl Into<String>, saved: SavedContract) -> Result<Contract> {
        match self.lookup(&saved.contract_type)? {
            EntryKind::Root { .. } => Ok(Contract {
                id: id.into(),
                contract_type: saved.contract_type,
                state: saved.state,
                head: saved.head,
            }),
            EntryKind::Action { .. } => Err(Error::InvalidEntry(format!(
                "{} is not a contract type",
                saved.contract_type
            ))),
        }
    }

    /// Rebuild a contract by replaying its log from the root
    ///
    /// Entries must be in admission order. The replay is deterministic: the
    /// same log always yields the same state.
    pub fn replay(&self, id: impl Into<String>, entries: &[Entry]) -> Result<Contract> {
        let id = id.into();
        let (root, actions) = entries
            .split_first()
            .ok_or_else(|| Error::ContractNotFound(id.clone()))?;

        if let Some(parent) = root.parent_hash() {
            return Err(Error::MalformedRoot {
                entry_type: root.entry_type().to_string(),
                parent_hash: parent.to_string(),
            });
        }

        let mut state = self.init_state(root)?;
        for entry in actions {
            self.apply(entry, &mut state)?;
        }

        Ok(Contract {
            id,
            contract_type: root.entry_type().to_string(),
            state,
            head: entries.last().map(|entry| entry.to_hash().to_string()),
        })
    }
}

/// Built-in kinds for the group application
pub mod kinds {
    use super::*;

    /// Primary group contract
    pub const GROUP_CONTRACT: &str = "GroupContract";
    /// Per-member identity contract
    pub const IDENTITY_CONTRACT: &str = "IdentityContract";
    /// Payment into a group
    pub const PAYMENT: &str = "Payment";
    /// Vote on a group proposal
    pub const VOTE: &str = "Vote";
    /// Member joins a group
    pub const ACCEPT_INVITATION: &str = "AcceptInvitation";
    /// Update identity attributes
    pub const SET_ATTRIBUTES: &str = "SetAttributes";

    pub(super) fn defaults() -> Vec<(&'static str, EntryKind)> {
        vec![
            (GROUP_CONTRACT, EntryKind::Root { init: init_group, primary: true }),
            (IDENTITY_CONTRACT, EntryKind::Root { init: init_identity, primary: false }),
            (PAYMENT, EntryKind::Action { apply: apply_payment }),
            (VOTE, EntryKind::Action { apply: apply_vote }),
            (ACCEPT_INVITATION, EntryKind::Action { apply: apply_accept_invitation }),
            (SET_ATTRIBUTES, EntryKind::Action { apply: apply_set_attributes }),
        ]
    }

    fn init_group(data: &JsonObject) -> Result<Value> {
        let mut state = data.clone();
        state.entry("profiles").or_insert_with(|| Value::Object(Map::new()));
        state.insert("payments".to_string(), Value::Array(Vec::new()));
        state.insert("votes".to_string(), Value::Array(Vec::new()));
        Ok(Value::Object(state))
    }

    fn init_identity(data: &JsonObject) -> Result<Value> {
        let mut state = data.clone();
        state.entry("attributes").or_insert_with(|| Value::Object(Map::new()));
        Ok(Value::Object(state))
    }

    fn apply_payment(state: &mut Value, data: &JsonObject) -> Result<()> {
        array_field(state, "payments")?.push(Value::Object(data.clone()));
        Ok(())
    }

    fn apply_vote(state: &mut Value, data: &JsonObject) -> Result<()> {
        array_field(state, "votes")?.push(Value::Object(data.clone()));
        Ok(())
    }

    fn apply_accept_invitation(state: &mut Value, data: &JsonObject) -> Result<()> {
        let member_id = data
            .get("memberId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidEntry("AcceptInvitation requires memberId".to_string()))?
            .to_string();
        let profile = data
            .get("profile")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));

        object_field(state, "profiles")?.insert(member_id, profile);
        Ok(())
    }

    fn apply_set_attributes(state: &mut Value, data: &JsonObject) -> Result<()> {
        let attributes = object_field(state, "attributes")?;
        for (key, value) in data {
            attributes.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn array_field<'a>(state: &'a mut Value, field: &str) -> Result<&'a mut Vec<Value>> {
        let object = state
            .as_object_mut()
            .ok_or_else(|| Error::InvalidEntry("contract state is not an object".to_string()))?;
        object
            .entry(field)
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .ok_or_else(|| Error::InvalidEntry(format!("state field {} is not an array", field)))
    }

    fn object_field<'a>(state: &'a mut Value, field: &str) -> Result<&'a mut JsonObject> {
        let object = state
            .as_object_mut()
            .ok_or_else(|| Error::InvalidEntry("contract state is not an object".to_string()))?;
        object
            .entry(field)
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| Error::InvalidEntry(format!("state field {} is not an object", field)))
    }
}
