//! Core types for the contract log
//!
//! - [`EntryRecord`] is the wire form of a log entry
//! - [`Entry`] is an immutable, hashed entry
//! - [`Contract`] is the state materialized from one contract's log
//! - [`Settings`] is the persisted snapshot of the local client

use crate::crypto::to_hash;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// JSON object carried as entry payload
pub type JsonObject = serde_json::Map<String, Value>;

/// Version stamped on entries that do not declare one
pub const DEFAULT_ENTRY_VERSION: &str = "0.0.1";

fn default_version() -> String {
    DEFAULT_ENTRY_VERSION.to_string()
}

/// Wire record of a log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    /// Registered type tag
    #[serde(rename = "type")]
    pub entry_type: String,

    /// Entry format version
    #[serde(default = "default_version")]
    pub version: String,

    /// Hash of the predecessor in the same contract; `None` for roots
    #[serde(rename = "parentHash", default)]
    pub parent_hash: Option<String>,

    /// Type-specific payload
    #[serde(default)]
    pub data: JsonObject,
}

impl EntryRecord {
    /// Create a record with the default version
    pub fn new(
        entry_type: impl Into<String>,
        data: JsonObject,
        parent_hash: Option<String>,
    ) -> Self {
        Self {
            entry_type: entry_type.into(),
            version: default_version(),
            parent_hash,
            data,
        }
    }
}

/// Immutable, hashed log entry
///
/// The hash is computed once at construction over the canonical form of the
/// record, so `to_hash` is free afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    record: EntryRecord,
    hash: String,
}

impl Entry {
    /// Hash a record into an entry
    pub fn new(record: EntryRecord) -> Result<Self> {
        let hash = to_hash(&record)?;
        Ok(Self { record, hash })
    }

    /// Contract-creation entry (no parent)
    pub fn root(entry_type: impl Into<String>, data: JsonObject) -> Result<Self> {
        Self::new(EntryRecord::new(entry_type, data, None))
    }

    /// Action entry chained onto `parent_hash`
    pub fn action(
        entry_type: impl Into<String>,
        data: JsonObject,
        parent_hash: impl Into<String>,
    ) -> Result<Self> {
        Self::new(EntryRecord::new(entry_type, data, Some(parent_hash.into())))
    }

    /// Rebuild an entry received from elsewhere, verifying its hash
    pub fn from_object(record: EntryRecord, expected_hash: &str) -> Result<Self> {
        let entry = Self::new(record)?;
        if entry.hash != expected_hash {
            return Err(Error::Integrity {
                expected: expected_hash.to_string(),
                actual: entry.hash,
            });
        }
        Ok(entry)
    }

    /// Wire record
    pub fn to_object(&self) -> EntryRecord {
        self.record.clone()
    }

    /// Borrow the wire record
    pub fn record(&self) -> &EntryRecord {
        &self.record
    }

    /// Content hash
    pub fn to_hash(&self) -> &str {
        &self.hash
    }

    /// Type tag
    pub fn entry_type(&self) -> &str {
        &self.record.entry_type
    }

    /// Parent hash, if any
    pub fn parent_hash(&self) -> Option<&str> {
        self.record.parent_hash.as_deref()
    }

    /// Payload
    pub fn data(&self) -> &JsonObject {
        &self.record.data
    }

    /// Entry format version
    pub fn version(&self) -> &str {
        &self.record.version
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.record.entry_type, self.hash)
    }
}

/// State materialized from a contract's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    /// Contract id (hash of the root entry)
    pub id: String,

    /// Type tag of the root entry
    #[serde(rename = "type")]
    pub contract_type: String,

    /// Type-specific state
    pub state: Value,

    /// Hash of the last admitted entry, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
}

impl Contract {
    /// Snapshot for the settings record
    pub fn to_saved(&self) -> SavedContract {
        SavedContract {
            contract_type: self.contract_type.clone(),
            state: self.state.clone(),
            head: self.head.clone(),
        }
    }
}

/// Per-contract admission lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractStatus {
    /// Never whitelisted
    Unknown,
    /// Whitelisted, root entry not yet admitted
    Whitelisted,
    /// Root entry admitted, contract materialized
    Active,
}

/// Persisted form of one contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedContract {
    /// Contract type tag
    #[serde(rename = "type")]
    pub contract_type: String,

    /// Materialized state
    pub state: Value,

    /// Log head the state was materialized at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
}

/// Persisted snapshot of the local client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Current navigation context
    #[serde(rename = "currentGroupId", default)]
    pub current_group_id: Option<String>,

    /// Materialized contracts by id
    #[serde(default)]
    pub contracts: BTreeMap<String, SavedContract>,

    /// Contracts we expect to receive events for, in whitelisting order
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// When the snapshot was taken
    #[serde(rename = "savedAt", default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> JsonObject {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_record_wire_names() {
        let record = EntryRecord::new("Payment", object(json!({"amount": 5})), Some("zParent".into()));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({"type": "Payment", "version": "0.0.1", "parentHash": "zParent", "data": {"amount": 5}})
        );
    }

    #[test]
    fn test_record_defaults_on_missing_fields() {
        let record: EntryRecord =
            serde_json::from_value(json!({"type": "GroupContract", "data": {}})).unwrap();
        assert_eq!(record.version, DEFAULT_ENTRY_VERSION);
        assert!(record.parent_hash.is_none());
    }

    #[test]
    fn test_identical_content_same_hash() {
        let a = Entry::root("GroupContract", object(json!({"hello": "world"}))).unwrap();
        let b = Entry::root("GroupContract", object(json!({"hello": "world"}))).unwrap();
        assert_eq!(a.to_hash(), b.to_hash());

        let c = Entry::root("GroupContract", object(json!({"hello": "there"}))).unwrap();
        assert_ne!(a.to_hash(), c.to_hash());
    }

    #[test]
    fn test_parent_changes_hash() {
        let data = object(json!({"amount": 5}));
        let a = Entry::action("Payment", data.clone(), "zOne").unwrap();
        let b = Entry::action("Payment", data, "zTwo").unwrap();
        assert_ne!(a.to_hash(), b.to_hash());
    }

    #[test]
    fn test_from_object_round_trip() {
        let entry = Entry::action("Vote", object(json!({"vote": "yes"})), "zParent").unwrap();
        let rebuilt = Entry::from_object(entry.to_object(), entry.to_hash()).unwrap();
        assert_eq!(rebuilt, entry);
    }

    #[test]
    fn test_from_object_rejects_tampered_record() {
        let entry = Entry::action("Payment", object(json!({"amount": 5})), "zParent").unwrap();
        let mut record = entry.to_object();
        record.data.insert("amount".into(), json!(500));

        match Entry::from_object(record, entry.to_hash()) {
            Err(Error::Integrity { expected, actual }) => {
                assert_eq!(expected, entry.to_hash());
                assert_ne!(actual, expected);
            }
            other => panic!("expected integrity error, got {:?}", other),
        }
    }

    #[test]
    fn test_settings_wire_names() {
        let mut settings = Settings::default();
        settings.current_group_id = Some("zGroup".into());
        settings.whitelist.push("zGroup".into());
        settings.contracts.insert(
            "zGroup".into(),
            SavedContract {
                contract_type: "GroupContract".into(),
                state: json!({"type": "GroupContract"}),
                head: None,
            },
        );

        let value = serde_json::to_value(&settings).unwrap();
        assert_eq!(value["currentGroupId"], "zGroup");
        assert_eq!(value["contracts"]["zGroup"]["type"], "GroupContract");
        assert_eq!(value["whitelist"], json!(["zGroup"]));
        assert!(value.get("savedAt").is_none());
    }
}
