//! Delivery envelope for pub/sub

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// One log entry delivered to a contract room
///
/// The entry is carried as raw JSON; interpreting it is the receiver's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    /// Room (contract id) the entry belongs to
    #[serde(rename = "contractId")]
    pub contract_id: String,

    /// Hash the entry claims
    pub hash: String,

    /// Entry record
    pub entry: serde_json::Value,
}

impl Delivery {
    /// Create new delivery
    pub fn new(
        contract_id: impl Into<String>,
        hash: impl Into<String>,
        entry: serde_json::Value,
    ) -> Self {
        Self {
            contract_id: contract_id.into(),
            hash: hash.into(),
            entry,
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Subject this delivery is published on
    pub fn subject(&self, prefix: &str) -> Result<String> {
        room_subject(prefix, &self.contract_id)
    }
}

/// Subject for a room: `<prefix>.<room>`
///
/// Rooms must be a single subject token: non-empty, with no `.`, `*`, `>`
/// or whitespace.
pub fn room_subject(prefix: &str, room: &str) -> Result<String> {
    validate_room(room)?;
    Ok(format!("{}.{}", prefix, room))
}

/// Reject room names that cannot be a single subject token
pub fn validate_room(room: &str) -> Result<()> {
    let invalid = room.is_empty()
        || room
            .chars()
            .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace());
    if invalid {
        return Err(Error::InvalidRoom(room.to_string()));
    }
    Ok(())
}
