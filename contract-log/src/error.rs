//! Error types for the contract log

use thiserror::Error;

/// Result type for contract log operations
pub type Result<T> = std::result::Result<T, Error>;

/// Contract log errors
#[derive(Error, Debug)]
pub enum Error {
    /// Entry arrived for a contract we are not expecting to hear from
    #[error("Contract not whitelisted: {0}")]
    NotWhitelisted(String),

    /// Computed hash does not match the hash the entry was delivered with
    #[error("Integrity error: expected hash {expected}, computed {actual}")]
    Integrity {
        /// Hash the entry claimed
        expected: String,
        /// Hash computed from the entry content
        actual: String,
    },

    /// Contract-creation entry that declares a parent
    #[error("Root entry {entry_type} has non-null parentHash {parent_hash}")]
    MalformedRoot {
        /// Declared entry type
        entry_type: String,
        /// Offending parent hash
        parent_hash: String,
    },

    /// Type tag missing from the registry
    #[error("Unknown entry type: {0}")]
    UnknownEntryType(String),

    /// Type tag registered twice
    #[error("Entry type already registered: {0}")]
    DuplicateEntryType(String),

    /// No materialized contract under this id
    #[error("Contract not found: {0}")]
    ContractNotFound(String),

    /// No log entry under this (contract, hash) pair
    #[error("Log entry not found: {contract_id}/{hash}")]
    LogEntryNotFound {
        /// Contract the entry was looked up under
        contract_id: String,
        /// Entry hash
        hash: String,
    },

    /// The (contract, hash) pair is already in the log
    #[error("Duplicate log entry: {contract_id}/{hash}")]
    DuplicateEntry {
        /// Contract the entry was appended to
        contract_id: String,
        /// Entry hash
        hash: String,
    },

    /// Entry content is structurally invalid for its type
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    /// Value could not be serialized for hashing or storage
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Subscription channel error
    #[error("Channel error: {0}")]
    Channel(#[from] message_bus::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short label used for metrics and structured logs
    pub fn reason(&self) -> &'static str {
        match self {
            Error::NotWhitelisted(_) => "not_whitelisted",
            Error::Integrity { .. } => "integrity",
            Error::MalformedRoot { .. } => "malformed_root",
            Error::UnknownEntryType(_) => "unknown_entry_type",
            Error::DuplicateEntryType(_) => "duplicate_entry_type",
            Error::ContractNotFound(_) => "contract_not_found",
            Error::LogEntryNotFound { .. } => "log_entry_not_found",
            Error::DuplicateEntry { .. } => "duplicate_entry",
            Error::InvalidEntry(_) => "invalid_entry",
            Error::Encoding(_) => "encoding",
            Error::Storage(_) => "storage",
            Error::Concurrency(_) => "concurrency",
            Error::Channel(_) => "channel",
            Error::Metrics(_) => "metrics",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_message_names_both_hashes() {
        let err = Error::Integrity {
            expected: "zA".to_string(),
            actual: "zB".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("zA"));
        assert!(msg.contains("zB"));
        assert_eq!(err.reason(), "integrity");
    }
}
