//! Local log store using RocksDB
//!
//! # Column Families
//!
//! - `log` - Append-only entries (key: contract_id || 0x00 || hash)
//! - `sequence` - Admission order (key: contract_id || 0x00 || seq BE, value: hash)
//! - `meta` - Per-contract log length (key: contract_id)
//! - `settings` - Client settings snapshot (single key)
//!
//! Appends read the current length before writing, so the store expects a
//! single writer; the engine actor is that writer.

use crate::{
    error::{Error, Result},
    types::{Entry, EntryRecord, Settings},
    Config,
};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBCompressionType, Direction, IteratorMode,
    Options, WriteBatch, DB,
};
use std::sync::Arc;

/// Column family names
const CF_LOG: &str = "log";
const CF_SEQUENCE: &str = "sequence";
const CF_META: &str = "meta";
const CF_SETTINGS: &str = "settings";

const SETTINGS_KEY: &[u8] = b"settings";
const KEY_SEPARATOR: u8 = 0x00;

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_LOG, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_SEQUENCE, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_META, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_SETTINGS, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened contract log store");

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_log() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(DBCompressionType::Zstd);
        opts
    }

    fn cf_options_index() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Log operations

    /// Append an entry to a contract's log
    ///
    /// Returns the entry's position in the contract log. An existing
    /// `(contract_id, hash)` pair is never overwritten: the call fails with
    /// [`Error::DuplicateEntry`] and writes nothing.
    pub fn add_log_entry(&self, contract_id: &str, entry: &Entry) -> Result<u64> {
        validate_contract_id(contract_id)?;

        if self.contains(contract_id, entry.to_hash())? {
            return Err(Error::DuplicateEntry {
                contract_id: contract_id.to_string(),
                hash: entry.to_hash().to_string(),
            });
        }

        let seq = self.log_len(contract_id)?;
        let mut batch = WriteBatch::default();

        let cf_log = self.cf_handle(CF_LOG)?;
        batch.put_cf(
            &cf_log,
            Self::log_key(contract_id, entry.to_hash()),
            serde_json::to_vec(entry.record())?,
        );

        let cf_sequence = self.cf_handle(CF_SEQUENCE)?;
        batch.put_cf(
            &cf_sequence,
            Self::sequence_key(contract_id, seq),
            entry.to_hash().as_bytes(),
        );

        let cf_meta = self.cf_handle(CF_META)?;
        batch.put_cf(&cf_meta, contract_id.as_bytes(), (seq + 1).to_be_bytes());

        // Atomic commit
        self.db.write(batch)?;

        tracing::debug!(
            contract_id = %contract_id,
            hash = %entry.to_hash(),
            entry_type = %entry.entry_type(),
            seq,
            "Log entry appended"
        );

        Ok(seq)
    }

    /// Get an entry by contract and hash
    ///
    /// The stored record is re-hashed on the way out, so on-disk corruption
    /// surfaces as [`Error::Integrity`].
    pub fn get_log_entry(&self, contract_id: &str, hash: &str) -> Result<Entry> {
        let cf = self.cf_handle(CF_LOG)?;
        let value = self
            .db
            .get_cf(&cf, Self::log_key(contract_id, hash))?
            .ok_or_else(|| Error::LogEntryNotFound {
                contract_id: contract_id.to_string(),
                hash: hash.to_string(),
            })?;

        let record: EntryRecord = serde_json::from_slice(&value)?;
        Entry::from_object(record, hash)
    }

    /// Whether the log holds this entry
    pub fn contains(&self, contract_id: &str, hash: &str) -> Result<bool> {
        let cf = self.cf_handle(CF_LOG)?;
        Ok(self.db.get_cf(&cf, Self::log_key(contract_id, hash))?.is_some())
    }

    /// Number of entries in a contract's log
    pub fn log_len(&self, contract_id: &str) -> Result<u64> {
        let cf = self.cf_handle(CF_META)?;
        match self.db.get_cf(&cf, contract_id.as_bytes())? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    Error::Storage(format!("Corrupt log length for {}", contract_id))
                })?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    /// Hash of the most recently appended entry
    pub fn log_head(&self, contract_id: &str) -> Result<Option<String>> {
        let len = self.log_len(contract_id)?;
        if len == 0 {
            return Ok(None);
        }

        let cf = self.cf_handle(CF_SEQUENCE)?;
        let value = self
            .db
            .get_cf(&cf, Self::sequence_key(contract_id, len - 1))?
            .ok_or_else(|| Error::Storage(format!("Missing sequence {} for {}", len - 1, contract_id)))?;

        Ok(Some(Self::decode_hash_value(&value)?))
    }

    /// All entries of a contract, in admission order
    pub fn get_contract_log(&self, contract_id: &str) -> Result<Vec<Entry>> {
        let cf = self.cf_handle(CF_SEQUENCE)?;
        let prefix = Self::contract_prefix(contract_id);

        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix.as_slice(), Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let hash = Self::decode_hash_value(&value)?;
            entries.push(self.get_log_entry(contract_id, &hash)?);
        }

        Ok(entries)
    }

    // Settings operations

    /// Persist the settings snapshot (last write wins)
    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        let cf = self.cf_handle(CF_SETTINGS)?;
        self.db.put_cf(&cf, SETTINGS_KEY, serde_json::to_vec(settings)?)?;
        Ok(())
    }

    /// Load the settings snapshot, if one was ever saved
    pub fn load_settings(&self) -> Result<Option<Settings>> {
        let cf = self.cf_handle(CF_SETTINGS)?;
        match self.db.get_cf(&cf, SETTINGS_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    // Key helpers

    fn contract_prefix(contract_id: &str) -> Vec<u8> {
        let mut key = contract_id.as_bytes().to_vec();
        key.push(KEY_SEPARATOR);
        key
    }

    fn log_key(contract_id: &str, hash: &str) -> Vec<u8> {
        let mut key = Self::contract_prefix(contract_id);
        key.extend_from_slice(hash.as_bytes());
        key
    }

    fn sequence_key(contract_id: &str, seq: u64) -> Vec<u8> {
        let mut key = Self::contract_prefix(contract_id);
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    fn decode_hash_value(value: &[u8]) -> Result<String> {
        String::from_utf8(value.to_vec())
            .map_err(|e| Error::Storage(format!("Corrupt sequence value: {}", e)))
    }

    // Statistics

    /// Get storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        let cf_log = self.cf_handle(CF_LOG)?;
        let total_entries = self
            .db
            .property_int_value_cf(&cf_log, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);

        let cf_meta = self.cf_handle(CF_META)?;
        let mut total_contracts = 0u64;
        for item in self.db.iterator_cf(&cf_meta, IteratorMode::Start) {
            item?;
            total_contracts += 1;
        }

        Ok(StorageStats {
            total_entries,
            total_contracts,
        })
    }
}

fn validate_contract_id(contract_id: &str) -> Result<()> {
    if contract_id.is_empty() || contract_id.as_bytes().contains(&KEY_SEPARATOR) {
        return Err(Error::InvalidEntry(format!(
            "Invalid contract id {:?}",
            contract_id
        )));
    }
    Ok(())
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Approximate number of log entries across all contracts
    pub total_entries: u64,
    /// Number of contracts with at least one entry
    pub total_contracts: u64,
}
