//! Content addressing for log entries
//!
//! Every hash in the system is a BLAKE3-256 digest wrapped in a multihash
//! envelope and rendered as base-58 text. Structured values are reduced to a
//! canonical JSON string first: `serde_json::Value` keeps object keys in a
//! `BTreeMap`, so two values that differ only in key insertion order hash the
//! same.

use crate::{Error, Result};
use multihash_codetable::{Code, MultihashDigest};
use serde::Serialize;

/// Multihash function code for BLAKE3
pub const BLAKE3_CODE: u8 = 0x1e;

/// Digest length in bytes
pub const DIGEST_LEN: usize = 32;

/// Hash a serializable value
///
/// The value is converted to canonical JSON before hashing, so a string is
/// hashed in its quoted JSON form; use [`hash_str`] to hash text as-is.
/// Fails with [`Error::Encoding`] if the value cannot be represented as JSON.
pub fn to_hash<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(hash_str(&canonical_json(value)?))
}

/// Hash a string that is already in its final textual form
pub fn hash_str(value: &str) -> String {
    hash_bytes(value.as_bytes())
}

/// Hash raw bytes
pub fn hash_bytes(data: &[u8]) -> String {
    let multihash = Code::Blake3_256.digest(data);
    bs58::encode(multihash.to_bytes()).into_string()
}

/// Canonical JSON rendering used as hash input
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&value)?)
}

/// Decode a hash string back into its raw digest
///
/// Rejects text that is not base-58, not a multihash, or not a BLAKE3-256
/// multihash.
pub fn decode_hash(hash: &str) -> Result<[u8; DIGEST_LEN]> {
    let bytes = bs58::decode(hash)
        .into_vec()
        .map_err(|e| Error::InvalidEntry(format!("Hash {} is not base-58: {}", hash, e)))?;

    match bytes.as_slice() {
        [code, len, digest @ ..]
            if *code == BLAKE3_CODE && *len as usize == DIGEST_LEN && digest.len() == DIGEST_LEN =>
        {
            let mut out = [0u8; DIGEST_LEN];
            out.copy_from_slice(digest);
            Ok(out)
        }
        _ => Err(Error::InvalidEntry(format!(
            "Hash {} is not a BLAKE3-256 multihash",
            hash
        ))),
    }
}
