use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::TransactionError;

/// The hash of nothing: 64 zero characters.  Used as the Merkle root of an
/// empty transaction set and as the previous-hash of the genesis block.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Serialise `value` into its canonical JSON form: object keys sorted
/// lexicographically at every nesting level, no insignificant whitespace.
///
/// Every consensus-visible hash in the protocol is computed over this form,
/// so two nodes agree on a hash iff they agree on these bytes.  The value is
/// routed through [`serde_json::Value`], whose object representation keeps
/// keys ordered, which makes the compact encoding canonical by construction.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String, TransactionError> {
    let value = serde_json::to_value(value)?;
    Ok(value.to_string())
}

/// Lowercase hex-encoded SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SHA-256 over the canonical JSON form of `value`.
pub fn hash_value<T: Serialize>(value: &T) -> Result<String, TransactionError> {
    Ok(sha256_hex(to_canonical_json(value)?.as_bytes()))
}
