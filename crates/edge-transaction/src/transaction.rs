use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::canonical::{hash_value, to_canonical_json};
use crate::error::TransactionError;

/// An opaque record carried on the EdgeChain network.
///
/// Transactions are JSON objects; the consensus layer never interprets their
/// payload beyond two advisory fields (`type` and `timestamp`).  A
/// transaction's consensus-visible identity is the SHA-256 of its canonical
/// JSON form, which is what the Merkle tree commits to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transaction {
    record: Map<String, Value>,
}

impl Transaction {
    /// Wrap an existing JSON object as a transaction.
    pub fn new(record: Map<String, Value>) -> Self {
        Self { record }
    }

    /// Interpret an arbitrary JSON value as a transaction.  Anything other
    /// than an object is malformed and dropped at the boundary.
    pub fn from_value(value: Value) -> Result<Self, TransactionError> {
        match value {
            Value::Object(record) => Ok(Self { record }),
            _ => Err(TransactionError::NotAnObject),
        }
    }

    /// Build the well-known `stake_distribution` record carried by genesis.
    pub fn stake_distribution(stakes: &BTreeMap<String, f64>, timestamp: f64) -> Self {
        let mut record = Map::new();
        record.insert("type".into(), Value::String("stake_distribution".into()));
        record.insert(
            "data".into(),
            Value::Object(
                stakes
                    .iter()
                    .map(|(id, stake)| (id.clone(), serde_json::json!(stake)))
                    .collect(),
            ),
        );
        record.insert("timestamp".into(), serde_json::json!(timestamp));
        Self { record }
    }

    /// Wrap a node's published metrics as a `metrics` transaction so the
    /// reading becomes part of the committed history.
    pub fn metrics(node_id: &str, metrics: Value, timestamp: f64) -> Self {
        let mut record = Map::new();
        record.insert("type".into(), Value::String("metrics".into()));
        record.insert("node_id".into(), Value::String(node_id.into()));
        record.insert("metrics".into(), metrics);
        record.insert("timestamp".into(), serde_json::json!(timestamp));
        Self { record }
    }

    /// The underlying JSON object.
    pub fn record(&self) -> &Map<String, Value> {
        &self.record
    }

    /// Field lookup on the raw record.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.record.get(key)
    }

    /// The advisory `type` tag, when present.
    pub fn tx_type(&self) -> Option<&str> {
        self.record.get("type").and_then(Value::as_str)
    }

    /// The advisory `timestamp` field, when present and numeric.
    pub fn timestamp(&self) -> Option<f64> {
        self.record.get("timestamp").and_then(Value::as_f64)
    }

    /// Canonical JSON form of this record (sorted keys, compact).
    pub fn canonical_json(&self) -> Result<String, TransactionError> {
        to_canonical_json(&self.record)
    }

    /// Consensus identity: SHA-256 over the canonical JSON form.
    pub fn hash_hex(&self) -> Result<String, TransactionError> {
        hash_value(&self.record)
    }

    /// Consume the transaction and return the raw JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.record)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn tx(value: Value) -> Transaction {
        Transaction::from_value(value).unwrap()
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert!(Transaction::from_value(json!([1, 2, 3])).is_err());
        assert!(Transaction::from_value(json!("just a string")).is_err());
        assert!(Transaction::from_value(json!(42)).is_err());
    }

    #[test]
    fn hash_is_deterministic_for_same_record() {
        let a = tx(json!({"type": "transfer", "amount": 5}));
        let b = tx(json!({"amount": 5, "type": "transfer"}));
        assert_eq!(a.hash_hex().unwrap(), b.hash_hex().unwrap());
    }

    #[test]
    fn different_records_produce_different_hashes() {
        let a = tx(json!({"amount": 5}));
        let b = tx(json!({"amount": 6}));
        assert_ne!(a.hash_hex().unwrap(), b.hash_hex().unwrap());
    }

    #[test]
    fn advisory_fields_are_exposed() {
        let t = tx(json!({"type": "metrics", "timestamp": 12.5, "extra": true}));
        assert_eq!(t.tx_type(), Some("metrics"));
        assert_eq!(t.timestamp(), Some(12.5));
        assert!(t.get("extra").is_some());
    }

    #[test]
    fn stake_distribution_record_shape() {
        let stakes = BTreeMap::from([("node_a".to_string(), 1000.0), ("node_b".to_string(), 500.0)]);
        let t = Transaction::stake_distribution(&stakes, 1_717_777_777.0);
        assert_eq!(t.tx_type(), Some("stake_distribution"));
        assert_eq!(t.get("data").unwrap()["node_a"], json!(1000.0));
        assert_eq!(t.get("data").unwrap()["node_b"], json!(500.0));
    }

    #[test]
    fn serde_round_trip_is_transparent() {
        let t = tx(json!({"type": "transfer", "nested": {"a": [1, 2]}}));
        let wire = serde_json::to_value(&t).unwrap();
        assert_eq!(wire, json!({"type": "transfer", "nested": {"a": [1, 2]}}));
        let back: Transaction = serde_json::from_value(wire).unwrap();
        assert_eq!(back, t);
    }
}
