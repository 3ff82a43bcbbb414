use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Last-seen timestamps per node, fed by inbound metrics messages.
///
/// A node is live at time `now` iff `now - last_seen < threshold`.  The
/// view is a snapshot type: the node's metrics registry builds one on
/// demand and hands it to the DPoS engine, which never holds a reference
/// to live shared state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LivenessView {
    last_seen: BTreeMap<String, f64>,
}

impl LivenessView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `node_id` was observed at `seen_at`.  Observations only
    /// move forward; a delayed message never ages a node.
    pub fn record(&mut self, node_id: &str, seen_at: f64) {
        let entry = self.last_seen.entry(node_id.to_string()).or_insert(seen_at);
        if seen_at > *entry {
            *entry = seen_at;
        }
    }

    pub fn last_seen(&self, node_id: &str) -> Option<f64> {
        self.last_seen.get(node_id).copied()
    }

    /// Whether `node_id` reported within `threshold` seconds before `now`.
    pub fn is_live(&self, node_id: &str, now: f64, threshold: f64) -> bool {
        match self.last_seen.get(node_id) {
            Some(seen) => now - seen < threshold,
            None => false,
        }
    }

    /// All node ids currently considered live, ascending.
    pub fn live_nodes(&self, now: f64, threshold: f64) -> Vec<String> {
        self.last_seen
            .iter()
            .filter(|(_, seen)| now - **seen < threshold)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}
