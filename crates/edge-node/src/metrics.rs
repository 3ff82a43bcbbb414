use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use edge_dpos::LivenessView;

/// Sliding window for the transactions-per-second figure.
pub const TPS_WINDOW_SECONDS: f64 = 10.0;

/// How many recent block/consensus intervals the dashboards keep.
pub const HISTORY_LIMIT: usize = 20;

/// The heartbeat payload every node publishes on the `metrics` topic, and
/// the per-node record this registry stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeMetrics {
    pub node_id: String,
    pub timestamp: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub temperature: f64,
    pub power_usage: f64,
    pub block_count: u64,
    pub pending_transactions: u64,
    pub current_stake: f64,
    pub all_validators: BTreeMap<String, f64>,
    pub current_network_validator: Option<String>,
}

/// Per-node metrics plus the rolling figures the node exposes over HTTP.
///
/// This is also the liveness source: the receipt time of each node's last
/// metrics message is what the DPoS engine filters delegates by.
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    local_node_id: String,
    all_nodes: BTreeMap<String, NodeMetrics>,
    transaction_events: VecDeque<f64>,
    block_interval_history: Vec<f64>,
    consensus_time_history: Vec<f64>,
    network_validators: BTreeMap<String, f64>,
    current_network_validator: Option<String>,
}

impl MetricsRegistry {
    pub fn new(local_node_id: &str) -> Self {
        Self {
            local_node_id: local_node_id.to_string(),
            all_nodes: BTreeMap::new(),
            transaction_events: VecDeque::new(),
            block_interval_history: Vec::new(),
            consensus_time_history: Vec::new(),
            network_validators: BTreeMap::new(),
            current_network_validator: None,
        }
    }

    /// Store a node's metrics record.  The stored timestamp is the local
    /// receipt time, so liveness reflects when WE last heard from the node,
    /// not what its clock claimed.
    pub fn record_node_metrics(&mut self, mut metrics: NodeMetrics, now: f64) {
        if !metrics.all_validators.is_empty() {
            self.network_validators = metrics.all_validators.clone();
        }
        if metrics.current_network_validator.is_some() {
            self.current_network_validator = metrics.current_network_validator.clone();
        }

        metrics.timestamp = now;
        self.all_nodes.insert(metrics.node_id.clone(), metrics);
    }

    /// Mark a node as just-seen without a full metrics record.  Used at
    /// startup so the configured validators begin live.
    pub fn seed_liveness(&mut self, node_id: &str, now: f64) {
        self.all_nodes
            .entry(node_id.to_string())
            .or_insert_with(|| NodeMetrics {
                node_id: node_id.to_string(),
                ..NodeMetrics::default()
            })
            .timestamp = now;
    }

    /// Snapshot the last-seen map for the DPoS engine.
    pub fn liveness_view(&self) -> LivenessView {
        let mut view = LivenessView::new();
        for (node_id, metrics) in &self.all_nodes {
            view.record(node_id, metrics.timestamp);
        }
        view
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeMetrics> {
        self.all_nodes.get(node_id)
    }

    /// Record `count` fresh transaction sightings at `now` for TPS.
    pub fn record_transactions(&mut self, count: usize, now: f64) {
        for _ in 0..count {
            self.transaction_events.push_back(now);
        }
        self.evict_old_events(now);
    }

    fn evict_old_events(&mut self, now: f64) {
        let cutoff = now - TPS_WINDOW_SECONDS;
        while self
            .transaction_events
            .front()
            .is_some_and(|seen| *seen < cutoff)
        {
            self.transaction_events.pop_front();
        }
    }

    /// Transactions per second over the rolling window.
    pub fn tps(&mut self, now: f64) -> f64 {
        self.evict_old_events(now);

        let (Some(first), Some(last)) = (
            self.transaction_events.front().copied(),
            self.transaction_events.back().copied(),
        ) else {
            return 0.0;
        };

        let mut span = last - first;
        if span == 0.0 {
            span = TPS_WINDOW_SECONDS;
        }
        let span = span.min(TPS_WINDOW_SECONDS).max(1e-6);
        self.transaction_events.len() as f64 / span
    }

    pub fn record_block_interval(&mut self, seconds: f64) {
        push_bounded(&mut self.block_interval_history, seconds);
    }

    pub fn record_consensus_time(&mut self, seconds: f64) {
        push_bounded(&mut self.consensus_time_history, seconds);
    }

    pub fn average_block_interval(&self) -> f64 {
        average(&self.block_interval_history)
    }

    pub fn average_consensus_time(&self) -> f64 {
        average(&self.consensus_time_history)
    }

    pub fn network_validators(&self) -> &BTreeMap<String, f64> {
        &self.network_validators
    }

    pub fn current_network_validator(&self) -> Option<&str> {
        self.current_network_validator.as_deref()
    }

    /// The JSON snapshot served by `GET /metrics/node`.
    pub fn snapshot(&mut self, now: f64) -> Value {
        serde_json::json!({
            "node_id": self.local_node_id,
            "tps": self.tps(now),
            "block_interval_avg": self.average_block_interval(),
            "consensus_time_avg": self.average_consensus_time(),
            "network_validators": self.network_validators,
            "current_network_validator": self.current_network_validator,
            "nodes": self.all_nodes,
        })
    }
}

fn push_bounded(history: &mut Vec<f64>, value: f64) {
    history.push(value);
    if history.len() > HISTORY_LIMIT {
        history.remove(0);
    }
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_time_drives_liveness() {
        let mut registry = MetricsRegistry::new("node_a");
        registry.record_node_metrics(
            NodeMetrics {
                node_id: "node_b".into(),
                timestamp: 5.0, // the sender's clock is ignored
                ..NodeMetrics::default()
            },
            1000.0,
        );

        let view = registry.liveness_view();
        assert_eq!(view.last_seen("node_b"), Some(1000.0));
    }

    #[test]
    fn tps_window_evicts_old_events() {
        let mut registry = MetricsRegistry::new("node_a");
        registry.record_transactions(5, 100.0);
        registry.record_transactions(5, 104.0);

        assert!(registry.tps(105.0) > 0.0);

        // Eleven seconds later the first burst is gone.
        registry.record_transactions(1, 111.0);
        let view_len = registry.transaction_events.len();
        assert_eq!(view_len, 6);

        // And far in the future everything is evicted.
        assert_eq!(registry.tps(1000.0), 0.0);
    }

    #[test]
    fn tps_for_a_single_burst_uses_the_full_window() {
        let mut registry = MetricsRegistry::new("node_a");
        registry.record_transactions(20, 100.0);
        // All events share one timestamp: rate is spread over the window.
        assert_eq!(registry.tps(100.0), 20.0 / TPS_WINDOW_SECONDS);
    }

    #[test]
    fn histories_are_bounded() {
        let mut registry = MetricsRegistry::new("node_a");
        for i in 0..(HISTORY_LIMIT + 10) {
            registry.record_block_interval(i as f64);
        }
        assert_eq!(registry.block_interval_history.len(), HISTORY_LIMIT);
        // The oldest entries fell off the front.
        assert_eq!(registry.block_interval_history[0], 10.0);
    }

    #[test]
    fn validator_view_follows_announcements() {
        let mut registry = MetricsRegistry::new("node_a");
        registry.record_node_metrics(
            NodeMetrics {
                node_id: "node_b".into(),
                all_validators: BTreeMap::from([("node_b".to_string(), 700.0)]),
                current_network_validator: Some("node_b".into()),
                ..NodeMetrics::default()
            },
            1000.0,
        );

        assert_eq!(registry.network_validators().get("node_b"), Some(&700.0));
        assert_eq!(registry.current_network_validator(), Some("node_b"));
    }

    #[test]
    fn seeding_marks_a_node_live_without_metrics() {
        let mut registry = MetricsRegistry::new("node_a");
        registry.seed_liveness("node_c", 500.0);
        assert!(registry.liveness_view().is_live("node_c", 510.0, 60.0));
    }
}
