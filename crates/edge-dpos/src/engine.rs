use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use edge_ledger::Block;
use edge_merkle::MerkleTree;

use crate::{error::ValidationError, liveness::LivenessView};

/// Tunables for the DPoS engine.  Defaults mirror the network profile this
/// chain ships with: 3 s blocks, a 21-slot delegate roster, a 5 W energy
/// admission ceiling, and a 60 s liveness horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DposConfig {
    pub max_validators: usize,
    pub block_time: f64,
    pub energy_threshold: f64,
    pub liveness_threshold: f64,
    pub delegate_update_interval: f64,
    pub checkpoint_interval: u64,
}

impl Default for DposConfig {
    fn default() -> Self {
        Self {
            max_validators: 21,
            block_time: 3.0,
            energy_threshold: 5.0,
            liveness_threshold: 60.0,
            delegate_update_interval: 300.0,
            checkpoint_interval: 100,
        }
    }
}

/// A snapshot of consensus state captured at a checkpoint height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub block_height: u64,
    pub delegates: Vec<String>,
    pub validators: BTreeMap<String, f64>,
    pub timestamp: f64,
}

/// The delegated proof-of-stake engine.
///
/// Holds the validator → stake roster, derives the ordered delegate list
/// from it, elects the leader for a given reference block, and validates
/// incoming blocks against the schedule.  Every time-dependent operation
/// takes `now` explicitly so that elections are reproducible across nodes
/// and under test.
#[derive(Debug, Clone)]
pub struct DposEngine {
    validators: BTreeMap<String, f64>,
    delegates: Vec<String>,
    block_time: f64,
    max_validators: usize,
    energy_threshold: f64,
    liveness_threshold: f64,
    delegate_update_interval: f64,
    last_delegate_update: f64,
    checkpoint_interval: u64,
    checkpoints: BTreeMap<u64, Checkpoint>,
}

impl Default for DposEngine {
    fn default() -> Self {
        Self::new(DposConfig::default())
    }
}

impl DposEngine {
    pub fn new(config: DposConfig) -> Self {
        Self {
            validators: BTreeMap::new(),
            delegates: Vec::new(),
            block_time: config.block_time,
            max_validators: config.max_validators,
            energy_threshold: config.energy_threshold,
            liveness_threshold: config.liveness_threshold,
            delegate_update_interval: config.delegate_update_interval,
            last_delegate_update: 0.0,
            checkpoint_interval: config.checkpoint_interval,
            checkpoints: BTreeMap::new(),
        }
    }

    // ── Roster management ───────────────────────────────────────────────────

    /// Insert or update a validator.  Fails only when the roster is full and
    /// `node_id` is not already a member.
    pub fn add_validator(&mut self, node_id: &str, stake: f64) -> bool {
        if !self.validators.contains_key(node_id) && self.validators.len() >= self.max_validators {
            return false;
        }
        self.validators.insert(node_id.to_string(), stake);
        true
    }

    /// Remove a validator and force a delegate recomputation.
    pub fn remove_validator(&mut self, node_id: &str, now: f64) -> bool {
        if self.validators.remove(node_id).is_none() {
            return false;
        }
        self.recompute_delegates(true, now);
        true
    }

    /// Update an existing validator's stake and force a delegate
    /// recomputation.
    pub fn update_stake(&mut self, node_id: &str, new_stake: f64, now: f64) -> bool {
        let Some(stake) = self.validators.get_mut(node_id) else {
            return false;
        };
        *stake = new_stake;
        self.recompute_delegates(true, now);
        true
    }

    pub fn validators(&self) -> &BTreeMap<String, f64> {
        &self.validators
    }

    pub fn stake_of(&self, node_id: &str) -> f64 {
        self.validators.get(node_id).copied().unwrap_or(0.0)
    }

    pub fn delegates(&self) -> &[String] {
        &self.delegates
    }

    pub fn block_time(&self) -> f64 {
        self.block_time
    }

    pub fn energy_threshold(&self) -> f64 {
        self.energy_threshold
    }

    pub fn liveness_threshold(&self) -> f64 {
        self.liveness_threshold
    }

    // ── Delegate schedule ───────────────────────────────────────────────────

    /// Recompute the delegate list: validators sorted by stake descending
    /// (ties broken by id ascending), truncated to `max_validators`.
    ///
    /// Throttled by `delegate_update_interval` unless forced; idempotent
    /// under an unchanged roster either way.
    pub fn recompute_delegates(&mut self, force: bool, now: f64) {
        if !force && now - self.last_delegate_update < self.delegate_update_interval {
            return;
        }

        let mut ranked: Vec<(&String, f64)> =
            self.validators.iter().map(|(id, stake)| (id, *stake)).collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });

        self.delegates = ranked
            .into_iter()
            .take(self.max_validators)
            .map(|(id, _)| id.clone())
            .collect();
        self.last_delegate_update = now;

        debug!(delegates = ?self.delegates, "delegate schedule recomputed");
    }

    /// Elect the leader for the slot after `ref_index` (the index of the
    /// last committed block; −1 for an empty chain).
    ///
    /// Delegates absent from the liveness view, or stale within it, are
    /// filtered out; with no view at all the full schedule is considered
    /// live.  The surviving delegates are sorted ascending by id so the
    /// slot formula `(ref_index + 1) mod len` is deterministic across
    /// nodes regardless of roster insertion order.
    pub fn current_validator(
        &self,
        ref_index: i64,
        liveness: Option<&LivenessView>,
        now: f64,
    ) -> Option<String> {
        if self.delegates.is_empty() {
            return None;
        }

        let mut active: Vec<&String> = match liveness {
            Some(view) => self
                .delegates
                .iter()
                .filter(|id| view.is_live(id, now, self.liveness_threshold))
                .collect(),
            None => self.delegates.iter().collect(),
        };
        active.sort();

        if active.is_empty() {
            return None;
        }

        let slot = (ref_index + 1).rem_euclid(active.len() as i64) as usize;
        Some(active[slot].clone())
    }

    /// Whether the block-time window since `last_timestamp` has elapsed.
    pub fn is_time_to_propose(&self, last_timestamp: f64, now: f64) -> bool {
        now >= last_timestamp + self.block_time
    }

    // ── Block validation ────────────────────────────────────────────────────

    /// Validate `block` against the DPoS schedule, chain monotonicity, the
    /// freshness window, Merkle integrity, and the energy admission bound.
    ///
    /// `sync_tolerance` relaxes only the previous-timestamp comparison and
    /// is zero outside catch-up.  `prev_index` is −1 when validating
    /// against an empty chain.
    pub fn validate_block(
        &self,
        block: &Block,
        power_usage: f64,
        prev_timestamp: f64,
        prev_index: i64,
        sync_tolerance: f64,
        liveness: Option<&LivenessView>,
        now: f64,
    ) -> Result<(), ValidationError> {
        if !self.delegates.iter().any(|d| d == &block.validator) {
            return Err(ValidationError::UnknownValidator {
                validator: block.validator.clone(),
            });
        }

        let expected = self.current_validator(prev_index, liveness, now);
        if expected.as_deref() != Some(block.validator.as_str()) {
            return Err(ValidationError::WrongProposer {
                got: block.validator.clone(),
                expected,
            });
        }

        if block.timestamp <= prev_timestamp - sync_tolerance {
            return Err(ValidationError::StaleTimestamp {
                timestamp: block.timestamp,
                previous: prev_timestamp,
                tolerance: sync_tolerance,
            });
        }

        if (block.index as i64) <= prev_index {
            return Err(ValidationError::NonMonotonicIndex {
                index: block.index,
                previous: prev_index,
            });
        }

        if (now - block.timestamp).abs() > self.block_time {
            return Err(ValidationError::OutsideFreshnessWindow {
                timestamp: block.timestamp,
                now,
                window: self.block_time,
            });
        }

        self.validate_commitment(block)?;

        if power_usage > self.energy_threshold {
            return Err(ValidationError::EnergyExceeded {
                usage: power_usage,
                threshold: self.energy_threshold,
            });
        }

        Ok(())
    }

    /// Merkle integrity alone: the root must be present, reproduce from the
    /// committed transactions, and cover exactly one leaf per transaction.
    pub fn validate_commitment(&self, block: &Block) -> Result<(), ValidationError> {
        if block.merkle_root.is_empty() {
            return Err(ValidationError::MissingMerkleRoot);
        }

        let tree = MerkleTree::new(&block.transactions)
            .map_err(|e| ValidationError::Merkle(e.to_string()))?;

        if tree.root_hex() != block.merkle_root {
            return Err(ValidationError::MerkleMismatch);
        }
        if tree.leaf_count() != block.transactions.len() {
            return Err(ValidationError::LeafCountMismatch {
                leaves: tree.leaf_count(),
                transactions: block.transactions.len(),
            });
        }

        Ok(())
    }

    /// Adapt the block interval to reported network load: tighten under
    /// pressure, relax when idle, clamped to [1, 5] seconds.
    pub fn adjust_block_time(&mut self, network_load: f64) {
        if network_load > 0.8 {
            self.block_time = (self.block_time - 0.5).max(1.0);
        } else if network_load < 0.3 {
            self.block_time = (self.block_time + 0.5).min(5.0);
        }
    }

    // ── Checkpoints ─────────────────────────────────────────────────────────

    /// Snapshot delegates and validators when `height` lands on the
    /// checkpoint interval.  Returns whether a checkpoint was taken.
    pub fn checkpoint(&mut self, height: u64, now: f64) -> bool {
        if height % self.checkpoint_interval != 0 {
            return false;
        }

        self.checkpoints.insert(
            height,
            Checkpoint {
                block_height: height,
                delegates: self.delegates.clone(),
                validators: self.validators.clone(),
                timestamp: now,
            },
        );
        debug!(height, "consensus checkpoint captured");
        true
    }

    /// Replace delegates and validators from the checkpoint at `height`.
    pub fn restore(&mut self, height: u64) -> bool {
        let Some(checkpoint) = self.checkpoints.get(&height) else {
            return false;
        };
        self.delegates = checkpoint.delegates.clone();
        self.validators = checkpoint.validators.clone();
        debug!(height, "consensus state restored from checkpoint");
        true
    }

    pub fn latest_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.values().next_back()
    }

    pub fn checkpoint_heights(&self) -> Vec<u64> {
        self.checkpoints.keys().copied().collect()
    }
}
