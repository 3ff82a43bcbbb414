use std::collections::BTreeMap;

use serde_json::Value;

use edge_transaction::{Transaction, ZERO_HASH};

use crate::{block::Block, error::LedgerError};

/// Fixed sealing time of the genesis block.  A constant so that every node
/// derives an identical genesis hash from the same stake table.
pub const GENESIS_TIMESTAMP: f64 = 1_717_777_777.0;

/// Validator id carried by the genesis block.
pub const GENESIS_VALIDATOR: &str = "genesis";

/// Build the deterministic genesis block for a given initial stake table.
///
/// The block commits a single `stake_distribution` transaction carrying the
/// id → stake map, links to the all-zero previous hash, and records zeroed
/// energy metrics.
pub fn genesis_block(initial_stakes: &BTreeMap<String, f64>) -> Result<Block, LedgerError> {
    let stake_tx = Transaction::stake_distribution(initial_stakes, GENESIS_TIMESTAMP);

    let energy_metrics: BTreeMap<String, f64> = [
        ("cpu_percent", 0.0),
        ("memory_percent", 0.0),
        ("temperature", 0.0),
        ("power_usage", 0.0),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    Block::new(
        0,
        GENESIS_TIMESTAMP,
        vec![stake_tx],
        ZERO_HASH.to_string(),
        GENESIS_VALIDATOR.to_string(),
        energy_metrics,
    )
}

/// Check that `block` is the genesis block for `initial_stakes`.
///
/// Only the deterministic fields participate: height, previous hash,
/// validator, and the stake-distribution transaction's `type` and `data`.
pub fn verify_genesis(block: &Block, initial_stakes: &BTreeMap<String, f64>) -> bool {
    let Some(first_tx) = block.transactions.first() else {
        return false;
    };

    let expected_data: Value = serde_json::json!(initial_stakes);

    block.index == 0
        && block.previous_hash == ZERO_HASH
        && block.validator == GENESIS_VALIDATOR
        && first_tx.tx_type() == Some("stake_distribution")
        && first_tx.get("data") == Some(&expected_data)
}

/// Extract the id → stake map committed by a genesis block, used to seed the
/// validator roster at startup.
pub fn stakes_from_genesis(block: &Block) -> Option<BTreeMap<String, f64>> {
    let data = block
        .transactions
        .iter()
        .find(|tx| tx.tx_type() == Some("stake_distribution"))?
        .get("data")?
        .as_object()?;

    data.iter()
        .map(|(id, stake)| stake.as_f64().map(|s| (id.clone(), s)))
        .collect()
}
