use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use edge_merkle::{find_index, verify_proof, MerkleTree, ProofNode};
use edge_transaction::{hash_value, Transaction};

use crate::error::LedgerError;

/// A single block in the EdgeChain ledger.
///
/// The header hash covers `{index, timestamp, merkle_root, previous_hash,
/// validator, energy_metrics}` in canonical JSON form; it is a pure function
/// of those fields and is recomputed whenever a block crosses the wire.
/// `merkle_root` is likewise a pure function of `transactions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Sequential block height (genesis = 0).
    pub index: u64,

    /// Real seconds since epoch at sealing time, strictly monotonic across
    /// the chain.
    pub timestamp: f64,

    /// All transactions committed by this block.  May be empty.
    pub transactions: Vec<Transaction>,

    /// Hex-encoded hash of the previous block; 64 zeros for genesis.
    pub previous_hash: String,

    /// Node id of the delegate that sealed the block (`"genesis"` for the
    /// genesis block).
    pub validator: String,

    /// Advisory energy readings captured at sealing time.  Not validated
    /// beyond the `power_usage` admission check.
    pub energy_metrics: BTreeMap<String, f64>,

    /// Hex-encoded Merkle root over `transactions`.
    pub merkle_root: String,

    /// Hex-encoded SHA-256 over the canonical header.
    pub hash: String,
}

impl Block {
    /// Seal a block: build the Merkle commitment over `transactions`, then
    /// derive the header hash.
    pub fn new(
        index: u64,
        timestamp: f64,
        transactions: Vec<Transaction>,
        previous_hash: String,
        validator: String,
        energy_metrics: BTreeMap<String, f64>,
    ) -> Result<Self, LedgerError> {
        let merkle_root = MerkleTree::new(&transactions)?.root_hex();

        let mut block = Self {
            index,
            timestamp,
            transactions,
            previous_hash,
            validator,
            energy_metrics,
            merkle_root,
            hash: String::new(),
        };
        block.hash = block.compute_hash()?;
        Ok(block)
    }

    /// Recompute the header hash from the current field values.
    pub fn compute_hash(&self) -> Result<String, LedgerError> {
        let header = serde_json::json!({
            "index": self.index,
            "timestamp": self.timestamp,
            "merkle_root": self.merkle_root,
            "previous_hash": self.previous_hash,
            "validator": self.validator,
            "energy_metrics": self.energy_metrics,
        });
        Ok(hash_value(&header)?)
    }

    /// Rebuild the Merkle tree over this block's transactions.  Cheap for
    /// the small per-block batches this network seals.
    pub fn tree(&self) -> Result<MerkleTree, LedgerError> {
        Ok(MerkleTree::new(&self.transactions)?)
    }

    /// Inclusion proof for the transaction at `index`; empty when out of
    /// range.
    pub fn proof(&self, index: usize) -> Result<Vec<ProofNode>, LedgerError> {
        Ok(self.tree()?.proof(index))
    }

    /// Verify that `tx` is committed by this block's Merkle root.
    pub fn verify_inclusion(&self, tx: &Transaction, proof: &[ProofNode]) -> bool {
        verify_proof(tx, proof, &self.merkle_root)
    }

    /// Position of `tx` inside this block, matched by canonical hash.
    pub fn transaction_index(&self, tx: &Transaction) -> Option<usize> {
        find_index(&self.transactions, tx)
    }

    /// The wire dictionary: every field, no live tree.
    pub fn to_wire(&self) -> Result<Value, LedgerError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Reconstruct a block from its wire dictionary.
    ///
    /// The Merkle tree is rebuilt and must reproduce the stored
    /// `merkle_root`, otherwise the block is malformed.  The header hash is
    /// always recomputed locally rather than trusted from the wire.
    pub fn from_wire(value: Value) -> Result<Self, LedgerError> {
        let mut block: Block = serde_json::from_value(value)?;

        let rebuilt = MerkleTree::new(&block.transactions)?.root_hex();
        if rebuilt != block.merkle_root {
            return Err(LedgerError::MerkleMismatch { index: block.index });
        }

        block.hash = block.compute_hash()?;
        Ok(block)
    }
}
