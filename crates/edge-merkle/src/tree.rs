use edge_transaction::{sha256_hex, Transaction, ZERO_HASH};

use crate::{
    error::MerkleError,
    proof::{ProofNode, ProofPosition},
};

/// A binary Merkle tree over an ordered list of [`Transaction`]s.
///
/// Leaf hashes are the SHA-256 digests of each transaction's canonical JSON
/// form.  Parent hashes are SHA-256 over the concatenation of the two child
/// hex strings.  When a level has an odd number of nodes the rightmost node
/// is paired with itself.  The root of an empty transaction set is defined
/// to be [`ZERO_HASH`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MerkleTree {
    /// All levels of the tree, `levels[0]` = leaf hashes,
    /// `levels[last]` = single root hash.  Empty for an empty tree.
    levels: Vec<Vec<String>>,
}

fn hash_pair(left: &str, right: &str) -> String {
    sha256_hex(format!("{left}{right}").as_bytes())
}

/// Pad a level to even width by duplicating its last node.
fn pad_even(level: &mut Vec<String>) {
    if level.len() % 2 != 0 {
        let last = level
            .last()
            .cloned()
            .unwrap_or_else(|| ZERO_HASH.to_string());
        level.push(last);
    }
}

impl MerkleTree {
    /// Build a Merkle tree from `transactions`.  An empty slice yields the
    /// empty tree whose root is [`ZERO_HASH`].
    pub fn new(transactions: &[Transaction]) -> Result<Self, MerkleError> {
        if transactions.is_empty() {
            return Ok(Self { levels: Vec::new() });
        }

        let leaves: Vec<String> = transactions
            .iter()
            .map(|tx| tx.hash_hex().map_err(MerkleError::from))
            .collect::<Result<_, _>>()?;

        let mut levels = vec![leaves.clone()];
        let mut current = leaves;

        while current.len() > 1 {
            pad_even(&mut current);

            let parent_level: Vec<String> = current
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], &pair[1]))
                .collect();

            levels.push(parent_level.clone());
            current = parent_level;
        }

        Ok(Self { levels })
    }

    /// The hex-encoded Merkle root.
    pub fn root_hex(&self) -> String {
        self.levels
            .last()
            .and_then(|level| level.first())
            .cloned()
            .unwrap_or_else(|| ZERO_HASH.to_string())
    }

    /// Number of leaves (= committed transactions).
    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(Vec::len).unwrap_or(0)
    }

    /// Tree height: 0 for empty and single-leaf trees.
    pub fn height(&self) -> usize {
        self.levels.len().saturating_sub(1)
    }

    /// Leaf hashes in transaction order.
    pub fn leaves(&self) -> &[String] {
        self.levels.first().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Build the inclusion proof for the leaf at `index`, ordered from the
    /// leaf upward.  Out-of-range indices yield an empty proof, which can
    /// never verify against a non-trivial root.
    pub fn proof(&self, index: usize) -> Vec<ProofNode> {
        if index >= self.leaf_count() {
            return Vec::new();
        }

        let mut path = Vec::new();
        let mut position = index;

        for level in &self.levels[..self.levels.len().saturating_sub(1)] {
            // Mirror the padding applied while building parents so the
            // duplicated sibling shows up in the proof with its own hash.
            let mut padded = level.clone();
            pad_even(&mut padded);

            let (sibling, side) = if position % 2 == 0 {
                (position + 1, ProofPosition::Right)
            } else {
                (position - 1, ProofPosition::Left)
            };

            path.push(ProofNode {
                hash: padded[sibling].clone(),
                position: side,
            });

            position /= 2;
        }

        path
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use edge_transaction::hash_value;

    use crate::proof::{find_index, verify_proof};

    use super::*;

    fn tx(value: serde_json::Value) -> Transaction {
        Transaction::from_value(value).unwrap()
    }

    #[test]
    fn empty_set_has_zero_root() {
        let tree = MerkleTree::new(&[]).unwrap();
        assert_eq!(tree.root_hex(), ZERO_HASH);
        assert_eq!(tree.leaf_count(), 0);
        assert_eq!(tree.height(), 0);
    }

    #[test]
    fn no_proof_verifies_against_the_empty_root() {
        let tree = MerkleTree::new(&[]).unwrap();
        let stranger = tx(json!({"a": 1}));
        assert!(tree.proof(0).is_empty());
        assert!(!verify_proof(&stranger, &[], &tree.root_hex()));
    }

    #[test]
    fn single_transaction_root_equals_leaf_hash() {
        let single = tx(json!({"a": 1}));
        let tree = MerkleTree::new(std::slice::from_ref(&single)).unwrap();

        assert_eq!(tree.root_hex(), single.hash_hex().unwrap());
        assert_eq!(tree.height(), 0);

        // A height-zero tree proves inclusion with an empty path.
        let proof = tree.proof(0);
        assert!(proof.is_empty());
        assert!(verify_proof(&single, &proof, &tree.root_hex()));
    }

    #[test]
    fn four_transaction_tree_has_expected_structure() {
        let txs: Vec<Transaction> = (0..4).map(|i| tx(json!({"i": i}))).collect();
        let tree = MerkleTree::new(&txs).unwrap();

        let h: Vec<String> = txs.iter().map(|t| t.hash_hex().unwrap()).collect();
        let h01 = sha256_hex(format!("{}{}", h[0], h[1]).as_bytes());
        let h23 = sha256_hex(format!("{}{}", h[2], h[3]).as_bytes());
        let root = sha256_hex(format!("{h01}{h23}").as_bytes());

        assert_eq!(tree.root_hex(), root);
        assert_eq!(tree.height(), 2);

        let proof = tree.proof(0);
        assert_eq!(proof.len(), 2);
        assert_eq!(proof[0].hash, h[1]);
        assert_eq!(proof[0].position, ProofPosition::Right);
        assert_eq!(proof[1].hash, h23);
        assert_eq!(proof[1].position, ProofPosition::Right);

        for (i, t) in txs.iter().enumerate() {
            assert!(verify_proof(t, &tree.proof(i), &root), "proof failed for leaf {i}");
        }
    }

    #[test]
    fn odd_leaf_count_duplicates_the_last_leaf() {
        let txs: Vec<Transaction> = (0..5).map(|i| tx(json!({"i": i}))).collect();
        let tree = MerkleTree::new(&txs).unwrap();
        let root = tree.root_hex();

        for (i, t) in txs.iter().enumerate() {
            assert!(verify_proof(t, &tree.proof(i), &root), "proof failed for leaf {i}");
        }

        // The last leaf is paired with itself, so its first sibling is its
        // own hash sitting on the right.
        let proof = tree.proof(4);
        assert_eq!(proof[0].hash, txs[4].hash_hex().unwrap());
        assert_eq!(proof[0].position, ProofPosition::Right);
    }

    #[test]
    fn tampered_root_fails_verification() {
        let txs: Vec<Transaction> = (0..4).map(|i| tx(json!({"i": i}))).collect();
        let tree = MerkleTree::new(&txs).unwrap();

        let wrong_root = hash_value(&json!({"not": "the root"})).unwrap();
        assert!(!verify_proof(&txs[0], &tree.proof(0), &wrong_root));
    }

    #[test]
    fn foreign_transaction_fails_against_honest_proof() {
        let txs: Vec<Transaction> = (0..4).map(|i| tx(json!({"i": i}))).collect();
        let tree = MerkleTree::new(&txs).unwrap();

        let stranger = tx(json!({"i": 99}));
        assert!(!verify_proof(&stranger, &tree.proof(0), &tree.root_hex()));
    }

    #[test]
    fn out_of_range_proof_is_empty() {
        let txs: Vec<Transaction> = (0..3).map(|i| tx(json!({"i": i}))).collect();
        let tree = MerkleTree::new(&txs).unwrap();
        assert!(tree.proof(3).is_empty());
        assert!(tree.proof(100).is_empty());
    }

    #[test]
    fn find_index_matches_by_canonical_hash() {
        let txs: Vec<Transaction> = (0..3).map(|i| tx(json!({"i": i}))).collect();

        // Same record with reordered keys still resolves to its slot.
        let probe = tx(json!({"i": 1}));
        assert_eq!(find_index(&txs, &probe), Some(1));

        let missing = tx(json!({"i": 7}));
        assert_eq!(find_index(&txs, &missing), None);
    }
}
