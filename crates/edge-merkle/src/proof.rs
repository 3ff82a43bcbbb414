use serde::{Deserialize, Serialize};

use edge_transaction::{sha256_hex, Transaction};

/// Which side the sibling hash sits on relative to the node being proved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofPosition {
    Left,
    Right,
}

/// One step of a Merkle inclusion proof, ordered from the leaf upward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofNode {
    pub hash: String,
    pub position: ProofPosition,
}

/// Replay a proof path for `tx` and compare the reconstructed root against
/// `expected_root`.
///
/// A sibling on the left means the running hash goes on the right of the
/// concatenation, and vice versa.  Hex strings are concatenated as-is before
/// hashing, matching how parents are built in [`crate::MerkleTree`].
pub fn verify_proof(tx: &Transaction, proof: &[ProofNode], expected_root: &str) -> bool {
    let Ok(mut current) = tx.hash_hex() else {
        return false;
    };

    for node in proof {
        let combined = match node.position {
            ProofPosition::Left => format!("{}{}", node.hash, current),
            ProofPosition::Right => format!("{}{}", current, node.hash),
        };
        current = sha256_hex(combined.as_bytes());
    }

    current == expected_root
}

/// Locate `tx` inside `transactions` by canonical hash.
pub fn find_index(transactions: &[Transaction], tx: &Transaction) -> Option<usize> {
    let target = tx.hash_hex().ok()?;
    transactions
        .iter()
        .position(|candidate| candidate.hash_hex().ok().as_deref() == Some(target.as_str()))
}
