pub mod error;
pub mod proof;
pub mod tree;

pub use error::MerkleError;
pub use proof::{find_index, verify_proof, ProofNode, ProofPosition};
pub use tree::MerkleTree;
