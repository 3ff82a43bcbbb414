use thiserror::Error;

#[derive(Debug, Error)]
pub enum MerkleError {
    #[error("transaction hashing failed: {0}")]
    Transaction(#[from] edge_transaction::TransactionError),
}
