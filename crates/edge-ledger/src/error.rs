use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("merkle error: {0}")]
    Merkle(#[from] edge_merkle::MerkleError),

    #[error("transaction error: {0}")]
    Transaction(#[from] edge_transaction::TransactionError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("block {index}: stored merkle root does not match the rebuilt tree")]
    MerkleMismatch { index: u64 },

    #[error("block index {index} does not advance past the tip index {tip_index}")]
    NonMonotonicIndex { index: u64, tip_index: u64 },

    #[error("block {index}: timestamp {timestamp} does not advance past the tip timestamp {tip_timestamp}")]
    NonMonotonicTimestamp {
        index: u64,
        timestamp: f64,
        tip_timestamp: f64,
    },

    #[error("block {index}: previous hash does not match the tip hash")]
    PreviousHashMismatch { index: u64 },
}
