use thiserror::Error;

/// The node-level error taxonomy.
///
/// Configuration problems are fatal at startup.  Storage write failures
/// prevent acknowledgment.  Validation rejections are logged and the block
/// dropped.  Transport and sync failures skip the broker/peer for the round.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] edge_store::StoreError),

    #[error("ledger error: {0}")]
    Ledger(#[from] edge_ledger::LedgerError),

    #[error("merkle error: {0}")]
    Merkle(#[from] edge_merkle::MerkleError),

    #[error("transaction error: {0}")]
    Transaction(#[from] edge_transaction::TransactionError),

    #[error("validation rejected: {0}")]
    Validation(#[from] edge_dpos::ValidationError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("sync error: {0}")]
    Sync(#[from] edge_sync::SyncError),

    #[error("no live delegates available")]
    NoLiveDelegates,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
