use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ledger error: {0}")]
    Ledger(#[from] edge_ledger::LedgerError),

    #[error("transaction error: {0}")]
    Transaction(#[from] edge_transaction::TransactionError),
}
