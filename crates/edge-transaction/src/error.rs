use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transaction payload is not a JSON object")]
    NotAnObject,
}
