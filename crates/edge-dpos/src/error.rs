use thiserror::Error;

/// Why a block was rejected by the consensus rules.
///
/// Every rejection is a silent drop at the orchestrator level: the variant
/// is logged and the block discarded, never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("validator {validator} is not in the delegate set")]
    UnknownValidator { validator: String },

    #[error("validator {got} proposed out of turn (expected {expected:?})")]
    WrongProposer { got: String, expected: Option<String> },

    #[error(
        "block timestamp {timestamp} does not advance past the previous \
         timestamp {previous} (tolerance {tolerance})"
    )]
    StaleTimestamp {
        timestamp: f64,
        previous: f64,
        tolerance: f64,
    },

    #[error("block index {index} does not advance past the previous index {previous}")]
    NonMonotonicIndex { index: u64, previous: i64 },

    #[error("block timestamp {timestamp} is more than {window}s away from local time {now}")]
    OutsideFreshnessWindow { timestamp: f64, now: f64, window: f64 },

    #[error("block carries no merkle root")]
    MissingMerkleRoot,

    #[error("merkle root does not match the committed transactions")]
    MerkleMismatch,

    #[error("merkle rebuild failed: {0}")]
    Merkle(String),

    #[error("leaf count {leaves} does not match transaction count {transactions}")]
    LeafCountMismatch { leaves: usize, transactions: usize },

    #[error("power usage {usage}W exceeds the energy threshold {threshold}W")]
    EnergyExceeded { usage: f64, threshold: f64 },
}
