pub mod canonical;
pub mod error;
pub mod transaction;

pub use canonical::{hash_value, sha256_hex, to_canonical_json, ZERO_HASH};
pub use error::TransactionError;
pub use transaction::Transaction;
