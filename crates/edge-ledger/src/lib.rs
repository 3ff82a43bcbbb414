pub mod block;
pub mod chain;
pub mod error;
pub mod genesis;

pub use block::Block;
pub use chain::Chain;
pub use error::LedgerError;
pub use genesis::{genesis_block, stakes_from_genesis, verify_genesis, GENESIS_TIMESTAMP, GENESIS_VALIDATOR};
