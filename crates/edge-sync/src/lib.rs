pub mod client;
pub mod error;
pub mod manager;

pub use client::{ChainInfo, PeerAddr, PeerClient};
pub use error::SyncError;
pub use manager::{apply_remote_blocks, AppliedBlock, SyncOutcome};
