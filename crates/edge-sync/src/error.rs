use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("peer {peer} answered with status {status}")]
    PeerStatus { peer: String, status: u16 },

    #[error("ledger error: {0}")]
    Ledger(#[from] edge_ledger::LedgerError),
}
