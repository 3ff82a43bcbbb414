use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::SyncError;

/// One peer's HTTP endpoint, as configured in the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddr {
    pub id: String,
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Response of `GET /chain_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub chain_length: u64,
    pub latest_block_hash: Option<String>,
}

/// HTTP client for the peer surface.  One instance is shared across sync
/// rounds; every request is bounded by the configured timeout so a stalled
/// peer can never wedge the sync duty.
#[derive(Debug, Clone)]
pub struct PeerClient {
    http: reqwest::Client,
}

impl PeerClient {
    pub fn new(timeout: Duration) -> Result<Self, SyncError> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    /// Probe a peer's chain tip.
    pub async fn chain_info(&self, peer: &PeerAddr) -> Result<ChainInfo, SyncError> {
        let url = format!("{}/chain_info", peer.base_url());
        let response = self.http.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(SyncError::PeerStatus {
                peer: peer.id.clone(),
                status: response.status().as_u16(),
            });
        }
        Ok(response.json().await?)
    }

    /// Fetch every block with index >= `start` from a peer, as raw wire
    /// dictionaries.  Reconstruction and validation happen at the caller so
    /// a malformed block from one peer cannot abort the whole round.
    pub async fn fetch_blocks(&self, peer: &PeerAddr, start: u64) -> Result<Vec<Value>, SyncError> {
        let url = format!(
            "{}/blocks?start_index={}&end_index=-1",
            peer.base_url(),
            start
        );
        debug!(peer = %peer.id, %url, "requesting blocks");

        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(SyncError::PeerStatus {
                peer: peer.id.clone(),
                status: response.status().as_u16(),
            });
        }
        Ok(response.json().await?)
    }
}
