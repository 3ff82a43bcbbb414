use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::NodeError;

/// Topic names on the pub/sub bus.
pub mod topic {
    pub const BLOCKS: &str = "blocks";
    pub const TRANSACTIONS: &str = "transactions";
    pub const METRICS: &str = "metrics";
    pub const NETWORK_STATUS: &str = "network/status";
    pub const VALIDATOR_STATUS: &str = "validator/status";

    pub const ALL: [&str; 5] = [BLOCKS, TRANSACTIONS, METRICS, NETWORK_STATUS, VALIDATOR_STATUS];
}

/// A message delivered from the bus to the node's dispatcher.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Value,
}

/// The outbound half of the pub/sub transport.
///
/// The transport itself is an external collaborator: delivery is best-effort
/// and at-least-once, with no ordering guarantees across topics or
/// publishers.  Publishing with no listeners is not an error.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), NodeError>;
}

/// An in-process bus: every publish loops straight back to the local
/// dispatcher.  Used by tests and single-node development runs; dedupe in
/// the handlers makes the loopback harmless.
#[derive(Debug, Clone)]
pub struct LocalBus {
    sender: mpsc::UnboundedSender<InboundMessage>,
}

impl LocalBus {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<InboundMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), NodeError> {
        self.sender
            .send(InboundMessage {
                topic: topic.to_string(),
                payload: payload.clone(),
            })
            .map_err(|_| NodeError::Transport("local bus receiver dropped".into()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn local_bus_loops_back() {
        let (bus, mut inbound) = LocalBus::new();
        bus.publish(topic::BLOCKS, &json!({"index": 1})).await.unwrap();

        let message = inbound.recv().await.unwrap();
        assert_eq!(message.topic, topic::BLOCKS);
        assert_eq!(message.payload["index"], 1);
    }
}
