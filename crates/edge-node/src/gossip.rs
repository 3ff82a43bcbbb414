use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::{
    gossipsub::{self, IdentTopic, MessageAuthenticity, TopicHash},
    mdns, ping,
    swarm::{NetworkBehaviour, SwarmEvent},
    Multiaddr,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    bus::{topic, Bus, InboundMessage},
    error::NodeError,
};

/// Combined libp2p behaviour backing the pub/sub bus.
#[derive(NetworkBehaviour)]
#[behaviour(prelude = "libp2p::swarm::derive_prelude")]
struct EdgeBehaviour {
    /// Epidemic broadcast for blocks, transactions, metrics, and status
    /// messages.
    gossipsub: gossipsub::Behaviour,

    /// Zero-config LAN peer discovery, the natural fit for an edge
    /// deployment on one subnet.
    mdns: mdns::tokio::Behaviour,

    /// Keepalive; unresponsive peers get disconnected.
    ping: ping::Behaviour,
}

fn build_behaviour(
    keypair: &libp2p::identity::Keypair,
) -> Result<EdgeBehaviour, Box<dyn std::error::Error + Send + Sync>> {
    let peer_id = keypair.public().to_peer_id();

    let gossipsub_config = gossipsub::ConfigBuilder::default()
        .heartbeat_interval(std::time::Duration::from_secs(10))
        .validation_mode(gossipsub::ValidationMode::Strict)
        .build()
        .map_err(|e| format!("gossipsub config: {e}"))?;

    let mut gossipsub = gossipsub::Behaviour::new(
        MessageAuthenticity::Signed(keypair.clone()),
        gossipsub_config,
    )
    .map_err(|e| format!("gossipsub init: {e}"))?;

    for name in topic::ALL {
        gossipsub.subscribe(&IdentTopic::new(name))?;
    }

    let mdns = mdns::tokio::Behaviour::new(mdns::Config::default(), peer_id)?;
    let ping = ping::Behaviour::new(ping::Config::new());

    Ok(EdgeBehaviour {
        gossipsub,
        mdns,
        ping,
    })
}

/// Publish handle for the gossip transport.  Cheap to clone; the swarm
/// itself lives on its own task.
#[derive(Debug, Clone)]
pub struct GossipBus {
    commands: mpsc::UnboundedSender<(String, Vec<u8>)>,
}

#[async_trait]
impl Bus for GossipBus {
    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), NodeError> {
        let bytes = serde_json::to_vec(payload)?;
        self.commands
            .send((topic.to_string(), bytes))
            .map_err(|_| NodeError::Transport("gossip task stopped".into()))
    }
}

/// Start the gossip transport: bind the swarm, dial the bootstrap brokers,
/// and run the event loop on its own task.  Returns the publish handle and
/// the stream of inbound messages for the dispatcher.
pub fn spawn(
    listen_port: u16,
    bootstrap: &[String],
) -> Result<(GossipBus, mpsc::UnboundedReceiver<InboundMessage>), NodeError> {
    let keypair = libp2p::identity::Keypair::generate_ed25519();
    let local_peer_id = keypair.public().to_peer_id();
    info!(%local_peer_id, "gossip identity");

    let mut swarm = libp2p::SwarmBuilder::with_existing_identity(keypair.clone())
        .with_tokio()
        .with_tcp(
            libp2p::tcp::Config::default(),
            libp2p::noise::Config::new,
            libp2p::yamux::Config::default,
        )
        .map_err(|e| NodeError::Transport(e.to_string()))?
        .with_behaviour(|key| build_behaviour(key))
        .map_err(|e| NodeError::Transport(e.to_string()))?
        .build();

    let listen_addr: Multiaddr = format!("/ip4/0.0.0.0/tcp/{listen_port}")
        .parse()
        .map_err(|e: libp2p::multiaddr::Error| NodeError::Transport(e.to_string()))?;
    swarm
        .listen_on(listen_addr)
        .map_err(|e| NodeError::Transport(e.to_string()))?;

    // Brokers are plain bootstrap peers here; a failed dial is retried
    // implicitly the next time mDNS or another broker surfaces the peer.
    for addr in bootstrap {
        match addr.parse::<Multiaddr>() {
            Ok(addr) => {
                if let Err(e) = swarm.dial(addr.clone()) {
                    warn!(%addr, error = %e, "bootstrap dial failed");
                }
            }
            Err(e) => warn!(%addr, error = %e, "invalid bootstrap address"),
        }
    }

    let topics: HashMap<TopicHash, String> = topic::ALL
        .iter()
        .map(|name| (IdentTopic::new(*name).hash(), name.to_string()))
        .collect();

    let (command_tx, mut command_rx) = mpsc::unbounded_channel::<(String, Vec<u8>)>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<InboundMessage>();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    let Some((topic_name, bytes)) = command else {
                        debug!("gossip command channel closed, stopping swarm task");
                        return;
                    };
                    if let Err(e) = swarm
                        .behaviour_mut()
                        .gossipsub
                        .publish(IdentTopic::new(topic_name.as_str()), bytes)
                    {
                        // "insufficient peers" is routine on a quiet network.
                        debug!(topic = %topic_name, error = %e, "gossip publish dropped");
                    }
                }

                event = swarm.select_next_some() => match event {
                    SwarmEvent::NewListenAddr { address, .. } => {
                        info!(%address, "gossip listening");
                    }

                    SwarmEvent::Behaviour(EdgeBehaviourEvent::Gossipsub(
                        gossipsub::Event::Message { message, .. },
                    )) => {
                        let Some(topic_name) = topics.get(&message.topic) else {
                            debug!(topic = %message.topic, "message on unknown topic");
                            continue;
                        };
                        match serde_json::from_slice::<Value>(&message.data) {
                            Ok(payload) => {
                                let _ = inbound_tx.send(InboundMessage {
                                    topic: topic_name.clone(),
                                    payload,
                                });
                            }
                            Err(e) => warn!(topic = %topic_name, error = %e, "undecodable payload"),
                        }
                    }

                    SwarmEvent::Behaviour(EdgeBehaviourEvent::Mdns(
                        mdns::Event::Discovered(peers),
                    )) => {
                        for (peer_id, addr) in peers {
                            debug!(%peer_id, %addr, "mdns discovered peer");
                            swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                        }
                    }

                    SwarmEvent::Behaviour(EdgeBehaviourEvent::Mdns(
                        mdns::Event::Expired(peers),
                    )) => {
                        for (peer_id, _) in peers {
                            swarm.behaviour_mut().gossipsub.remove_explicit_peer(&peer_id);
                        }
                    }

                    // A peer that stops answering pings is dead to us.
                    SwarmEvent::Behaviour(EdgeBehaviourEvent::Ping(ping::Event {
                        peer,
                        result: Err(_),
                        ..
                    })) => {
                        debug!(%peer, "ping failed, disconnecting");
                        let _ = swarm.disconnect_peer_id(peer);
                    }

                    _ => {}
                },
            }
        }
    });

    Ok((GossipBus { commands: command_tx }, inbound_rx))
}
