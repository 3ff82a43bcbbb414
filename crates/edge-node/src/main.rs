use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use edge_node::{
    api, config::NodeConfig, context::NodeContext, gossip, node::Node, sensor::SystemSensor,
};
use edge_store::Store;

/// EdgeChain node daemon.
#[derive(Parser, Debug)]
#[command(
    name = "edge-node",
    version,
    about = "EdgeChain DPoS node",
    long_about = "Runs an EdgeChain node that proposes and validates blocks \
                  under the DPoS schedule, gossips with the roster, and \
                  serves the peer HTTP surface."
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "edgechain.toml", env = "EDGE_CONFIG")]
    config: PathBuf,

    /// Override the node id from the configuration file.
    #[arg(short, long, env = "EDGE_NODE_ID")]
    node_id: Option<String>,

    /// Suppress log output to stderr (run silently).
    #[arg(short, long, default_value_t = false, env = "EDGE_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_filter = if cli.quiet {
        EnvFilter::new("off")
    } else {
        EnvFilter::from_default_env().add_directive("edge_node=info".parse()?)
    };
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let mut config = if cli.config.exists() {
        NodeConfig::load(&cli.config)?
    } else {
        warn!(path = %cli.config.display(), "config file not found, using defaults");
        NodeConfig::default()
    };
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    config.validate()?;

    info!(
        node_id = %config.node_id,
        api_port = config.api_port,
        gossip_port = config.gossip_port,
        peers = config.peer_roster().len(),
        "starting EdgeChain node"
    );

    let store = Store::open(config.data_dir.join(&config.node_id))?;
    let ctx = NodeContext::initialise(config.clone(), store, Arc::new(SystemSensor::new()))?;

    let (bus, inbound) = gossip::spawn(config.gossip_port, &config.bootstrap)?;

    let api_listener = tokio::net::TcpListener::bind(("0.0.0.0", config.api_port)).await?;
    info!(addr = %api_listener.local_addr()?, "peer HTTP surface listening");
    let router = api::router(ctx.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(api_listener, router).await {
            tracing::error!(error = %e, "http server stopped");
        }
    });

    Node::new(ctx, Arc::new(bus))?.run(inbound).await?;
    Ok(())
}
