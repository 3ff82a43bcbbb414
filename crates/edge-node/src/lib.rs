pub mod api;
pub mod bus;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod gossip;
pub mod metrics;
pub mod node;
pub mod sensor;

pub use bus::{Bus, InboundMessage, LocalBus};
pub use config::NodeConfig;
pub use context::{NodeContext, SharedContext};
pub use error::NodeError;
pub use node::Node;
