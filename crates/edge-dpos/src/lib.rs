pub mod engine;
pub mod error;
pub mod liveness;

pub use engine::{Checkpoint, DposConfig, DposEngine};
pub use error::ValidationError;
pub use liveness::LivenessView;
