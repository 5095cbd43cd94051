pub mod candidate;
pub mod clock;
pub mod collab;
pub mod config;
pub mod engine;
pub mod error;
pub mod log;
pub mod policy;
pub mod registration;
pub mod retry;
pub mod runtime;
pub mod sim;
pub mod timer;

pub use config::SwitchConfig;
pub use engine::{DecisionEngine, EvaluationReason, Event};
pub use error::{ConfigError, SwitchError};

pub fn init() {
    tracing::info!("Data switch engine initialized");
}
