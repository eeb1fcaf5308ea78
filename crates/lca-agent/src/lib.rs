//! Lifecycle agent library: CLI configuration and the upgrade phase sequences

pub mod config;
pub mod phases;

pub use config::{AgentConfig, Cli, Command};
pub use phases::{ensure_completed, track_to_completion, Phases};
