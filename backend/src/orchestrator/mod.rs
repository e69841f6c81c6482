//! Orchestrator - the tick state machine
//!
//! - [`config`]: serde configuration and its validation
//! - [`engine`]: [`Orchestrator`] and the per-tick phase sequence
//! - [`checkpoint`]: snapshots, config hashing, save and restore

pub mod checkpoint;
pub mod config;
pub mod engine;

pub use checkpoint::{compute_config_hash, validate_snapshot, StateSnapshot};
pub use config::{AgentConfig, OrchestratorConfig, PolicyConfig, PriorityEscalationConfig};
pub use engine::{DailySnapshot, Orchestrator, TickResult};
