//! Crate-level errors
//!
//! [`ConfigurationError`] is raised only while building an orchestrator or
//! loading a policy. [`SimulationError`] is what `tick()` and the checkpoint
//! functions return; layer errors convert into it with `?`.

use crate::costs::CostError;
use crate::events::ScenarioError;
use crate::models::agent::AgentError;
use crate::models::state::StateError;
use crate::models::transaction::TransactionError;
use crate::settlement::SettlementError;
use thiserror::Error;

/// Invalid configuration or policy, detected before the first tick
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("Duplicate node id '{node_id}' in policy '{policy_id}'")]
    DuplicateNodeId { policy_id: String, node_id: String },

    #[error("{tree} depth {depth} exceeds maximum {max}")]
    ExcessiveDepth {
        tree: String,
        depth: usize,
        max: usize,
    },

    #[error("Action {action} at node '{node_id}' is not allowed in {tree}")]
    ActionNotAllowed {
        tree: String,
        node_id: String,
        action: String,
    },

    #[error("Unknown field '{field}' at node '{node_id}' in {tree}")]
    UnknownField {
        tree: String,
        node_id: String,
        field: String,
    },

    #[error("Unknown parameter '{param}' at node '{node_id}'")]
    UnknownParameter { node_id: String, param: String },

    #[error("Invalid parameter '{name}' at node '{node_id}': {reason}")]
    InvalidParameter {
        node_id: String,
        name: String,
        reason: String,
    },

    #[error("Division by a literal zero at node '{node_id}'")]
    DivisionByZeroRisk { node_id: String },

    #[error("Policy could not be parsed: {0}")]
    PolicyParse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Duplicate agent id '{0}'")]
    DuplicateAgent(String),

    #[error("Unknown agent '{0}'")]
    UnknownAgent(String),
}

/// Errors surfaced by a running simulation
#[derive(Debug, Error, PartialEq)]
pub enum SimulationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Settlement(#[from] SettlementError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error(transparent)]
    Cost(#[from] CostError),

    #[error("Monetary arithmetic overflow: {0}")]
    ArithmeticOverflow(String),

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Simulation complete after {total_ticks} ticks")]
    SimulationComplete { total_ticks: usize },

    #[error("Simulation aborted: {0}")]
    Aborted(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Checkpoint config hash {found} does not match {expected}")]
    CheckpointMismatch { expected: String, found: String },

    #[error("Checkpoint state invalid: {0}")]
    StateValidation(String),
}

impl From<serde_json::Error> for SimulationError {
    fn from(err: serde_json::Error) -> Self {
        SimulationError::Serialization(err.to_string())
    }
}
