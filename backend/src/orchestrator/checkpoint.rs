//! Checkpoint save and restore
//!
//! A [`StateSnapshot`] captures everything that evolves during a run: clock,
//! RNG state, agents, transactions, Queue-2, cost totals, the live arrival
//! process and the id counter. Policies and the scenario schedule are
//! rebuilt from the configuration, whose SHA-256 hash is embedded so a
//! snapshot cannot be resumed under a different configuration.
//!
//! A restored orchestrator continues exactly as the original would have.
//!
//! # Example
//!
//! ```rust
//! use rtgs_sim_core::orchestrator::{AgentConfig, Orchestrator, OrchestratorConfig};
//!
//! let config = OrchestratorConfig::new(
//!     10,
//!     1,
//!     7,
//!     vec![AgentConfig::new("A", 500), AgentConfig::new("B", 500)],
//! );
//! let mut original = Orchestrator::new(config.clone()).unwrap();
//! original.run_ticks(4).unwrap();
//!
//! let json = original.save_state().unwrap();
//! let restored = Orchestrator::load_state(config, &json).unwrap();
//! assert_eq!(restored.current_tick(), 4);
//! assert_eq!(restored.total_balance(), Some(1_000));
//! ```

use crate::arrivals::ArrivalGenerator;
use crate::core::time::TimeManager;
use crate::costs::CostAccumulator;
use crate::error::SimulationError;
use crate::models::agent::Agent;
use crate::models::state::{SimulationState, TxIdAllocator};
use crate::models::transaction::Transaction;
use crate::orchestrator::config::OrchestratorConfig;
use crate::orchestrator::engine::{DailySnapshot, Orchestrator};
use crate::rng::RngManager;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Complete serializable simulation state, taken between ticks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Next tick to run
    pub current_tick: usize,
    pub rng_state: u64,
    /// Sorted by id
    pub agents: Vec<Agent>,
    /// Sorted by id
    pub transactions: Vec<Transaction>,
    /// Queue-2 in settlement order
    pub rtgs_queue: Vec<String>,
    pub costs: BTreeMap<String, CostAccumulator>,
    pub arrival_state: ArrivalGenerator,
    pub next_tx_seq: u64,
    #[serde(default)]
    pub daily_snapshots: Vec<DailySnapshot>,
    /// Sum of agent balances when the snapshot was taken
    pub total_balance: i64,
    pub config_hash: String,
}

/// SHA-256 over the configuration's JSON with every object key sorted
pub fn compute_config_hash<T: Serialize>(config: &T) -> Result<String, SimulationError> {
    fn canonicalize(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> =
                    map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
            other => other,
        }
    }

    let canonical = serde_json::to_string(&canonicalize(serde_json::to_value(config)?))?;
    let digest = Sha256::digest(canonical.as_bytes());
    Ok(format!("{:x}", digest))
}

fn invalid(msg: String) -> SimulationError {
    SimulationError::StateValidation(msg)
}

/// Structural checks on a snapshot before it is resumed:
/// - balances sum to the recorded total
/// - transaction ids are unique
/// - every queued id refers to an unsettled transaction
/// - no id sits in two queues
/// - Queue-2 entries carry an RTGS priority and are in settlement order
pub fn validate_snapshot(snapshot: &StateSnapshot) -> Result<(), SimulationError> {
    let total = snapshot
        .agents
        .iter()
        .try_fold(0i64, |acc, agent| acc.checked_add(agent.balance()))
        .ok_or_else(|| invalid("agent balances overflow".into()))?;
    if total != snapshot.total_balance {
        return Err(invalid(format!(
            "balance conservation violated: recorded {}, agents hold {}",
            snapshot.total_balance, total
        )));
    }

    let mut transactions = BTreeMap::new();
    for tx in &snapshot.transactions {
        if transactions.insert(tx.id(), tx).is_some() {
            return Err(invalid(format!("duplicate transaction {}", tx.id())));
        }
    }

    let mut seen: BTreeMap<&str, String> = BTreeMap::new();
    let queue1 = snapshot.agents.iter().flat_map(|agent| {
        agent
            .outgoing_queue()
            .iter()
            .map(move |id| (id.as_str(), format!("Queue-1 of {}", agent.id())))
    });
    let queue2 = snapshot
        .rtgs_queue
        .iter()
        .map(|id| (id.as_str(), "Queue-2".to_string()));

    for (tx_id, location) in queue1.chain(queue2) {
        let tx = transactions
            .get(tx_id)
            .ok_or_else(|| invalid(format!("orphaned transaction {} in {}", tx_id, location)))?;
        if tx.is_settled() {
            return Err(invalid(format!("settled transaction {} still in {}", tx_id, location)));
        }
        if let Some(previous) = seen.insert(tx_id, location.clone()) {
            return Err(invalid(format!(
                "transaction {} in both {} and {}",
                tx_id, previous, location
            )));
        }
    }

    let mut last_key = None;
    let queued = snapshot
        .rtgs_queue
        .iter()
        .filter_map(|id| transactions.get(id.as_str()).map(|tx| (id, *tx)));
    for (tx_id, tx) in queued {
        let key = tx
            .rtgs_priority()
            .zip(tx.rtgs_submission_tick())
            .ok_or_else(|| invalid(format!("Queue-2 transaction {} has no RTGS priority", tx_id)))?;
        if last_key.map_or(false, |last| last > key) {
            return Err(invalid(format!("Queue-2 out of order at {}", tx_id)));
        }
        last_key = Some(key);
    }

    Ok(())
}

impl Orchestrator {
    /// Serialize the current state as JSON.
    ///
    /// # Errors
    /// [`SimulationError::Aborted`] for an aborted instance, or a
    /// serialization failure.
    pub fn save_state(&self) -> Result<String, SimulationError> {
        if self.is_aborted() {
            return Err(SimulationError::Aborted(
                "an aborted simulation cannot be checkpointed".into(),
            ));
        }
        let state = self.state();
        let snapshot = StateSnapshot {
            current_tick: state.current_tick(),
            rng_state: state.rng().get_state(),
            agents: state.agents().values().cloned().collect(),
            transactions: state.transactions().values().cloned().collect(),
            rtgs_queue: state.rtgs_queue().to_vec(),
            costs: state.all_costs().clone(),
            arrival_state: self.arrivals().clone(),
            next_tx_seq: state.id_allocator().next_seq(),
            daily_snapshots: self.daily_snapshots().to_vec(),
            total_balance: state
                .total_balance()
                .ok_or_else(|| SimulationError::ArithmeticOverflow("total balance".into()))?,
            config_hash: self.config_hash().to_string(),
        };
        log::debug!(
            "Checkpoint at tick {}: {} transactions, {} in Queue-2",
            snapshot.current_tick,
            snapshot.transactions.len(),
            snapshot.rtgs_queue.len()
        );
        Ok(serde_json::to_string(&snapshot)?)
    }

    /// Resume from a snapshot produced by [`save_state`](Self::save_state).
    ///
    /// # Errors
    /// - [`SimulationError::CheckpointMismatch`] if `config` is not the
    ///   configuration the snapshot was taken under
    /// - [`SimulationError::StateValidation`] if the snapshot is inconsistent
    pub fn load_state(config: OrchestratorConfig, json: &str) -> Result<Self, SimulationError> {
        config.validate()?;
        let snapshot: StateSnapshot = serde_json::from_str(json)?;

        let found = compute_config_hash(&config)?;
        if snapshot.config_hash != found {
            return Err(SimulationError::CheckpointMismatch {
                expected: snapshot.config_hash,
                found,
            });
        }
        validate_snapshot(&snapshot)?;

        let configured: BTreeSet<&str> = config.agent_configs.iter().map(|a| a.id.as_str()).collect();
        let restored: BTreeSet<&str> = snapshot.agents.iter().map(Agent::id).collect();
        if configured != restored {
            return Err(invalid("snapshot agents differ from the configuration".into()));
        }
        if snapshot.current_tick > config.total_ticks() {
            return Err(invalid(format!(
                "snapshot tick {} is past the horizon of {} ticks",
                snapshot.current_tick,
                config.total_ticks()
            )));
        }

        let state = SimulationState::from_parts(
            TimeManager::at_tick(config.ticks_per_day, snapshot.current_tick),
            RngManager::new(snapshot.rng_state),
            snapshot
                .agents
                .into_iter()
                .map(|agent| (agent.id().to_string(), agent))
                .collect(),
            snapshot
                .transactions
                .into_iter()
                .map(|tx| (tx.id().to_string(), tx))
                .collect(),
            snapshot.rtgs_queue,
            snapshot.costs,
            TxIdAllocator::new(config.rng_seed, snapshot.next_tx_seq),
        );

        log::info!("Restored simulation at tick {}", snapshot.current_tick);
        Self::assemble(config, state, snapshot.arrival_state, snapshot.daily_snapshots)
    }
}
