//! RTGS Simulator Core
//!
//! Deterministic discrete-time simulator of a real-time gross settlement
//! system with a liquidity-saving mechanism.
//!
//! # Architecture
//!
//! - **core**: Simulation clock
//! - **models**: Domain types (Agent, Transaction, Event, State)
//! - **arrivals**: Stochastic payment generation
//! - **events**: Scheduled scenario interventions
//! - **policy**: JSON decision trees for bank decisions
//! - **settlement**: Settlement engines (RTGS, LSM)
//! - **costs**: Cost rates and accumulation
//! - **orchestrator**: Tick loop, configuration, checkpoints
//! - **rng**: Deterministic random number generation
//!
//! # Critical Invariants
//!
//! 1. All money values are i64 (cents)
//! 2. All randomness is deterministic (seeded RNG)
//! 3. Settlement never changes the total balance across agents
//!
//! # Example
//!
//! ```
//! use rtgs_sim_core::{AgentConfig, Orchestrator, OrchestratorConfig};
//!
//! let config = OrchestratorConfig::new(
//!     10,
//!     1,
//!     7,
//!     vec![
//!         AgentConfig::new("BANK_A", 100_000),
//!         AgentConfig::new("BANK_B", 50_000),
//!     ],
//! );
//! let mut orch = Orchestrator::new(config).unwrap();
//! orch.run_to_end().unwrap();
//! assert!(orch.is_complete());
//! assert_eq!(orch.total_balance(), Some(150_000));
//! ```

pub mod arrivals;
pub mod core;
pub mod costs;
pub mod error;
pub mod events;
pub mod models;
pub mod orchestrator;
pub mod policy;
pub mod rng;
pub mod settlement;

// Re-exports for convenience
pub use arrivals::{AmountDistribution, ArrivalConfig, ArrivalGenerator};
pub use core::time::TimeManager;
pub use costs::{CostAccumulator, CostBreakdown, CostRates};
pub use error::{ConfigurationError, SimulationError};
pub use events::{EventSchedule, ScenarioEvent, ScheduledEvent};
pub use models::{
    agent::{Agent, AgentError, WithdrawError},
    event::{Event, EventLog},
    state::SimulationState,
    transaction::{RtgsPriority, Transaction, TransactionError, TransactionStatus},
};
pub use orchestrator::{
    AgentConfig, DailySnapshot, Orchestrator, OrchestratorConfig, PolicyConfig,
    PriorityEscalationConfig, StateSnapshot, TickResult,
};
pub use rng::RngManager;
pub use settlement::{LsmConfig, SettlementError};
