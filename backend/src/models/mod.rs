//! Domain models

pub mod agent;
pub mod event;
pub mod state;
pub mod transaction;

pub use agent::{Agent, AgentError, BudgetBlock, CollateralError, ReleaseBudget, WithdrawError};
pub use event::{CollateralTrigger, Event, EventLog};
pub use state::{SimulationState, StateError, TxIdAllocator};
pub use transaction::{RtgsPriority, Transaction, TransactionError, TransactionStatus};
