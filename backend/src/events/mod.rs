//! Scenario events
//!
//! Scheduled interventions applied at the start of a tick: transfers,
//! collateral changes, arrival-process changes and injected transactions.

pub mod handler;
pub mod types;

pub use handler::{ScenarioError, ScenarioEventHandler};
pub use types::{EventSchedule, ScenarioEvent, ScheduledEvent};
