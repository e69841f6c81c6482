//! Scenario event execution
//!
//! Events scheduled for a tick run in configuration order, each emitting
//! exactly one simulation event.

use crate::arrivals::ArrivalGenerator;
use crate::events::types::{ScenarioEvent, ScheduledEvent};
use crate::models::agent::AgentError;
use crate::models::state::{SimulationState, StateError};
use crate::models::transaction::{Transaction, TransactionError};
use crate::models::Event;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ScenarioError {
    #[error("Scenario references unknown agent {0}")]
    UnknownAgent(String),

    #[error("Scenario has no arrival config for agent {0}")]
    NoArrivalConfig(String),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Holds the configured schedule and applies it tick by tick
#[derive(Debug, Clone, Default)]
pub struct ScenarioEventHandler {
    events: Vec<ScheduledEvent>,
}

impl ScenarioEventHandler {
    pub fn new(events: Vec<ScheduledEvent>) -> Self {
        Self { events }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events scheduled for `tick`, in configuration order
    pub fn events_for_tick(&self, tick: usize) -> Vec<&ScenarioEvent> {
        self.events
            .iter()
            .filter(|scheduled| scheduled.schedule.should_execute(tick))
            .map(|scheduled| &scheduled.event)
            .collect()
    }

    /// Execute everything scheduled for `tick`; returns the count executed.
    ///
    /// `episode_end_tick` caps injected transaction deadlines.
    pub fn execute_tick_events(
        &self,
        state: &mut SimulationState,
        arrivals: &mut ArrivalGenerator,
        tick: usize,
        episode_end_tick: usize,
    ) -> Result<usize, ScenarioError> {
        let events = self.events_for_tick(tick);
        let count = events.len();
        for event in events {
            event.execute(state, arrivals, tick, episode_end_tick)?;
        }
        Ok(count)
    }
}

impl ScenarioEvent {
    /// Apply this event to the state and arrival process
    pub fn execute(
        &self,
        state: &mut SimulationState,
        arrivals: &mut ArrivalGenerator,
        tick: usize,
        episode_end_tick: usize,
    ) -> Result<(), ScenarioError> {
        match self {
            ScenarioEvent::DirectTransfer {
                from_agent,
                to_agent,
                amount,
            } => execute_direct_transfer(state, tick, from_agent, to_agent, *amount),

            ScenarioEvent::CollateralAdjustment { agent, delta } => {
                let target = state
                    .agent_mut(agent)
                    .ok_or_else(|| ScenarioError::UnknownAgent(agent.clone()))?;
                let (collateral_before, collateral_after) = target.adjust_collateral(*delta, tick);
                state.emit(Event::CollateralAdjusted {
                    tick,
                    agent_id: agent.clone(),
                    delta: *delta,
                    collateral_before,
                    collateral_after,
                });
                Ok(())
            }

            ScenarioEvent::GlobalArrivalRateChange { multiplier } => {
                arrivals.multiply_all_rates(*multiplier);
                state.emit(Event::GlobalArrivalRateChanged {
                    tick,
                    multiplier: *multiplier,
                });
                Ok(())
            }

            ScenarioEvent::AgentArrivalRateChange { agent, multiplier } => {
                let (old_rate, new_rate) = arrivals
                    .multiply_rate(agent, *multiplier)
                    .ok_or_else(|| ScenarioError::NoArrivalConfig(agent.clone()))?;
                state.emit(Event::AgentArrivalRateChanged {
                    tick,
                    agent_id: agent.clone(),
                    multiplier: *multiplier,
                    old_rate,
                    new_rate,
                });
                Ok(())
            }

            ScenarioEvent::CounterpartyWeightChange {
                agent,
                counterparty,
                new_weight,
                auto_balance_others,
            } => {
                let old_weight = arrivals
                    .set_counterparty_weight(agent, counterparty, *new_weight, *auto_balance_others)
                    .ok_or_else(|| ScenarioError::NoArrivalConfig(agent.clone()))?;
                state.emit(Event::CounterpartyWeightChanged {
                    tick,
                    agent_id: agent.clone(),
                    counterparty: counterparty.clone(),
                    old_weight,
                    new_weight: *new_weight,
                    auto_balance_others: *auto_balance_others,
                });
                Ok(())
            }

            ScenarioEvent::DeadlineWindowChange {
                min_ticks_multiplier,
                max_ticks_multiplier,
            } => {
                arrivals.scale_deadline_ranges(*min_ticks_multiplier, *max_ticks_multiplier);
                state.emit(Event::DeadlineWindowChanged {
                    tick,
                    min_ticks_multiplier: *min_ticks_multiplier,
                    max_ticks_multiplier: *max_ticks_multiplier,
                });
                Ok(())
            }

            ScenarioEvent::CustomTransactionArrival {
                from_agent,
                to_agent,
                amount,
                deadline_offset,
                priority,
                is_divisible,
            } => {
                for id in [from_agent, to_agent] {
                    if state.agent(id).is_none() {
                        return Err(ScenarioError::UnknownAgent(id.clone()));
                    }
                }
                let deadline = tick
                    .saturating_add(*deadline_offset)
                    .min(episode_end_tick)
                    .max(tick + 1);
                let tx_id = state.allocate_tx_id();
                let tx = Transaction::new(
                    tx_id.clone(),
                    from_agent.clone(),
                    to_agent.clone(),
                    *amount,
                    tick,
                    deadline,
                )?
                .with_priority(*priority)
                .with_divisible(*is_divisible);
                let priority = tx.priority();
                state.add_to_queue1(tx)?;
                state.emit(Event::ScheduledTransactionInjected {
                    tick,
                    tx_id,
                    sender_id: from_agent.clone(),
                    receiver_id: to_agent.clone(),
                    amount: *amount,
                    deadline,
                    priority,
                    is_divisible: *is_divisible,
                });
                Ok(())
            }
        }
    }
}

fn execute_direct_transfer(
    state: &mut SimulationState,
    tick: usize,
    from_agent: &str,
    to_agent: &str,
    amount: i64,
) -> Result<(), ScenarioError> {
    let from_balance_before = state
        .agent(from_agent)
        .ok_or_else(|| ScenarioError::UnknownAgent(from_agent.to_string()))?
        .balance();
    let to_balance_before = state
        .agent(to_agent)
        .ok_or_else(|| ScenarioError::UnknownAgent(to_agent.to_string()))?
        .balance();

    // Both sides are checked before either is touched
    let from_balance_after = from_balance_before
        .checked_sub(amount)
        .ok_or_else(|| AgentError::BalanceOverflow {
            agent_id: from_agent.to_string(),
        })?;
    let to_balance_after = to_balance_before
        .checked_add(amount)
        .ok_or_else(|| AgentError::BalanceOverflow {
            agent_id: to_agent.to_string(),
        })?;

    state.agent_mut_or_err(from_agent)?.adjust_balance(-amount)?;
    state.agent_mut_or_err(to_agent)?.adjust_balance(amount)?;

    state.emit(Event::DirectTransfer {
        tick,
        from_agent: from_agent.to_string(),
        to_agent: to_agent.to_string(),
        amount,
        from_balance_before,
        from_balance_after,
        to_balance_before,
        to_balance_after,
    });
    Ok(())
}
