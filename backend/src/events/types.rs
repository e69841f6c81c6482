//! Scenario event types
//!
//! Scenario events modify simulation state at specific ticks. They are
//! part of the configuration, so they are deterministic and every
//! execution is logged as an [`Event`](crate::models::Event).
//!
//! Money is i64 cents; multipliers and weights are floats.

use serde::{Deserialize, Serialize};

/// A scenario event that modifies simulation state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioEvent {
    /// Move funds between agents outside settlement. The sender may go
    /// negative; no liquidity check applies.
    DirectTransfer {
        from_agent: String,
        to_agent: String,
        amount: i64,
    },

    /// Change an agent's posted collateral. Negative deltas stop at zero.
    CollateralAdjustment { agent: String, delta: i64 },

    /// Multiply every agent's arrival rate
    GlobalArrivalRateChange { multiplier: f64 },

    /// Multiply one agent's arrival rate
    AgentArrivalRateChange { agent: String, multiplier: f64 },

    /// Set the weight of one counterparty in an agent's arrival config.
    ///
    /// With `auto_balance_others`, the remaining weights are rescaled so
    /// the total is unchanged.
    CounterpartyWeightChange {
        agent: String,
        counterparty: String,
        new_weight: f64,
        #[serde(default)]
        auto_balance_others: bool,
    },

    /// Scale deadline ranges relative to the configured base ranges
    DeadlineWindowChange {
        #[serde(default)]
        min_ticks_multiplier: Option<f64>,
        #[serde(default)]
        max_ticks_multiplier: Option<f64>,
    },

    /// Inject a specific transaction into the sender's Queue-1
    CustomTransactionArrival {
        from_agent: String,
        to_agent: String,
        amount: i64,
        /// Ticks after the current tick; capped at the episode end
        deadline_offset: usize,
        #[serde(default = "default_priority")]
        priority: u8,
        #[serde(default)]
        is_divisible: bool,
    },
}

fn default_priority() -> u8 {
    5
}

impl ScenarioEvent {
    /// Agent ids this event refers to
    pub fn referenced_agents(&self) -> Vec<&str> {
        match self {
            ScenarioEvent::DirectTransfer {
                from_agent,
                to_agent,
                ..
            }
            | ScenarioEvent::CustomTransactionArrival {
                from_agent,
                to_agent,
                ..
            } => vec![from_agent, to_agent],
            ScenarioEvent::CollateralAdjustment { agent, .. }
            | ScenarioEvent::AgentArrivalRateChange { agent, .. } => vec![agent],
            ScenarioEvent::CounterpartyWeightChange {
                agent,
                counterparty,
                ..
            } => vec![agent, counterparty],
            ScenarioEvent::GlobalArrivalRateChange { .. }
            | ScenarioEvent::DeadlineWindowChange { .. } => Vec::new(),
        }
    }

    /// Static parameter checks; agent existence is checked by the caller
    pub fn validate(&self) -> Result<(), String> {
        let non_negative = |name: &str, value: f64| {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(format!("{} must be a non-negative number, got {}", name, value))
            }
        };
        match self {
            ScenarioEvent::DirectTransfer {
                from_agent,
                to_agent,
                amount,
            } => {
                if *amount <= 0 {
                    return Err(format!("direct transfer amount must be positive, got {}", amount));
                }
                if from_agent == to_agent {
                    return Err(format!("direct transfer from {} to itself", from_agent));
                }
                Ok(())
            }
            ScenarioEvent::CollateralAdjustment { .. } => Ok(()),
            ScenarioEvent::GlobalArrivalRateChange { multiplier }
            | ScenarioEvent::AgentArrivalRateChange { multiplier, .. } => {
                non_negative("multiplier", *multiplier)
            }
            ScenarioEvent::CounterpartyWeightChange { new_weight, .. } => {
                non_negative("new_weight", *new_weight)
            }
            ScenarioEvent::DeadlineWindowChange {
                min_ticks_multiplier,
                max_ticks_multiplier,
            } => {
                for m in min_ticks_multiplier.iter().chain(max_ticks_multiplier.iter()) {
                    if !m.is_finite() || *m <= 0.0 {
                        return Err(format!("deadline multiplier must be positive, got {}", m));
                    }
                }
                Ok(())
            }
            ScenarioEvent::CustomTransactionArrival {
                from_agent,
                to_agent,
                amount,
                deadline_offset,
                priority,
                ..
            } => {
                if *amount <= 0 {
                    return Err(format!("custom transaction amount must be positive, got {}", amount));
                }
                if from_agent == to_agent {
                    return Err(format!("custom transaction from {} to itself", from_agent));
                }
                if *deadline_offset == 0 {
                    return Err("custom transaction deadline_offset must be at least 1".into());
                }
                if *priority > crate::models::transaction::MAX_PRIORITY {
                    return Err(format!("custom transaction priority {} out of range", priority));
                }
                Ok(())
            }
        }
    }
}

/// When to execute a scenario event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventSchedule {
    /// Execute once at a specific tick
    OneTime { tick: usize },

    /// Execute every `interval` ticks starting at `start_tick`
    Repeating { start_tick: usize, interval: usize },
}

impl EventSchedule {
    pub fn should_execute(&self, tick: usize) -> bool {
        match self {
            EventSchedule::OneTime { tick: event_tick } => tick == *event_tick,
            EventSchedule::Repeating {
                start_tick,
                interval,
            } => {
                // zero interval fires once, at start_tick
                if *interval == 0 {
                    return tick == *start_tick;
                }
                tick >= *start_tick && (tick - start_tick) % interval == 0
            }
        }
    }
}

/// A scenario event paired with its schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub event: ScenarioEvent,
    pub schedule: EventSchedule,
}
