//! Orchestrator configuration
//!
//! Plain serde structs; callers deserialize them with `serde_json`. The
//! orchestrator validates the whole structure once at construction and the
//! tick loop never re-checks it.
//!
//! # Example
//!
//! ```rust
//! use rtgs_sim_core::orchestrator::{AgentConfig, OrchestratorConfig, PolicyConfig};
//!
//! let config = OrchestratorConfig::new(
//!     100,
//!     1,
//!     12345,
//!     vec![
//!         AgentConfig::new("BANK_A", 1_000_000),
//!         AgentConfig::new("BANK_B", 2_000_000).with_policy(PolicyConfig::LiquidityAware {
//!             target_buffer: 500_000,
//!             urgency_threshold: 5,
//!         }),
//!     ],
//! );
//! assert!(config.validate().is_ok());
//! assert_eq!(config.total_ticks(), 100);
//! ```

use crate::arrivals::ArrivalConfig;
use crate::costs::CostRates;
use crate::error::ConfigurationError;
use crate::events::{ScenarioEvent, ScheduledEvent};
use crate::models::transaction::MAX_PRIORITY;
use crate::policy::presets;
use crate::policy::tree::{DecisionTreeDef, TreePolicy};
use crate::settlement::LsmConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Complete orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Ticks per business day
    pub ticks_per_day: usize,

    pub num_days: usize,

    pub rng_seed: u64,

    pub agent_configs: Vec<AgentConfig>,

    #[serde(default)]
    pub cost_rates: CostRates,

    #[serde(default)]
    pub lsm_config: LsmConfig,

    /// Applied at the start of their scheduled ticks, in this order
    #[serde(default)]
    pub scenario_events: Vec<ScheduledEvent>,

    #[serde(default)]
    pub priority_escalation: PriorityEscalationConfig,

    /// Cap generated deadlines at the end of the arrival's day
    #[serde(default)]
    pub deadline_cap_at_eod: bool,

    /// Keep every tick's events for `events_for_tick`
    #[serde(default)]
    pub retain_event_history: bool,
}

/// Per-agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,

    /// Opening settlement balance (cents)
    pub opening_balance: i64,

    /// Unsecured daylight overdraft capacity (cents)
    #[serde(default)]
    pub unsecured_cap: i64,

    #[serde(default)]
    pub policy: PolicyConfig,

    /// `None` means the agent generates no arrivals of its own
    #[serde(default)]
    pub arrival_config: Option<ArrivalConfig>,

    #[serde(default)]
    pub posted_collateral: i64,

    #[serde(default)]
    pub max_collateral_capacity: i64,

    /// Fraction of posted collateral that does not count as credit
    #[serde(default)]
    pub collateral_haircut: f64,

    #[serde(default)]
    pub min_collateral_holding_ticks: usize,

    /// Reserve target exposed to policies
    #[serde(default)]
    pub liquidity_buffer: i64,
}

/// Policy selection for an agent.
///
/// Every variant is compiled into a decision tree, so all agents run through
/// the same interpreter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PolicyConfig {
    /// Release everything immediately
    Fifo,

    /// Release when urgent or affordable, otherwise hold
    Deadline { urgency_threshold: usize },

    /// Keep `target_buffer` unless the payment is urgent
    LiquidityAware {
        target_buffer: i64,
        urgency_threshold: usize,
    },

    /// Policy JSON with optional parameter overrides
    FromJson {
        json: String,
        #[serde(default)]
        params: BTreeMap<String, f64>,
    },

    /// An already-parsed definition
    Tree { tree: DecisionTreeDef },
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig::Fifo
    }
}

/// Deadline-driven priority escalation for queued transactions.
///
/// Once a transaction is within `start_escalating_at_ticks` of its deadline,
/// its priority becomes `min(10, original + ceil(max_boost * progress))`
/// where progress runs linearly from 0 at the start of the window to 1 at
/// the deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityEscalationConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_start_escalating")]
    pub start_escalating_at_ticks: usize,

    #[serde(default = "default_max_boost")]
    pub max_boost: u8,
}

fn default_start_escalating() -> usize {
    20
}

fn default_max_boost() -> u8 {
    3
}

impl Default for PriorityEscalationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start_escalating_at_ticks: default_start_escalating(),
            max_boost: default_max_boost(),
        }
    }
}

impl PriorityEscalationConfig {
    /// Escalated priority for a transaction, or `None` outside the window
    pub fn escalated_priority(&self, original: u8, ticks_remaining: usize) -> Option<u8> {
        if !self.enabled || ticks_remaining > self.start_escalating_at_ticks {
            return None;
        }
        let progress = if self.start_escalating_at_ticks == 0 {
            1.0
        } else {
            1.0 - ticks_remaining as f64 / self.start_escalating_at_ticks as f64
        };
        let boost = (f64::from(self.max_boost) * progress).ceil() as u8;
        Some(original.saturating_add(boost).min(MAX_PRIORITY))
    }
}

impl AgentConfig {
    pub fn new(id: impl Into<String>, opening_balance: i64) -> Self {
        Self {
            id: id.into(),
            opening_balance,
            unsecured_cap: 0,
            policy: PolicyConfig::Fifo,
            arrival_config: None,
            posted_collateral: 0,
            max_collateral_capacity: 0,
            collateral_haircut: 0.0,
            min_collateral_holding_ticks: 0,
            liquidity_buffer: 0,
        }
    }

    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_unsecured_cap(mut self, cap: i64) -> Self {
        self.unsecured_cap = cap;
        self
    }

    pub fn with_arrivals(mut self, arrival_config: ArrivalConfig) -> Self {
        self.arrival_config = Some(arrival_config);
        self
    }

    /// Collateral position: already posted, capacity, haircut
    pub fn with_collateral(mut self, posted: i64, capacity: i64, haircut: f64) -> Self {
        self.posted_collateral = posted;
        self.max_collateral_capacity = capacity;
        self.collateral_haircut = haircut;
        self
    }

    fn validate(&self, known_agents: &BTreeSet<&str>) -> Result<(), ConfigurationError> {
        let invalid = |msg: String| ConfigurationError::InvalidConfig(format!("agent {}: {}", self.id, msg));

        if self.id.is_empty() {
            return Err(ConfigurationError::InvalidConfig("agent id must not be empty".into()));
        }
        if self.unsecured_cap < 0 {
            return Err(invalid(format!("unsecured_cap must be non-negative, got {}", self.unsecured_cap)));
        }
        if self.liquidity_buffer < 0 {
            return Err(invalid(format!(
                "liquidity_buffer must be non-negative, got {}",
                self.liquidity_buffer
            )));
        }
        if self.posted_collateral < 0 || self.max_collateral_capacity < 0 {
            return Err(invalid("collateral amounts must be non-negative".into()));
        }
        if self.max_collateral_capacity > 0 && self.posted_collateral > self.max_collateral_capacity {
            return Err(invalid(format!(
                "posted_collateral {} exceeds max_collateral_capacity {}",
                self.posted_collateral, self.max_collateral_capacity
            )));
        }
        if !(0.0..=1.0).contains(&self.collateral_haircut) {
            return Err(invalid(format!(
                "collateral_haircut must be in [0, 1], got {}",
                self.collateral_haircut
            )));
        }

        if let Some(arrivals) = &self.arrival_config {
            arrivals.validate().map_err(invalid)?;
            for counterparty in arrivals.counterparty_weights.keys() {
                if !known_agents.contains(counterparty.as_str()) {
                    return Err(ConfigurationError::UnknownAgent(counterparty.clone()));
                }
                if counterparty == &self.id {
                    return Err(invalid("counterparty weights must not include the agent itself".into()));
                }
            }
            if known_agents.len() < 2 {
                return Err(invalid("arrivals need at least one counterparty".into()));
            }
        }
        Ok(())
    }
}

impl PolicyConfig {
    /// Compile into a validated tree policy
    pub fn build(&self) -> Result<TreePolicy, ConfigurationError> {
        match self {
            PolicyConfig::Fifo => TreePolicy::new(presets::fifo()?),
            PolicyConfig::Deadline { urgency_threshold } => {
                TreePolicy::new(presets::deadline(*urgency_threshold)?)
            }
            PolicyConfig::LiquidityAware {
                target_buffer,
                urgency_threshold,
            } => TreePolicy::new(presets::liquidity_aware(*target_buffer, *urgency_threshold)?),
            PolicyConfig::FromJson { json, params } => TreePolicy::from_json_with_overrides(json, params),
            PolicyConfig::Tree { tree } => TreePolicy::new(tree.clone()),
        }
    }
}

impl OrchestratorConfig {
    /// Configuration with defaults for everything but the essentials
    pub fn new(ticks_per_day: usize, num_days: usize, rng_seed: u64, agent_configs: Vec<AgentConfig>) -> Self {
        Self {
            ticks_per_day,
            num_days,
            rng_seed,
            agent_configs,
            cost_rates: CostRates::default(),
            lsm_config: LsmConfig::default(),
            scenario_events: Vec::new(),
            priority_escalation: PriorityEscalationConfig::default(),
            deadline_cap_at_eod: false,
            retain_event_history: false,
        }
    }

    /// Length of the run in ticks
    pub fn total_ticks(&self) -> usize {
        self.ticks_per_day.saturating_mul(self.num_days)
    }

    /// Last tick of the run
    pub fn episode_end_tick(&self) -> usize {
        self.total_ticks().saturating_sub(1)
    }

    /// Check the whole configuration, returning the first problem found.
    ///
    /// Policies are validated too, by compiling them.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.ticks_per_day == 0 {
            return Err(ConfigurationError::InvalidConfig("ticks_per_day must be positive".into()));
        }
        if self.num_days == 0 {
            return Err(ConfigurationError::InvalidConfig("num_days must be positive".into()));
        }
        if self.ticks_per_day.checked_mul(self.num_days).is_none() {
            return Err(ConfigurationError::InvalidConfig("simulation horizon overflows".into()));
        }
        if self.agent_configs.is_empty() {
            return Err(ConfigurationError::InvalidConfig("at least one agent is required".into()));
        }

        let mut known = BTreeSet::new();
        for agent in &self.agent_configs {
            if !known.insert(agent.id.as_str()) {
                return Err(ConfigurationError::DuplicateAgent(agent.id.clone()));
            }
        }

        let mut total: i64 = 0;
        for agent in &self.agent_configs {
            agent.validate(&known)?;
            agent.policy.build()?;
            total = total.checked_add(agent.opening_balance).ok_or_else(|| {
                ConfigurationError::InvalidConfig("sum of opening balances overflows".into())
            })?;
        }

        self.cost_rates.validate().map_err(ConfigurationError::InvalidConfig)?;

        if self.lsm_config.enable_cycles && self.lsm_config.max_cycle_length < 3 {
            return Err(ConfigurationError::InvalidConfig(format!(
                "lsm max_cycle_length must be at least 3, got {}",
                self.lsm_config.max_cycle_length
            )));
        }

        if self.priority_escalation.max_boost > MAX_PRIORITY {
            return Err(ConfigurationError::InvalidConfig(format!(
                "priority escalation max_boost must be at most {}, got {}",
                MAX_PRIORITY, self.priority_escalation.max_boost
            )));
        }

        self.validate_scenario_events(&known)
    }

    fn validate_scenario_events(&self, known: &BTreeSet<&str>) -> Result<(), ConfigurationError> {
        let with_arrivals: BTreeSet<&str> = self
            .agent_configs
            .iter()
            .filter(|a| a.arrival_config.is_some())
            .map(|a| a.id.as_str())
            .collect();

        for scheduled in &self.scenario_events {
            let event = &scheduled.event;
            event.validate().map_err(ConfigurationError::InvalidConfig)?;
            for agent in event.referenced_agents() {
                if !known.contains(agent) {
                    return Err(ConfigurationError::UnknownAgent(agent.to_string()));
                }
            }
            match event {
                ScenarioEvent::AgentArrivalRateChange { agent, .. }
                | ScenarioEvent::CounterpartyWeightChange { agent, .. }
                    if !with_arrivals.contains(agent.as_str()) =>
                {
                    return Err(ConfigurationError::InvalidConfig(format!(
                        "scenario event targets agent {} which has no arrival config",
                        agent
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrivals::AmountDistribution;
    use crate::events::EventSchedule;

    fn two_agents() -> OrchestratorConfig {
        OrchestratorConfig::new(
            10,
            2,
            42,
            vec![AgentConfig::new("A", 1_000), AgentConfig::new("B", 1_000)],
        )
    }

    #[test]
    fn test_valid_config_passes() {
        assert_eq!(two_agents().validate(), Ok(()));
        assert_eq!(two_agents().total_ticks(), 20);
        assert_eq!(two_agents().episode_end_tick(), 19);
    }

    #[test]
    fn test_zero_ticks_rejected() {
        let mut config = two_agents();
        config.ticks_per_day = 0;
        assert!(matches!(config.validate(), Err(ConfigurationError::InvalidConfig(_))));
    }

    #[test]
    fn test_duplicate_agent_rejected() {
        let mut config = two_agents();
        config.agent_configs.push(AgentConfig::new("A", 5));
        assert_eq!(config.validate(), Err(ConfigurationError::DuplicateAgent("A".into())));
    }

    #[test]
    fn test_unknown_counterparty_rejected() {
        let mut arrivals = ArrivalConfig::new(1.0, AmountDistribution::Uniform { min: 10, max: 20 }, (1, 5));
        arrivals.counterparty_weights.insert("Z".into(), 1.0);
        let mut config = two_agents();
        config.agent_configs[0] = AgentConfig::new("A", 1_000).with_arrivals(arrivals);
        assert_eq!(config.validate(), Err(ConfigurationError::UnknownAgent("Z".into())));
    }

    #[test]
    fn test_bad_haircut_rejected() {
        let mut config = two_agents();
        config.agent_configs[1] = AgentConfig::new("B", 0).with_collateral(0, 100, 1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rate_change_without_arrivals_rejected() {
        let mut config = two_agents();
        config.scenario_events.push(ScheduledEvent {
            event: ScenarioEvent::AgentArrivalRateChange {
                agent: "A".into(),
                multiplier: 2.0,
            },
            schedule: EventSchedule::OneTime { tick: 3 },
        });
        assert!(matches!(config.validate(), Err(ConfigurationError::InvalidConfig(_))));
    }

    #[test]
    fn test_scenario_unknown_agent_rejected() {
        let mut config = two_agents();
        config.scenario_events.push(ScheduledEvent {
            event: ScenarioEvent::DirectTransfer {
                from_agent: "A".into(),
                to_agent: "Q".into(),
                amount: 10,
            },
            schedule: EventSchedule::OneTime { tick: 0 },
        });
        assert_eq!(config.validate(), Err(ConfigurationError::UnknownAgent("Q".into())));
    }

    #[test]
    fn test_short_cycle_length_rejected() {
        let mut config = two_agents();
        config.lsm_config.max_cycle_length = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_policy_json_rejected() {
        let mut config = two_agents();
        config.agent_configs[0].policy = PolicyConfig::FromJson {
            json: "{not json".into(),
            params: BTreeMap::new(),
        };
        assert!(matches!(config.validate(), Err(ConfigurationError::PolicyParse(_))));
    }

    #[test]
    fn test_policy_config_from_json() {
        let config: PolicyConfig =
            serde_json::from_str(r#"{"type": "Deadline", "urgency_threshold": 4}"#).unwrap();
        assert_eq!(config, PolicyConfig::Deadline { urgency_threshold: 4 });
        assert_eq!(config.build().unwrap().policy_id(), "deadline");
    }

    #[test]
    fn test_escalation_curve() {
        let esc = PriorityEscalationConfig {
            enabled: true,
            start_escalating_at_ticks: 10,
            max_boost: 4,
        };
        assert_eq!(esc.escalated_priority(5, 11), None);
        // progress 0 at the window edge
        assert_eq!(esc.escalated_priority(5, 10), Some(5));
        // progress 0.5 -> boost 2
        assert_eq!(esc.escalated_priority(5, 5), Some(7));
        // progress 0.9 -> ceil(3.6) = 4
        assert_eq!(esc.escalated_priority(5, 1), Some(9));
        assert_eq!(esc.escalated_priority(9, 0), Some(10));
    }

    #[test]
    fn test_escalation_disabled_by_default() {
        assert_eq!(PriorityEscalationConfig::default().escalated_priority(5, 0), None);
    }
}
