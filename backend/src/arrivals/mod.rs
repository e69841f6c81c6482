//! Arrival generation
//!
//! Creates new transactions each tick from per-agent stochastic processes.
//! All draws come from the simulation's single RNG in a fixed order:
//!
//! 1. agents in sorted id order (agents without a config draw nothing)
//! 2. per agent: one Poisson draw for the count
//! 3. per transaction: amount, counterparty, deadline offset, priority
//!
//! Transaction ids come from the state's id allocator and consume no draws.
//!
//! # Example
//!
//! ```
//! use rtgs_sim_core::arrivals::{AmountDistribution, ArrivalConfig, ArrivalGenerator};
//! use rtgs_sim_core::models::TxIdAllocator;
//! use rtgs_sim_core::rng::RngManager;
//! use std::collections::BTreeMap;
//!
//! let mut configs = BTreeMap::new();
//! configs.insert(
//!     "BANK_A".to_string(),
//!     ArrivalConfig::new(2.0, AmountDistribution::Uniform { min: 1_000, max: 5_000 }, (5, 10)),
//! );
//! let agents = vec!["BANK_A".to_string(), "BANK_B".to_string()];
//! let generator = ArrivalGenerator::new(configs, agents, 99, 100, false);
//!
//! let mut rng = RngManager::new(42);
//! let mut ids = TxIdAllocator::new(42, 0);
//! let txs = generator.generate_for_agent("BANK_A", 0, &mut rng, &mut ids).unwrap();
//! assert!(txs.iter().all(|tx| tx.receiver_id() == "BANK_B"));
//! ```

use crate::models::state::TxIdAllocator;
use crate::models::transaction::{Transaction, TransactionError, MAX_PRIORITY};
use crate::rng::RngManager;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Transaction amount distribution (cents)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AmountDistribution {
    /// Inclusive bounds
    Uniform { min: i64, max: i64 },
    Normal { mean: i64, std_dev: i64 },
    /// Parameters of the underlying normal in log space
    LogNormal { mean: f64, std_dev: f64 },
    Exponential { lambda: f64 },
}

impl AmountDistribution {
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            AmountDistribution::Uniform { min, max } => {
                if min <= 0 || max < min {
                    return Err(format!("uniform amount bounds invalid: [{}, {}]", min, max));
                }
            }
            AmountDistribution::Normal { mean, std_dev } => {
                if mean <= 0 || std_dev < 0 {
                    return Err(format!("normal amount parameters invalid: mean={} std_dev={}", mean, std_dev));
                }
            }
            AmountDistribution::LogNormal { mean, std_dev } => {
                if !mean.is_finite() || !std_dev.is_finite() || std_dev < 0.0 {
                    return Err(format!("log-normal parameters invalid: mean={} std_dev={}", mean, std_dev));
                }
            }
            AmountDistribution::Exponential { lambda } => {
                if !lambda.is_finite() || lambda <= 0.0 {
                    return Err(format!("exponential lambda must be positive, got {}", lambda));
                }
            }
        }
        Ok(())
    }

    /// Draw one amount; never below one cent
    pub fn sample(&self, rng: &mut RngManager) -> i64 {
        let amount = match *self {
            AmountDistribution::Uniform { min, max } => rng.range(min, max.saturating_add(1)),
            AmountDistribution::Normal { mean, std_dev } => {
                let z = rng.standard_normal();
                to_cents(mean as f64 + std_dev as f64 * z)
            }
            AmountDistribution::LogNormal { mean, std_dev } => {
                let z = rng.standard_normal();
                to_cents((mean + std_dev * z).exp())
            }
            AmountDistribution::Exponential { lambda } => {
                let u = rng.next_f64();
                to_cents(-(1.0 - u).ln() / lambda)
            }
        };
        amount.max(1)
    }
}

fn to_cents(value: f64) -> i64 {
    if value.is_nan() {
        return 1;
    }
    // float-to-int casts saturate
    value.round() as i64
}

/// Priority assignment for generated transactions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PriorityDistribution {
    Fixed { value: u8 },
    /// Inclusive bounds
    Uniform { min: u8, max: u8 },
    Categorical { values: Vec<u8>, weights: Vec<f64> },
}

impl Default for PriorityDistribution {
    fn default() -> Self {
        PriorityDistribution::Fixed { value: 5 }
    }
}

impl PriorityDistribution {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            PriorityDistribution::Fixed { value } if *value > MAX_PRIORITY => {
                Err(format!("priority {} exceeds {}", value, MAX_PRIORITY))
            }
            PriorityDistribution::Uniform { min, max } if min > max || *max > MAX_PRIORITY => {
                Err(format!("priority range invalid: [{}, {}]", min, max))
            }
            PriorityDistribution::Categorical { values, weights } => {
                if values.is_empty() || values.len() != weights.len() {
                    return Err("categorical priority needs matching non-empty values and weights".into());
                }
                if values.iter().any(|v| *v > MAX_PRIORITY) {
                    return Err(format!("categorical priority above {}", MAX_PRIORITY));
                }
                if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
                    return Err("categorical priority weights must be non-negative with a positive sum".into());
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Fixed priorities draw nothing
    pub fn sample(&self, rng: &mut RngManager) -> u8 {
        match self {
            PriorityDistribution::Fixed { value } => *value,
            PriorityDistribution::Uniform { min, max } => {
                rng.range(*min as i64, *max as i64 + 1) as u8
            }
            PriorityDistribution::Categorical { values, weights } => {
                let total: f64 = weights.iter().sum();
                let mut target = rng.next_f64() * total;
                for (value, weight) in values.iter().zip(weights) {
                    if target < *weight {
                        return *value;
                    }
                    target -= weight;
                }
                values.last().copied().unwrap_or(5)
            }
        }
    }
}

/// Arrival process for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrivalConfig {
    /// Poisson λ per tick
    pub rate_per_tick: f64,

    pub amount_distribution: AmountDistribution,

    /// Receiver weights; empty means uniform over all other agents,
    /// otherwise only listed counterparties are drawn
    #[serde(default)]
    pub counterparty_weights: BTreeMap<String, f64>,

    /// Deadline offset from arrival, inclusive `(min, max)`
    pub deadline_range: (usize, usize),

    #[serde(default)]
    pub priority_distribution: PriorityDistribution,

    #[serde(default)]
    pub divisible: bool,
}

impl ArrivalConfig {
    pub fn new(
        rate_per_tick: f64,
        amount_distribution: AmountDistribution,
        deadline_range: (usize, usize),
    ) -> Self {
        Self {
            rate_per_tick,
            amount_distribution,
            counterparty_weights: BTreeMap::new(),
            deadline_range,
            priority_distribution: PriorityDistribution::default(),
            divisible: false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.rate_per_tick.is_finite() || self.rate_per_tick < 0.0 {
            return Err(format!("rate_per_tick must be non-negative, got {}", self.rate_per_tick));
        }
        self.amount_distribution.validate()?;
        self.priority_distribution.validate()?;
        let (min, max) = self.deadline_range;
        if min == 0 || max < min {
            return Err(format!("deadline_range invalid: ({}, {})", min, max));
        }
        if self
            .counterparty_weights
            .values()
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            return Err("counterparty weights must be non-negative".into());
        }
        Ok(())
    }
}

/// Generates arrivals for every configured agent.
///
/// Holds both the live configs (mutated by scenario events) and the base
/// configs they started from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrivalGenerator {
    configs: BTreeMap<String, ArrivalConfig>,
    base_configs: BTreeMap<String, ArrivalConfig>,
    /// Sorted
    all_agent_ids: Vec<String>,
    /// Last tick of the episode
    episode_end_tick: usize,
    ticks_per_day: usize,
    deadline_cap_at_eod: bool,
}

impl ArrivalGenerator {
    pub fn new(
        configs: BTreeMap<String, ArrivalConfig>,
        mut all_agent_ids: Vec<String>,
        episode_end_tick: usize,
        ticks_per_day: usize,
        deadline_cap_at_eod: bool,
    ) -> Self {
        all_agent_ids.sort();
        Self {
            base_configs: configs.clone(),
            configs,
            all_agent_ids,
            episode_end_tick,
            ticks_per_day: ticks_per_day.max(1),
            deadline_cap_at_eod,
        }
    }

    pub fn config(&self, agent_id: &str) -> Option<&ArrivalConfig> {
        self.configs.get(agent_id)
    }

    /// Generate every agent's arrivals for `tick`, in sorted agent order
    pub fn generate_all(
        &self,
        tick: usize,
        rng: &mut RngManager,
        ids: &mut TxIdAllocator,
    ) -> Result<Vec<Transaction>, TransactionError> {
        let mut all = Vec::new();
        for agent_id in self.configs.keys() {
            all.extend(self.generate_for_agent(agent_id, tick, rng, ids)?);
        }
        Ok(all)
    }

    pub fn generate_for_agent(
        &self,
        agent_id: &str,
        tick: usize,
        rng: &mut RngManager,
        ids: &mut TxIdAllocator,
    ) -> Result<Vec<Transaction>, TransactionError> {
        let config = match self.configs.get(agent_id) {
            Some(config) => config,
            None => return Ok(Vec::new()),
        };

        let count = rng.poisson(config.rate_per_tick);
        let mut transactions = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let amount = config.amount_distribution.sample(rng);
            let receiver = match self.select_counterparty(agent_id, &config.counterparty_weights, rng) {
                Some(receiver) => receiver,
                None => break,
            };
            let deadline = self.generate_deadline(tick, config.deadline_range, rng);
            let priority = config.priority_distribution.sample(rng);

            let tx = Transaction::new(ids.allocate(), agent_id, receiver, amount, tick, deadline)?
                .with_priority(priority)
                .with_divisible(config.divisible);
            transactions.push(tx);
        }

        Ok(transactions)
    }

    fn select_counterparty(
        &self,
        sender_id: &str,
        weights: &BTreeMap<String, f64>,
        rng: &mut RngManager,
    ) -> Option<String> {
        let candidates: Vec<(&String, f64)> = if weights.is_empty() {
            self.all_agent_ids
                .iter()
                .filter(|id| id.as_str() != sender_id)
                .map(|id| (id, 1.0))
                .collect()
        } else {
            weights
                .iter()
                .filter(|(id, w)| id.as_str() != sender_id && **w > 0.0)
                .filter(|(id, _)| self.all_agent_ids.contains(id))
                .map(|(id, w)| (id, *w))
                .collect()
        };

        if candidates.is_empty() {
            return None;
        }
        if weights.is_empty() {
            let idx = rng.range(0, candidates.len() as i64) as usize;
            return Some(candidates[idx].0.clone());
        }

        let total: f64 = candidates.iter().map(|(_, w)| w).sum();
        let mut target = rng.next_f64() * total;
        for (id, weight) in &candidates {
            if target < *weight {
                return Some((*id).clone());
            }
            target -= weight;
        }
        candidates.last().map(|(id, _)| (*id).clone())
    }

    /// Deadline offset drawn from the range, capped at the episode end (and
    /// optionally the end of the arrival day), never before `tick + 1`
    fn generate_deadline(&self, tick: usize, range: (usize, usize), rng: &mut RngManager) -> usize {
        let (min_offset, max_offset) = range;
        let offset = rng.range(min_offset as i64, max_offset as i64 + 1) as usize;
        let mut deadline = (tick + offset).min(self.episode_end_tick);
        if self.deadline_cap_at_eod {
            let day_end = (tick / self.ticks_per_day + 1) * self.ticks_per_day - 1;
            deadline = deadline.min(day_end);
        }
        deadline.max(tick + 1)
    }

    // ========================================================================
    // Runtime changes from scenario events
    // ========================================================================

    /// Replace one agent's rate; returns the previous rate
    pub fn set_rate(&mut self, agent_id: &str, rate_per_tick: f64) -> Option<f64> {
        let config = self.configs.get_mut(agent_id)?;
        let old = config.rate_per_tick;
        config.rate_per_tick = rate_per_tick.max(0.0);
        Some(old)
    }

    /// Multiply one agent's current rate; returns `(old, new)`
    pub fn multiply_rate(&mut self, agent_id: &str, multiplier: f64) -> Option<(f64, f64)> {
        let config = self.configs.get_mut(agent_id)?;
        let old = config.rate_per_tick;
        config.rate_per_tick = (old * multiplier).max(0.0);
        Some((old, config.rate_per_tick))
    }

    pub fn multiply_all_rates(&mut self, multiplier: f64) {
        for config in self.configs.values_mut() {
            config.rate_per_tick = (config.rate_per_tick * multiplier).max(0.0);
        }
    }

    /// Set a counterparty weight; returns the previous weight.
    ///
    /// With `auto_balance_others`, the other listed weights are rescaled so
    /// the total is unchanged.
    pub fn set_counterparty_weight(
        &mut self,
        agent_id: &str,
        counterparty: &str,
        new_weight: f64,
        auto_balance_others: bool,
    ) -> Option<f64> {
        let config = self.configs.get_mut(agent_id)?;
        let weights = &mut config.counterparty_weights;
        let old = weights.get(counterparty).copied().unwrap_or(0.0);
        let total_before: f64 = weights.values().sum();
        weights.insert(counterparty.to_string(), new_weight.max(0.0));

        if auto_balance_others {
            let others_before = total_before - old;
            let others_target = (total_before - new_weight).max(0.0);
            if others_before > 0.0 {
                let factor = others_target / others_before;
                for (id, w) in weights.iter_mut() {
                    if id != counterparty {
                        *w *= factor;
                    }
                }
            }
        }
        Some(old)
    }

    /// Scale every agent's deadline range from its base configuration
    pub fn scale_deadline_ranges(&mut self, min_multiplier: Option<f64>, max_multiplier: Option<f64>) {
        for (agent_id, config) in self.configs.iter_mut() {
            let base = match self.base_configs.get(agent_id) {
                Some(base) => base.deadline_range,
                None => config.deadline_range,
            };
            let scale = |value: usize, m: Option<f64>| match m {
                Some(m) => ((value as f64 * m).round() as usize).max(1),
                None => value,
            };
            let min = scale(base.0, min_multiplier);
            let max = scale(base.1, max_multiplier).max(min);
            config.deadline_range = (min, max);
        }
    }
}
