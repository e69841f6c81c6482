//! Cost arithmetic and per-agent accumulation

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CostError {
    #[error("Rate {bps} bps is not a finite non-negative number")]
    InvalidRate { bps: f64 },

    #[error("Cost overflow: exposure {exposure} at {bps} bps")]
    Overflow { exposure: i64, bps: f64 },
}

/// `floor(exposure × bps × 1e-4)` in cents.
///
/// Exposure below zero is treated as zero. A result outside `i64` is an
/// error; costs are never clamped.
///
/// # Example
/// ```
/// use rtgs_sim_core::costs::bps_cost;
///
/// assert_eq!(bps_cost(1_000_000, 0.8).unwrap(), 80);
/// assert_eq!(bps_cost(1_000_000, 0.0005).unwrap(), 0);
/// ```
pub fn bps_cost(exposure: i64, bps: f64) -> Result<i64, CostError> {
    if !bps.is_finite() || bps < 0.0 {
        return Err(CostError::InvalidRate { bps });
    }
    if exposure <= 0 || bps == 0.0 {
        return Ok(0);
    }
    let raw = (exposure as f64 * bps * 1e-4).floor();
    if raw >= i64::MAX as f64 {
        return Err(CostError::Overflow { exposure, bps });
    }
    Ok(raw as i64)
}

/// Costs for one agent over one accrual step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub overdraft_cost: i64,
    pub collateral_cost: i64,
    pub delay_cost: i64,
    pub deadline_penalty: i64,
    pub split_friction_cost: i64,
    pub eod_penalty: i64,
}

impl CostBreakdown {
    pub fn total(&self) -> Option<i64> {
        self.overdraft_cost
            .checked_add(self.collateral_cost)?
            .checked_add(self.delay_cost)?
            .checked_add(self.deadline_penalty)?
            .checked_add(self.split_friction_cost)?
            .checked_add(self.eod_penalty)
    }

    pub fn is_zero(&self) -> bool {
        *self == CostBreakdown::default()
    }
}

/// Running cost totals for one agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostAccumulator {
    pub total_overdraft_cost: i64,
    pub total_collateral_cost: i64,
    pub total_delay_cost: i64,
    pub total_deadline_penalty: i64,
    pub total_split_friction_cost: i64,
    pub total_eod_penalty: i64,
    /// Largest overdraft observed at an accrual point
    pub peak_net_debit: i64,
}

impl CostAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a breakdown in; `None` on overflow
    pub fn add(&mut self, costs: &CostBreakdown) -> Option<()> {
        self.total_overdraft_cost = self.total_overdraft_cost.checked_add(costs.overdraft_cost)?;
        self.total_collateral_cost = self
            .total_collateral_cost
            .checked_add(costs.collateral_cost)?;
        self.total_delay_cost = self.total_delay_cost.checked_add(costs.delay_cost)?;
        self.total_deadline_penalty = self
            .total_deadline_penalty
            .checked_add(costs.deadline_penalty)?;
        self.total_split_friction_cost = self
            .total_split_friction_cost
            .checked_add(costs.split_friction_cost)?;
        self.total_eod_penalty = self.total_eod_penalty.checked_add(costs.eod_penalty)?;
        Some(())
    }

    pub fn observe_net_debit(&mut self, balance: i64) {
        if balance < 0 {
            self.peak_net_debit = self.peak_net_debit.max(balance.saturating_neg());
        }
    }

    /// Sum of all categories
    pub fn total(&self) -> i64 {
        [
            self.total_overdraft_cost,
            self.total_collateral_cost,
            self.total_delay_cost,
            self.total_deadline_penalty,
            self.total_split_friction_cost,
            self.total_eod_penalty,
        ]
        .iter()
        .fold(0i64, |acc, v| acc.saturating_add(*v))
    }
}
