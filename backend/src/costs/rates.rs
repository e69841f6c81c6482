//! Cost rate configuration

use serde::{Deserialize, Serialize};

/// Urgency band of a 0-10 priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriorityBand {
    /// 8-10
    Urgent,
    /// 4-7
    Normal,
    /// 0-3
    Low,
}

pub fn priority_band(priority: u8) -> PriorityBand {
    match priority {
        8..=10 => PriorityBand::Urgent,
        4..=7 => PriorityBand::Normal,
        _ => PriorityBand::Low,
    }
}

/// Delay-cost multipliers per priority band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityDelayMultipliers {
    #[serde(default = "one")]
    pub urgent_multiplier: f64,
    #[serde(default = "one")]
    pub normal_multiplier: f64,
    #[serde(default = "one")]
    pub low_multiplier: f64,
}

fn one() -> f64 {
    1.0
}

impl Default for PriorityDelayMultipliers {
    fn default() -> Self {
        Self {
            urgent_multiplier: 1.0,
            normal_multiplier: 1.0,
            low_multiplier: 1.0,
        }
    }
}

impl PriorityDelayMultipliers {
    pub fn multiplier_for(&self, priority: u8) -> f64 {
        match priority_band(priority) {
            PriorityBand::Urgent => self.urgent_multiplier,
            PriorityBand::Normal => self.normal_multiplier,
            PriorityBand::Low => self.low_multiplier,
        }
    }
}

/// Cost rates applied by the orchestrator.
///
/// All `*_bps*` fields are basis points per tick; penalties are cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostRates {
    /// Charged on `max(0, -balance)`
    pub overdraft_bps_per_tick: f64,

    /// Opportunity cost on posted collateral
    pub collateral_cost_per_tick_bps: f64,

    /// Charged on the remaining amount of every queued transaction
    pub delay_cost_per_tick_bps: f64,

    /// Delay-rate multiplier once a transaction is overdue
    pub overdue_delay_multiplier: f64,

    /// One-time penalty when a transaction misses its deadline
    pub deadline_penalty: i64,

    /// Per unsettled queued transaction at end of day
    pub eod_penalty_per_transaction: i64,

    /// Charged `split_friction_cost × (num_splits − 1)` at split time
    pub split_friction_cost: i64,

    pub priority_delay_multipliers: Option<PriorityDelayMultipliers>,
}

impl Default for CostRates {
    fn default() -> Self {
        Self {
            overdraft_bps_per_tick: 1.0,
            collateral_cost_per_tick_bps: 0.2,
            delay_cost_per_tick_bps: 1.0,
            overdue_delay_multiplier: 5.0,
            deadline_penalty: 50_000,
            eod_penalty_per_transaction: 10_000,
            split_friction_cost: 1_000,
            priority_delay_multipliers: None,
        }
    }
}

impl CostRates {
    /// Effective delay rate for one transaction, before flooring
    pub fn delay_rate_bps(&self, priority: u8, is_overdue: bool) -> f64 {
        let band = self
            .priority_delay_multipliers
            .as_ref()
            .map(|m| m.multiplier_for(priority))
            .unwrap_or(1.0);
        let overdue = if is_overdue {
            self.overdue_delay_multiplier
        } else {
            1.0
        };
        self.delay_cost_per_tick_bps * band * overdue
    }

    /// Negative or non-finite rates are configuration errors
    pub fn validate(&self) -> Result<(), String> {
        let rates = [
            ("overdraft_bps_per_tick", self.overdraft_bps_per_tick),
            ("collateral_cost_per_tick_bps", self.collateral_cost_per_tick_bps),
            ("delay_cost_per_tick_bps", self.delay_cost_per_tick_bps),
            ("overdue_delay_multiplier", self.overdue_delay_multiplier),
        ];
        for (name, value) in rates {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{} must be a non-negative number, got {}", name, value));
            }
        }
        let penalties = [
            ("deadline_penalty", self.deadline_penalty),
            ("eod_penalty_per_transaction", self.eod_penalty_per_transaction),
            ("split_friction_cost", self.split_friction_cost),
        ];
        for (name, value) in penalties {
            if value < 0 {
                return Err(format!("{} must be non-negative, got {}", name, value));
            }
        }
        if let Some(m) = &self.priority_delay_multipliers {
            for value in [m.urgent_multiplier, m.normal_multiplier, m.low_multiplier] {
                if !value.is_finite() || value < 0.0 {
                    return Err(format!("priority delay multiplier must be non-negative, got {}", value));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_bands() {
        assert_eq!(priority_band(10), PriorityBand::Urgent);
        assert_eq!(priority_band(8), PriorityBand::Urgent);
        assert_eq!(priority_band(7), PriorityBand::Normal);
        assert_eq!(priority_band(4), PriorityBand::Normal);
        assert_eq!(priority_band(3), PriorityBand::Low);
        assert_eq!(priority_band(0), PriorityBand::Low);
    }

    #[test]
    fn test_delay_rate_combines_multipliers() {
        let rates = CostRates {
            delay_cost_per_tick_bps: 2.0,
            overdue_delay_multiplier: 5.0,
            priority_delay_multipliers: Some(PriorityDelayMultipliers {
                urgent_multiplier: 1.5,
                normal_multiplier: 1.0,
                low_multiplier: 0.5,
            }),
            ..CostRates::default()
        };
        assert_eq!(rates.delay_rate_bps(9, false), 3.0);
        assert_eq!(rates.delay_rate_bps(9, true), 15.0);
        assert_eq!(rates.delay_rate_bps(1, false), 1.0);
    }

    #[test]
    fn test_validate_rejects_negative_rate() {
        let rates = CostRates {
            overdraft_bps_per_tick: -1.0,
            ..CostRates::default()
        };
        assert!(rates.validate().is_err());
        assert!(CostRates::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let rates: CostRates = serde_json::from_str(r#"{"deadline_penalty": 7}"#).unwrap();
        assert_eq!(rates.deadline_penalty, 7);
        assert_eq!(rates.overdue_delay_multiplier, 5.0);
    }
}
