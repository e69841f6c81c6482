//! Cost model
//!
//! Every per-tick cost uses one rule:
//!
//! ```text
//! cost = floor(exposure × rate_bps × 1e-4)
//! ```
//!
//! Rates are always basis points. One-time penalties (deadline, end of
//! day, split friction) are flat cent amounts.

mod accumulator;
mod rates;

pub use accumulator::{bps_cost, CostAccumulator, CostBreakdown, CostError};
pub use rates::{priority_band, CostRates, PriorityBand, PriorityDelayMultipliers};
