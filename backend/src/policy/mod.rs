//! Agent policies
//!
//! Every agent decision is made by a JSON decision tree evaluated by the
//! interpreter in [`tree`]. Four tree roles exist, each with its own action
//! vocabulary:
//!
//! | Tree | Evaluated | Decision |
//! |---|---|---|
//! | `payment_tree` | per Queue-1 transaction per tick | [`PaymentDecision`] |
//! | `bank_tree` | per agent per tick | [`BankDecision`] |
//! | `strategic_collateral_tree` | per agent per tick | [`CollateralDecision`] |
//! | `end_of_tick_collateral_tree` | per agent per tick | [`CollateralDecision`] |
//!
//! Evaluation never mutates state; the orchestrator applies the decision.
//! The built-in policies in [`presets`] are ordinary trees.
//!
//! ```rust
//! use rtgs_sim_core::policy::presets;
//! use rtgs_sim_core::policy::tree::TreePolicy;
//!
//! let policy = TreePolicy::new(presets::fifo().unwrap()).unwrap();
//! assert_eq!(policy.policy_id(), "fifo");
//! ```

use crate::models::transaction::RtgsPriority;
use serde::{Deserialize, Serialize};

pub mod presets;
pub mod tree;

/// Decision for one Queue-1 transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PaymentDecision {
    /// Move to Queue-2. Without a declared priority the transaction's
    /// internal priority is mapped to an RTGS band.
    Release { rtgs_priority: Option<RtgsPriority> },

    /// Post collateral to cover any liquidity shortfall, then release
    ReleaseWithCredit { rtgs_priority: Option<RtgsPriority> },

    /// Keep in Queue-1 until next tick
    Hold { reason: String },

    /// Remove from all queues; the obligation is abandoned
    Drop { reason: String },

    /// Replace with `num_splits` children in Queue-1
    Split { num_splits: usize },

    /// Change priority and keep in Queue-1
    Reprioritize { new_priority: u8 },
}

/// Decision for the agent as a whole, made before payment decisions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BankDecision {
    SetReleaseBudget {
        max_value: i64,
        focus_counterparties: Option<Vec<String>>,
        max_per_counterparty: Option<i64>,
    },
    SetState {
        key: String,
        value: f64,
        reason: String,
    },
    AddState {
        key: String,
        delta: f64,
        reason: String,
    },
    NoAction,
}

/// Collateral decision from either collateral tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CollateralDecision {
    Post {
        amount: i64,
        reason: String,
        /// Schedule an automatic withdrawal this many ticks later
        auto_withdraw_after_ticks: Option<usize>,
    },
    Withdraw {
        amount: i64,
        reason: String,
    },
    Hold,
}
