//! Simulation events
//!
//! Every state mutation emits exactly one event carrying the values needed
//! to reconstruct it externally: amounts, before/after balances, reasons and
//! decision paths. Events within a tick follow the orchestrator's phase
//! order, so an event batch is a reproducible replay log.
//!
//! # Example
//!
//! ```rust
//! use rtgs_sim_core::models::Event;
//!
//! let event = Event::Arrival {
//!     tick: 10,
//!     tx_id: "tx-1".to_string(),
//!     sender_id: "BANK_A".to_string(),
//!     receiver_id: "BANK_B".to_string(),
//!     amount: 100_000,
//!     deadline: 20,
//!     priority: 5,
//!     is_divisible: false,
//! };
//! assert_eq!(event.tick(), 10);
//! assert_eq!(event.event_type(), "Arrival");
//! ```

use crate::costs::CostBreakdown;
use crate::models::transaction::RtgsPriority;
use serde::{Deserialize, Serialize};

/// What caused a collateral movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollateralTrigger {
    StrategicTree,
    EndOfTickTree,
    ReleaseWithCredit,
    AutoWithdrawTimer,
}

/// A single state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum Event {
    // ------------------------------------------------------------------
    // Phase 1: scenario events
    // ------------------------------------------------------------------
    DirectTransfer {
        tick: usize,
        from_agent: String,
        to_agent: String,
        amount: i64,
        from_balance_before: i64,
        from_balance_after: i64,
        to_balance_before: i64,
        to_balance_after: i64,
    },

    CollateralAdjusted {
        tick: usize,
        agent_id: String,
        delta: i64,
        collateral_before: i64,
        collateral_after: i64,
    },

    GlobalArrivalRateChanged {
        tick: usize,
        multiplier: f64,
    },

    AgentArrivalRateChanged {
        tick: usize,
        agent_id: String,
        multiplier: f64,
        old_rate: f64,
        new_rate: f64,
    },

    CounterpartyWeightChanged {
        tick: usize,
        agent_id: String,
        counterparty: String,
        old_weight: f64,
        new_weight: f64,
        auto_balance_others: bool,
    },

    DeadlineWindowChanged {
        tick: usize,
        min_ticks_multiplier: Option<f64>,
        max_ticks_multiplier: Option<f64>,
    },

    /// Transaction injected by a scenario rather than the arrival process
    ScheduledTransactionInjected {
        tick: usize,
        tx_id: String,
        sender_id: String,
        receiver_id: String,
        amount: i64,
        deadline: usize,
        priority: u8,
        is_divisible: bool,
    },

    // ------------------------------------------------------------------
    // Phase 2: arrivals
    // ------------------------------------------------------------------
    Arrival {
        tick: usize,
        tx_id: String,
        sender_id: String,
        receiver_id: String,
        amount: i64,
        deadline: usize,
        priority: u8,
        is_divisible: bool,
    },

    // ------------------------------------------------------------------
    // Phase 3: bank tree
    // ------------------------------------------------------------------
    BankBudgetSet {
        tick: usize,
        agent_id: String,
        max_value: i64,
        focus_counterparties: Option<Vec<String>>,
        max_per_counterparty: Option<i64>,
        decision_path: Vec<String>,
    },

    StateRegisterSet {
        tick: usize,
        agent_id: String,
        register_key: String,
        old_value: f64,
        new_value: f64,
        reason: String,
        decision_path: Vec<String>,
    },

    /// A bank or collateral tree failed at runtime; the decision was skipped
    PolicyEvaluationFailed {
        tick: usize,
        agent_id: String,
        tree: String,
        error: String,
    },

    // ------------------------------------------------------------------
    // Phase 4: payment tree
    // ------------------------------------------------------------------
    PolicySubmit {
        tick: usize,
        agent_id: String,
        tx_id: String,
        amount: i64,
        rtgs_priority: RtgsPriority,
        decision_path: Vec<String>,
    },

    PolicyHold {
        tick: usize,
        agent_id: String,
        tx_id: String,
        reason: String,
        decision_path: Vec<String>,
    },

    PolicyDrop {
        tick: usize,
        agent_id: String,
        tx_id: String,
        amount: i64,
        reason: String,
        decision_path: Vec<String>,
    },

    PolicySplit {
        tick: usize,
        agent_id: String,
        tx_id: String,
        num_splits: usize,
        child_ids: Vec<String>,
        child_amounts: Vec<i64>,
        friction_cost: i64,
        decision_path: Vec<String>,
    },

    TransactionReprioritized {
        tick: usize,
        agent_id: String,
        tx_id: String,
        old_priority: u8,
        new_priority: u8,
        decision_path: Vec<String>,
    },

    /// Transaction entered Queue-2
    QueuedRtgs {
        tick: usize,
        tx_id: String,
        sender_id: String,
        rtgs_priority: RtgsPriority,
        queue2_size: usize,
    },

    // ------------------------------------------------------------------
    // Phase 5: RTGS settlement
    // ------------------------------------------------------------------
    RtgsSettlement {
        tick: usize,
        tx_id: String,
        sender_id: String,
        receiver_id: String,
        amount: i64,
        sender_balance_before: i64,
        sender_balance_after: i64,
        receiver_balance_before: i64,
        receiver_balance_after: i64,
    },

    OverdueTransactionSettled {
        tick: usize,
        tx_id: String,
        sender_id: String,
        receiver_id: String,
        amount: i64,
        deadline_tick: usize,
        ticks_overdue: usize,
    },

    /// A split child settled and its parent's remaining amount moved
    SplitParentProgress {
        tick: usize,
        parent_id: String,
        child_id: String,
        settled_amount: i64,
        parent_remaining: i64,
        parent_settled: bool,
    },

    // ------------------------------------------------------------------
    // Phase 6: LSM
    // ------------------------------------------------------------------
    LsmBilateralOffset {
        tick: usize,
        round: usize,
        agent_a: String,
        agent_b: String,
        tx_ids_a_to_b: Vec<String>,
        tx_ids_b_to_a: Vec<String>,
        amount_a_to_b: i64,
        amount_b_to_a: i64,
        /// Net balance change of `agent_a` (negative = pays)
        net_a: i64,
        net_b: i64,
    },

    LsmCycleSettlement {
        tick: usize,
        round: usize,
        agents: Vec<String>,
        tx_ids: Vec<String>,
        tx_amounts: Vec<i64>,
        /// Net balance change per entry of `agents`
        net_positions: Vec<i64>,
        total_value: i64,
        max_net_outflow: i64,
        max_net_outflow_agent: String,
    },

    LsmCycleRejected {
        tick: usize,
        round: usize,
        agents: Vec<String>,
        tx_ids: Vec<String>,
        infeasible_agent: String,
        net_outflow: i64,
        available_liquidity: i64,
    },

    // ------------------------------------------------------------------
    // Phase 7: overdue, escalation, per-tick costs
    // ------------------------------------------------------------------
    TransactionWentOverdue {
        tick: usize,
        tx_id: String,
        sender_id: String,
        receiver_id: String,
        amount: i64,
        remaining_amount: i64,
        deadline_tick: usize,
        deadline_penalty: i64,
    },

    PriorityEscalated {
        tick: usize,
        tx_id: String,
        sender_id: String,
        old_priority: u8,
        new_priority: u8,
        ticks_to_deadline: i64,
    },

    CostAccrual {
        tick: usize,
        agent_id: String,
        costs: CostBreakdown,
    },

    // ------------------------------------------------------------------
    // Phase 8: collateral and end of day
    // ------------------------------------------------------------------
    CollateralPost {
        tick: usize,
        agent_id: String,
        amount: i64,
        reason: String,
        trigger: CollateralTrigger,
        new_total: i64,
        auto_withdraw_at: Option<usize>,
        decision_path: Vec<String>,
    },

    CollateralWithdraw {
        tick: usize,
        agent_id: String,
        amount: i64,
        reason: String,
        trigger: CollateralTrigger,
        new_total: i64,
        decision_path: Vec<String>,
    },

    /// A collateral decision was refused by a guard
    CollateralActionBlocked {
        tick: usize,
        agent_id: String,
        action: String,
        requested: i64,
        reason: String,
        trigger: CollateralTrigger,
    },

    EndOfDayPenalty {
        tick: usize,
        day: usize,
        agent_id: String,
        unsettled_count: usize,
        penalty: i64,
    },

    StateRegistersReset {
        tick: usize,
        agent_id: String,
        registers: Vec<(String, f64)>,
    },

    AgentDailySnapshot {
        tick: usize,
        day: usize,
        agent_id: String,
        balance: i64,
        effective_liquidity: i64,
        posted_collateral: i64,
        queue1_size: usize,
        queue2_size: usize,
        total_cost: i64,
    },

    EndOfDay {
        tick: usize,
        day: usize,
        unsettled_count: usize,
        total_penalties: i64,
    },
}

impl Event {
    pub fn tick(&self) -> usize {
        match self {
            Event::DirectTransfer { tick, .. }
            | Event::CollateralAdjusted { tick, .. }
            | Event::GlobalArrivalRateChanged { tick, .. }
            | Event::AgentArrivalRateChanged { tick, .. }
            | Event::CounterpartyWeightChanged { tick, .. }
            | Event::DeadlineWindowChanged { tick, .. }
            | Event::ScheduledTransactionInjected { tick, .. }
            | Event::Arrival { tick, .. }
            | Event::BankBudgetSet { tick, .. }
            | Event::StateRegisterSet { tick, .. }
            | Event::PolicyEvaluationFailed { tick, .. }
            | Event::PolicySubmit { tick, .. }
            | Event::PolicyHold { tick, .. }
            | Event::PolicyDrop { tick, .. }
            | Event::PolicySplit { tick, .. }
            | Event::TransactionReprioritized { tick, .. }
            | Event::QueuedRtgs { tick, .. }
            | Event::RtgsSettlement { tick, .. }
            | Event::OverdueTransactionSettled { tick, .. }
            | Event::SplitParentProgress { tick, .. }
            | Event::LsmBilateralOffset { tick, .. }
            | Event::LsmCycleSettlement { tick, .. }
            | Event::LsmCycleRejected { tick, .. }
            | Event::TransactionWentOverdue { tick, .. }
            | Event::PriorityEscalated { tick, .. }
            | Event::CostAccrual { tick, .. }
            | Event::CollateralPost { tick, .. }
            | Event::CollateralWithdraw { tick, .. }
            | Event::CollateralActionBlocked { tick, .. }
            | Event::EndOfDayPenalty { tick, .. }
            | Event::StateRegistersReset { tick, .. }
            | Event::AgentDailySnapshot { tick, .. }
            | Event::EndOfDay { tick, .. } => *tick,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Event::DirectTransfer { .. } => "DirectTransfer",
            Event::CollateralAdjusted { .. } => "CollateralAdjusted",
            Event::GlobalArrivalRateChanged { .. } => "GlobalArrivalRateChanged",
            Event::AgentArrivalRateChanged { .. } => "AgentArrivalRateChanged",
            Event::CounterpartyWeightChanged { .. } => "CounterpartyWeightChanged",
            Event::DeadlineWindowChanged { .. } => "DeadlineWindowChanged",
            Event::ScheduledTransactionInjected { .. } => "ScheduledTransactionInjected",
            Event::Arrival { .. } => "Arrival",
            Event::BankBudgetSet { .. } => "BankBudgetSet",
            Event::StateRegisterSet { .. } => "StateRegisterSet",
            Event::PolicyEvaluationFailed { .. } => "PolicyEvaluationFailed",
            Event::PolicySubmit { .. } => "PolicySubmit",
            Event::PolicyHold { .. } => "PolicyHold",
            Event::PolicyDrop { .. } => "PolicyDrop",
            Event::PolicySplit { .. } => "PolicySplit",
            Event::TransactionReprioritized { .. } => "TransactionReprioritized",
            Event::QueuedRtgs { .. } => "QueuedRtgs",
            Event::RtgsSettlement { .. } => "RtgsSettlement",
            Event::OverdueTransactionSettled { .. } => "OverdueTransactionSettled",
            Event::SplitParentProgress { .. } => "SplitParentProgress",
            Event::LsmBilateralOffset { .. } => "LsmBilateralOffset",
            Event::LsmCycleSettlement { .. } => "LsmCycleSettlement",
            Event::LsmCycleRejected { .. } => "LsmCycleRejected",
            Event::TransactionWentOverdue { .. } => "TransactionWentOverdue",
            Event::PriorityEscalated { .. } => "PriorityEscalated",
            Event::CostAccrual { .. } => "CostAccrual",
            Event::CollateralPost { .. } => "CollateralPost",
            Event::CollateralWithdraw { .. } => "CollateralWithdraw",
            Event::CollateralActionBlocked { .. } => "CollateralActionBlocked",
            Event::EndOfDayPenalty { .. } => "EndOfDayPenalty",
            Event::StateRegistersReset { .. } => "StateRegistersReset",
            Event::AgentDailySnapshot { .. } => "AgentDailySnapshot",
            Event::EndOfDay { .. } => "EndOfDay",
        }
    }

    /// Primary transaction of the event, if it is about exactly one
    pub fn tx_id(&self) -> Option<&str> {
        match self {
            Event::ScheduledTransactionInjected { tx_id, .. }
            | Event::Arrival { tx_id, .. }
            | Event::PolicySubmit { tx_id, .. }
            | Event::PolicyHold { tx_id, .. }
            | Event::PolicyDrop { tx_id, .. }
            | Event::PolicySplit { tx_id, .. }
            | Event::TransactionReprioritized { tx_id, .. }
            | Event::QueuedRtgs { tx_id, .. }
            | Event::RtgsSettlement { tx_id, .. }
            | Event::OverdueTransactionSettled { tx_id, .. }
            | Event::TransactionWentOverdue { tx_id, .. }
            | Event::PriorityEscalated { tx_id, .. } => Some(tx_id),
            Event::SplitParentProgress { child_id, .. } => Some(child_id),
            _ => None,
        }
    }

    /// Every transaction id the event refers to
    pub fn tx_ids(&self) -> Vec<&str> {
        match self {
            Event::LsmBilateralOffset {
                tx_ids_a_to_b,
                tx_ids_b_to_a,
                ..
            } => tx_ids_a_to_b
                .iter()
                .chain(tx_ids_b_to_a.iter())
                .map(String::as_str)
                .collect(),
            Event::LsmCycleSettlement { tx_ids, .. } | Event::LsmCycleRejected { tx_ids, .. } => {
                tx_ids.iter().map(String::as_str).collect()
            }
            Event::PolicySplit {
                tx_id, child_ids, ..
            } => std::iter::once(tx_id.as_str())
                .chain(child_ids.iter().map(String::as_str))
                .collect(),
            Event::SplitParentProgress {
                parent_id,
                child_id,
                ..
            } => vec![parent_id.as_str(), child_id.as_str()],
            other => other.tx_id().into_iter().collect(),
        }
    }

    /// Acting agent of the event, if any
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Event::CollateralAdjusted { agent_id, .. }
            | Event::AgentArrivalRateChanged { agent_id, .. }
            | Event::CounterpartyWeightChanged { agent_id, .. }
            | Event::BankBudgetSet { agent_id, .. }
            | Event::StateRegisterSet { agent_id, .. }
            | Event::PolicyEvaluationFailed { agent_id, .. }
            | Event::PolicySubmit { agent_id, .. }
            | Event::PolicyHold { agent_id, .. }
            | Event::PolicyDrop { agent_id, .. }
            | Event::PolicySplit { agent_id, .. }
            | Event::TransactionReprioritized { agent_id, .. }
            | Event::CostAccrual { agent_id, .. }
            | Event::CollateralPost { agent_id, .. }
            | Event::CollateralWithdraw { agent_id, .. }
            | Event::CollateralActionBlocked { agent_id, .. }
            | Event::EndOfDayPenalty { agent_id, .. }
            | Event::StateRegistersReset { agent_id, .. }
            | Event::AgentDailySnapshot { agent_id, .. } => Some(agent_id),
            Event::DirectTransfer { from_agent, .. } => Some(from_agent),
            Event::ScheduledTransactionInjected { sender_id, .. }
            | Event::Arrival { sender_id, .. }
            | Event::QueuedRtgs { sender_id, .. }
            | Event::RtgsSettlement { sender_id, .. }
            | Event::OverdueTransactionSettled { sender_id, .. }
            | Event::TransactionWentOverdue { sender_id, .. }
            | Event::PriorityEscalated { sender_id, .. } => Some(sender_id),
            Event::LsmBilateralOffset { agent_a, .. } => Some(agent_a),
            _ => None,
        }
    }

    /// Whether this event removes the given transactions from Queue-2
    pub fn settles_from_queue2(&self) -> bool {
        matches!(
            self,
            Event::RtgsSettlement { .. }
                | Event::LsmBilateralOffset { .. }
                | Event::LsmCycleSettlement { .. }
        )
    }
}

/// Ordered, append-only list of events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Hand the accumulated events to the caller, leaving the log empty
    pub fn drain(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    pub fn events_for_tx(&self, tx_id: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.tx_ids().contains(&tx_id))
            .collect()
    }

    pub fn events_for_agent(&self, agent_id: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.agent_id() == Some(agent_id))
            .collect()
    }
}
