//! Agent (bank) model
//!
//! An agent is a settlement account at the central bank plus the bank's
//! internal Queue-1 of payments awaiting a release decision.
//!
//! Liquidity available to pay is never cached; it is derived from balance,
//! unsecured cap and posted collateral on every call:
//!
//! ```text
//! collateral_credit   = floor(posted_collateral × (1 − haircut))
//! credit_used         = max(0, −balance)
//! credit_headroom     = max(0, unsecured_cap + collateral_credit − credit_used)
//! effective_liquidity = max(0, balance) + credit_headroom
//! ```
//!
//! CRITICAL: All money values are i64 (cents)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Registers must carry this prefix so policies can reference them as fields
pub const STATE_REGISTER_PREFIX: &str = "bank_state_";

/// Maximum number of distinct state registers per agent
pub const MAX_STATE_REGISTERS: usize = 10;

/// Errors from agent balance and register operations
#[derive(Debug, Error, PartialEq)]
pub enum AgentError {
    #[error("Insufficient liquidity: required {required}, available {available}")]
    InsufficientLiquidity { required: i64, available: i64 },

    #[error("Balance overflow on agent {agent_id}")]
    BalanceOverflow { agent_id: String },

    #[error("Register key must start with 'bank_state_', got '{key}'")]
    InvalidRegisterKey { key: String },

    #[error("Agent already holds the maximum of 10 state registers")]
    RegisterLimitExceeded,
}

/// Errors from posting collateral
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CollateralError {
    #[error("Collateral amount must be positive")]
    NonPositive,

    #[error("Requested {requested} exceeds remaining collateral capacity {remaining_capacity}")]
    ExceedsCapacity {
        requested: i64,
        remaining_capacity: i64,
    },
}

/// Errors from withdrawing collateral
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WithdrawError {
    #[error("Withdrawal amount must be positive")]
    NonPositive,

    #[error("Collateral posted at tick {posted_at_tick} must be held {ticks_remaining} more tick(s)")]
    MinHoldingPeriodNotMet {
        ticks_remaining: usize,
        posted_at_tick: usize,
    },

    #[error("No withdrawal headroom: credit_used={credit_used}, credit_limit={credit_limit}")]
    NoHeadroom { credit_used: i64, credit_limit: i64 },
}

/// Why a release was refused by the current budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetBlock {
    /// Total budget for the tick is spent
    Exhausted,
    /// Counterparty is not in the focus list
    NotInFocus,
    /// Per-counterparty cap would be exceeded
    CounterpartyCap,
}

impl BudgetBlock {
    pub fn as_reason(&self) -> &'static str {
        match self {
            BudgetBlock::Exhausted => "ReleaseBudgetExhausted",
            BudgetBlock::NotInFocus => "CounterpartyNotInFocus",
            BudgetBlock::CounterpartyCap => "CounterpartyBudgetExceeded",
        }
    }
}

/// Per-tick release budget set by the bank tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseBudget {
    pub max_value: i64,
    pub remaining: i64,
    /// `None` allows every counterparty; an empty list blocks all
    pub focus_counterparties: Option<Vec<String>>,
    pub max_per_counterparty: Option<i64>,
    pub per_counterparty_used: BTreeMap<String, i64>,
}

impl ReleaseBudget {
    pub fn new(
        max_value: i64,
        focus_counterparties: Option<Vec<String>>,
        max_per_counterparty: Option<i64>,
    ) -> Self {
        Self {
            max_value,
            remaining: max_value.max(0),
            focus_counterparties,
            max_per_counterparty,
            per_counterparty_used: BTreeMap::new(),
        }
    }

    pub fn check(&self, counterparty_id: &str, amount: i64) -> Result<(), BudgetBlock> {
        if amount > self.remaining {
            return Err(BudgetBlock::Exhausted);
        }
        if let Some(focus) = &self.focus_counterparties {
            if !focus.iter().any(|cp| cp == counterparty_id) {
                return Err(BudgetBlock::NotInFocus);
            }
        }
        if let Some(cap) = self.max_per_counterparty {
            let used = self
                .per_counterparty_used
                .get(counterparty_id)
                .copied()
                .unwrap_or(0);
            if used.saturating_add(amount) > cap {
                return Err(BudgetBlock::CounterpartyCap);
            }
        }
        Ok(())
    }

    pub fn consume(&mut self, counterparty_id: &str, amount: i64) {
        self.remaining = self.remaining.saturating_sub(amount).max(0);
        let used = self
            .per_counterparty_used
            .entry(counterparty_id.to_string())
            .or_insert(0);
        *used = used.saturating_add(amount);
    }
}

/// A scheduled automatic collateral withdrawal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralTimer {
    pub amount: i64,
    pub reason: String,
    pub posted_at_tick: usize,
}

/// A bank participating in the payment system
///
/// # Example
/// ```
/// use rtgs_sim_core::Agent;
///
/// let mut agent = Agent::new("BANK_A", 1_000_000);
/// agent.set_unsecured_cap(500_000);
/// assert_eq!(agent.effective_liquidity(), 1_500_000);
///
/// agent.debit(1_200_000).unwrap();
/// assert_eq!(agent.balance(), -200_000);
/// assert_eq!(agent.effective_liquidity(), 300_000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    id: String,

    /// Settlement account balance; negative means intraday credit in use
    balance: i64,

    unsecured_cap: i64,

    posted_collateral: i64,
    max_collateral_capacity: i64,
    /// Discount on collateral value, e.g. 0.02 keeps 98%
    collateral_haircut: f64,
    collateral_posted_at_tick: Option<usize>,
    min_collateral_holding_ticks: usize,

    liquidity_buffer: i64,

    /// Queue-1, in policy order
    outgoing_queue: Vec<String>,
    /// Transactions where this agent is the receiver and settlement is pending
    incoming_expected: Vec<String>,

    state_registers: BTreeMap<String, f64>,
    release_budget: Option<ReleaseBudget>,

    /// Auto-withdraw timers keyed by the tick they fire on
    collateral_timers: BTreeMap<usize, Vec<CollateralTimer>>,
}

impl Agent {
    pub fn new(id: impl Into<String>, balance: i64) -> Self {
        Self {
            id: id.into(),
            balance,
            unsecured_cap: 0,
            posted_collateral: 0,
            max_collateral_capacity: 0,
            collateral_haircut: 0.0,
            collateral_posted_at_tick: None,
            min_collateral_holding_ticks: 0,
            liquidity_buffer: 0,
            outgoing_queue: Vec::new(),
            incoming_expected: Vec::new(),
            state_registers: BTreeMap::new(),
            release_budget: None,
            collateral_timers: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    // ========================================================================
    // Liquidity
    // ========================================================================

    pub fn unsecured_cap(&self) -> i64 {
        self.unsecured_cap
    }

    pub fn set_unsecured_cap(&mut self, cap: i64) {
        self.unsecured_cap = cap.max(0);
    }

    /// Credit capacity contributed by posted collateral after haircut
    pub fn collateral_credit(&self) -> i64 {
        let retained = (1.0 - self.collateral_haircut).clamp(0.0, 1.0);
        (self.posted_collateral as f64 * retained).floor() as i64
    }

    /// Total overdraft the agent may run
    pub fn credit_limit(&self) -> i64 {
        self.unsecured_cap.saturating_add(self.collateral_credit())
    }

    pub fn credit_used(&self) -> i64 {
        if self.balance < 0 {
            self.balance.saturating_neg()
        } else {
            0
        }
    }

    pub fn credit_headroom(&self) -> i64 {
        (self.credit_limit() - self.credit_used()).max(0)
    }

    /// Funds the agent can pay out right now
    pub fn effective_liquidity(&self) -> i64 {
        self.balance.max(0).saturating_add(self.credit_headroom())
    }

    pub fn can_pay(&self, amount: i64) -> bool {
        amount <= self.effective_liquidity()
    }

    /// Debit after checking liquidity
    pub fn debit(&mut self, amount: i64) -> Result<(), AgentError> {
        let available = self.effective_liquidity();
        if amount > available {
            return Err(AgentError::InsufficientLiquidity {
                required: amount,
                available,
            });
        }
        self.adjust_balance(-amount)
    }

    pub fn credit(&mut self, amount: i64) -> Result<(), AgentError> {
        self.adjust_balance(amount)
    }

    /// Apply a signed balance change without a liquidity check.
    ///
    /// Used for netted settlement where feasibility was checked upstream,
    /// and for scenario transfers.
    pub fn adjust_balance(&mut self, delta: i64) -> Result<(), AgentError> {
        self.balance = self
            .balance
            .checked_add(delta)
            .ok_or_else(|| AgentError::BalanceOverflow {
                agent_id: self.id.clone(),
            })?;
        Ok(())
    }

    pub fn liquidity_buffer(&self) -> i64 {
        self.liquidity_buffer
    }

    pub fn set_liquidity_buffer(&mut self, buffer: i64) {
        self.liquidity_buffer = buffer.max(0);
    }

    // ========================================================================
    // Queue-1
    // ========================================================================

    pub fn queue_outgoing(&mut self, tx_id: String) {
        self.outgoing_queue.push(tx_id);
    }

    pub fn outgoing_queue(&self) -> &[String] {
        &self.outgoing_queue
    }

    pub fn outgoing_queue_size(&self) -> usize {
        self.outgoing_queue.len()
    }

    /// Returns `true` if the id was present
    pub fn remove_from_queue(&mut self, tx_id: &str) -> bool {
        match self.outgoing_queue.iter().position(|id| id == tx_id) {
            Some(pos) => {
                self.outgoing_queue.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Insert ids right after `anchor` (or at the end if absent)
    pub fn insert_after_in_queue(&mut self, anchor: &str, tx_ids: Vec<String>) {
        let pos = self
            .outgoing_queue
            .iter()
            .position(|id| id == anchor)
            .map(|p| p + 1)
            .unwrap_or(self.outgoing_queue.len());
        self.outgoing_queue.splice(pos..pos, tx_ids);
    }

    pub fn add_expected_inflow(&mut self, tx_id: String) {
        self.incoming_expected.push(tx_id);
    }

    pub fn remove_expected_inflow(&mut self, tx_id: &str) -> bool {
        match self.incoming_expected.iter().position(|id| id == tx_id) {
            Some(pos) => {
                self.incoming_expected.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn incoming_expected(&self) -> &[String] {
        &self.incoming_expected
    }

    // ========================================================================
    // Collateral
    // ========================================================================

    pub fn posted_collateral(&self) -> i64 {
        self.posted_collateral
    }

    pub fn max_collateral_capacity(&self) -> i64 {
        self.max_collateral_capacity
    }

    pub fn set_max_collateral_capacity(&mut self, capacity: i64) {
        self.max_collateral_capacity = capacity.max(0);
    }

    pub fn remaining_collateral_capacity(&self) -> i64 {
        (self.max_collateral_capacity - self.posted_collateral).max(0)
    }

    pub fn collateral_haircut(&self) -> f64 {
        self.collateral_haircut
    }

    pub fn set_collateral_haircut(&mut self, haircut: f64) {
        self.collateral_haircut = haircut.clamp(0.0, 1.0);
    }

    pub fn collateral_posted_at_tick(&self) -> Option<usize> {
        self.collateral_posted_at_tick
    }

    pub fn min_collateral_holding_ticks(&self) -> usize {
        self.min_collateral_holding_ticks
    }

    pub fn set_min_collateral_holding_ticks(&mut self, ticks: usize) {
        self.min_collateral_holding_ticks = ticks;
    }

    /// Post collateral; returns the new total
    pub fn post_collateral(&mut self, amount: i64, tick: usize) -> Result<i64, CollateralError> {
        if amount <= 0 {
            return Err(CollateralError::NonPositive);
        }
        let remaining_capacity = self.remaining_collateral_capacity();
        if amount > remaining_capacity {
            return Err(CollateralError::ExceedsCapacity {
                requested: amount,
                remaining_capacity,
            });
        }
        self.posted_collateral += amount;
        self.collateral_posted_at_tick = Some(tick);
        Ok(self.posted_collateral)
    }

    /// Largest withdrawal that keeps current credit usage fully backed
    pub fn max_withdrawable_collateral(&self) -> i64 {
        let needed_credit = self.credit_used() - self.unsecured_cap;
        if needed_credit <= 0 {
            return self.posted_collateral;
        }
        let retained = (1.0 - self.collateral_haircut).clamp(0.0, 1.0);
        if retained <= 0.0 {
            return 0;
        }
        let mut must_keep = (needed_credit as f64 / retained).ceil() as i64;
        // floor() in collateral_credit can leave us one cent short
        while must_keep < self.posted_collateral
            && ((must_keep as f64 * retained).floor() as i64) < needed_credit
        {
            must_keep += 1;
        }
        (self.posted_collateral - must_keep).max(0)
    }

    /// Withdraw collateral subject to the holding period and headroom guards.
    ///
    /// The withdrawal is clamped to what the guards allow; returns the
    /// amount actually withdrawn.
    pub fn withdraw_collateral(
        &mut self,
        requested: i64,
        current_tick: usize,
    ) -> Result<i64, WithdrawError> {
        if requested <= 0 {
            return Err(WithdrawError::NonPositive);
        }

        if let Some(posted_at_tick) = self.collateral_posted_at_tick {
            let ticks_held = current_tick.saturating_sub(posted_at_tick);
            if ticks_held < self.min_collateral_holding_ticks {
                return Err(WithdrawError::MinHoldingPeriodNotMet {
                    ticks_remaining: self.min_collateral_holding_ticks - ticks_held,
                    posted_at_tick,
                });
            }
        }

        let max_safe = self.max_withdrawable_collateral();
        if max_safe <= 0 {
            return Err(WithdrawError::NoHeadroom {
                credit_used: self.credit_used(),
                credit_limit: self.credit_limit(),
            });
        }

        let actual = requested.min(max_safe);
        self.posted_collateral -= actual;
        if self.posted_collateral == 0 {
            self.collateral_posted_at_tick = None;
        }
        Ok(actual)
    }

    /// Unconditional collateral change from a scenario event.
    ///
    /// Increases raise capacity when needed; decreases stop at zero.
    /// Returns `(before, after)`.
    pub fn adjust_collateral(&mut self, delta: i64, tick: usize) -> (i64, i64) {
        let before = self.posted_collateral;
        let after = before.saturating_add(delta).max(0);
        if after > self.max_collateral_capacity {
            self.max_collateral_capacity = after;
        }
        self.posted_collateral = after;
        if delta > 0 {
            self.collateral_posted_at_tick = Some(tick);
        } else if after == 0 {
            self.collateral_posted_at_tick = None;
        }
        (before, after)
    }

    pub fn schedule_collateral_withdrawal(&mut self, fire_at_tick: usize, timer: CollateralTimer) {
        self.collateral_timers
            .entry(fire_at_tick)
            .or_default()
            .push(timer);
    }

    /// Remove and return every timer due at or before `tick`
    pub fn take_due_collateral_timers(&mut self, tick: usize) -> Vec<CollateralTimer> {
        let later = self.collateral_timers.split_off(&(tick + 1));
        let due = std::mem::replace(&mut self.collateral_timers, later);
        due.into_values().flatten().collect()
    }

    pub fn pending_collateral_timers(&self) -> &BTreeMap<usize, Vec<CollateralTimer>> {
        &self.collateral_timers
    }

    // ========================================================================
    // Release budget
    // ========================================================================

    pub fn set_release_budget(&mut self, budget: ReleaseBudget) {
        self.release_budget = Some(budget);
    }

    pub fn clear_release_budget(&mut self) {
        self.release_budget = None;
    }

    pub fn release_budget(&self) -> Option<&ReleaseBudget> {
        self.release_budget.as_ref()
    }

    /// Remaining budget, or `i64::MAX` when no budget is set
    pub fn release_budget_remaining(&self) -> i64 {
        self.release_budget
            .as_ref()
            .map(|b| b.remaining)
            .unwrap_or(i64::MAX)
    }

    pub fn check_release(&self, counterparty_id: &str, amount: i64) -> Result<(), BudgetBlock> {
        match &self.release_budget {
            Some(budget) => budget.check(counterparty_id, amount),
            None => Ok(()),
        }
    }

    pub fn track_release(&mut self, counterparty_id: &str, amount: i64) {
        if let Some(budget) = self.release_budget.as_mut() {
            budget.consume(counterparty_id, amount);
        }
    }

    // ========================================================================
    // State registers
    // ========================================================================

    /// Set a register; returns `(old, new)` where a missing register reads 0.0
    pub fn set_state_register(&mut self, key: &str, value: f64) -> Result<(f64, f64), AgentError> {
        if !key.starts_with(STATE_REGISTER_PREFIX) {
            return Err(AgentError::InvalidRegisterKey {
                key: key.to_string(),
            });
        }
        if self.state_registers.len() >= MAX_STATE_REGISTERS
            && !self.state_registers.contains_key(key)
        {
            return Err(AgentError::RegisterLimitExceeded);
        }
        let old = self.state_registers.insert(key.to_string(), value);
        Ok((old.unwrap_or(0.0), value))
    }

    pub fn get_state_register(&self, key: &str) -> f64 {
        self.state_registers.get(key).copied().unwrap_or(0.0)
    }

    /// Clear all registers, returning their final values in key order
    pub fn reset_state_registers(&mut self) -> Vec<(String, f64)> {
        std::mem::take(&mut self.state_registers)
            .into_iter()
            .collect()
    }

    pub fn state_registers(&self) -> &BTreeMap<String, f64> {
        &self.state_registers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_liquidity_without_collateral() {
        let mut agent = Agent::new("A", 100);
        agent.set_unsecured_cap(50);
        assert_eq!(agent.effective_liquidity(), 150);

        agent.adjust_balance(-130).unwrap();
        assert_eq!(agent.balance(), -30);
        assert_eq!(agent.credit_used(), 30);
        assert_eq!(agent.effective_liquidity(), 20);
    }

    #[test]
    fn test_effective_liquidity_never_negative() {
        let mut agent = Agent::new("A", -500);
        agent.set_unsecured_cap(100);
        assert_eq!(agent.effective_liquidity(), 0);
    }

    #[test]
    fn test_collateral_haircut_applied() {
        let mut agent = Agent::new("A", 0);
        agent.set_max_collateral_capacity(10_000);
        agent.set_collateral_haircut(0.1);
        agent.post_collateral(1_000, 0).unwrap();
        assert_eq!(agent.collateral_credit(), 900);
        assert_eq!(agent.effective_liquidity(), 900);
    }

    #[test]
    fn test_debit_insufficient() {
        let mut agent = Agent::new("A", 100);
        let err = agent.debit(101).unwrap_err();
        assert_eq!(
            err,
            AgentError::InsufficientLiquidity {
                required: 101,
                available: 100
            }
        );
        assert_eq!(agent.balance(), 100);
    }

    #[test]
    fn test_balance_overflow_detected() {
        let mut agent = Agent::new("A", i64::MAX - 1);
        assert!(matches!(
            agent.credit(2),
            Err(AgentError::BalanceOverflow { .. })
        ));
        assert_eq!(agent.balance(), i64::MAX - 1);
    }

    #[test]
    fn test_post_collateral_capacity() {
        let mut agent = Agent::new("A", 0);
        agent.set_max_collateral_capacity(500);
        assert_eq!(agent.post_collateral(300, 1), Ok(300));
        assert_eq!(
            agent.post_collateral(300, 2),
            Err(CollateralError::ExceedsCapacity {
                requested: 300,
                remaining_capacity: 200
            })
        );
    }

    #[test]
    fn test_withdraw_respects_holding_period() {
        let mut agent = Agent::new("A", 0);
        agent.set_max_collateral_capacity(1_000);
        agent.set_min_collateral_holding_ticks(5);
        agent.post_collateral(1_000, 10).unwrap();
        assert_eq!(
            agent.withdraw_collateral(100, 12),
            Err(WithdrawError::MinHoldingPeriodNotMet {
                ticks_remaining: 3,
                posted_at_tick: 10
            })
        );
        assert_eq!(agent.withdraw_collateral(100, 15), Ok(100));
    }

    #[test]
    fn test_withdraw_keeps_overdraft_backed() {
        let mut agent = Agent::new("A", 0);
        agent.set_max_collateral_capacity(1_000);
        agent.set_collateral_haircut(0.5);
        agent.post_collateral(1_000, 0).unwrap();
        agent.adjust_balance(-300).unwrap();

        // 300 of credit needs 600 of collateral at a 50% haircut
        assert_eq!(agent.max_withdrawable_collateral(), 400);
        assert_eq!(agent.withdraw_collateral(1_000, 1), Ok(400));
        assert_eq!(agent.posted_collateral(), 600);
        assert!(agent.collateral_credit() >= agent.credit_used());
        assert!(matches!(
            agent.withdraw_collateral(1, 2),
            Err(WithdrawError::NoHeadroom { .. })
        ));
    }

    #[test]
    fn test_collateral_timers_fire_once() {
        let mut agent = Agent::new("A", 0);
        let timer = CollateralTimer {
            amount: 50,
            reason: "temporary".into(),
            posted_at_tick: 1,
        };
        agent.schedule_collateral_withdrawal(5, timer.clone());
        assert!(agent.take_due_collateral_timers(4).is_empty());
        assert_eq!(agent.take_due_collateral_timers(5), vec![timer]);
        assert!(agent.take_due_collateral_timers(6).is_empty());
    }

    #[test]
    fn test_release_budget_checks() {
        let mut agent = Agent::new("A", 0);
        assert_eq!(agent.check_release("B", i64::MAX), Ok(()));

        agent.set_release_budget(ReleaseBudget::new(
            1_000,
            Some(vec!["B".into(), "C".into()]),
            Some(600),
        ));
        assert_eq!(agent.check_release("D", 10), Err(BudgetBlock::NotInFocus));
        assert_eq!(agent.check_release("B", 500), Ok(()));
        agent.track_release("B", 500);
        assert_eq!(agent.check_release("B", 200), Err(BudgetBlock::CounterpartyCap));
        assert_eq!(agent.check_release("C", 600), Err(BudgetBlock::Exhausted));
        assert_eq!(agent.check_release("C", 500), Ok(()));
        assert_eq!(agent.release_budget_remaining(), 500);
    }

    #[test]
    fn test_state_registers() {
        let mut agent = Agent::new("A", 0);
        assert_eq!(
            agent.set_state_register("bank_state_x", 2.0),
            Ok((0.0, 2.0))
        );
        assert_eq!(
            agent.set_state_register("bank_state_x", 3.0),
            Ok((2.0, 3.0))
        );
        assert!(matches!(
            agent.set_state_register("x", 1.0),
            Err(AgentError::InvalidRegisterKey { .. })
        ));
        for i in 0..9 {
            agent
                .set_state_register(&format!("bank_state_{}", i), 1.0)
                .unwrap();
        }
        assert_eq!(
            agent.set_state_register("bank_state_overflow", 1.0),
            Err(AgentError::RegisterLimitExceeded)
        );
        let reset = agent.reset_state_registers();
        assert_eq!(reset.len(), MAX_STATE_REGISTERS);
        assert_eq!(agent.get_state_register("bank_state_x"), 0.0);
    }

    #[test]
    fn test_insert_after_in_queue() {
        let mut agent = Agent::new("A", 0);
        agent.queue_outgoing("t1".into());
        agent.queue_outgoing("t2".into());
        agent.insert_after_in_queue("t1", vec!["c1".into(), "c2".into()]);
        assert_eq!(agent.outgoing_queue(), &["t1", "c1", "c2", "t2"]);
    }
}
