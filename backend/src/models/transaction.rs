//! Transaction model
//!
//! A payment obligation from one agent to another. The original amount is
//! immutable; `remaining_amount` only ever decreases and reaches zero exactly
//! once, at the transition to `Settled`.
//!
//! Status forms a one-way lattice:
//!
//! ```text
//! Pending ──► PartiallySettled ──► Settled
//!    │               │               ▲
//!    └──────► Overdue ◄──────────────┘ (Overdue ──► Settled only)
//! ```
//!
//! CRITICAL: All money values are i64 (cents)

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest priority a transaction can carry
pub const MAX_PRIORITY: u8 = 10;

/// Transaction status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,

    /// Some value settled (split parents and divisible transactions only)
    PartiallySettled { first_settlement_tick: usize },

    Settled { tick: usize },

    /// Past deadline and unsettled; still settleable
    Overdue { missed_deadline_tick: usize },
}

/// Priority declared when a transaction is submitted to Queue-2.
///
/// Lower discriminant settles first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RtgsPriority {
    HighlyUrgent = 0,
    Urgent = 1,
    Normal = 2,
}

impl RtgsPriority {
    /// Map an internal 0-10 priority onto an RTGS class
    pub fn from_internal(priority: u8) -> Self {
        match priority {
            10 => RtgsPriority::HighlyUrgent,
            7..=9 => RtgsPriority::Urgent,
            _ => RtgsPriority::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RtgsPriority::HighlyUrgent => "HighlyUrgent",
            RtgsPriority::Urgent => "Urgent",
            RtgsPriority::Normal => "Normal",
        }
    }
}

impl std::str::FromStr for RtgsPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HighlyUrgent" | "HIGHLY_URGENT" => Ok(RtgsPriority::HighlyUrgent),
            "Urgent" | "URGENT" => Ok(RtgsPriority::Urgent),
            "Normal" | "NORMAL" => Ok(RtgsPriority::Normal),
            other => Err(format!("unknown RTGS priority '{}'", other)),
        }
    }
}

/// Errors from mutating a transaction
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Transaction amount must be positive, got {amount}")]
    InvalidAmount { amount: i64 },

    #[error("Deadline tick {deadline_tick} must be after arrival tick {arrival_tick}")]
    InvalidDeadline {
        arrival_tick: usize,
        deadline_tick: usize,
    },

    #[error("Settlement amount {amount} exceeds remaining amount {remaining}")]
    AmountExceedsRemaining { amount: i64, remaining: i64 },

    #[error("Transaction {tx_id} already fully settled")]
    AlreadySettled { tx_id: String },

    #[error("Transaction {tx_id} is indivisible")]
    IndivisibleTransaction { tx_id: String },

    #[error("Cannot split {remaining} cents into {num_splits} parts")]
    InvalidSplitCount { num_splits: usize, remaining: i64 },

    #[error("Transaction {tx_id} was dropped at tick {tick}")]
    Dropped { tx_id: String, tick: usize },
}

/// A payment between two agents
///
/// # Example
/// ```
/// use rtgs_sim_core::Transaction;
///
/// let tx = Transaction::new("tx-1", "BANK_A", "BANK_B", 100_000, 10, 50)
///     .unwrap()
///     .with_priority(8);
/// assert_eq!(tx.remaining_amount(), 100_000);
/// assert_eq!(tx.priority(), 8);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    id: String,
    sender_id: String,
    receiver_id: String,

    /// Original amount, immutable
    amount: i64,
    remaining_amount: i64,

    arrival_tick: usize,
    deadline_tick: usize,

    priority: u8,
    original_priority: u8,

    /// Set only while resident in Queue-2
    rtgs_priority: Option<RtgsPriority>,
    rtgs_submission_tick: Option<usize>,

    status: TransactionStatus,
    divisible: bool,

    /// Parent of a split child
    parent_id: Option<String>,
    /// Ids of children if this transaction was split
    child_ids: Vec<String>,

    dropped_tick: Option<usize>,
}

impl Transaction {
    /// Create a pending transaction with default priority 5.
    ///
    /// # Errors
    /// `InvalidAmount` for non-positive amounts, `InvalidDeadline` unless
    /// `deadline_tick > arrival_tick`.
    pub fn new(
        id: impl Into<String>,
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        amount: i64,
        arrival_tick: usize,
        deadline_tick: usize,
    ) -> Result<Self, TransactionError> {
        if amount <= 0 {
            return Err(TransactionError::InvalidAmount { amount });
        }
        if deadline_tick <= arrival_tick {
            return Err(TransactionError::InvalidDeadline {
                arrival_tick,
                deadline_tick,
            });
        }

        Ok(Self {
            id: id.into(),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            amount,
            remaining_amount: amount,
            arrival_tick,
            deadline_tick,
            priority: 5,
            original_priority: 5,
            rtgs_priority: None,
            rtgs_submission_tick: None,
            status: TransactionStatus::Pending,
            divisible: false,
            parent_id: None,
            child_ids: Vec::new(),
            dropped_tick: None,
        })
    }

    /// Set both current and original priority (capped at 10)
    pub fn with_priority(mut self, priority: u8) -> Self {
        let capped = priority.min(MAX_PRIORITY);
        self.priority = capped;
        self.original_priority = capped;
        self
    }

    pub fn with_divisible(mut self, divisible: bool) -> Self {
        self.divisible = divisible;
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn receiver_id(&self) -> &str {
        &self.receiver_id
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn remaining_amount(&self) -> i64 {
        self.remaining_amount
    }

    /// Value settled so far
    pub fn settled_amount(&self) -> i64 {
        self.amount - self.remaining_amount
    }

    pub fn arrival_tick(&self) -> usize {
        self.arrival_tick
    }

    pub fn deadline_tick(&self) -> usize {
        self.deadline_tick
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn original_priority(&self) -> u8 {
        self.original_priority
    }

    pub fn rtgs_priority(&self) -> Option<RtgsPriority> {
        self.rtgs_priority
    }

    pub fn rtgs_submission_tick(&self) -> Option<usize> {
        self.rtgs_submission_tick
    }

    pub fn status(&self) -> &TransactionStatus {
        &self.status
    }

    pub fn is_divisible(&self) -> bool {
        self.divisible
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn child_ids(&self) -> &[String] {
        &self.child_ids
    }

    pub fn is_split_parent(&self) -> bool {
        !self.child_ids.is_empty()
    }

    pub fn dropped_tick(&self) -> Option<usize> {
        self.dropped_tick
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped_tick.is_some()
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.status, TransactionStatus::Settled { .. })
    }

    pub fn is_overdue(&self) -> bool {
        matches!(self.status, TransactionStatus::Overdue { .. })
    }

    /// Ticks until the deadline; negative once past it
    pub fn ticks_to_deadline(&self, current_tick: usize) -> i64 {
        self.deadline_tick as i64 - current_tick as i64
    }

    pub fn is_past_deadline(&self, current_tick: usize) -> bool {
        current_tick > self.deadline_tick
    }

    /// Ticks spent past the deadline (0 if not yet due)
    pub fn ticks_overdue(&self, current_tick: usize) -> usize {
        current_tick.saturating_sub(self.deadline_tick)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Settle `amount` cents at `tick`.
    ///
    /// Partial settlement is allowed only for divisible transactions
    /// (which includes split parents aggregating their children).
    pub fn settle(&mut self, amount: i64, tick: usize) -> Result<(), TransactionError> {
        if self.is_settled() {
            return Err(TransactionError::AlreadySettled {
                tx_id: self.id.clone(),
            });
        }
        if amount <= 0 {
            return Err(TransactionError::InvalidAmount { amount });
        }
        if amount > self.remaining_amount {
            return Err(TransactionError::AmountExceedsRemaining {
                amount,
                remaining: self.remaining_amount,
            });
        }
        if amount < self.remaining_amount && !self.divisible {
            return Err(TransactionError::IndivisibleTransaction {
                tx_id: self.id.clone(),
            });
        }

        self.remaining_amount -= amount;

        if self.remaining_amount == 0 {
            self.status = TransactionStatus::Settled { tick };
            self.rtgs_priority = None;
            self.rtgs_submission_tick = None;
        } else if self.status == TransactionStatus::Pending {
            self.status = TransactionStatus::PartiallySettled {
                first_settlement_tick: tick,
            };
        }
        Ok(())
    }

    /// Settle whatever remains
    pub fn settle_remaining(&mut self, tick: usize) -> Result<i64, TransactionError> {
        let amount = self.remaining_amount;
        self.settle(amount, tick)?;
        Ok(amount)
    }

    /// Transition to `Overdue` if past the deadline and not settled.
    ///
    /// Returns `true` only on the transition itself; calling again is a no-op.
    pub fn mark_overdue(&mut self, current_tick: usize) -> bool {
        if !self.is_past_deadline(current_tick) {
            return false;
        }
        match self.status {
            TransactionStatus::Pending | TransactionStatus::PartiallySettled { .. } => {
                self.status = TransactionStatus::Overdue {
                    missed_deadline_tick: current_tick,
                };
                true
            }
            TransactionStatus::Settled { .. } | TransactionStatus::Overdue { .. } => false,
        }
    }

    /// Set the current priority (capped at 10); returns the previous value
    pub fn set_priority(&mut self, priority: u8) -> u8 {
        let old = self.priority;
        self.priority = priority.min(MAX_PRIORITY);
        old
    }

    /// Record entry into Queue-2
    pub fn enter_rtgs_queue(&mut self, priority: RtgsPriority, tick: usize) {
        self.rtgs_priority = Some(priority);
        self.rtgs_submission_tick = Some(tick);
    }

    pub fn leave_rtgs_queue(&mut self) {
        self.rtgs_priority = None;
        self.rtgs_submission_tick = None;
    }

    pub fn mark_dropped(&mut self, tick: usize) -> Result<(), TransactionError> {
        if self.is_settled() {
            return Err(TransactionError::AlreadySettled {
                tx_id: self.id.clone(),
            });
        }
        if let Some(dropped) = self.dropped_tick {
            return Err(TransactionError::Dropped {
                tx_id: self.id.clone(),
                tick: dropped,
            });
        }
        self.dropped_tick = Some(tick);
        self.leave_rtgs_queue();
        Ok(())
    }

    /// Split the remaining amount into children with the given ids.
    ///
    /// Children share the parent's sender, receiver, arrival, deadline and
    /// priority; each is indivisible. The last child absorbs the rounding
    /// remainder so amounts sum to the parent's remaining amount. The parent
    /// keeps its remaining amount and settles as children settle. Children of
    /// an overdue parent start overdue.
    pub fn split(&mut self, child_ids: Vec<String>) -> Result<Vec<Transaction>, TransactionError> {
        let num_splits = child_ids.len();
        if self.is_settled() {
            return Err(TransactionError::AlreadySettled {
                tx_id: self.id.clone(),
            });
        }
        if !self.divisible || self.is_split_parent() {
            return Err(TransactionError::IndivisibleTransaction {
                tx_id: self.id.clone(),
            });
        }
        if num_splits < 2 || (num_splits as i64) > self.remaining_amount {
            return Err(TransactionError::InvalidSplitCount {
                num_splits,
                remaining: self.remaining_amount,
            });
        }

        let base = self.remaining_amount / num_splits as i64;
        let remainder = self.remaining_amount % num_splits as i64;

        let mut children = Vec::with_capacity(num_splits);
        for (idx, child_id) in child_ids.iter().enumerate() {
            let child_amount = if idx + 1 == num_splits {
                base + remainder
            } else {
                base
            };
            let mut child = Transaction::new(
                child_id.clone(),
                self.sender_id.clone(),
                self.receiver_id.clone(),
                child_amount,
                self.arrival_tick,
                self.deadline_tick,
            )?;
            child.priority = self.priority;
            child.original_priority = self.original_priority;
            child.parent_id = Some(self.id.clone());
            // An overdue parent's deadline has already been charged
            if let TransactionStatus::Overdue { missed_deadline_tick } = self.status {
                child.status = TransactionStatus::Overdue { missed_deadline_tick };
            }
            children.push(child);
        }

        self.child_ids = child_ids;
        self.leave_rtgs_queue();
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(amount: i64) -> Transaction {
        Transaction::new("tx", "A", "B", amount, 0, 10).unwrap()
    }

    #[test]
    fn test_rejects_non_positive_amount() {
        let err = Transaction::new("tx", "A", "B", 0, 0, 10).unwrap_err();
        assert_eq!(err, TransactionError::InvalidAmount { amount: 0 });
    }

    #[test]
    fn test_rejects_deadline_not_after_arrival() {
        let err = Transaction::new("tx", "A", "B", 100, 5, 5).unwrap_err();
        assert!(matches!(err, TransactionError::InvalidDeadline { .. }));
    }

    #[test]
    fn test_full_settlement_reaches_zero_once() {
        let mut t = tx(500);
        t.settle(500, 3).unwrap();
        assert_eq!(t.remaining_amount(), 0);
        assert_eq!(t.status(), &TransactionStatus::Settled { tick: 3 });
        assert!(matches!(
            t.settle(1, 4),
            Err(TransactionError::AlreadySettled { .. })
        ));
    }

    #[test]
    fn test_indivisible_partial_rejected() {
        let mut t = tx(500);
        assert!(matches!(
            t.settle(100, 1),
            Err(TransactionError::IndivisibleTransaction { .. })
        ));
        assert_eq!(t.remaining_amount(), 500);
    }

    #[test]
    fn test_divisible_partial_then_full() {
        let mut t = tx(500).with_divisible(true);
        t.settle(200, 1).unwrap();
        assert_eq!(
            t.status(),
            &TransactionStatus::PartiallySettled {
                first_settlement_tick: 1
            }
        );
        t.settle(300, 2).unwrap();
        assert!(t.is_settled());
    }

    #[test]
    fn test_overdue_is_one_way_and_idempotent() {
        let mut t = tx(100);
        assert!(!t.mark_overdue(10));
        assert!(t.mark_overdue(11));
        assert!(!t.mark_overdue(12));
        assert_eq!(
            t.status(),
            &TransactionStatus::Overdue {
                missed_deadline_tick: 11
            }
        );
        t.settle(100, 13).unwrap();
        assert!(t.is_settled());
        assert!(!t.mark_overdue(14));
    }

    #[test]
    fn test_priority_capped() {
        let mut t = tx(100).with_priority(42);
        assert_eq!(t.priority(), MAX_PRIORITY);
        assert_eq!(t.set_priority(3), MAX_PRIORITY);
        assert_eq!(t.original_priority(), MAX_PRIORITY);
    }

    #[test]
    fn test_split_amounts_sum_to_remaining() {
        let mut parent = tx(1_001).with_divisible(true).with_priority(7);
        let ids = vec!["c1".to_string(), "c2".to_string(), "c3".to_string()];
        let children = parent.split(ids).unwrap();
        let amounts: Vec<i64> = children.iter().map(|c| c.amount()).collect();
        assert_eq!(amounts, vec![333, 333, 335]);
        assert!(children.iter().all(|c| c.parent_id() == Some("tx")));
        assert!(children.iter().all(|c| c.priority() == 7));
        assert!(parent.is_split_parent());
        assert_eq!(parent.remaining_amount(), 1_001);
    }

    #[test]
    fn test_split_of_overdue_parent_keeps_overdue_status() {
        let mut parent = tx(1_000).with_divisible(true);
        assert!(parent.mark_overdue(11));
        let children = parent.split(vec!["c1".into(), "c2".into()]).unwrap();
        for child in &children {
            assert_eq!(
                child.status(),
                &TransactionStatus::Overdue {
                    missed_deadline_tick: 11
                }
            );
        }
        assert!(!children.into_iter().any(|mut c| c.mark_overdue(12)));
    }

    #[test]
    fn test_split_indivisible_rejected() {
        let mut t = tx(1_000);
        let err = t.split(vec!["a".into(), "b".into()]).unwrap_err();
        assert!(matches!(err, TransactionError::IndivisibleTransaction { .. }));
    }

    #[test]
    fn test_split_count_bounds() {
        let mut t = tx(1).with_divisible(true);
        assert!(matches!(
            t.split(vec!["a".into(), "b".into()]),
            Err(TransactionError::InvalidSplitCount { .. })
        ));
        let mut t = tx(10).with_divisible(true);
        assert!(matches!(
            t.split(vec!["a".into()]),
            Err(TransactionError::InvalidSplitCount { .. })
        ));
    }

    #[test]
    fn test_rtgs_priority_ordering() {
        assert!(RtgsPriority::HighlyUrgent < RtgsPriority::Urgent);
        assert!(RtgsPriority::Urgent < RtgsPriority::Normal);
        assert_eq!(RtgsPriority::from_internal(10), RtgsPriority::HighlyUrgent);
        assert_eq!(RtgsPriority::from_internal(8), RtgsPriority::Urgent);
        assert_eq!(RtgsPriority::from_internal(5), RtgsPriority::Normal);
    }
}
