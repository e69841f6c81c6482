//! RTGS (Real-Time Gross Settlement) Engine
//!
//! Operates on **Queue-2**, the single central queue. Transactions arrive
//! here only after their sender's payment tree released them from Queue-1.
//! Settlement is mechanical: check liquidity, settle or leave queued.
//!
//! ```text
//! Bank A (Queue-1) --release--> Queue-2 @ central bank --settle--> Bank B
//!                                     |
//!                              debit A, credit B
//! ```
//!
//! # Critical Invariants
//!
//! - **Atomicity**: debit and credit happen together, or neither
//! - **Balance Conservation**: total system balance unchanged
//! - **Queue Accounting**: an id leaves Queue-2 only together with a
//!   settlement event for it
//! - **Overflow is fatal**: balance overflow surfaces as an error and is
//!   never patched over

use crate::models::agent::AgentError;
use crate::models::event::Event;
use crate::models::state::SimulationState;
use crate::models::transaction::TransactionError;
use thiserror::Error;

/// Errors that can occur during RTGS or LSM settlement
#[derive(Debug, Error, PartialEq)]
pub enum SettlementError {
    #[error("Insufficient liquidity for {tx_id}: required {required}, available {available}")]
    InsufficientLiquidity {
        tx_id: String,
        required: i64,
        available: i64,
    },

    #[error("Cycle infeasible: {agent_id} net outflow {net_outflow} exceeds liquidity {available}")]
    CycleInfeasible {
        agent_id: String,
        net_outflow: i64,
        available: i64,
    },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Transaction {0} is not in Queue-2")]
    NotQueued(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Net position overflow for {0}")]
    NetPositionOverflow(String),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
}

impl SettlementError {
    /// Whether the error means the unit of work is simply not settleable now.
    ///
    /// Everything else points at corrupted state or arithmetic overflow and
    /// must abort the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SettlementError::InsufficientLiquidity { .. } | SettlementError::CycleInfeasible { .. }
        )
    }
}

/// One transaction that left Queue-2 settled
#[derive(Debug, Clone, PartialEq)]
pub struct SettledTransaction {
    pub tx_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub amount: i64,
}

/// Statistics from one pass over Queue-2
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueProcessingResult {
    pub settled_count: usize,

    /// Total value settled (cents)
    pub settled_value: i64,

    pub remaining_queue_size: usize,

    /// Settled transactions in settlement order
    pub settled: Vec<SettledTransaction>,
}

/// Settle one Queue-2 transaction gross, if its sender can afford it.
///
/// On `InsufficientLiquidity` no state changes. On success the transaction
/// leaves Queue-2 and `RtgsSettlement` is emitted, followed by
/// `OverdueTransactionSettled` for a late payment and `SplitParentProgress`
/// for a split child.
///
/// # Example
///
/// ```rust
/// use rtgs_sim_core::{Agent, RtgsPriority, SimulationState, Transaction};
/// use rtgs_sim_core::settlement::settle_queued;
///
/// let mut state = SimulationState::new(
///     10,
///     1,
///     vec![Agent::new("BANK_A", 1_000_000), Agent::new("BANK_B", 0)],
/// );
/// let mut tx = Transaction::new("tx-1", "BANK_A", "BANK_B", 500_000, 0, 5).unwrap();
/// tx.enter_rtgs_queue(RtgsPriority::Normal, 0);
/// state.add_transaction(tx).unwrap();
/// state.enqueue_rtgs("tx-1").unwrap();
///
/// let settled = settle_queued(&mut state, "tx-1", 0).unwrap();
/// assert_eq!(settled.amount, 500_000);
/// assert_eq!(state.agent("BANK_A").unwrap().balance(), 500_000);
/// assert_eq!(state.agent("BANK_B").unwrap().balance(), 500_000);
/// assert_eq!(state.queue_size(), 0);
/// ```
pub fn settle_queued(
    state: &mut SimulationState,
    tx_id: &str,
    tick: usize,
) -> Result<SettledTransaction, SettlementError> {
    if !state.is_in_rtgs_queue(tx_id) {
        return Err(SettlementError::NotQueued(tx_id.to_string()));
    }
    let tx = state
        .transaction(tx_id)
        .ok_or_else(|| SettlementError::TransactionNotFound(tx_id.to_string()))?;
    if tx.is_settled() {
        return Err(TransactionError::AlreadySettled {
            tx_id: tx_id.to_string(),
        }
        .into());
    }
    let sender_id = tx.sender_id().to_string();
    let receiver_id = tx.receiver_id().to_string();
    let amount = tx.remaining_amount();
    let was_overdue = tx.is_overdue();
    let deadline_tick = tx.deadline_tick();

    let sender = state
        .agent(&sender_id)
        .ok_or_else(|| SettlementError::AgentNotFound(sender_id.clone()))?;
    let receiver = state
        .agent(&receiver_id)
        .ok_or_else(|| SettlementError::AgentNotFound(receiver_id.clone()))?;

    let available = sender.effective_liquidity();
    if amount > available {
        return Err(SettlementError::InsufficientLiquidity {
            tx_id: tx_id.to_string(),
            required: amount,
            available,
        });
    }

    let sender_balance_before = sender.balance();
    let receiver_balance_before = receiver.balance();
    let sender_balance_after = sender_balance_before.checked_sub(amount).ok_or_else(|| {
        AgentError::BalanceOverflow {
            agent_id: sender_id.clone(),
        }
    })?;
    let receiver_balance_after = receiver_balance_before.checked_add(amount).ok_or_else(|| {
        AgentError::BalanceOverflow {
            agent_id: receiver_id.clone(),
        }
    })?;

    // Both sides are known to succeed from here on
    state
        .transaction_mut(tx_id)
        .ok_or_else(|| SettlementError::TransactionNotFound(tx_id.to_string()))?
        .settle_remaining(tick)?;
    state
        .agent_mut(&sender_id)
        .ok_or_else(|| SettlementError::AgentNotFound(sender_id.clone()))?
        .adjust_balance(-amount)?;
    let receiver = state
        .agent_mut(&receiver_id)
        .ok_or_else(|| SettlementError::AgentNotFound(receiver_id.clone()))?;
    receiver.adjust_balance(amount)?;
    receiver.remove_expected_inflow(tx_id);
    state.remove_from_rtgs_queue(tx_id);

    state.emit(Event::RtgsSettlement {
        tick,
        tx_id: tx_id.to_string(),
        sender_id: sender_id.clone(),
        receiver_id: receiver_id.clone(),
        amount,
        sender_balance_before,
        sender_balance_after,
        receiver_balance_before,
        receiver_balance_after,
    });
    record_leg_settled(state, tx_id, amount, was_overdue, deadline_tick, tick)?;

    Ok(SettledTransaction {
        tx_id: tx_id.to_string(),
        sender_id,
        receiver_id,
        amount,
    })
}

/// Follow-up events shared by gross and netted settlement of one leg.
///
/// Emits `OverdueTransactionSettled` for a late leg and rolls a split
/// child's settlement up into its parent.
pub(crate) fn record_leg_settled(
    state: &mut SimulationState,
    tx_id: &str,
    amount: i64,
    was_overdue: bool,
    deadline_tick: usize,
    tick: usize,
) -> Result<(), SettlementError> {
    let tx = state
        .transaction(tx_id)
        .ok_or_else(|| SettlementError::TransactionNotFound(tx_id.to_string()))?;
    let sender_id = tx.sender_id().to_string();
    let receiver_id = tx.receiver_id().to_string();
    let parent_id = tx.parent_id().map(str::to_string);

    if was_overdue {
        state.emit(Event::OverdueTransactionSettled {
            tick,
            tx_id: tx_id.to_string(),
            sender_id,
            receiver_id,
            amount,
            deadline_tick,
            ticks_overdue: tick.saturating_sub(deadline_tick),
        });
    }

    if let Some(parent_id) = parent_id {
        let parent = state
            .transaction_mut(&parent_id)
            .ok_or_else(|| SettlementError::TransactionNotFound(parent_id.clone()))?;
        parent.settle(amount, tick)?;
        let parent_remaining = parent.remaining_amount();
        let parent_settled = parent.is_settled();
        state.emit(Event::SplitParentProgress {
            tick,
            parent_id,
            child_id: tx_id.to_string(),
            settled_amount: amount,
            parent_remaining,
            parent_settled,
        });
    }
    Ok(())
}

/// Make one ordered pass over Queue-2.
///
/// Each transaction settles if its sender can cover the full remaining
/// amount at the moment it is reached; otherwise it stays queued in place.
/// Liquidity received earlier in the pass is available to later entries.
///
/// Only unrecoverable errors are returned; insufficient liquidity is the
/// normal "still queued" outcome.
///
/// # Example
///
/// ```rust
/// use rtgs_sim_core::{Agent, RtgsPriority, SimulationState, Transaction};
/// use rtgs_sim_core::settlement::process_queue;
///
/// let mut state = SimulationState::new(
///     10,
///     1,
///     vec![Agent::new("BANK_A", 100_000), Agent::new("BANK_B", 0)],
/// );
/// let mut tx = Transaction::new("tx-1", "BANK_A", "BANK_B", 500_000, 0, 50).unwrap();
/// tx.enter_rtgs_queue(RtgsPriority::Normal, 0);
/// state.add_transaction(tx).unwrap();
/// state.enqueue_rtgs("tx-1").unwrap();
///
/// assert_eq!(process_queue(&mut state, 1).unwrap().settled_count, 0);
///
/// state.agent_mut("BANK_A").unwrap().credit(400_000).unwrap();
/// let result = process_queue(&mut state, 2).unwrap();
/// assert_eq!(result.settled_count, 1);
/// assert_eq!(result.remaining_queue_size, 0);
/// ```
pub fn process_queue(
    state: &mut SimulationState,
    tick: usize,
) -> Result<QueueProcessingResult, SettlementError> {
    let mut result = QueueProcessingResult::default();
    let tx_ids: Vec<String> = state.rtgs_queue().to_vec();

    for tx_id in tx_ids {
        match settle_queued(state, &tx_id, tick) {
            Ok(settled) => {
                result.settled_count += 1;
                result.settled_value = result
                    .settled_value
                    .checked_add(settled.amount)
                    .ok_or_else(|| SettlementError::NetPositionOverflow(settled.sender_id.clone()))?;
                result.settled.push(settled);
            }
            Err(err) if err.is_recoverable() => {
                log::trace!("tick {}: {} stays queued ({})", tick, tx_id, err);
            }
            Err(err) => return Err(err),
        }
    }

    result.remaining_queue_size = state.queue_size();
    Ok(result)
}
