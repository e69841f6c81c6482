//! Simulation state
//!
//! Owns everything that changes during a run: clock, RNG, agents,
//! transactions, the central Queue-2, per-agent cost totals and the event
//! log of the tick in progress. Only the orchestrator holds it; every other
//! component borrows it for the duration of one call.
//!
//! # Critical Invariants
//!
//! 1. **Balance Conservation**: the sum of agent balances changes only
//!    through explicit scenario injections
//! 2. **Transaction Uniqueness**: each id appears once in `transactions`
//! 3. **Queue Validity**: every id in Queue-1/Queue-2 exists in `transactions`
//! 4. **Queue Exclusivity**: an id is in at most one queue
//!
//! Maps are `BTreeMap` so that every iteration order is deterministic.

use crate::core::time::TimeManager;
use crate::costs::CostAccumulator;
use crate::models::agent::Agent;
use crate::models::event::{Event, EventLog};
use crate::models::transaction::{RtgsPriority, Transaction};
use crate::rng::RngManager;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Builder;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Duplicate transaction id: {0}")]
    DuplicateTransaction(String),

    #[error("Transaction {0} is already in Queue-2")]
    AlreadyQueued(String),

    #[error("Transaction {0} has no RTGS priority")]
    MissingRtgsPriority(String),
}

/// Complete mutable simulation state
///
/// # Example
///
/// ```rust
/// use rtgs_sim_core::{Agent, SimulationState};
///
/// let state = SimulationState::new(
///     10,
///     42,
///     vec![Agent::new("BANK_A", 1_000), Agent::new("BANK_B", 2_000)],
/// );
/// assert_eq!(state.num_agents(), 2);
/// assert_eq!(state.total_balance(), Some(3_000));
/// ```
#[derive(Debug, Clone)]
pub struct SimulationState {
    time: TimeManager,
    rng: RngManager,
    agents: BTreeMap<String, Agent>,
    transactions: BTreeMap<String, Transaction>,
    /// Queue-2, kept ordered by (RTGS priority, submission tick, arrival order)
    rtgs_queue: Vec<String>,
    costs: BTreeMap<String, CostAccumulator>,
    event_log: EventLog,
    ids: TxIdAllocator,
    /// Ids not yet settled or overdue, keyed by deadline tick
    awaiting_deadline: BTreeMap<usize, Vec<String>>,
}

/// Deterministic transaction id source.
///
/// Ids are UUID-formatted but derived from a namespace (the run's seed) and
/// a counter, so they are identical across runs and never consume RNG draws.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIdAllocator {
    namespace: u64,
    next_seq: u64,
}

impl TxIdAllocator {
    pub fn new(namespace: u64, next_seq: u64) -> Self {
        Self {
            namespace,
            next_seq,
        }
    }

    pub fn namespace(&self) -> u64 {
        self.namespace
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn allocate(&mut self) -> String {
        let seq = self.next_seq;
        self.next_seq += 1;
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.namespace.to_be_bytes());
        bytes[8..].copy_from_slice(&seq.to_be_bytes());
        Builder::from_random_bytes(bytes).into_uuid().to_string()
    }
}

impl SimulationState {
    pub fn new(ticks_per_day: usize, rng_seed: u64, agents: Vec<Agent>) -> Self {
        let costs = agents
            .iter()
            .map(|a| (a.id().to_string(), CostAccumulator::new()))
            .collect();
        let agents = agents
            .into_iter()
            .map(|a| (a.id().to_string(), a))
            .collect();
        Self {
            time: TimeManager::new(ticks_per_day),
            rng: RngManager::new(rng_seed),
            agents,
            transactions: BTreeMap::new(),
            rtgs_queue: Vec::new(),
            costs,
            event_log: EventLog::new(),
            ids: TxIdAllocator::new(rng_seed, 0),
            awaiting_deadline: BTreeMap::new(),
        }
    }

    /// Rebuild from checkpointed parts
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        time: TimeManager,
        rng: RngManager,
        agents: BTreeMap<String, Agent>,
        transactions: BTreeMap<String, Transaction>,
        rtgs_queue: Vec<String>,
        costs: BTreeMap<String, CostAccumulator>,
        ids: TxIdAllocator,
    ) -> Self {
        let mut awaiting_deadline: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for tx in transactions.values() {
            if !tx.is_settled() && !tx.is_overdue() {
                awaiting_deadline
                    .entry(tx.deadline_tick())
                    .or_default()
                    .push(tx.id().to_string());
            }
        }
        Self {
            time,
            rng,
            agents,
            transactions,
            rtgs_queue,
            costs,
            event_log: EventLog::new(),
            ids,
            awaiting_deadline,
        }
    }

    // ========================================================================
    // Clock and RNG
    // ========================================================================

    pub fn time(&self) -> &TimeManager {
        &self.time
    }

    pub(crate) fn time_mut(&mut self) -> &mut TimeManager {
        &mut self.time
    }

    pub fn current_tick(&self) -> usize {
        self.time.current_tick()
    }

    pub fn current_day(&self) -> usize {
        self.time.current_day()
    }

    pub fn rng(&self) -> &RngManager {
        &self.rng
    }

    pub fn rng_mut(&mut self) -> &mut RngManager {
        &mut self.rng
    }

    pub fn id_allocator(&self) -> &TxIdAllocator {
        &self.ids
    }

    pub fn allocate_tx_id(&mut self) -> String {
        self.ids.allocate()
    }

    /// Split borrow for callers that draw randomness and allocate ids together
    pub fn rng_and_ids(&mut self) -> (&mut RngManager, &mut TxIdAllocator) {
        (&mut self.rng, &mut self.ids)
    }

    // ========================================================================
    // Agents
    // ========================================================================

    pub fn num_agents(&self) -> usize {
        self.agents.len()
    }

    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn agent_mut(&mut self, id: &str) -> Option<&mut Agent> {
        self.agents.get_mut(id)
    }

    pub fn agent_or_err(&self, id: &str) -> Result<&Agent, StateError> {
        self.agents
            .get(id)
            .ok_or_else(|| StateError::AgentNotFound(id.to_string()))
    }

    pub fn agent_mut_or_err(&mut self, id: &str) -> Result<&mut Agent, StateError> {
        self.agents
            .get_mut(id)
            .ok_or_else(|| StateError::AgentNotFound(id.to_string()))
    }

    pub fn agents(&self) -> &BTreeMap<String, Agent> {
        &self.agents
    }

    /// Agent ids in sorted order
    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    /// Sum of all balances; `None` on overflow
    pub fn total_balance(&self) -> Option<i64> {
        self.agents
            .values()
            .try_fold(0i64, |acc, a| acc.checked_add(a.balance()))
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    pub fn transaction(&self, id: &str) -> Option<&Transaction> {
        self.transactions.get(id)
    }

    pub fn transaction_mut(&mut self, id: &str) -> Option<&mut Transaction> {
        self.transactions.get_mut(id)
    }

    pub fn transaction_or_err(&self, id: &str) -> Result<&Transaction, StateError> {
        self.transactions
            .get(id)
            .ok_or_else(|| StateError::TransactionNotFound(id.to_string()))
    }

    pub fn transaction_mut_or_err(&mut self, id: &str) -> Result<&mut Transaction, StateError> {
        self.transactions
            .get_mut(id)
            .ok_or_else(|| StateError::TransactionNotFound(id.to_string()))
    }

    pub fn transactions(&self) -> &BTreeMap<String, Transaction> {
        &self.transactions
    }

    pub fn num_transactions(&self) -> usize {
        self.transactions.len()
    }

    /// Register a new transaction and record the receiver's expected inflow.
    ///
    /// Does not queue it anywhere.
    pub fn add_transaction(&mut self, tx: Transaction) -> Result<(), StateError> {
        if self.transactions.contains_key(tx.id()) {
            return Err(StateError::DuplicateTransaction(tx.id().to_string()));
        }
        self.agent_or_err(tx.sender_id())?;
        let receiver = self.agent_mut_or_err(tx.receiver_id())?;
        receiver.add_expected_inflow(tx.id().to_string());
        if !tx.is_settled() && !tx.is_overdue() {
            self.awaiting_deadline
                .entry(tx.deadline_tick())
                .or_default()
                .push(tx.id().to_string());
        }
        self.transactions.insert(tx.id().to_string(), tx);
        Ok(())
    }

    /// Remove and return, in id order, every indexed id whose deadline is
    /// before `tick`.
    ///
    /// Ids that settled since they were indexed are included; callers
    /// filter on status.
    pub fn take_past_deadline(&mut self, tick: usize) -> Vec<String> {
        let later = self.awaiting_deadline.split_off(&tick);
        let past = std::mem::replace(&mut self.awaiting_deadline, later);
        let mut ids: Vec<String> = past.into_values().flatten().collect();
        ids.sort();
        ids
    }

    /// Register a transaction and append it to its sender's Queue-1
    pub fn add_to_queue1(&mut self, tx: Transaction) -> Result<(), StateError> {
        let tx_id = tx.id().to_string();
        let sender_id = tx.sender_id().to_string();
        self.add_transaction(tx)?;
        self.agent_mut_or_err(&sender_id)?.queue_outgoing(tx_id);
        Ok(())
    }

    // ========================================================================
    // Queue-2
    // ========================================================================

    pub fn rtgs_queue(&self) -> &[String] {
        &self.rtgs_queue
    }

    pub fn queue_size(&self) -> usize {
        self.rtgs_queue.len()
    }

    pub fn is_in_rtgs_queue(&self, tx_id: &str) -> bool {
        self.rtgs_queue.iter().any(|id| id == tx_id)
    }

    fn queue_key(&self, tx_id: &str) -> Option<(RtgsPriority, usize)> {
        let tx = self.transactions.get(tx_id)?;
        Some((tx.rtgs_priority()?, tx.rtgs_submission_tick()?))
    }

    /// Insert into Queue-2 after every entry with an equal or smaller key.
    ///
    /// The transaction must already carry its RTGS priority and submission
    /// tick. Returns the insertion position.
    pub fn enqueue_rtgs(&mut self, tx_id: &str) -> Result<usize, StateError> {
        if self.is_in_rtgs_queue(tx_id) {
            return Err(StateError::AlreadyQueued(tx_id.to_string()));
        }
        self.transaction_or_err(tx_id)?;
        let key = self
            .queue_key(tx_id)
            .ok_or_else(|| StateError::MissingRtgsPriority(tx_id.to_string()))?;

        let position = self
            .rtgs_queue
            .iter()
            .position(|queued| self.queue_key(queued).map_or(false, |k| k > key))
            .unwrap_or(self.rtgs_queue.len());
        self.rtgs_queue.insert(position, tx_id.to_string());
        Ok(position)
    }

    /// Returns `true` if the id was present
    pub(crate) fn remove_from_rtgs_queue(&mut self, tx_id: &str) -> bool {
        match self.rtgs_queue.iter().position(|id| id == tx_id) {
            Some(pos) => {
                self.rtgs_queue.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Queue-2 entries sent by `agent_id`
    pub fn queue2_for_sender<'a>(&'a self, agent_id: &'a str) -> impl Iterator<Item = &'a Transaction> + 'a {
        self.rtgs_queue
            .iter()
            .filter_map(|id| self.transactions.get(id))
            .filter(move |tx| tx.sender_id() == agent_id)
    }

    pub fn queue2_count_for_agent(&self, agent_id: &str) -> usize {
        self.queue2_for_sender(agent_id).count()
    }

    pub fn queue2_value_for_agent(&self, agent_id: &str) -> i64 {
        self.queue2_for_sender(agent_id)
            .map(|tx| tx.remaining_amount())
            .fold(0i64, i64::saturating_add)
    }

    /// Queue-2 value owed to `agent_id`
    pub fn queue2_incoming_value(&self, agent_id: &str) -> i64 {
        self.rtgs_queue
            .iter()
            .filter_map(|id| self.transactions.get(id))
            .filter(|tx| tx.receiver_id() == agent_id)
            .map(|tx| tx.remaining_amount())
            .fold(0i64, i64::saturating_add)
    }

    pub fn queue2_total_value(&self) -> i64 {
        self.rtgs_queue
            .iter()
            .filter_map(|id| self.transactions.get(id))
            .map(|tx| tx.remaining_amount())
            .fold(0i64, i64::saturating_add)
    }

    pub fn queue1_total_value(&self, agent_id: &str) -> i64 {
        self.agents
            .get(agent_id)
            .map(|agent| {
                agent
                    .outgoing_queue()
                    .iter()
                    .filter_map(|id| self.transactions.get(id))
                    .map(|tx| tx.remaining_amount())
                    .fold(0i64, i64::saturating_add)
            })
            .unwrap_or(0)
    }

    /// Total Queue-1 transactions across all agents
    pub fn total_queue1_size(&self) -> usize {
        self.agents.values().map(|a| a.outgoing_queue_size()).sum()
    }

    // ========================================================================
    // Costs
    // ========================================================================

    pub fn costs(&self, agent_id: &str) -> Option<&CostAccumulator> {
        self.costs.get(agent_id)
    }

    pub fn all_costs(&self) -> &BTreeMap<String, CostAccumulator> {
        &self.costs
    }

    pub(crate) fn costs_mut(&mut self, agent_id: &str) -> &mut CostAccumulator {
        self.costs.entry(agent_id.to_string()).or_default()
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub fn emit(&mut self, event: Event) {
        self.event_log.log(event);
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub(crate) fn take_events(&mut self) -> Vec<Event> {
        self.event_log.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SimulationState {
        SimulationState::new(
            10,
            7,
            vec![Agent::new("A", 1_000), Agent::new("B", 500)],
        )
    }

    fn queued(state: &mut SimulationState, priority: RtgsPriority, tick: usize) -> String {
        let id = state.allocate_tx_id();
        let mut tx = Transaction::new(id.clone(), "A", "B", 10, 0, 50).unwrap();
        tx.enter_rtgs_queue(priority, tick);
        state.add_transaction(tx).unwrap();
        state.enqueue_rtgs(&id).unwrap();
        id
    }

    #[test]
    fn test_tx_ids_are_deterministic_and_unique() {
        let mut a = state();
        let mut b = state();
        let ids_a: Vec<String> = (0..5).map(|_| a.allocate_tx_id()).collect();
        let ids_b: Vec<String> = (0..5).map(|_| b.allocate_tx_id()).collect();
        assert_eq!(ids_a, ids_b);
        let mut unique = ids_a.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 5);
        // no RNG draws consumed
        assert_eq!(a.rng().get_state(), RngManager::new(7).get_state());
    }

    #[test]
    fn test_queue2_ordering() {
        let mut s = state();
        let n1 = queued(&mut s, RtgsPriority::Normal, 1);
        let u2 = queued(&mut s, RtgsPriority::Urgent, 2);
        let n0 = queued(&mut s, RtgsPriority::Normal, 0);
        let h3 = queued(&mut s, RtgsPriority::HighlyUrgent, 3);
        let n1b = queued(&mut s, RtgsPriority::Normal, 1);
        assert_eq!(s.rtgs_queue(), &[h3, u2, n0, n1, n1b]);
    }

    #[test]
    fn test_enqueue_requires_priority() {
        let mut s = state();
        let id = s.allocate_tx_id();
        s.add_transaction(Transaction::new(id.clone(), "A", "B", 10, 0, 5).unwrap())
            .unwrap();
        assert_eq!(
            s.enqueue_rtgs(&id),
            Err(StateError::MissingRtgsPriority(id))
        );
    }

    #[test]
    fn test_add_transaction_rejects_duplicates_and_unknown_agents() {
        let mut s = state();
        let tx = Transaction::new("t", "A", "B", 10, 0, 5).unwrap();
        s.add_transaction(tx.clone()).unwrap();
        assert_eq!(
            s.add_transaction(tx),
            Err(StateError::DuplicateTransaction("t".into()))
        );
        let stray = Transaction::new("u", "A", "Z", 10, 0, 5).unwrap();
        assert_eq!(
            s.add_transaction(stray),
            Err(StateError::AgentNotFound("Z".into()))
        );
        assert_eq!(s.agent("B").unwrap().incoming_expected(), &["t"]);
    }

    #[test]
    fn test_queue_values() {
        let mut s = state();
        queued(&mut s, RtgsPriority::Normal, 0);
        queued(&mut s, RtgsPriority::Normal, 0);
        assert_eq!(s.queue2_count_for_agent("A"), 2);
        assert_eq!(s.queue2_value_for_agent("A"), 20);
        assert_eq!(s.queue2_incoming_value("B"), 20);
        assert_eq!(s.queue2_total_value(), 20);
    }

    #[test]
    fn test_take_past_deadline_drains_in_id_order() {
        let mut s = state();
        for (id, deadline) in [("t3", 4), ("t1", 2), ("t2", 4), ("t4", 9)] {
            s.add_transaction(Transaction::new(id, "A", "B", 10, 0, deadline).unwrap())
                .unwrap();
        }

        assert!(s.take_past_deadline(2).is_empty());
        assert_eq!(s.take_past_deadline(5), vec!["t1", "t2", "t3"]);
        assert!(s.take_past_deadline(5).is_empty());

        // Nothing was marked overdue, so a rebuild indexes all four again
        let mut rebuilt = SimulationState::from_parts(
            s.time.clone(),
            s.rng.clone(),
            s.agents.clone(),
            s.transactions.clone(),
            Vec::new(),
            s.costs.clone(),
            s.ids.clone(),
        );
        assert_eq!(rebuilt.take_past_deadline(10), vec!["t1", "t2", "t3", "t4"]);
    }
}
