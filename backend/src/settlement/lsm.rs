//! LSM (Liquidity-Saving Mechanisms) Module
//!
//! Settles groups of Queue-2 transactions against each other so that each
//! participant only needs liquidity for its net position:
//! - Bilateral offsetting (A <-> B netting)
//! - Cycle settlement (A -> B -> C -> A)
//!
//! ```text
//! A owes B 500k, B owes A 300k
//! Gross:  800k of liquidity needed
//! Netted: A pays 200k, both legs settle in full
//! ```
//!
//! A pass runs at most [`MAX_ROUNDS`] rounds of bilateral offsetting,
//! a gross retry of Queue-2, then cycle settlement. Every round rebuilds
//! its graph only from transactions not yet settled this tick, and a
//! transaction is never reported in more than one settlement event.
//! Groups are applied whole or not at all.

pub mod graph;

use crate::models::agent::AgentError;
use crate::models::event::Event;
use crate::models::state::SimulationState;
use crate::settlement::rtgs::{process_queue, record_leg_settled, SettlementError};
use graph::AggregatedGraph;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Upper bound on bilateral+cycle rounds per tick
pub const MAX_ROUNDS: usize = 3;

// ============================================================================
// Configuration Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LsmConfig {
    /// Enable bilateral offsetting (A <-> B netting)
    pub enable_bilateral: bool,

    /// Enable cycle detection and settlement
    pub enable_cycles: bool,

    /// Longest cycle searched for (3 or more)
    pub max_cycle_length: usize,

    /// Cycles settled per tick, across all rounds
    pub max_cycles_per_tick: usize,
}

impl Default for LsmConfig {
    fn default() -> Self {
        Self {
            enable_bilateral: true,
            enable_cycles: true,
            max_cycle_length: 4,
            max_cycles_per_tick: 10,
        }
    }
}

// ============================================================================
// Result Types
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LsmPassResult {
    pub rounds_run: usize,
    pub bilateral_offsets: usize,
    pub cycles_settled: usize,
    pub cycles_rejected: usize,

    /// Transactions settled by offsetting or cycles
    pub netted_count: usize,

    /// Gross value of those transactions (cents)
    pub netted_value: i64,

    /// Transactions settled by the gross retry between sub-passes
    pub retried_count: usize,

    pub final_queue_size: usize,
}

/// One leg of a netted group
#[derive(Debug, Clone, PartialEq)]
struct Leg {
    tx_id: String,
    sender_id: String,
    receiver_id: String,
    amount: i64,
    was_overdue: bool,
    deadline_tick: usize,
}

/// A validated netting group, ready to apply
#[derive(Debug, Clone, PartialEq)]
struct NetPlan {
    legs: Vec<Leg>,
    /// Agent -> net balance change
    nets: BTreeMap<String, i64>,
    total_value: i64,
}

/// Per-tick bookkeeping shared by every round
#[derive(Debug, Default)]
struct TickLedger {
    settled: BTreeSet<String>,
    rejected_cycles: BTreeSet<Vec<String>>,
    cycles_settled: usize,
}

// ============================================================================
// Netting Core
// ============================================================================

/// Collect legs and net positions, then check every net payer's liquidity.
///
/// Returns `Ok(None)` when any leg is gone from Queue-2 or was already
/// settled this tick; the group is stale and must be rediscovered.
fn plan_netting(
    state: &SimulationState,
    tx_ids: &[String],
    ledger: &TickLedger,
    agent_order: &[String],
) -> Result<Option<NetPlan>, SettlementError> {
    let mut legs = Vec::with_capacity(tx_ids.len());
    let mut nets: BTreeMap<String, i64> = BTreeMap::new();
    let mut total_value = 0i64;

    for tx_id in tx_ids {
        if ledger.settled.contains(tx_id) || !state.is_in_rtgs_queue(tx_id) {
            return Ok(None);
        }
        let tx = state
            .transaction(tx_id)
            .ok_or_else(|| SettlementError::TransactionNotFound(tx_id.clone()))?;
        if tx.is_settled() {
            return Ok(None);
        }
        let amount = tx.remaining_amount();
        let sender_id = tx.sender_id().to_string();
        let receiver_id = tx.receiver_id().to_string();

        let out = nets.entry(sender_id.clone()).or_insert(0);
        *out = out
            .checked_sub(amount)
            .ok_or_else(|| SettlementError::NetPositionOverflow(sender_id.clone()))?;
        let inn = nets.entry(receiver_id.clone()).or_insert(0);
        *inn = inn
            .checked_add(amount)
            .ok_or_else(|| SettlementError::NetPositionOverflow(receiver_id.clone()))?;
        total_value = total_value
            .checked_add(amount)
            .ok_or_else(|| SettlementError::NetPositionOverflow(sender_id.clone()))?;

        legs.push(Leg {
            tx_id: tx_id.clone(),
            sender_id,
            receiver_id,
            amount,
            was_overdue: tx.is_overdue(),
            deadline_tick: tx.deadline_tick(),
        });
    }

    for agent_id in agent_order {
        let net = nets.get(agent_id).copied().unwrap_or(0);
        let agent = state
            .agent(agent_id)
            .ok_or_else(|| SettlementError::AgentNotFound(agent_id.clone()))?;
        if net < 0 {
            let net_outflow = net.saturating_neg();
            let available = agent.effective_liquidity();
            if net_outflow > available {
                return Err(SettlementError::CycleInfeasible {
                    agent_id: agent_id.clone(),
                    net_outflow,
                    available,
                });
            }
        }
        agent
            .balance()
            .checked_add(net)
            .ok_or_else(|| AgentError::BalanceOverflow {
                agent_id: agent_id.clone(),
            })?;
    }

    Ok(Some(NetPlan {
        legs,
        nets,
        total_value,
    }))
}

/// Settle every leg of a checked plan and move balances by the nets only
fn apply_netting(
    state: &mut SimulationState,
    plan: &NetPlan,
    ledger: &mut TickLedger,
    tick: usize,
) -> Result<(), SettlementError> {
    for leg in &plan.legs {
        state
            .transaction_mut(&leg.tx_id)
            .ok_or_else(|| SettlementError::TransactionNotFound(leg.tx_id.clone()))?
            .settle_remaining(tick)?;
        state.remove_from_rtgs_queue(&leg.tx_id);
        if let Some(receiver) = state.agent_mut(&leg.receiver_id) {
            receiver.remove_expected_inflow(&leg.tx_id);
        }
        ledger.settled.insert(leg.tx_id.clone());
    }
    for (agent_id, net) in &plan.nets {
        state
            .agent_mut(agent_id)
            .ok_or_else(|| SettlementError::AgentNotFound(agent_id.clone()))?
            .adjust_balance(*net)?;
    }
    Ok(())
}

fn finish_legs(state: &mut SimulationState, plan: &NetPlan, tick: usize) -> Result<(), SettlementError> {
    for leg in &plan.legs {
        record_leg_settled(
            state,
            &leg.tx_id,
            leg.amount,
            leg.was_overdue,
            leg.deadline_tick,
            tick,
        )?;
    }
    Ok(())
}

// ============================================================================
// Bilateral Offsetting
// ============================================================================

/// Offset every agent pair with obligations in both directions.
///
/// Both directions settle in full when the net payer can cover the
/// difference; otherwise the pair is left for later.
fn bilateral_round(
    state: &mut SimulationState,
    ledger: &mut TickLedger,
    round: usize,
    tick: usize,
    result: &mut LsmPassResult,
) -> Result<(), SettlementError> {
    let graph = AggregatedGraph::from_queue(state, &ledger.settled);

    for (a, b) in graph.bilateral_pairs() {
        let (Some(agent_a), Some(agent_b), Some(ab), Some(ba)) = (
            graph.agent(a),
            graph.agent(b),
            graph.edge_by_index(a, b),
            graph.edge_by_index(b, a),
        ) else {
            continue;
        };
        let agent_a = agent_a.to_string();
        let agent_b = agent_b.to_string();

        let tx_ids: Vec<String> = ab.tx_ids.iter().chain(ba.tx_ids.iter()).cloned().collect();
        let order = [agent_a.clone(), agent_b.clone()];
        let plan = match plan_netting(state, &tx_ids, ledger, &order) {
            Ok(Some(plan)) => plan,
            Ok(None) => continue,
            Err(err) if err.is_recoverable() => {
                log::debug!("tick {}: bilateral {}<->{} skipped ({})", tick, agent_a, agent_b, err);
                continue;
            }
            Err(err) => return Err(err),
        };

        let amount_a_to_b = plan
            .legs
            .iter()
            .filter(|leg| leg.sender_id == agent_a)
            .map(|leg| leg.amount)
            .sum::<i64>();
        let amount_b_to_a = plan.total_value - amount_a_to_b;
        let net_a = plan.nets.get(&agent_a).copied().unwrap_or(0);
        let net_b = plan.nets.get(&agent_b).copied().unwrap_or(0);

        apply_netting(state, &plan, ledger, tick)?;
        state.emit(Event::LsmBilateralOffset {
            tick,
            round,
            agent_a,
            agent_b,
            tx_ids_a_to_b: ab.tx_ids.clone(),
            tx_ids_b_to_a: ba.tx_ids.clone(),
            amount_a_to_b,
            amount_b_to_a,
            net_a,
            net_b,
        });
        finish_legs(state, &plan, tick)?;

        result.bilateral_offsets += 1;
        result.netted_count += plan.legs.len();
        result.netted_value = result.netted_value.saturating_add(plan.total_value);
    }
    Ok(())
}

// ============================================================================
// Cycle Settlement
// ============================================================================

fn cycle_round(
    state: &mut SimulationState,
    config: &LsmConfig,
    ledger: &mut TickLedger,
    round: usize,
    tick: usize,
    result: &mut LsmPassResult,
) -> Result<(), SettlementError> {
    if ledger.cycles_settled >= config.max_cycles_per_tick {
        return Ok(());
    }
    let graph = AggregatedGraph::from_queue(state, &ledger.settled);
    let candidates = graph.find_cycles(config.max_cycle_length, config.max_cycles_per_tick);

    for cycle in candidates {
        if ledger.cycles_settled >= config.max_cycles_per_tick {
            break;
        }
        let agents: Vec<String> = cycle
            .iter()
            .filter_map(|&idx| graph.agent(idx).map(str::to_string))
            .collect();
        let mut tx_ids = Vec::new();
        for (pos, &from) in cycle.iter().enumerate() {
            let to = cycle[(pos + 1) % cycle.len()];
            if let Some(edge) = graph.edge_by_index(from, to) {
                tx_ids.extend(edge.tx_ids.iter().cloned());
            }
        }

        let plan = match plan_netting(state, &tx_ids, ledger, &agents) {
            Ok(Some(plan)) => plan,
            Ok(None) => continue,
            Err(SettlementError::CycleInfeasible {
                agent_id,
                net_outflow,
                available,
            }) => {
                result.cycles_rejected += 1;
                let mut key = tx_ids.clone();
                key.sort();
                if ledger.rejected_cycles.insert(key) {
                    log::debug!(
                        "tick {}: cycle {:?} rejected, {} short by {}",
                        tick,
                        agents,
                        agent_id,
                        net_outflow - available
                    );
                    state.emit(Event::LsmCycleRejected {
                        tick,
                        round,
                        agents,
                        tx_ids,
                        infeasible_agent: agent_id,
                        net_outflow,
                        available_liquidity: available,
                    });
                }
                continue;
            }
            Err(err) => return Err(err),
        };

        let net_positions: Vec<i64> = agents
            .iter()
            .map(|id| plan.nets.get(id).copied().unwrap_or(0))
            .collect();
        let (max_net_outflow, max_net_outflow_agent) = agents
            .iter()
            .zip(&net_positions)
            .map(|(id, net)| (net.saturating_neg().max(0), id))
            .fold((0i64, agents.first().cloned().unwrap_or_default()), |best, (outflow, id)| {
                if outflow > best.0 {
                    (outflow, id.clone())
                } else {
                    best
                }
            });

        apply_netting(state, &plan, ledger, tick)?;
        state.emit(Event::LsmCycleSettlement {
            tick,
            round,
            agents,
            tx_ids: plan.legs.iter().map(|l| l.tx_id.clone()).collect(),
            tx_amounts: plan.legs.iter().map(|l| l.amount).collect(),
            net_positions,
            total_value: plan.total_value,
            max_net_outflow,
            max_net_outflow_agent,
        });
        finish_legs(state, &plan, tick)?;

        ledger.cycles_settled += 1;
        result.cycles_settled += 1;
        result.netted_count += plan.legs.len();
        result.netted_value = result.netted_value.saturating_add(plan.total_value);
    }
    Ok(())
}

// ============================================================================
// Coordinated Pass
// ============================================================================

/// Run bounded LSM rounds over Queue-2.
///
/// Each round: bilateral offsets, a gross retry of Queue-2 if anything
/// settled, then cycles. Stops after [`MAX_ROUNDS`] or the first round
/// without progress.
///
/// # Example
///
/// ```rust
/// use rtgs_sim_core::{Agent, RtgsPriority, SimulationState, Transaction};
/// use rtgs_sim_core::settlement::{run_lsm_pass, LsmConfig};
///
/// let mut state = SimulationState::new(
///     10,
///     1,
///     vec![Agent::new("A", 1_000), Agent::new("B", 0)],
/// );
/// for (id, from, to, amount) in [("t1", "A", "B", 4_000), ("t2", "B", "A", 3_000)] {
///     let mut tx = Transaction::new(id, from, to, amount, 0, 9).unwrap();
///     tx.enter_rtgs_queue(RtgsPriority::Normal, 0);
///     state.add_transaction(tx).unwrap();
///     state.enqueue_rtgs(id).unwrap();
/// }
///
/// let result = run_lsm_pass(&mut state, &LsmConfig::default(), 0).unwrap();
/// assert_eq!(result.bilateral_offsets, 1);
/// assert_eq!(state.agent("A").unwrap().balance(), 0);
/// assert_eq!(state.agent("B").unwrap().balance(), 1_000);
/// ```
pub fn run_lsm_pass(
    state: &mut SimulationState,
    config: &LsmConfig,
    tick: usize,
) -> Result<LsmPassResult, SettlementError> {
    let mut result = LsmPassResult::default();
    let mut ledger = TickLedger::default();

    while result.rounds_run < MAX_ROUNDS && state.queue_size() > 0 {
        result.rounds_run += 1;
        let round = result.rounds_run;
        let progress_before = result.netted_count + result.retried_count;

        if config.enable_bilateral {
            let offsets_before = result.netted_count;
            bilateral_round(state, &mut ledger, round, tick, &mut result)?;
            if result.netted_count > offsets_before {
                result.retried_count += process_queue(state, tick)?.settled_count;
            }
        }

        if config.enable_cycles && state.queue_size() > 0 {
            let cycles_before = result.netted_count;
            cycle_round(state, config, &mut ledger, round, tick, &mut result)?;
            if result.netted_count > cycles_before {
                result.retried_count += process_queue(state, tick)?.settled_count;
            }
        }

        if result.netted_count + result.retried_count == progress_before {
            break;
        }
    }

    result.final_queue_size = state.queue_size();
    Ok(result)
}
