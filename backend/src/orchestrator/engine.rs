//! Orchestrator engine
//!
//! Owns the simulation state and advances it one tick at a time. Every tick
//! runs the same fixed phase order, and events are emitted in that order:
//!
//! ```text
//! For each tick t:
//! 1. Scenario events scheduled for t (configuration order)
//! 2. Arrivals (agents in sorted order)
//! 3. Bank tree per agent (release budget, state registers)
//! 4. Payment tree per Queue-1 transaction (release, hold, drop, split, ...)
//! 5. RTGS pass over Queue-2
//! 6. LSM (bilateral offsets, then cycles, bounded rounds)
//! 7. Overdue marking, priority escalation, per-tick cost accrual
//! 8. Collateral trees, auto-withdraw timers, end of day
//! ```
//!
//! A failed tick aborts the instance: its partial events are discarded and
//! every later `tick()` returns [`SimulationError::Aborted`].
//!
//! # Example
//!
//! ```rust
//! use rtgs_sim_core::orchestrator::{AgentConfig, Orchestrator, OrchestratorConfig};
//!
//! let config = OrchestratorConfig::new(
//!     10,
//!     1,
//!     12345,
//!     vec![AgentConfig::new("BANK_A", 1_000_000), AgentConfig::new("BANK_B", 2_000_000)],
//! );
//! let mut orchestrator = Orchestrator::new(config).unwrap();
//!
//! for _ in 0..10 {
//!     let result = orchestrator.tick().unwrap();
//!     assert_eq!(result.num_arrivals, 0);
//! }
//! assert!(orchestrator.is_complete());
//! assert_eq!(orchestrator.total_balance(), Some(3_000_000));
//! ```

use crate::arrivals::ArrivalGenerator;
use crate::costs::{bps_cost, CostAccumulator, CostBreakdown};
use crate::error::SimulationError;
use crate::events::ScenarioEventHandler;
use crate::models::agent::{Agent, CollateralTimer, ReleaseBudget};
use crate::models::event::{CollateralTrigger, Event};
use crate::models::state::SimulationState;
use crate::models::transaction::{RtgsPriority, Transaction};
use crate::orchestrator::checkpoint::compute_config_hash;
use crate::orchestrator::config::{AgentConfig, OrchestratorConfig};
use crate::policy::tree::{DecisionPath, EvalContext, Evaluation, TreeKind, TreePolicy};
use crate::policy::{BankDecision, CollateralDecision, PaymentDecision};
use crate::settlement::{process_queue, run_lsm_pass};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Outcome of one tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickResult {
    pub tick: usize,

    /// Everything that happened, in phase order
    pub events: Vec<Event>,

    pub num_arrivals: usize,

    /// Transactions that left Queue-2 settled, by any mechanism
    pub num_settlements: usize,

    /// The subset of `num_settlements` settled by LSM netting
    pub num_lsm_releases: usize,

    /// Costs accrued during the tick, all agents, all categories
    pub total_cost: i64,
}

/// Per-agent state at the close of a day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySnapshot {
    pub day: usize,
    pub agent_id: String,
    pub balance: i64,
    pub effective_liquidity: i64,
    pub posted_collateral: i64,
    pub queue1_size: usize,
    pub queue2_size: usize,
    pub total_cost: i64,
    pub peak_net_debit: i64,
}

/// Main simulation orchestrator
pub struct Orchestrator {
    config: OrchestratorConfig,
    config_hash: String,
    state: SimulationState,
    policies: BTreeMap<String, TreePolicy>,
    arrivals: ArrivalGenerator,
    scenario: ScenarioEventHandler,
    event_history: BTreeMap<usize, Vec<Event>>,
    daily_snapshots: Vec<DailySnapshot>,
    /// Set once a tick fails; the instance never runs again
    aborted: Option<String>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("current_tick", &self.current_tick())
            .field("total_ticks", &self.config.total_ticks())
            .field("num_agents", &self.state.num_agents())
            .field("num_transactions", &self.state.num_transactions())
            .field("queue2_size", &self.state.queue_size())
            .field("aborted", &self.aborted)
            .finish()
    }
}

fn overflow(what: impl fmt::Display) -> SimulationError {
    SimulationError::ArithmeticOverflow(what.to_string())
}

fn build_agent(config: &AgentConfig) -> Agent {
    let mut agent = Agent::new(config.id.clone(), config.opening_balance);
    agent.set_unsecured_cap(config.unsecured_cap);
    agent.set_max_collateral_capacity(config.max_collateral_capacity);
    agent.set_collateral_haircut(config.collateral_haircut);
    agent.set_min_collateral_holding_ticks(config.min_collateral_holding_ticks);
    agent.set_liquidity_buffer(config.liquidity_buffer);
    if config.posted_collateral > 0 {
        agent.adjust_collateral(config.posted_collateral, 0);
    }
    agent
}

impl Orchestrator {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Validate the configuration and build the initial state.
    ///
    /// # Errors
    /// [`SimulationError::Configuration`] describing the first problem found.
    pub fn new(config: OrchestratorConfig) -> Result<Self, SimulationError> {
        config.validate()?;

        let agents: Vec<Agent> = config.agent_configs.iter().map(build_agent).collect();
        let state = SimulationState::new(config.ticks_per_day, config.rng_seed, agents);

        let arrival_configs = config
            .agent_configs
            .iter()
            .filter_map(|a| a.arrival_config.clone().map(|c| (a.id.clone(), c)))
            .collect();
        let arrivals = ArrivalGenerator::new(
            arrival_configs,
            state.agent_ids(),
            config.episode_end_tick(),
            config.ticks_per_day,
            config.deadline_cap_at_eod,
        );

        let orchestrator = Self::assemble(config, state, arrivals, Vec::new())?;
        log::info!(
            "Orchestrator ready: {} agents, {} ticks/day x {} days, seed {}, {} scenario events",
            orchestrator.state.num_agents(),
            orchestrator.config.ticks_per_day,
            orchestrator.config.num_days,
            orchestrator.config.rng_seed,
            orchestrator.config.scenario_events.len(),
        );
        Ok(orchestrator)
    }

    /// Wire a (possibly restored) state to its configuration
    pub(crate) fn assemble(
        config: OrchestratorConfig,
        state: SimulationState,
        arrivals: ArrivalGenerator,
        daily_snapshots: Vec<DailySnapshot>,
    ) -> Result<Self, SimulationError> {
        let mut policies = BTreeMap::new();
        for agent in &config.agent_configs {
            policies.insert(agent.id.clone(), agent.policy.build()?);
        }
        let config_hash = compute_config_hash(&config)?;
        let scenario = ScenarioEventHandler::new(config.scenario_events.clone());

        Ok(Self {
            config,
            config_hash,
            state,
            policies,
            arrivals,
            scenario,
            event_history: BTreeMap::new(),
            daily_snapshots,
            aborted: None,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// SHA-256 of the canonical configuration JSON
    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub(crate) fn arrivals(&self) -> &ArrivalGenerator {
        &self.arrivals
    }

    /// The next tick to run
    pub fn current_tick(&self) -> usize {
        self.state.current_tick()
    }

    pub fn current_day(&self) -> usize {
        self.state.current_day()
    }

    pub fn total_ticks(&self) -> usize {
        self.config.total_ticks()
    }

    pub fn is_complete(&self) -> bool {
        self.current_tick() >= self.total_ticks()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.state.agent_ids()
    }

    pub fn agent_balance(&self, agent_id: &str) -> Option<i64> {
        self.state.agent(agent_id).map(Agent::balance)
    }

    /// Queue-1 of an agent, in queue order
    pub fn agent_queue1(&self, agent_id: &str) -> Vec<&Transaction> {
        self.state
            .agent(agent_id)
            .map(|agent| {
                agent
                    .outgoing_queue()
                    .iter()
                    .filter_map(|id| self.state.transaction(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Queue-2 in settlement order
    pub fn queue2(&self) -> Vec<&Transaction> {
        self.state
            .rtgs_queue()
            .iter()
            .filter_map(|id| self.state.transaction(id))
            .collect()
    }

    pub fn transaction(&self, tx_id: &str) -> Option<&Transaction> {
        self.state.transaction(tx_id)
    }

    pub fn costs(&self, agent_id: &str) -> Option<&CostAccumulator> {
        self.state.costs(agent_id)
    }

    pub fn all_costs(&self) -> &BTreeMap<String, CostAccumulator> {
        self.state.all_costs()
    }

    /// Sum of all agent balances; `None` on overflow
    pub fn total_balance(&self) -> Option<i64> {
        self.state.total_balance()
    }

    pub fn daily_snapshots(&self) -> &[DailySnapshot] {
        &self.daily_snapshots
    }

    /// Events of a past tick, if event history is retained
    pub fn events_for_tick(&self, tick: usize) -> Option<&[Event]> {
        self.event_history.get(&tick).map(Vec::as_slice)
    }

    pub fn policy_id(&self, agent_id: &str) -> Option<&str> {
        self.policies.get(agent_id).map(TreePolicy::policy_id)
    }

    fn system_cost(&self) -> i64 {
        self.state
            .all_costs()
            .values()
            .fold(0i64, |acc, c| acc.saturating_add(c.total()))
    }

    // ========================================================================
    // Tick loop
    // ========================================================================

    /// Run one tick.
    ///
    /// # Errors
    /// - [`SimulationError::SimulationComplete`] once the horizon is reached
    /// - [`SimulationError::Aborted`] after an earlier tick failed
    /// - any fatal error raised while running the tick, which aborts the
    ///   instance
    pub fn tick(&mut self) -> Result<TickResult, SimulationError> {
        if let Some(reason) = &self.aborted {
            return Err(SimulationError::Aborted(reason.clone()));
        }
        let tick = self.current_tick();
        let total_ticks = self.total_ticks();
        if tick >= total_ticks {
            return Err(SimulationError::SimulationComplete { total_ticks });
        }

        match self.run_tick(tick) {
            Ok(result) => {
                log::debug!("Tick {} emitted {} events", tick, result.events.len());
                Ok(result)
            }
            Err(err) => {
                self.state.take_events();
                log::error!("Simulation aborted at tick {}: {}", tick, err);
                self.aborted = Some(format!("tick {}: {}", tick, err));
                Err(err)
            }
        }
    }

    /// Run up to `n` ticks, stopping early at the horizon
    pub fn run_ticks(&mut self, n: usize) -> Result<Vec<TickResult>, SimulationError> {
        let remaining = self.total_ticks().saturating_sub(self.current_tick());
        (0..n.min(remaining)).map(|_| self.tick()).collect()
    }

    /// Run every remaining tick
    pub fn run_to_end(&mut self) -> Result<Vec<TickResult>, SimulationError> {
        self.run_ticks(usize::MAX)
    }

    fn run_tick(&mut self, tick: usize) -> Result<TickResult, SimulationError> {
        let queue2_before = self.state.rtgs_queue().to_vec();
        let balance_before = self
            .total_balance()
            .ok_or_else(|| overflow("total balance"))?;
        let cost_before = self.system_cost();

        // Phase 1
        let episode_end_tick = self.config.episode_end_tick();
        self.scenario
            .execute_tick_events(&mut self.state, &mut self.arrivals, tick, episode_end_tick)?;

        // Phase 2
        let num_arrivals = self.generate_arrivals(tick)?;

        // Phases 3 and 4
        self.bank_phase(tick)?;
        self.payment_phase(tick)?;

        // Phases 5 and 6
        let rtgs = process_queue(&mut self.state, tick)?;
        let lsm = run_lsm_pass(&mut self.state, &self.config.lsm_config, tick)?;

        // Phase 7
        self.mark_overdue(tick)?;
        self.escalate_priorities(tick)?;
        self.accrue_costs(tick)?;

        // Phase 8
        self.collateral_phase(TreeKind::StrategicCollateral, tick)?;
        self.collateral_phase(TreeKind::EndOfTickCollateral, tick)?;
        self.fire_collateral_timers(tick)?;
        if self.state.time().is_end_of_day() {
            self.end_of_day(tick)?;
        }

        let events = self.state.take_events();
        check_queue2_accounting(&queue2_before, &self.state, &events, tick)?;
        let balance_after = self
            .total_balance()
            .ok_or_else(|| overflow("total balance"))?;
        if balance_after != balance_before {
            return Err(SimulationError::InvariantViolation(format!(
                "total balance moved from {} to {} during tick {}",
                balance_before, balance_after, tick
            )));
        }

        let total_cost = self.system_cost().saturating_sub(cost_before);
        self.state.time_mut().advance_tick();
        if self.config.retain_event_history {
            self.event_history.insert(tick, events.clone());
        }

        Ok(TickResult {
            tick,
            events,
            num_arrivals,
            num_settlements: rtgs.settled_count + lsm.retried_count + lsm.netted_count,
            num_lsm_releases: lsm.netted_count,
            total_cost,
        })
    }

    // ========================================================================
    // Phase 2: arrivals
    // ========================================================================

    fn generate_arrivals(&mut self, tick: usize) -> Result<usize, SimulationError> {
        let (rng, ids) = self.state.rng_and_ids();
        let arrivals = self.arrivals.generate_all(tick, rng, ids)?;
        let count = arrivals.len();

        for tx in arrivals {
            let event = Event::Arrival {
                tick,
                tx_id: tx.id().to_string(),
                sender_id: tx.sender_id().to_string(),
                receiver_id: tx.receiver_id().to_string(),
                amount: tx.amount(),
                deadline: tx.deadline_tick(),
                priority: tx.priority(),
                is_divisible: tx.is_divisible(),
            };
            self.state.add_to_queue1(tx)?;
            self.state.emit(event);
        }
        Ok(count)
    }

    // ========================================================================
    // Policy helpers
    // ========================================================================

    fn policy(&self, agent_id: &str) -> Result<&TreePolicy, SimulationError> {
        self.policies.get(agent_id).ok_or_else(|| {
            SimulationError::InvariantViolation(format!("agent {} has no policy", agent_id))
        })
    }

    fn has_tree(&self, agent_id: &str, kind: TreeKind) -> Result<bool, SimulationError> {
        Ok(self.policy(agent_id)?.has_tree(kind))
    }

    fn evaluation_failed(&mut self, agent_id: &str, kind: TreeKind, error: String, tick: usize) {
        log::warn!(
            "Agent {} {} evaluation failed at tick {}: {}",
            agent_id,
            kind.as_str(),
            tick,
            error
        );
        self.state.emit(Event::PolicyEvaluationFailed {
            tick,
            agent_id: agent_id.to_string(),
            tree: kind.as_str().to_string(),
            error,
        });
    }

    // ========================================================================
    // Phase 3: bank tree
    // ========================================================================

    fn bank_phase(&mut self, tick: usize) -> Result<(), SimulationError> {
        for agent_id in self.state.agent_ids() {
            self.state.agent_mut_or_err(&agent_id)?.clear_release_budget();
            if !self.has_tree(&agent_id, TreeKind::Bank)? {
                continue;
            }

            let evaluation = {
                let agent = self.state.agent_or_err(&agent_id)?;
                let context = EvalContext::for_agent(agent, &self.state, &self.config.cost_rates);
                self.policy(&agent_id)?.evaluate_bank(&context)
            };
            let Some(Evaluation { decision, path }) = evaluation else {
                continue;
            };

            match decision {
                Err(err) => self.evaluation_failed(&agent_id, TreeKind::Bank, err.to_string(), tick),
                Ok(BankDecision::SetReleaseBudget {
                    max_value,
                    focus_counterparties,
                    max_per_counterparty,
                }) => {
                    self.state.agent_mut_or_err(&agent_id)?.set_release_budget(ReleaseBudget::new(
                        max_value,
                        focus_counterparties.clone(),
                        max_per_counterparty,
                    ));
                    self.state.emit(Event::BankBudgetSet {
                        tick,
                        agent_id: agent_id.clone(),
                        max_value,
                        focus_counterparties,
                        max_per_counterparty,
                        decision_path: path,
                    });
                }
                Ok(BankDecision::SetState { key, value, reason }) => {
                    self.set_register(&agent_id, key, value, reason, path, tick)?;
                }
                Ok(BankDecision::AddState { key, delta, reason }) => {
                    let current = self.state.agent_or_err(&agent_id)?.get_state_register(&key);
                    self.set_register(&agent_id, key, current + delta, reason, path, tick)?;
                }
                Ok(BankDecision::NoAction) => {}
            }
        }
        Ok(())
    }

    fn set_register(
        &mut self,
        agent_id: &str,
        key: String,
        value: f64,
        reason: String,
        path: DecisionPath,
        tick: usize,
    ) -> Result<(), SimulationError> {
        match self.state.agent_mut_or_err(agent_id)?.set_state_register(&key, value) {
            Ok((old_value, new_value)) => self.state.emit(Event::StateRegisterSet {
                tick,
                agent_id: agent_id.to_string(),
                register_key: key,
                old_value,
                new_value,
                reason,
                decision_path: path,
            }),
            Err(err) => self.evaluation_failed(agent_id, TreeKind::Bank, err.to_string(), tick),
        }
        Ok(())
    }

    // ========================================================================
    // Phase 4: payment tree
    // ========================================================================

    fn payment_phase(&mut self, tick: usize) -> Result<(), SimulationError> {
        for agent_id in self.state.agent_ids() {
            // Snapshot: children created by splits wait for the next tick
            let queue = self.state.agent_or_err(&agent_id)?.outgoing_queue().to_vec();

            for tx_id in queue {
                let evaluation = {
                    let agent = self.state.agent_or_err(&agent_id)?;
                    if !agent.outgoing_queue().contains(&tx_id) {
                        continue;
                    }
                    let tx = self.state.transaction_or_err(&tx_id)?;
                    let context =
                        EvalContext::for_transaction(tx, agent, &self.state, &self.config.cost_rates);
                    self.policy(&agent_id)?.evaluate_payment(&context)
                };

                let (decision, path) = match evaluation {
                    None => (PaymentDecision::Release { rtgs_priority: None }, Vec::new()),
                    Some(Evaluation {
                        decision: Ok(decision),
                        path,
                    }) => (decision, path),
                    Some(Evaluation {
                        decision: Err(err),
                        path,
                    }) => {
                        log::warn!(
                            "Agent {} payment_tree failed on {} at tick {}: {}",
                            agent_id,
                            tx_id,
                            tick,
                            err
                        );
                        (
                            PaymentDecision::Hold {
                                reason: "EvaluationError".to_string(),
                            },
                            path,
                        )
                    }
                };

                self.apply_payment_decision(&agent_id, &tx_id, decision, path, tick)?;
            }
        }
        Ok(())
    }

    fn apply_payment_decision(
        &mut self,
        agent_id: &str,
        tx_id: &str,
        decision: PaymentDecision,
        path: DecisionPath,
        tick: usize,
    ) -> Result<(), SimulationError> {
        match decision {
            PaymentDecision::Release { rtgs_priority } => {
                self.release(agent_id, tx_id, rtgs_priority, path, tick)
            }
            PaymentDecision::ReleaseWithCredit { rtgs_priority } => {
                self.cover_shortfall(agent_id, tx_id, &path, tick)?;
                self.release(agent_id, tx_id, rtgs_priority, path, tick)
            }
            PaymentDecision::Hold { reason } => {
                self.hold(agent_id, tx_id, reason, path, tick);
                Ok(())
            }
            PaymentDecision::Drop { reason } => self.drop_transaction(agent_id, tx_id, reason, path, tick),
            PaymentDecision::Split { num_splits } => {
                self.split_transaction(agent_id, tx_id, num_splits, path, tick)
            }
            PaymentDecision::Reprioritize { new_priority } => {
                let tx = self.state.transaction_mut_or_err(tx_id)?;
                let old_priority = tx.set_priority(new_priority);
                let new_priority = tx.priority();
                self.state.emit(Event::TransactionReprioritized {
                    tick,
                    agent_id: agent_id.to_string(),
                    tx_id: tx_id.to_string(),
                    old_priority,
                    new_priority,
                    decision_path: path,
                });
                Ok(())
            }
        }
    }

    fn hold(&mut self, agent_id: &str, tx_id: &str, reason: String, path: DecisionPath, tick: usize) {
        self.state.emit(Event::PolicyHold {
            tick,
            agent_id: agent_id.to_string(),
            tx_id: tx_id.to_string(),
            reason,
            decision_path: path,
        });
    }

    /// Move a Queue-1 transaction into Queue-2, subject to the release budget
    fn release(
        &mut self,
        agent_id: &str,
        tx_id: &str,
        declared: Option<RtgsPriority>,
        path: DecisionPath,
        tick: usize,
    ) -> Result<(), SimulationError> {
        let tx = self.state.transaction_or_err(tx_id)?;
        let receiver_id = tx.receiver_id().to_string();
        let amount = tx.remaining_amount();
        let rtgs_priority = declared.unwrap_or_else(|| RtgsPriority::from_internal(tx.priority()));

        let budget_check = self.state.agent_or_err(agent_id)?.check_release(&receiver_id, amount);
        if let Err(block) = budget_check {
            self.hold(agent_id, tx_id, block.as_reason().to_string(), path, tick);
            return Ok(());
        }

        let agent = self.state.agent_mut_or_err(agent_id)?;
        agent.remove_from_queue(tx_id);
        agent.track_release(&receiver_id, amount);
        self.state
            .transaction_mut_or_err(tx_id)?
            .enter_rtgs_queue(rtgs_priority, tick);
        self.state.enqueue_rtgs(tx_id)?;

        self.state.emit(Event::PolicySubmit {
            tick,
            agent_id: agent_id.to_string(),
            tx_id: tx_id.to_string(),
            amount,
            rtgs_priority,
            decision_path: path,
        });
        let queue2_size = self.state.queue_size();
        self.state.emit(Event::QueuedRtgs {
            tick,
            tx_id: tx_id.to_string(),
            sender_id: agent_id.to_string(),
            rtgs_priority,
            queue2_size,
        });
        Ok(())
    }

    /// Post enough collateral to fund the transaction, bounded by capacity.
    ///
    /// Nothing is posted when the release budget would block the release.
    fn cover_shortfall(
        &mut self,
        agent_id: &str,
        tx_id: &str,
        path: &[String],
        tick: usize,
    ) -> Result<(), SimulationError> {
        let tx = self.state.transaction_or_err(tx_id)?;
        let amount = tx.remaining_amount();
        let agent = self.state.agent_or_err(agent_id)?;
        if agent.check_release(tx.receiver_id(), amount).is_err() {
            return Ok(());
        }

        let shortfall = amount.saturating_sub(agent.effective_liquidity());
        let retained = 1.0 - agent.collateral_haircut();
        if shortfall <= 0 || retained <= 0.0 {
            return Ok(());
        }
        let needed = (shortfall as f64 / retained).ceil() as i64;
        let to_post = needed.min(agent.remaining_collateral_capacity());
        if to_post <= 0 {
            return Ok(());
        }

        self.post_collateral(
            agent_id,
            to_post,
            "ReleaseWithCredit".to_string(),
            None,
            CollateralTrigger::ReleaseWithCredit,
            path.to_vec(),
            tick,
        )
    }

    fn drop_transaction(
        &mut self,
        agent_id: &str,
        tx_id: &str,
        reason: String,
        path: DecisionPath,
        tick: usize,
    ) -> Result<(), SimulationError> {
        let tx = self.state.transaction_mut_or_err(tx_id)?;
        if let Err(err) = tx.mark_dropped(tick) {
            log::debug!("Drop of {} ignored at tick {}: {}", tx_id, tick, err);
            return Ok(());
        }
        let amount = tx.remaining_amount();
        let receiver_id = tx.receiver_id().to_string();

        self.state.agent_mut_or_err(agent_id)?.remove_from_queue(tx_id);
        self.state
            .agent_mut_or_err(&receiver_id)?
            .remove_expected_inflow(tx_id);

        self.state.emit(Event::PolicyDrop {
            tick,
            agent_id: agent_id.to_string(),
            tx_id: tx_id.to_string(),
            amount,
            reason,
            decision_path: path,
        });
        Ok(())
    }

    /// Replace a Queue-1 transaction with `num_splits` children at the same
    /// queue position. Invalid splits are held instead.
    fn split_transaction(
        &mut self,
        agent_id: &str,
        tx_id: &str,
        num_splits: usize,
        path: DecisionPath,
        tick: usize,
    ) -> Result<(), SimulationError> {
        let tx = self.state.transaction_or_err(tx_id)?;
        let receiver_id = tx.receiver_id().to_string();
        if !tx.is_divisible() || num_splits < 2 || num_splits as i64 > tx.remaining_amount() {
            log::debug!(
                "Split of {} into {} refused at tick {} (divisible: {}, remaining: {})",
                tx_id,
                num_splits,
                tick,
                tx.is_divisible(),
                tx.remaining_amount()
            );
            self.hold(agent_id, tx_id, "InvalidSplit".to_string(), path, tick);
            return Ok(());
        }

        let child_ids: Vec<String> = (0..num_splits).map(|_| self.state.allocate_tx_id()).collect();
        let children = match self
            .state
            .transaction_mut_or_err(tx_id)?
            .split(child_ids.clone())
        {
            Ok(children) => children,
            Err(err) => {
                log::debug!("Split of {} failed at tick {}: {}", tx_id, tick, err);
                self.hold(agent_id, tx_id, "InvalidSplit".to_string(), path, tick);
                return Ok(());
            }
        };

        let friction_cost = self
            .config
            .cost_rates
            .split_friction_cost
            .checked_mul(num_splits as i64 - 1)
            .ok_or_else(|| overflow(format!("split friction for {}", tx_id)))?;
        if friction_cost > 0 {
            self.state
                .costs_mut(agent_id)
                .add(&CostBreakdown {
                    split_friction_cost: friction_cost,
                    ..CostBreakdown::default()
                })
                .ok_or_else(|| overflow(format!("cost totals of {}", agent_id)))?;
        }

        let child_amounts: Vec<i64> = children.iter().map(Transaction::amount).collect();
        self.state
            .agent_mut_or_err(&receiver_id)?
            .remove_expected_inflow(tx_id);
        for child in children {
            self.state.add_transaction(child)?;
        }
        let agent = self.state.agent_mut_or_err(agent_id)?;
        agent.insert_after_in_queue(tx_id, child_ids.clone());
        agent.remove_from_queue(tx_id);

        self.state.emit(Event::PolicySplit {
            tick,
            agent_id: agent_id.to_string(),
            tx_id: tx_id.to_string(),
            num_splits,
            child_ids,
            child_amounts,
            friction_cost,
            decision_path: path,
        });
        Ok(())
    }

    // ========================================================================
    // Phase 7: overdue, escalation, costs
    // ========================================================================

    /// Ids in Queue-1 (agents in sorted order) then Queue-2
    fn queued_ids(&self) -> Vec<String> {
        self.state
            .agents()
            .values()
            .flat_map(|agent| agent.outgoing_queue().iter().cloned())
            .chain(self.state.rtgs_queue().iter().cloned())
            .collect()
    }

    fn mark_overdue(&mut self, tick: usize) -> Result<(), SimulationError> {
        for tx_id in self.state.take_past_deadline(tick) {
            let tx = self.state.transaction_mut_or_err(&tx_id)?;
            if !tx.mark_overdue(tick) {
                continue;
            }
            let sender_id = tx.sender_id().to_string();
            let receiver_id = tx.receiver_id().to_string();
            let amount = tx.amount();
            let remaining_amount = tx.remaining_amount();
            let deadline_tick = tx.deadline_tick();

            // Split parents and dropped transactions sit in no queue
            let queued = self.state.is_in_rtgs_queue(&tx_id)
                || self
                    .state
                    .agent_or_err(&sender_id)?
                    .outgoing_queue()
                    .contains(&tx_id);
            let deadline_penalty = if queued {
                self.config.cost_rates.deadline_penalty
            } else {
                0
            };
            if deadline_penalty > 0 {
                self.state
                    .costs_mut(&sender_id)
                    .add(&CostBreakdown {
                        deadline_penalty,
                        ..CostBreakdown::default()
                    })
                    .ok_or_else(|| overflow(format!("cost totals of {}", sender_id)))?;
            }

            self.state.emit(Event::TransactionWentOverdue {
                tick,
                tx_id,
                sender_id,
                receiver_id,
                amount,
                remaining_amount,
                deadline_tick,
                deadline_penalty,
            });
        }
        Ok(())
    }

    fn escalate_priorities(&mut self, tick: usize) -> Result<(), SimulationError> {
        if !self.config.priority_escalation.enabled {
            return Ok(());
        }
        for tx_id in self.queued_ids() {
            let tx = self.state.transaction_mut_or_err(&tx_id)?;
            let ticks_remaining = tx.deadline_tick().saturating_sub(tick);
            let Some(escalated) = self
                .config
                .priority_escalation
                .escalated_priority(tx.original_priority(), ticks_remaining)
            else {
                continue;
            };
            if escalated <= tx.priority() {
                continue;
            }
            let old_priority = tx.set_priority(escalated);
            let sender_id = tx.sender_id().to_string();
            let ticks_to_deadline = tx.ticks_to_deadline(tick);
            self.state.emit(Event::PriorityEscalated {
                tick,
                tx_id,
                sender_id,
                old_priority,
                new_priority: escalated,
                ticks_to_deadline,
            });
        }
        Ok(())
    }

    /// Overdraft, collateral and delay costs for this tick
    fn accrue_costs(&mut self, tick: usize) -> Result<(), SimulationError> {
        let rates = &self.config.cost_rates;
        for agent_id in self.state.agent_ids() {
            let agent = self.state.agent_or_err(&agent_id)?;
            let balance = agent.balance();

            let mut delay_cost: i64 = 0;
            let queued = agent
                .outgoing_queue()
                .iter()
                .filter_map(|id| self.state.transaction(id))
                .chain(self.state.queue2_for_sender(&agent_id));
            for tx in queued {
                let rate = rates.delay_rate_bps(tx.priority(), tx.is_overdue());
                delay_cost = delay_cost
                    .checked_add(bps_cost(tx.remaining_amount(), rate)?)
                    .ok_or_else(|| overflow(format!("delay cost of {}", agent_id)))?;
            }

            let costs = CostBreakdown {
                overdraft_cost: bps_cost(balance.saturating_neg().max(0), rates.overdraft_bps_per_tick)?,
                collateral_cost: bps_cost(agent.posted_collateral(), rates.collateral_cost_per_tick_bps)?,
                delay_cost,
                ..CostBreakdown::default()
            };

            let accumulator = self.state.costs_mut(&agent_id);
            accumulator.observe_net_debit(balance);
            if costs.is_zero() {
                continue;
            }
            accumulator
                .add(&costs)
                .ok_or_else(|| overflow(format!("cost totals of {}", agent_id)))?;
            self.state.emit(Event::CostAccrual {
                tick,
                agent_id,
                costs,
            });
        }
        Ok(())
    }

    // ========================================================================
    // Phase 8: collateral and end of day
    // ========================================================================

    fn collateral_phase(&mut self, kind: TreeKind, tick: usize) -> Result<(), SimulationError> {
        let trigger = match kind {
            TreeKind::StrategicCollateral => CollateralTrigger::StrategicTree,
            _ => CollateralTrigger::EndOfTickTree,
        };

        for agent_id in self.state.agent_ids() {
            if !self.has_tree(&agent_id, kind)? {
                continue;
            }
            let evaluation = {
                let agent = self.state.agent_or_err(&agent_id)?;
                let context = EvalContext::for_agent(agent, &self.state, &self.config.cost_rates);
                self.policy(&agent_id)?.evaluate_collateral(kind, &context)
            };
            let Some(Evaluation { decision, path }) = evaluation else {
                continue;
            };

            match decision {
                Err(err) => self.evaluation_failed(&agent_id, kind, err.to_string(), tick),
                Ok(CollateralDecision::Post {
                    amount,
                    reason,
                    auto_withdraw_after_ticks,
                }) => self.post_collateral(
                    &agent_id,
                    amount,
                    reason,
                    auto_withdraw_after_ticks,
                    trigger,
                    path,
                    tick,
                )?,
                Ok(CollateralDecision::Withdraw { amount, reason }) => {
                    self.withdraw_collateral(&agent_id, amount, reason, trigger, path, tick)?
                }
                Ok(CollateralDecision::Hold) => {}
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn post_collateral(
        &mut self,
        agent_id: &str,
        amount: i64,
        reason: String,
        auto_withdraw_after_ticks: Option<usize>,
        trigger: CollateralTrigger,
        path: DecisionPath,
        tick: usize,
    ) -> Result<(), SimulationError> {
        let agent = self.state.agent_mut_or_err(agent_id)?;
        match agent.post_collateral(amount, tick) {
            Ok(new_total) => {
                let auto_withdraw_at =
                    auto_withdraw_after_ticks.map(|after| tick.saturating_add(after.max(1)));
                if let Some(fire_at) = auto_withdraw_at {
                    agent.schedule_collateral_withdrawal(
                        fire_at,
                        CollateralTimer {
                            amount,
                            reason: reason.clone(),
                            posted_at_tick: tick,
                        },
                    );
                }
                self.state.emit(Event::CollateralPost {
                    tick,
                    agent_id: agent_id.to_string(),
                    amount,
                    reason,
                    trigger,
                    new_total,
                    auto_withdraw_at,
                    decision_path: path,
                });
            }
            Err(err) => {
                log::debug!("Agent {} collateral post refused at tick {}: {}", agent_id, tick, err);
                self.state.emit(Event::CollateralActionBlocked {
                    tick,
                    agent_id: agent_id.to_string(),
                    action: "PostCollateral".to_string(),
                    requested: amount,
                    reason: err.to_string(),
                    trigger,
                });
            }
        }
        Ok(())
    }

    fn withdraw_collateral(
        &mut self,
        agent_id: &str,
        amount: i64,
        reason: String,
        trigger: CollateralTrigger,
        path: DecisionPath,
        tick: usize,
    ) -> Result<(), SimulationError> {
        let agent = self.state.agent_mut_or_err(agent_id)?;
        match agent.withdraw_collateral(amount, tick) {
            Ok(withdrawn) => {
                let new_total = agent.posted_collateral();
                self.state.emit(Event::CollateralWithdraw {
                    tick,
                    agent_id: agent_id.to_string(),
                    amount: withdrawn,
                    reason,
                    trigger,
                    new_total,
                    decision_path: path,
                });
            }
            Err(err) => {
                log::debug!("Agent {} collateral withdrawal refused at tick {}: {}", agent_id, tick, err);
                self.state.emit(Event::CollateralActionBlocked {
                    tick,
                    agent_id: agent_id.to_string(),
                    action: "WithdrawCollateral".to_string(),
                    requested: amount,
                    reason: err.to_string(),
                    trigger,
                });
            }
        }
        Ok(())
    }

    fn fire_collateral_timers(&mut self, tick: usize) -> Result<(), SimulationError> {
        for agent_id in self.state.agent_ids() {
            let timers = self
                .state
                .agent_mut_or_err(&agent_id)?
                .take_due_collateral_timers(tick);
            for timer in timers {
                self.withdraw_collateral(
                    &agent_id,
                    timer.amount,
                    timer.reason,
                    CollateralTrigger::AutoWithdrawTimer,
                    Vec::new(),
                    tick,
                )?;
            }
        }
        Ok(())
    }

    /// EOD penalties, register reset and daily snapshots
    fn end_of_day(&mut self, tick: usize) -> Result<(), SimulationError> {
        let day = self.state.current_day();
        let rate = self.config.cost_rates.eod_penalty_per_transaction;
        let mut unsettled_total = 0usize;
        let mut total_penalties: i64 = 0;

        for agent_id in self.state.agent_ids() {
            let queue1_size = self.state.agent_or_err(&agent_id)?.outgoing_queue_size();
            let queue2_size = self.state.queue2_count_for_agent(&agent_id);
            let unsettled = queue1_size + queue2_size;

            if unsettled > 0 {
                let penalty = rate
                    .checked_mul(unsettled as i64)
                    .ok_or_else(|| overflow(format!("EOD penalty of {}", agent_id)))?;
                if penalty > 0 {
                    self.state
                        .costs_mut(&agent_id)
                        .add(&CostBreakdown {
                            eod_penalty: penalty,
                            ..CostBreakdown::default()
                        })
                        .ok_or_else(|| overflow(format!("cost totals of {}", agent_id)))?;
                }
                unsettled_total += unsettled;
                total_penalties = total_penalties
                    .checked_add(penalty)
                    .ok_or_else(|| overflow("EOD penalty total"))?;
                self.state.emit(Event::EndOfDayPenalty {
                    tick,
                    day,
                    agent_id: agent_id.clone(),
                    unsettled_count: unsettled,
                    penalty,
                });
            }

            let registers = self.state.agent_mut_or_err(&agent_id)?.reset_state_registers();
            if !registers.is_empty() {
                self.state.emit(Event::StateRegistersReset {
                    tick,
                    agent_id: agent_id.clone(),
                    registers,
                });
            }

            let agent = self.state.agent_or_err(&agent_id)?;
            let costs = self.state.costs(&agent_id).cloned().unwrap_or_default();
            let snapshot = DailySnapshot {
                day,
                agent_id: agent_id.clone(),
                balance: agent.balance(),
                effective_liquidity: agent.effective_liquidity(),
                posted_collateral: agent.posted_collateral(),
                queue1_size,
                queue2_size,
                total_cost: costs.total(),
                peak_net_debit: costs.peak_net_debit,
            };
            self.state.emit(Event::AgentDailySnapshot {
                tick,
                day,
                agent_id,
                balance: snapshot.balance,
                effective_liquidity: snapshot.effective_liquidity,
                posted_collateral: snapshot.posted_collateral,
                queue1_size,
                queue2_size,
                total_cost: snapshot.total_cost,
            });
            self.daily_snapshots.push(snapshot);
        }

        self.state.emit(Event::EndOfDay {
            tick,
            day,
            unsettled_count: unsettled_total,
            total_penalties,
        });
        log::info!(
            "Day {} closed at tick {}: {} unsettled, {} in EOD penalties",
            day,
            tick,
            unsettled_total,
            total_penalties
        );
        Ok(())
    }
}

/// Every id that left Queue-2 during the tick must be named by a
/// settlement event of the same tick
fn check_queue2_accounting(
    before: &[String],
    state: &SimulationState,
    events: &[Event],
    tick: usize,
) -> Result<(), SimulationError> {
    let still_queued: BTreeSet<&str> = state.rtgs_queue().iter().map(String::as_str).collect();
    let settled: BTreeSet<&str> = events
        .iter()
        .filter(|event| event.settles_from_queue2())
        .flat_map(|event| event.tx_ids())
        .collect();

    match before
        .iter()
        .find(|id| !still_queued.contains(id.as_str()) && !settled.contains(id.as_str()))
    {
        Some(id) => Err(SimulationError::InvariantViolation(format!(
            "transaction {} left Queue-2 at tick {} without a settlement event",
            id, tick
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrivals::{AmountDistribution, ArrivalConfig};
    use crate::events::{EventSchedule, ScenarioEvent, ScheduledEvent};
    use crate::orchestrator::config::PolicyConfig;

    fn config(agents: Vec<AgentConfig>) -> OrchestratorConfig {
        OrchestratorConfig::new(10, 1, 7, agents)
    }

    fn inject(tick: usize, from: &str, to: &str, amount: i64, deadline_offset: usize) -> ScheduledEvent {
        ScheduledEvent {
            event: ScenarioEvent::CustomTransactionArrival {
                from_agent: from.into(),
                to_agent: to.into(),
                amount,
                deadline_offset,
                priority: 5,
                is_divisible: false,
            },
            schedule: EventSchedule::OneTime { tick },
        }
    }

    fn types(events: &[Event]) -> Vec<&'static str> {
        events.iter().map(Event::event_type).collect()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = Orchestrator::new(config(vec![]));
        assert!(matches!(result, Err(SimulationError::Configuration(_))));
    }

    #[test]
    fn test_release_and_settle_in_one_tick() {
        let mut cfg = config(vec![AgentConfig::new("A", 1_000), AgentConfig::new("B", 0)]);
        cfg.scenario_events.push(inject(0, "A", "B", 400, 5));
        let mut orch = Orchestrator::new(cfg).unwrap();

        let result = orch.tick().unwrap();
        assert_eq!(
            types(&result.events),
            vec!["ScheduledTransactionInjected", "PolicySubmit", "QueuedRtgs", "RtgsSettlement"]
        );
        assert_eq!(result.num_settlements, 1);
        assert_eq!(orch.agent_balance("A"), Some(600));
        assert_eq!(orch.agent_balance("B"), Some(400));
        assert!(orch.queue2().is_empty());
    }

    #[test]
    fn test_unfunded_payment_waits_and_goes_overdue() {
        let mut cfg = config(vec![AgentConfig::new("A", 0), AgentConfig::new("B", 0)]);
        cfg.cost_rates.deadline_penalty = 500;
        cfg.scenario_events.push(inject(0, "A", "B", 100, 2));
        let mut orch = Orchestrator::new(cfg).unwrap();

        orch.run_ticks(3).unwrap();
        let result = orch.tick().unwrap();
        assert_eq!(result.tick, 3);
        assert!(types(&result.events).contains(&"TransactionWentOverdue"));
        assert_eq!(orch.queue2().len(), 1);
        assert!(orch.queue2()[0].is_overdue());
        assert_eq!(orch.costs("A").unwrap().total_deadline_penalty, 500);
    }

    #[test]
    fn test_horizon_reports_completion() {
        let mut orch = Orchestrator::new(config(vec![AgentConfig::new("A", 0)])).unwrap();
        assert_eq!(orch.run_ticks(50).unwrap().len(), 10);
        assert_eq!(
            orch.tick(),
            Err(SimulationError::SimulationComplete { total_ticks: 10 })
        );
    }

    #[test]
    fn test_end_of_day_penalty_and_snapshot() {
        let mut cfg = config(vec![AgentConfig::new("A", 0), AgentConfig::new("B", 0)]);
        cfg.cost_rates.eod_penalty_per_transaction = 1_000;
        cfg.scenario_events.push(inject(0, "A", "B", 100, 9));
        let mut orch = Orchestrator::new(cfg).unwrap();

        let results = orch.run_ticks(10).unwrap();
        let last = results.last().unwrap();
        assert_eq!(last.events.last().map(Event::event_type), Some("EndOfDay"));
        assert!(last.events.iter().any(|e| matches!(
            e,
            Event::EndOfDayPenalty { agent_id, unsettled_count: 1, penalty: 1_000, .. } if agent_id == "A"
        )));
        assert_eq!(orch.daily_snapshots().len(), 2);
        assert_eq!(orch.daily_snapshots()[0].queue2_size, 1);
    }

    #[test]
    fn test_overdraft_cost_accrues_each_tick() {
        let mut cfg = config(vec![
            AgentConfig::new("A", 0).with_unsecured_cap(1_000_000),
            AgentConfig::new("B", 0),
        ]);
        cfg.cost_rates.overdraft_bps_per_tick = 10.0;
        cfg.scenario_events.push(inject(0, "A", "B", 1_000_000, 5));
        let mut orch = Orchestrator::new(cfg).unwrap();

        let result = orch.tick().unwrap();
        // floor(1_000_000 * 10 * 1e-4) = 1_000
        assert_eq!(result.total_cost, 1_000);
        assert_eq!(orch.costs("A").unwrap().total_overdraft_cost, 1_000);
        assert_eq!(orch.costs("A").unwrap().peak_net_debit, 1_000_000);
        orch.tick().unwrap();
        assert_eq!(orch.costs("A").unwrap().total_overdraft_cost, 2_000);
    }

    #[test]
    fn test_split_replaces_parent_in_queue1() {
        let policy = r#"{
            "policy_id": "split_all",
            "payment_tree": {"type": "action", "node_id": "S", "action": "Split",
                             "parameters": {"num_splits": {"value": 4}}}
        }"#;
        let mut cfg = config(vec![
            AgentConfig::new("A", 0).with_policy(PolicyConfig::FromJson {
                json: policy.into(),
                params: BTreeMap::new(),
            }),
            AgentConfig::new("B", 0),
        ]);
        cfg.cost_rates.split_friction_cost = 10;
        cfg.scenario_events.push(ScheduledEvent {
            event: ScenarioEvent::CustomTransactionArrival {
                from_agent: "A".into(),
                to_agent: "B".into(),
                amount: 1_001,
                deadline_offset: 8,
                priority: 5,
                is_divisible: true,
            },
            schedule: EventSchedule::OneTime { tick: 0 },
        });
        let mut orch = Orchestrator::new(cfg).unwrap();

        let result = orch.tick().unwrap();
        let split = result
            .events
            .iter()
            .find_map(|e| match e {
                Event::PolicySplit { child_amounts, friction_cost, .. } => {
                    Some((child_amounts.clone(), *friction_cost))
                }
                _ => None,
            })
            .unwrap();
        assert_eq!(split.0, vec![250, 250, 250, 251]);
        assert_eq!(split.1, 30);

        let queue: Vec<i64> = orch.agent_queue1("A").iter().map(|tx| tx.amount()).collect();
        assert_eq!(queue, vec![250, 250, 250, 251]);
        assert_eq!(orch.costs("A").unwrap().total_split_friction_cost, 30);
    }

    #[test]
    fn test_splitting_overdue_payment_charges_deadline_once() {
        let policy = r#"{
            "policy_id": "split_when_late",
            "payment_tree": {
                "type": "condition", "node_id": "L1",
                "condition": {"op": "and", "conditions": [
                    {"op": "==", "left": {"field": "is_overdue"}, "right": {"value": 1}},
                    {"op": "==", "left": {"field": "is_split"}, "right": {"value": 0}}
                ]},
                "on_true": {"type": "action", "node_id": "L2", "action": "Split",
                            "parameters": {"num_splits": {"value": 2}}},
                "on_false": {"type": "action", "node_id": "L3", "action": "Hold"}
            }
        }"#;
        let mut cfg = config(vec![
            AgentConfig::new("A", 0).with_policy(PolicyConfig::FromJson {
                json: policy.into(),
                params: BTreeMap::new(),
            }),
            AgentConfig::new("B", 0),
        ]);
        cfg.cost_rates.deadline_penalty = 1_000;
        cfg.scenario_events.push(ScheduledEvent {
            event: ScenarioEvent::CustomTransactionArrival {
                from_agent: "A".into(),
                to_agent: "B".into(),
                amount: 1_000,
                deadline_offset: 1,
                priority: 5,
                is_divisible: true,
            },
            schedule: EventSchedule::OneTime { tick: 0 },
        });
        let mut orch = Orchestrator::new(cfg).unwrap();

        let events: Vec<Event> = orch
            .run_ticks(6)
            .unwrap()
            .into_iter()
            .flat_map(|r| r.events)
            .collect();

        assert_eq!(types(&events).iter().filter(|t| **t == "PolicySplit").count(), 1);
        assert_eq!(
            types(&events).iter().filter(|t| **t == "TransactionWentOverdue").count(),
            1
        );
        assert_eq!(orch.costs("A").unwrap().total_deadline_penalty, 1_000);
        let children = orch.agent_queue1("A");
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|c| c.is_overdue()));
    }

    #[test]
    fn test_arrivals_are_queued_in_sorted_agent_order() {
        let arrivals = ArrivalConfig::new(2.0, AmountDistribution::Uniform { min: 100, max: 200 }, (2, 5));
        let cfg = config(vec![
            AgentConfig::new("B", 0).with_arrivals(arrivals.clone()),
            AgentConfig::new("A", 0).with_arrivals(arrivals),
        ]);
        let mut orch = Orchestrator::new(cfg).unwrap();

        let mut senders = Vec::new();
        for result in orch.run_ticks(5).unwrap() {
            let tick_senders: Vec<String> = result
                .events
                .iter()
                .filter_map(|e| match e {
                    Event::Arrival { sender_id, .. } => Some(sender_id.clone()),
                    _ => None,
                })
                .collect();
            let mut sorted = tick_senders.clone();
            sorted.sort();
            assert_eq!(tick_senders, sorted);
            senders.extend(tick_senders);
        }
        assert!(!senders.is_empty());
    }

    #[test]
    fn test_event_history_retained_when_enabled() {
        let mut cfg = config(vec![AgentConfig::new("A", 100), AgentConfig::new("B", 0)]);
        cfg.retain_event_history = true;
        cfg.scenario_events.push(inject(1, "A", "B", 50, 5));
        let mut orch = Orchestrator::new(cfg).unwrap();
        orch.run_ticks(2).unwrap();

        assert_eq!(orch.events_for_tick(0), Some(&[][..]));
        assert_eq!(orch.events_for_tick(1).map(<[Event]>::len), Some(4));
        assert_eq!(orch.events_for_tick(5), None);
    }

    #[test]
    fn test_priority_escalation_emits_once_per_change() {
        let mut cfg = config(vec![AgentConfig::new("A", 0), AgentConfig::new("B", 0)]);
        cfg.priority_escalation.enabled = true;
        cfg.priority_escalation.start_escalating_at_ticks = 4;
        cfg.priority_escalation.max_boost = 4;
        cfg.scenario_events.push(inject(0, "A", "B", 100, 8));
        let mut orch = Orchestrator::new(cfg).unwrap();

        let escalations: Vec<(u8, u8)> = orch
            .run_ticks(9)
            .unwrap()
            .iter()
            .flat_map(|r| r.events.clone())
            .filter_map(|e| match e {
                Event::PriorityEscalated { old_priority, new_priority, .. } => {
                    Some((old_priority, new_priority))
                }
                _ => None,
            })
            .collect();
        // ticks 5..=8 leave 3, 2, 1, 0 ticks: boosts 1, 2, 3, 4
        assert_eq!(escalations, vec![(5, 6), (6, 7), (7, 8), (8, 9)]);
    }
}
