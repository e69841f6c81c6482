// Evaluation context
//
// Flattens agent, transaction and system state into named f64 fields.
// The field catalogs below are the complete vocabulary a tree may reference;
// validation checks references against them.

use crate::costs::{bps_cost, CostRates};
use crate::models::agent::STATE_REGISTER_PREFIX;
use crate::policy::tree::types::TreeKind;
use crate::{Agent, SimulationState, Transaction};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ContextError {
    #[error("Field '{0}' not found in evaluation context")]
    FieldNotFound(String),
}

/// Fields available to every tree kind
pub const AGENT_FIELDS: &[&str] = &[
    // liquidity
    "balance",
    "unsecured_cap",
    "credit_limit",
    "credit_used",
    "credit_headroom",
    "effective_liquidity",
    "available_liquidity",
    "is_using_credit",
    "liquidity_buffer",
    "release_budget_remaining",
    // collateral
    "posted_collateral",
    "max_collateral_capacity",
    "remaining_collateral_capacity",
    "collateral_haircut",
    "collateral_utilization",
    "max_withdrawable_collateral",
    // queues
    "outgoing_queue_size",
    "queue1_total_value",
    "queue1_liquidity_gap",
    "headroom",
    "incoming_expected_count",
    "queue2_count_for_agent",
    "queue2_value_for_agent",
    "queue2_incoming_value",
    "queue2_size",
    "queue2_total_value",
    "queue2_nearest_deadline",
    "ticks_to_nearest_queue2_deadline",
    // time
    "current_tick",
    "current_day",
    "tick_within_day",
    "ticks_per_day",
    "ticks_remaining_in_day",
    "day_progress_fraction",
    "is_last_tick_of_day",
    "total_agents",
    // cost rates
    "overdraft_bps_per_tick",
    "collateral_cost_per_tick_bps",
    "delay_cost_per_tick_bps",
    "overdue_delay_multiplier",
    "deadline_penalty",
    "eod_penalty_per_transaction",
    "split_friction_cost",
];

/// Additional fields for the payment tree
pub const TRANSACTION_FIELDS: &[&str] = &[
    "amount",
    "remaining_amount",
    "settled_amount",
    "arrival_tick",
    "deadline_tick",
    "priority",
    "original_priority",
    "is_divisible",
    "is_split",
    "is_overdue",
    "is_past_deadline",
    "ticks_to_deadline",
    "ticks_overdue",
    "queue_age",
    "liquidity_after_release",
    "counterparty_queue2_value",
    "cost_delay_this_tx_one_tick",
    "cost_overdraft_this_amount_one_tick",
];

/// Whether `field` may be referenced from a tree of `kind`.
///
/// State registers (`bank_state_*`) are readable everywhere and read as 0.0
/// until set.
pub fn is_known_field(kind: TreeKind, field: &str) -> bool {
    if field.starts_with(STATE_REGISTER_PREFIX) || AGENT_FIELDS.contains(&field) {
        return true;
    }
    kind == TreeKind::Payment && TRANSACTION_FIELDS.contains(&field)
}

/// Field values for one evaluation; all values are f64
#[derive(Debug, Clone)]
pub struct EvalContext {
    fields: BTreeMap<String, f64>,
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

impl EvalContext {
    /// Agent-level context for the bank and collateral trees
    pub fn for_agent(agent: &Agent, state: &SimulationState, rates: &CostRates) -> Self {
        let mut fields = BTreeMap::new();
        let mut put = |name: &str, value: f64| {
            fields.insert(name.to_string(), value);
        };

        let liquidity = agent.effective_liquidity();
        put("balance", agent.balance() as f64);
        put("unsecured_cap", agent.unsecured_cap() as f64);
        put("credit_limit", agent.credit_limit() as f64);
        put("credit_used", agent.credit_used() as f64);
        put("credit_headroom", agent.credit_headroom() as f64);
        put("effective_liquidity", liquidity as f64);
        put("available_liquidity", liquidity as f64);
        put("is_using_credit", flag(agent.balance() < 0));
        put("liquidity_buffer", agent.liquidity_buffer() as f64);
        put("release_budget_remaining", agent.release_budget_remaining() as f64);

        put("posted_collateral", agent.posted_collateral() as f64);
        put("max_collateral_capacity", agent.max_collateral_capacity() as f64);
        put(
            "remaining_collateral_capacity",
            agent.remaining_collateral_capacity() as f64,
        );
        put("collateral_haircut", agent.collateral_haircut());
        let capacity = agent.max_collateral_capacity();
        put(
            "collateral_utilization",
            if capacity > 0 {
                agent.posted_collateral() as f64 / capacity as f64
            } else {
                0.0
            },
        );
        put(
            "max_withdrawable_collateral",
            agent.max_withdrawable_collateral() as f64,
        );

        let queue1_value = state.queue1_total_value(agent.id());
        put("outgoing_queue_size", agent.outgoing_queue_size() as f64);
        put("queue1_total_value", queue1_value as f64);
        put(
            "queue1_liquidity_gap",
            queue1_value.saturating_sub(liquidity).max(0) as f64,
        );
        put("headroom", liquidity.saturating_sub(queue1_value) as f64);
        put("incoming_expected_count", agent.incoming_expected().len() as f64);

        let tick = state.current_tick();
        put(
            "queue2_count_for_agent",
            state.queue2_count_for_agent(agent.id()) as f64,
        );
        put(
            "queue2_value_for_agent",
            state.queue2_value_for_agent(agent.id()) as f64,
        );
        put(
            "queue2_incoming_value",
            state.queue2_incoming_value(agent.id()) as f64,
        );
        put("queue2_size", state.queue_size() as f64);
        put("queue2_total_value", state.queue2_total_value() as f64);
        let nearest = state
            .queue2_for_sender(agent.id())
            .map(|tx| tx.deadline_tick())
            .min();
        match nearest {
            Some(deadline) => {
                put("queue2_nearest_deadline", deadline as f64);
                put(
                    "ticks_to_nearest_queue2_deadline",
                    deadline as f64 - tick as f64,
                );
            }
            None => {
                put("queue2_nearest_deadline", f64::INFINITY);
                put("ticks_to_nearest_queue2_deadline", f64::INFINITY);
            }
        }

        let time = state.time();
        let ticks_per_day = time.ticks_per_day();
        put("current_tick", tick as f64);
        put("current_day", time.current_day() as f64);
        put("tick_within_day", time.tick_within_day() as f64);
        put("ticks_per_day", ticks_per_day as f64);
        put("ticks_remaining_in_day", time.ticks_remaining_in_day() as f64);
        put(
            "day_progress_fraction",
            (time.tick_within_day() + 1) as f64 / ticks_per_day as f64,
        );
        put("is_last_tick_of_day", flag(time.is_end_of_day()));
        put("total_agents", state.num_agents() as f64);

        put("overdraft_bps_per_tick", rates.overdraft_bps_per_tick);
        put("collateral_cost_per_tick_bps", rates.collateral_cost_per_tick_bps);
        put("delay_cost_per_tick_bps", rates.delay_cost_per_tick_bps);
        put("overdue_delay_multiplier", rates.overdue_delay_multiplier);
        put("deadline_penalty", rates.deadline_penalty as f64);
        put(
            "eod_penalty_per_transaction",
            rates.eod_penalty_per_transaction as f64,
        );
        put("split_friction_cost", rates.split_friction_cost as f64);

        for (key, value) in agent.state_registers() {
            put(key.as_str(), *value);
        }

        Self { fields }
    }

    /// Payment-tree context: agent fields plus the transaction's own
    pub fn for_transaction(
        tx: &Transaction,
        agent: &Agent,
        state: &SimulationState,
        rates: &CostRates,
    ) -> Self {
        let mut context = Self::for_agent(agent, state, rates);
        let tick = state.current_tick();
        let remaining = tx.remaining_amount();
        let mut put = |name: &str, value: f64| {
            context.fields.insert(name.to_string(), value);
        };

        put("amount", tx.amount() as f64);
        put("remaining_amount", remaining as f64);
        put("settled_amount", tx.settled_amount() as f64);
        put("arrival_tick", tx.arrival_tick() as f64);
        put("deadline_tick", tx.deadline_tick() as f64);
        put("priority", tx.priority() as f64);
        put("original_priority", tx.original_priority() as f64);
        put("is_divisible", flag(tx.is_divisible()));
        put("is_split", flag(tx.parent_id().is_some()));
        put("is_overdue", flag(tx.is_overdue()));
        put("is_past_deadline", flag(tx.is_past_deadline(tick)));
        put("ticks_to_deadline", tx.ticks_to_deadline(tick) as f64);
        put("ticks_overdue", tx.ticks_overdue(tick) as f64);
        put("queue_age", tick.saturating_sub(tx.arrival_tick()) as f64);
        put(
            "liquidity_after_release",
            agent.effective_liquidity().saturating_sub(remaining) as f64,
        );

        let counterparty_value = state
            .queue2_for_sender(tx.receiver_id())
            .filter(|queued| queued.receiver_id() == agent.id())
            .map(|queued| queued.remaining_amount())
            .fold(0i64, i64::saturating_add);
        put("counterparty_queue2_value", counterparty_value as f64);

        let delay_rate = rates.delay_rate_bps(tx.priority(), tx.is_overdue());
        put(
            "cost_delay_this_tx_one_tick",
            bps_cost(remaining, delay_rate)
                .map(|c| c as f64)
                .unwrap_or(f64::INFINITY),
        );
        let overdraft_now = agent.balance().saturating_neg().max(0);
        let overdraft_after = agent
            .balance()
            .saturating_sub(remaining)
            .saturating_neg()
            .max(0);
        put(
            "cost_overdraft_this_amount_one_tick",
            bps_cost(overdraft_after - overdraft_now, rates.overdraft_bps_per_tick)
                .map(|c| c as f64)
                .unwrap_or(f64::INFINITY),
        );

        context
    }

    /// Look up a field. Unset state registers read as 0.0.
    pub fn get_field(&self, name: &str) -> Result<f64, ContextError> {
        match self.fields.get(name) {
            Some(value) => Ok(*value),
            None if name.starts_with(STATE_REGISTER_PREFIX) => Ok(0.0),
            None => Err(ContextError::FieldNotFound(name.to_string())),
        }
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|s| s.as_str())
    }

    /// Build a context from explicit values
    pub fn from_fields(fields: BTreeMap<String, f64>) -> Self {
        Self { fields }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (SimulationState, Transaction) {
        let mut a = Agent::new("A", 500_000);
        a.set_unsecured_cap(200_000);
        a.set_liquidity_buffer(100_000);
        let mut state = SimulationState::new(10, 1, vec![a, Agent::new("B", 1_000_000)]);
        let tx = Transaction::new("tx1", "A", "B", 100_000, 0, 50)
            .unwrap()
            .with_priority(8);
        state.add_to_queue1(tx.clone()).unwrap();
        (state, tx)
    }

    #[test]
    fn test_agent_fields_match_catalog() {
        let (state, _) = setup();
        let ctx = EvalContext::for_agent(state.agent("A").unwrap(), &state, &CostRates::default());
        let mut names: Vec<&str> = ctx.field_names().collect();
        names.sort();
        let mut expected = AGENT_FIELDS.to_vec();
        expected.sort();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_transaction_fields_match_catalog() {
        let (state, tx) = setup();
        let ctx = EvalContext::for_transaction(
            &tx,
            state.agent("A").unwrap(),
            &state,
            &CostRates::default(),
        );
        for field in AGENT_FIELDS.iter().chain(TRANSACTION_FIELDS) {
            assert!(ctx.has_field(field), "missing {}", field);
        }
    }

    #[test]
    fn test_field_values() {
        let (state, tx) = setup();
        let ctx = EvalContext::for_transaction(
            &tx,
            state.agent("A").unwrap(),
            &state,
            &CostRates::default(),
        );
        assert_eq!(ctx.get_field("balance"), Ok(500_000.0));
        assert_eq!(ctx.get_field("effective_liquidity"), Ok(700_000.0));
        assert_eq!(ctx.get_field("queue1_total_value"), Ok(100_000.0));
        assert_eq!(ctx.get_field("ticks_to_deadline"), Ok(50.0));
        assert_eq!(ctx.get_field("priority"), Ok(8.0));
        assert_eq!(ctx.get_field("liquidity_after_release"), Ok(600_000.0));
    }

    #[test]
    fn test_unset_register_reads_zero() {
        let (state, _) = setup();
        let ctx = EvalContext::for_agent(state.agent("A").unwrap(), &state, &CostRates::default());
        assert_eq!(ctx.get_field("bank_state_counter"), Ok(0.0));
        assert!(ctx.get_field("nonexistent").is_err());
    }

    #[test]
    fn test_known_fields_by_kind() {
        assert!(is_known_field(TreeKind::Payment, "amount"));
        assert!(!is_known_field(TreeKind::Bank, "amount"));
        assert!(is_known_field(TreeKind::Bank, "balance"));
        assert!(is_known_field(TreeKind::StrategicCollateral, "bank_state_x"));
    }
}
