//! Checkpoint Tests
//!
//! Save and restore mid-run: a restored orchestrator must produce the same
//! remaining event stream as one that never stopped, and inconsistent
//! snapshots must be refused.

use rtgs_sim_core::events::{EventSchedule, ScenarioEvent, ScheduledEvent};
use rtgs_sim_core::{
    AgentConfig, AmountDistribution, ArrivalConfig, Event, Orchestrator, OrchestratorConfig,
    PolicyConfig, SimulationError, StateSnapshot,
};

// ============================================================================
// Test Helpers
// ============================================================================

const COLLATERAL_POLICY: &str = r#"{
    "policy_id": "gap_filler",
    "payment_tree": {"type": "action", "node_id": "P1", "action": "Release"},
    "strategic_collateral_tree": {
        "type": "condition", "node_id": "C1",
        "condition": {"op": ">", "left": {"field": "queue2_value_for_agent"}, "right": {"field": "effective_liquidity"}},
        "on_true": {
            "type": "action", "node_id": "C2", "action": "PostCollateral",
            "parameters": {
                "amount": {"value": 20000},
                "reason": {"value": "queue pressure"},
                "auto_withdraw_after_ticks": {"value": 4}
            }
        },
        "on_false": {"type": "action", "node_id": "C3", "action": "HoldCollateral"}
    }
}"#;

fn config() -> OrchestratorConfig {
    let arrivals = |rate: f64| {
        ArrivalConfig::new(
            rate,
            AmountDistribution::Uniform {
                min: 5_000,
                max: 40_000,
            },
            (2, 10),
        )
    };

    let mut config = OrchestratorConfig::new(
        12,
        3,
        4242,
        vec![
            AgentConfig::new("BANK_A", 60_000)
                .with_arrivals(arrivals(1.2))
                .with_collateral(0, 500_000, 0.05)
                .with_policy(PolicyConfig::FromJson {
                    json: COLLATERAL_POLICY.to_string(),
                    params: Default::default(),
                }),
            AgentConfig::new("BANK_B", 40_000)
                .with_arrivals(arrivals(0.9))
                .with_policy(PolicyConfig::Deadline { urgency_threshold: 2 }),
            AgentConfig::new("BANK_C", 30_000)
                .with_unsecured_cap(20_000)
                .with_arrivals(arrivals(0.6)),
        ],
    );
    config.scenario_events = vec![
        ScheduledEvent {
            event: ScenarioEvent::GlobalArrivalRateChange { multiplier: 1.5 },
            schedule: EventSchedule::OneTime { tick: 5 },
        },
        ScheduledEvent {
            event: ScenarioEvent::DirectTransfer {
                from_agent: "BANK_C".to_string(),
                to_agent: "BANK_A".to_string(),
                amount: 10_000,
            },
            schedule: EventSchedule::Repeating {
                start_tick: 3,
                interval: 7,
            },
        },
    ];
    config.priority_escalation.enabled = true;
    config
}

fn events_from(orch: &mut Orchestrator) -> Vec<Event> {
    orch.run_to_end()
        .unwrap()
        .into_iter()
        .flat_map(|result| result.events)
        .collect()
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn test_restore_continues_identically() {
    let _ = env_logger::try_init();
    for checkpoint_tick in [0, 7, 12, 19, 35] {
        let mut original = Orchestrator::new(config()).unwrap();
        original.run_ticks(checkpoint_tick).unwrap();
        let json = original.save_state().unwrap();

        let mut restored = Orchestrator::load_state(config(), &json).unwrap();
        assert_eq!(restored.current_tick(), checkpoint_tick);

        let expected = events_from(&mut original);
        let actual = events_from(&mut restored);
        assert_eq!(actual, expected, "diverged after checkpoint at {}", checkpoint_tick);
        assert_eq!(restored.all_costs(), original.all_costs());
        assert_eq!(restored.daily_snapshots(), original.daily_snapshots());
        assert_eq!(restored.save_state().unwrap(), original.save_state().unwrap());
    }
}

#[test]
fn test_snapshot_preserves_changed_arrival_rates() {
    let mut original = Orchestrator::new(config()).unwrap();
    original.run_ticks(8).unwrap();
    let json = original.save_state().unwrap();

    let snapshot: StateSnapshot = serde_json::from_str(&json).unwrap();
    let rate = snapshot
        .arrival_state
        .config("BANK_A")
        .map(|c| c.rate_per_tick)
        .unwrap();
    assert!((rate - 1.8).abs() < 1e-9);

    let restored = Orchestrator::load_state(config(), &json).unwrap();
    assert_eq!(restored.agent_balance("BANK_A"), original.agent_balance("BANK_A"));
    assert_eq!(restored.queue2().len(), original.queue2().len());
}

#[test]
fn test_checkpoint_at_horizon_is_complete() {
    let mut original = Orchestrator::new(config()).unwrap();
    original.run_to_end().unwrap();
    let json = original.save_state().unwrap();

    let mut restored = Orchestrator::load_state(config(), &json).unwrap();
    assert!(restored.is_complete());
    assert!(matches!(
        restored.tick(),
        Err(SimulationError::SimulationComplete { total_ticks: 36 })
    ));
}

// ============================================================================
// Refusals
// ============================================================================

#[test]
fn test_different_config_is_refused() {
    let mut original = Orchestrator::new(config()).unwrap();
    original.run_ticks(5).unwrap();
    let json = original.save_state().unwrap();

    let mut other = config();
    other.rng_seed += 1;
    assert!(matches!(
        Orchestrator::load_state(other, &json),
        Err(SimulationError::CheckpointMismatch { .. })
    ));
}

#[test]
fn test_reordered_queue2_is_refused() {
    let mut cfg = config();
    for agent in &mut cfg.agent_configs {
        agent.opening_balance = 0;
        agent.unsecured_cap = 0;
        agent.arrival_config = None;
    }
    cfg.scenario_events = [(0, 1_000), (1, 2_000)]
        .into_iter()
        .map(|(tick, amount)| ScheduledEvent {
            event: ScenarioEvent::CustomTransactionArrival {
                from_agent: "BANK_C".to_string(),
                to_agent: "BANK_B".to_string(),
                amount,
                deadline_offset: 10,
                priority: 5,
                is_divisible: false,
            },
            schedule: EventSchedule::OneTime { tick },
        })
        .collect();
    let mut original = Orchestrator::new(cfg.clone()).unwrap();
    original.run_ticks(3).unwrap();
    let json = original.save_state().unwrap();

    let mut snapshot: StateSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(snapshot.rtgs_queue.len(), 2);

    // The tick-1 submission ahead of the tick-0 one
    snapshot.rtgs_queue.swap(0, 1);
    let tampered = serde_json::to_string(&snapshot).unwrap();

    let result = Orchestrator::load_state(cfg, &tampered);
    assert!(matches!(result, Err(SimulationError::StateValidation(_))));
}

#[test]
fn test_missing_agent_is_refused() {
    let mut original = Orchestrator::new(config()).unwrap();
    original.run_ticks(2).unwrap();
    let json = original.save_state().unwrap();

    let mut snapshot: StateSnapshot = serde_json::from_str(&json).unwrap();
    let removed = snapshot.agents.pop().unwrap();
    snapshot.total_balance -= removed.balance();
    let tampered = serde_json::to_string(&snapshot).unwrap();

    assert!(Orchestrator::load_state(config(), &tampered).is_err());
}
