//! End-of-Day Tests
//!
//! Day boundaries: per-transaction penalties for unsettled work, daily
//! snapshots, carry-over into the next day, and deadline capping.

use rtgs_sim_core::events::{EventSchedule, ScenarioEvent, ScheduledEvent};
use rtgs_sim_core::{
    AgentConfig, AmountDistribution, ArrivalConfig, CostRates, Event, Orchestrator,
    OrchestratorConfig, PolicyConfig,
};

fn inject(tick: usize, from: &str, to: &str, amount: i64, deadline_offset: usize) -> ScheduledEvent {
    ScheduledEvent {
        event: ScenarioEvent::CustomTransactionArrival {
            from_agent: from.to_string(),
            to_agent: to.to_string(),
            amount,
            deadline_offset,
            priority: 5,
            is_divisible: false,
        },
        schedule: EventSchedule::OneTime { tick },
    }
}

fn penalty_only_rates(eod_penalty_per_transaction: i64) -> CostRates {
    CostRates {
        overdraft_bps_per_tick: 0.0,
        collateral_cost_per_tick_bps: 0.0,
        delay_cost_per_tick_bps: 0.0,
        deadline_penalty: 0,
        eod_penalty_per_transaction,
        split_friction_cost: 0,
        ..CostRates::default()
    }
}

#[test]
fn test_penalty_counts_both_queues() {
    // A releases (Queue-2), B holds (Queue-1); neither can pay
    let mut config = OrchestratorConfig::new(
        5,
        1,
        1,
        vec![
            AgentConfig::new("A", 0),
            AgentConfig::new("B", 0).with_policy(PolicyConfig::Deadline { urgency_threshold: 0 }),
        ],
    );
    config.cost_rates = penalty_only_rates(1_000);
    config.scenario_events = vec![
        inject(0, "A", "B", 100, 20),
        inject(1, "A", "B", 100, 20),
        inject(0, "B", "A", 500, 20),
    ];
    let mut orch = Orchestrator::new(config).unwrap();

    let results = orch.run_to_end().unwrap();
    let last = results.last().unwrap();

    let penalties: Vec<(String, usize, i64)> = last
        .events
        .iter()
        .filter_map(|e| match e {
            Event::EndOfDayPenalty {
                agent_id,
                unsettled_count,
                penalty,
                ..
            } => Some((agent_id.clone(), *unsettled_count, *penalty)),
            _ => None,
        })
        .collect();
    assert_eq!(
        penalties,
        vec![("A".to_string(), 2, 2_000), ("B".to_string(), 1, 1_000)]
    );
    assert!(matches!(
        last.events.last(),
        Some(Event::EndOfDay { day: 0, unsettled_count: 3, total_penalties: 3_000, .. })
    ));
    assert_eq!(last.total_cost, 3_000);
}

#[test]
fn test_unsettled_work_carries_into_next_day() {
    let mut config = OrchestratorConfig::new(
        4,
        2,
        1,
        vec![AgentConfig::new("A", 0), AgentConfig::new("B", 0)],
    );
    config.cost_rates = penalty_only_rates(250);
    config.scenario_events = vec![
        inject(1, "A", "B", 700, 5),
        ScheduledEvent {
            event: ScenarioEvent::DirectTransfer {
                from_agent: "B".to_string(),
                to_agent: "A".to_string(),
                amount: 700,
            },
            schedule: EventSchedule::OneTime { tick: 5 },
        },
    ];
    let mut orch = Orchestrator::new(config).unwrap();

    orch.run_to_end().unwrap();

    let snapshots = orch.daily_snapshots();
    assert_eq!(snapshots.len(), 4);
    let day0_a = snapshots
        .iter()
        .find(|s| s.day == 0 && s.agent_id == "A")
        .unwrap();
    assert_eq!(day0_a.queue2_size, 1);
    assert_eq!(day0_a.total_cost, 250);

    let day1_a = snapshots
        .iter()
        .find(|s| s.day == 1 && s.agent_id == "A")
        .unwrap();
    assert_eq!(day1_a.queue2_size, 0);
    assert_eq!(day1_a.balance, 0);
    assert_eq!(day1_a.total_cost, 250);
    assert_eq!(orch.agent_balance("B"), Some(0));
}

#[test]
fn test_snapshots_match_daily_events() {
    let mut config = OrchestratorConfig::new(
        6,
        3,
        99,
        vec![
            AgentConfig::new("A", 10_000).with_arrivals(ArrivalConfig::new(
                1.0,
                AmountDistribution::Uniform { min: 500, max: 5_000 },
                (2, 8),
            )),
            AgentConfig::new("B", 10_000),
        ],
    );
    config.retain_event_history = true;
    let mut orch = Orchestrator::new(config).unwrap();

    orch.run_to_end().unwrap();

    assert_eq!(orch.daily_snapshots().len(), 6);
    for day in 0..3 {
        let close_tick = day * 6 + 5;
        let events = orch.events_for_tick(close_tick).unwrap();
        for snapshot in orch.daily_snapshots().iter().filter(|s| s.day == day) {
            assert!(events.iter().any(|e| matches!(
                e,
                Event::AgentDailySnapshot { agent_id, balance, queue1_size, queue2_size, total_cost, .. }
                    if *agent_id == snapshot.agent_id
                        && *balance == snapshot.balance
                        && *queue1_size == snapshot.queue1_size
                        && *queue2_size == snapshot.queue2_size
                        && *total_cost == snapshot.total_cost
            )));
        }
    }
}

#[test]
fn test_deadline_cap_at_end_of_day() {
    let arrivals = ArrivalConfig::new(
        2.0,
        AmountDistribution::Uniform { min: 100, max: 200 },
        (5, 15),
    );
    let mut config = OrchestratorConfig::new(
        10,
        3,
        3,
        vec![
            AgentConfig::new("A", 1_000_000).with_arrivals(arrivals),
            AgentConfig::new("B", 0),
        ],
    );
    config.deadline_cap_at_eod = true;
    let mut orch = Orchestrator::new(config).unwrap();

    let events: Vec<Event> = orch
        .run_to_end()
        .unwrap()
        .into_iter()
        .flat_map(|result| result.events)
        .collect();

    let mut seen = 0;
    for event in &events {
        if let Event::Arrival { tick, deadline, .. } = event {
            let day_end = (tick / 10) * 10 + 9;
            assert!(*deadline <= day_end.max(tick + 1), "deadline {} at tick {}", deadline, tick);
            assert!(*deadline > *tick);
            seen += 1;
        }
    }
    assert!(seen > 0);
}
