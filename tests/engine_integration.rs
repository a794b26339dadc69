//! End-to-end engine scenarios: admission control, scheduling, faults,
//! billing, and time control against a frozen simulated clock.

use chrono::{DateTime, Duration, TimeZone, Utc};

use station_sim::config::StationConfig;
use station_sim::station::billing::ReportKind;
use station_sim::station::engine::ToggleAction;
use station_sim::station::strategy::StrategyKind;
use station_sim::station::types::{Mode, PileState, RequestState, StationError};
use station_sim::station::{SimClock, Station};

fn t0() -> DateTime<Utc> {
    // 08:00, inside the normal tariff window.
    Utc.with_ymd_and_hms(2024, 5, 20, 8, 0, 0).unwrap()
}

fn frozen_station(config: &StationConfig) -> Station {
    Station::with_clock(config, SimClock::frozen_at(t0())).expect("config is valid")
}

#[test]
fn queue_capacity_scenario() {
    // Fast capacity 2; the fast pile is taken offline so joins stay queued.
    let mut s = frozen_station(&StationConfig::compact());
    s.toggle_pile("A", ToggleAction::Stop).unwrap();

    let a = s.join("a", Mode::Fast, 30.0, None).unwrap();
    let b = s.join("b", Mode::Fast, 30.0, None).unwrap();
    assert!(matches!(
        s.join("c", Mode::Fast, 30.0, None),
        Err(StationError::QueueFull(Mode::Fast))
    ));

    s.leave(a).unwrap();
    let c = s.join("c", Mode::Fast, 30.0, None).unwrap();
    assert!(c.seq > b.seq, "c ({c}) must be numbered after b ({b})");

    // The waiting count never exceeded the configured capacity.
    let status = s.queue_status();
    assert!(status.fast.len() <= status.fast_capacity);
    s.assert_invariants();
}

#[test]
fn session_auto_completes_at_requested_amount() {
    let mut s = frozen_station(&StationConfig::compact());
    let qn = s.join("alice", Mode::Fast, 30.0, None).unwrap();
    assert_eq!(s.request(qn).unwrap().state, RequestState::Charging);

    // 30 units at 30 units/h complete after exactly one hour; jump past it.
    s.clock().advance(Duration::hours(2));
    s.tick();

    assert_eq!(s.request(qn).unwrap().state, RequestState::Completed);
    let bills = s.bills(Some("alice"));
    assert_eq!(bills.len(), 1);
    let bill = &bills[0];
    // The bill ends at the cap instant, not the settlement instant.
    assert_eq!(bill.end_time, t0() + Duration::hours(1));
    assert!((bill.energy_delivered - 30.0).abs() < 1e-6);
    // 08:00–09:00 is normal tariff: 30 * 0.7 = 21, plus 10% service fee.
    assert!((bill.cost - 21.0).abs() < 1e-6);
    assert!((bill.total_cost - 23.1).abs() < 1e-6);
    s.assert_invariants();
}

#[test]
fn completion_dispatches_next_waiting_request() {
    let mut s = frozen_station(&StationConfig::compact());
    let first = s.join("alice", Mode::Fast, 30.0, None).unwrap();
    let second = s.join("bob", Mode::Fast, 15.0, None).unwrap();
    assert_eq!(s.request(second).unwrap().state, RequestState::Waiting);

    s.clock().advance(Duration::hours(1));
    s.tick();

    assert_eq!(s.request(first).unwrap().state, RequestState::Completed);
    assert_eq!(s.request(second).unwrap().state, RequestState::Charging);
    // The follow-on session starts when the pass ran, not retroactively.
    assert_eq!(
        s.request(second).unwrap().started_at,
        Some(t0() + Duration::hours(1))
    );
    s.assert_invariants();
}

#[test]
fn speedup_scales_simulated_time() {
    let mut s = Station::with_clock(
        &StationConfig::compact(),
        SimClock::frozen_at(t0()),
    )
    .expect("config is valid");
    s.set_speedup(10.0).unwrap();

    std::thread::sleep(std::time::Duration::from_millis(500));

    // 0.5 real seconds at 10x is about 5 simulated seconds.
    let elapsed = s.get_time() - t0();
    assert!(elapsed >= Duration::seconds(2), "elapsed {elapsed}");
    assert!(elapsed <= Duration::seconds(60), "elapsed {elapsed}");
}

#[test]
fn reset_time_returns_to_real_clock() {
    let mut s = frozen_station(&StationConfig::compact());
    s.set_time("2030-01-01 00:00:00").unwrap();
    s.reset_time();
    assert_eq!(s.clock().speedup(), 1.0);
    let drift = s.get_time() - Utc::now();
    assert!(drift.num_seconds().abs() < 2);
}

#[test]
fn priority_tie_breaks_on_submission_time() {
    let mut s = frozen_station(&StationConfig::compact());
    s.set_strategy(StrategyKind::Priority);
    s.toggle_pile("A", ToggleAction::Stop).unwrap();

    let early = s.join("early", Mode::Fast, 30.0, Some(5)).unwrap();
    s.clock().advance(Duration::minutes(5));
    let late = s.join("late", Mode::Fast, 30.0, Some(5)).unwrap();

    s.toggle_pile("A", ToggleAction::Start).unwrap();

    assert_eq!(s.request(early).unwrap().state, RequestState::Charging);
    assert_eq!(s.request(late).unwrap().state, RequestState::Waiting);
    s.assert_invariants();
}

#[test]
fn priority_dispatches_maximum_score() {
    let mut s = frozen_station(&StationConfig::compact());
    s.set_strategy(StrategyKind::Priority);
    s.toggle_pile("A", ToggleAction::Stop).unwrap();

    // Same submission instant: the bigger ask has the higher ratio.
    let small = s.join("small", Mode::Fast, 10.0, None).unwrap();
    let big = s.join("big", Mode::Fast, 25.0, None).unwrap();

    s.toggle_pile("A", ToggleAction::Start).unwrap();

    assert_eq!(s.request(big).unwrap().state, RequestState::Charging);
    assert_eq!(s.request(small).unwrap().state, RequestState::Waiting);
}

#[test]
fn time_order_dispatches_in_submission_order() {
    let mut s = frozen_station(&StationConfig::compact());
    s.toggle_pile("A", ToggleAction::Stop).unwrap();

    // Bigger ask submitted later must not jump the line under time order.
    let first = s.join("first", Mode::Fast, 5.0, None).unwrap();
    s.clock().advance(Duration::minutes(1));
    let second = s.join("second", Mode::Fast, 50.0, Some(99)).unwrap();

    s.toggle_pile("A", ToggleAction::Start).unwrap();
    assert_eq!(s.request(first).unwrap().state, RequestState::Charging);

    s.disconnect("A").unwrap();
    assert_eq!(s.request(second).unwrap().state, RequestState::Charging);
    s.assert_invariants();
}

#[test]
fn modes_are_exclusive_in_matching() {
    let mut s = frozen_station(&StationConfig::compact());
    // Occupy the slow pile, then queue another slow request; the idle fast
    // pile must never pick it up.
    s.join("s0", Mode::Slow, 7.0, None).unwrap();
    let slow_waiter = s.join("s1", Mode::Slow, 7.0, None).unwrap();
    s.tick();
    assert_eq!(s.request(slow_waiter).unwrap().state, RequestState::Waiting);
    let piles = s.pile_status();
    let fast = piles.iter().find(|p| p.pile_id == "A").unwrap();
    assert_eq!(fast.state, PileState::Idle);
}

#[test]
fn fault_eviction_bills_and_requeues() {
    let mut s = frozen_station(&StationConfig::compact());
    let qn = s.join("alice", Mode::Fast, 30.0, None).unwrap();
    s.clock().advance(Duration::minutes(30));

    let fault_time = t0() + Duration::minutes(30);
    let bill = s
        .set_fault("A", StrategyKind::TimeOrder)
        .unwrap()
        .expect("a charging pile yields a truncated bill");

    assert_eq!(bill.end_time, fault_time);
    assert!(bill.energy_delivered <= 30.0);
    assert!((bill.energy_delivered - 15.0).abs() < 1e-6);

    let req = s.request(qn).unwrap();
    assert_eq!(req.state, RequestState::Waiting);
    // Original submission time survives eviction.
    assert_eq!(req.submitted_at, t0());
    s.assert_invariants();
}

#[test]
fn repair_reassigns_evicted_request_without_rejoin() {
    let mut s = frozen_station(&StationConfig::compact());
    let qn = s.join("alice", Mode::Fast, 30.0, None).unwrap();
    s.clock().advance(Duration::minutes(10));
    s.set_fault("A", StrategyKind::TimeOrder).unwrap();
    assert_eq!(s.request(qn).unwrap().state, RequestState::Waiting);

    s.repair("A").unwrap();

    let req = s.request(qn).unwrap();
    assert_eq!(req.state, RequestState::Charging);
    assert_eq!(req.pile_id.as_deref(), Some("A"));
    s.assert_invariants();
}

#[test]
fn evicted_request_outranks_later_waiters() {
    let mut s = frozen_station(&StationConfig::compact());
    let victim = s.join("victim", Mode::Fast, 30.0, None).unwrap();
    s.clock().advance(Duration::minutes(5));
    let waiter = s.join("waiter", Mode::Fast, 30.0, None).unwrap();

    s.clock().advance(Duration::minutes(5));
    s.set_fault("A", StrategyKind::TimeOrder).unwrap();
    s.repair("A").unwrap();

    // Under time order the victim's earlier submission wins the pile back.
    assert_eq!(s.request(victim).unwrap().state, RequestState::Charging);
    assert_eq!(s.request(waiter).unwrap().state, RequestState::Waiting);
    s.assert_invariants();
}

#[test]
fn fault_on_idle_pile_blocks_assignment_until_repair() {
    let mut s = frozen_station(&StationConfig::compact());
    s.set_fault("A", StrategyKind::TimeOrder).unwrap();
    let qn = s.join("alice", Mode::Fast, 30.0, None).unwrap();
    assert_eq!(s.request(qn).unwrap().state, RequestState::Waiting);

    s.repair("A").unwrap();
    assert_eq!(s.request(qn).unwrap().state, RequestState::Charging);
}

#[test]
fn scheduling_pass_is_idempotent() {
    let mut s = frozen_station(&StationConfig::standard());
    s.join("u1", Mode::Fast, 30.0, None).unwrap();
    s.join("u2", Mode::Fast, 20.0, None).unwrap();
    s.join("u3", Mode::Slow, 7.0, None).unwrap();
    s.join("u4", Mode::Fast, 10.0, None).unwrap();
    s.join("u5", Mode::Fast, 10.0, None).unwrap();

    s.tick();
    let queues = format!("{:?}", s.queue_status());
    let piles = format!("{:?}", s.pile_status());

    s.tick();
    assert_eq!(format!("{:?}", s.queue_status()), queues);
    assert_eq!(format!("{:?}", s.pile_status()), piles);
    s.assert_invariants();
}

#[test]
fn strategy_switch_leaves_active_sessions_alone() {
    let mut s = frozen_station(&StationConfig::compact());
    let qn = s.join("alice", Mode::Fast, 30.0, None).unwrap();
    let started = s.request(qn).unwrap().started_at;

    s.set_strategy(StrategyKind::Priority);

    let req = s.request(qn).unwrap();
    assert_eq!(req.state, RequestState::Charging);
    assert_eq!(req.started_at, started);
}

#[test]
fn user_can_rejoin_after_completion() {
    let mut s = frozen_station(&StationConfig::compact());
    s.join("alice", Mode::Fast, 30.0, None).unwrap();
    assert!(matches!(
        s.join("alice", Mode::Fast, 5.0, None),
        Err(StationError::DuplicateRequest(_))
    ));

    s.clock().advance(Duration::hours(2));
    s.tick();

    let again = s.join("alice", Mode::Slow, 7.0, None).unwrap();
    assert_eq!(again.mode, Mode::Slow);
    s.assert_invariants();
}

#[test]
fn billing_splits_across_tier_boundary() {
    let mut s = frozen_station(&StationConfig::compact());
    s.set_time("2024-05-20 09:00:00").unwrap();
    // 60 units at 30 units/h spans 09:00-11:00: normal hour + peak hour.
    s.join("alice", Mode::Fast, 60.0, None).unwrap();
    s.clock().advance(Duration::hours(3));
    s.tick();

    let bills = s.bills(Some("alice"));
    assert_eq!(bills.len(), 1);
    let bill = &bills[0];
    assert!((bill.energy_delivered - 60.0).abs() < 1e-6);
    // 30*0.7 + 30*1.0
    assert!((bill.cost - 51.0).abs() < 1e-6);
    assert!((bill.service_cost - 5.1).abs() < 1e-6);
    assert!((bill.total_cost - 56.1).abs() < 1e-6);
}

#[test]
fn reports_aggregate_by_simulated_window() {
    let mut s = frozen_station(&StationConfig::compact());

    // One session today.
    s.join("alice", Mode::Fast, 30.0, None).unwrap();
    s.clock().advance(Duration::hours(2));
    s.tick();

    // One session three days later.
    s.set_time("2024-05-23 08:00:00").unwrap();
    s.join("bob", Mode::Fast, 30.0, None).unwrap();
    s.clock().advance(Duration::hours(2));
    s.tick();

    let day = s.report(ReportKind::Day, None);
    assert_eq!(day.total_sessions, 1);

    let week = s.report(ReportKind::Week, None);
    assert_eq!(week.total_sessions, 2);
    assert!((week.total_energy - 60.0).abs() < 1e-6);
    assert_eq!(week.by_pile.len(), 1);
    assert_eq!(week.by_pile[0].pile_id, "A");
    assert_eq!(week.by_pile[0].sessions, 2);
}

#[test]
fn queue_status_orders_by_active_strategy() {
    let mut s = frozen_station(&StationConfig::standard());
    // Fill all three fast piles, then queue three more.
    for user in ["u1", "u2", "u3"] {
        s.join(user, Mode::Fast, 30.0, None).unwrap();
    }
    s.join("w_small", Mode::Fast, 5.0, None).unwrap();
    s.clock().advance(Duration::seconds(1));
    s.join("w_big", Mode::Fast, 50.0, None).unwrap();

    // Time order: submission order.
    let status = s.queue_status();
    assert_eq!(status.fast[0].username, "w_small");

    // Priority: the larger ask overtakes despite its later submission.
    s.set_strategy(StrategyKind::Priority);
    let status = s.queue_status();
    assert_eq!(status.fast[0].username, "w_big");
    s.assert_invariants();
}
