use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use kyrostream::alert::attrs;
use kyrostream::entity::fields;
use kyrostream::{
    AlertKind, Engine, EngineConfig, EngineOutput, EntityClass, EntityKey, EntityStatus, Event, EventKind,
    ExecutionError, Location, ManualClock, StreamError, Timestamp, Value,
};

fn engine() -> (Engine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Timestamp::EPOCH));
    let engine = Engine::new(EngineConfig::default(), Arc::clone(&clock)).unwrap();
    (engine, clock)
}

fn ev(key: &str, kind: EventKind, ms: i64) -> Event {
    Event::new(key, kind, Timestamp::from_millis(ms))
}

fn kinds(outputs: &[EngineOutput]) -> Vec<AlertKind> {
    outputs.iter().filter_map(|o| o.as_alert().map(|a| a.kind)).collect()
}

#[test]
fn session_qoe_fires_once_and_summary_reports_duration() {
    let (engine, _) = engine();
    let script = [
        (EventKind::SessionStart, 1_000),
        (EventKind::Heartbeat, 2_000),
        (EventKind::Buffer, 3_000),
        (EventKind::Buffer, 4_000),
        (EventKind::Buffer, 5_000),
        (EventKind::SessionEnd, 8_000),
    ];

    let mut alerts = Vec::new();
    for (kind, ms) in script {
        let event = ev("u1", kind, ms).with("title", "Stranger Things");
        alerts.extend(engine.process(&event).into_iter().filter_map(|o| o.as_alert().cloned()));
    }

    let qoe: Vec<_> = alerts.iter().filter(|a| a.kind == AlertKind::QoeCritical).collect();
    assert_eq!(qoe.len(), 1);
    assert_eq!(qoe[0].timestamp, Timestamp::from_millis(5_000));
    assert_eq!(qoe[0].attribute(attrs::TITLE), Some(&Value::from("Stranger Things")));

    let summary = alerts.iter().find(|a| a.kind == AlertKind::SessionSummary).unwrap();
    assert!((summary.metric_value - 7.0).abs() < f64::EPSILON);

    // Default lifecycle removes the session once it ends.
    assert!(engine.state(&EntityKey::from("u1")).unwrap().is_none());
}

#[test]
fn qoe_is_idempotent_while_buffering_continues() {
    let (engine, _) = engine();
    engine.process(&ev("u2", EventKind::SessionStart, 0));
    let mut fired = Vec::new();
    for ms in 1..=10 {
        fired.extend(kinds(&engine.process(&ev("u2", EventKind::Buffer, ms))));
    }
    assert_eq!(fired, vec![AlertKind::QoeCritical]);

    let state = engine.state(&EntityKey::from("u2")).unwrap().unwrap();
    assert_eq!(state.counter(fields::BUFFER_COUNT), 10);
    assert!(state.flag(fields::QOE_ALERTED));
}

#[test]
fn restarted_session_can_alert_again() {
    let (engine, _) = engine();
    let mut fired = 0;
    for round in 0..2 {
        let base = round * 100;
        engine.process(&ev("u3", EventKind::SessionStart, base));
        for i in 1..=3 {
            fired += kinds(&engine.process(&ev("u3", EventKind::Buffer, base + i)))
                .iter()
                .filter(|k| **k == AlertKind::QoeCritical)
                .count();
        }
        engine.process(&ev("u3", EventKind::SessionEnd, base + 50));
    }
    assert_eq!(fired, 2);
}

#[test]
fn matching_claims_nearest_then_next_nearest() {
    let (engine, _) = engine();
    engine.process(&ev("101", EventKind::DriverPing, 0).at(Location::new(47.60, -122.33)));
    engine.process(&ev("103", EventKind::DriverPing, 0).at(Location::new(47.58, -122.30)));
    let demand = Location::new(47.601, -122.331);

    let first = engine.process(&ev("ORD-1", EventKind::OrderReady, 1).at(demand));
    let second = engine.process(&ev("ORD-2", EventKind::OrderReady, 2).at(demand));
    let third = engine.process(&ev("ORD-3", EventKind::OrderReady, 3).at(demand));

    let matched = |out: &[EngineOutput]| out[0].as_match().unwrap().result.matched_entity_key.clone();
    assert_eq!(matched(&first), Some(EntityKey::from("101")));
    assert_eq!(matched(&second), Some(EntityKey::from("103")));
    assert_eq!(matched(&third), None);
    assert_eq!(kinds(&third), vec![AlertKind::MatchFailed]);

    let driver = engine.state(&EntityKey::from("101")).unwrap().unwrap();
    assert_eq!(driver.status, EntityStatus::Busy);

    let stats = engine.stats();
    assert_eq!((stats.matches, stats.match_failures), (2, 1));
}

#[test]
fn matched_driver_returns_to_pool_after_idle_ping() {
    let (engine, _) = engine();
    let here = Location::new(40.0, -73.0);
    engine.process(&ev("d1", EventKind::DriverPing, 0).at(here));

    let first = engine.process(&ev("ORD-1", EventKind::OrderReady, 1).at(here));
    assert!(first[0].as_match().unwrap().result.is_match());
    let blocked = engine.process(&ev("ORD-2", EventKind::OrderReady, 2).at(here));
    assert!(!blocked[0].as_match().unwrap().result.is_match());

    engine.process(&ev("d1", EventKind::DriverPing, 3).at(here).with("status", "IDLE"));
    let again = engine.process(&ev("ORD-3", EventKind::OrderReady, 4).at(here));
    assert_eq!(
        again[0].as_match().unwrap().result.matched_entity_key,
        Some(EntityKey::from("d1"))
    );
    let driver = engine.state(&EntityKey::from("d1")).unwrap().unwrap();
    assert_eq!(driver.counter(fields::ASSIGNMENTS), 2);
}

#[test]
fn concurrent_orders_never_double_assign() {
    let (engine, _) = engine();
    let engine = Arc::new(engine);
    for d in 0..10 {
        let loc = Location::new(47.0 + f64::from(d) * 0.01, -122.0);
        engine.process(&ev(&format!("drv_{d}"), EventKind::DriverPing, 0).at(loc));
    }

    let handles: Vec<_> = (0..5)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                (0..10)
                    .filter_map(|i| {
                        let order = ev(&format!("ORD-{t}-{i}"), EventKind::OrderReady, 1).at(Location::new(47.05, -122.0));
                        engine.process(&order)[0].as_match().unwrap().result.matched_entity_key.clone()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let matched: Vec<EntityKey> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    let distinct: HashSet<_> = matched.iter().cloned().collect();
    assert_eq!(matched.len(), 10);
    assert_eq!(distinct.len(), 10);
    assert_eq!(engine.stats().match_failures, 40);
}

#[test]
fn bonus_unlocks_once_per_lifetime() {
    let (engine, _) = engine();
    let trips = |n: i64, ms: i64| ev("99", EventKind::TripUpdate, ms).with("trips", n);

    assert!(kinds(&engine.process(&trips(10, 0))).is_empty());
    assert!(kinds(&engine.process(&ev("99", EventKind::RatingUpdate, 1).with("rating", 5.0))).is_empty());
    assert_eq!(kinds(&engine.process(&trips(16, 2))), vec![AlertKind::BonusUnlocked]);
    assert!(kinds(&engine.process(&trips(5, 3))).is_empty());
    assert!(kinds(&engine.process(&trips(20, 4))).is_empty());

    let state = engine.state(&EntityKey::from("99")).unwrap().unwrap();
    assert!(state.flag(fields::BONUS_UNLOCKED));
    assert_eq!(state.counter(fields::TRIPS), 20);
}

#[test]
fn bonus_waits_for_rating() {
    let (engine, _) = engine();
    engine.process(&ev("7", EventKind::RatingUpdate, 0).with("rating", 4.5));
    assert!(kinds(&engine.process(&ev("7", EventKind::TripUpdate, 1).with("trips", 18))).is_empty());
    assert_eq!(
        kinds(&engine.process(&ev("7", EventKind::RatingUpdate, 2).with("rating", 4.9))),
        vec![AlertKind::BonusUnlocked]
    );
}

#[test]
fn filter_blocklist_wins_over_keywords() {
    let config = EngineConfig {
        emit_filter_pass: true,
        ..EngineConfig::default()
    };
    let engine = Engine::new(config, ManualClock::new(Timestamp::EPOCH)).unwrap();
    let text = "New LLM models are crazy #AI";

    let admitted = engine.process(&ev("@ai_researcher", EventKind::Message, 0).with("text", text).with("topic", "Science"));
    assert_eq!(kinds(&admitted), vec![AlertKind::FilterPass]);

    let blocked = engine.process(&ev("@bot_999", EventKind::Message, 1).with("text", text).with("topic", "Science"));
    assert!(blocked.is_empty());

    let by_topic = engine.process(&ev("@user_1", EventKind::Message, 2).with("text", "no keywords").with("topic", "Tech"));
    assert_eq!(kinds(&by_topic), vec![AlertKind::FilterPass]);

    let stats = engine.stats();
    assert_eq!((stats.blocked, stats.irrelevant), (1, 0));
    assert!(engine.state(&EntityKey::from("@bot_999")).unwrap().is_none());
}

#[test]
fn window_goes_viral_then_resets_on_tick() {
    let (engine, clock) = engine();
    let mut fired = Vec::new();
    for i in 0..20 {
        fired.extend(kinds(&engine.process(&ev("post_1001", EventKind::Interaction, i))));
    }
    assert_eq!(fired, vec![AlertKind::Rising, AlertKind::ViralTrend]);

    clock.advance(Duration::from_millis(2_000));
    let report = engine.maybe_tick().unwrap().unwrap();
    assert_eq!(report.total(), 20);
    assert_eq!(engine.windows().count(&EntityKey::from("post_1001")).unwrap(), 0);

    clock.advance(Duration::from_millis(2_000));
    let quiet = engine.maybe_tick().unwrap().unwrap();
    assert!(quiet.closed.is_empty());
    assert_eq!(engine.windows().count(&EntityKey::from("post_1001")).unwrap(), 0);

    // Lifetime interactions survive window resets.
    let post = engine.state(&EntityKey::from("post_1001")).unwrap().unwrap();
    assert_eq!(post.counter(fields::INTERACTIONS), 20);
}

#[test]
fn window_alerts_again_after_reset() {
    let (engine, _) = engine();
    let burst = |engine: &Engine| -> Vec<AlertKind> {
        (0..7)
            .flat_map(|i| kinds(&engine.process(&ev("post_9", EventKind::Interaction, i))))
            .collect()
    };
    assert_eq!(burst(&engine), vec![AlertKind::Rising]);
    engine.tick().unwrap();
    assert_eq!(burst(&engine), vec![AlertKind::Rising]);
}

#[test]
fn unknown_session_events_are_noops() {
    let (engine, _) = engine();
    for kind in [EventKind::Heartbeat, EventKind::Buffer, EventKind::SessionEnd] {
        assert!(engine.process(&ev("nobody", kind, 0)).is_empty());
    }
    assert!(engine.state(&EntityKey::from("nobody")).unwrap().is_none());
    assert_eq!(engine.stats().unknown_entity, 3);
    assert_eq!(engine.stats().alerts, 0);
}

#[test]
fn malformed_events_do_not_affect_other_keys() {
    let (engine, _) = engine();
    engine.process(&ev("u1", EventKind::SessionStart, 0));
    engine.process(&ev("99", EventKind::TripUpdate, 1));
    engine.process(&ev("drv", EventKind::DriverPing, 1));
    engine.process(&ev("u1", EventKind::Heartbeat, 2));

    let stats = engine.stats();
    assert_eq!(stats.malformed, 2);
    let session = engine.state(&EntityKey::from("u1")).unwrap().unwrap();
    assert_eq!(session.counter(fields::HEARTBEATS), 1);
}

#[test]
fn session_events_cannot_reset_a_driver_sharing_its_key() {
    let (engine, _) = engine();
    let trips = |n: i64, ms: i64| ev("101", EventKind::TripUpdate, ms).with("trips", n);

    let mut fired = kinds(&engine.process(&trips(16, 0)));
    for kind in [EventKind::SessionStart, EventKind::SessionEnd] {
        let err = engine.try_process(&ev("101", kind, 1)).unwrap_err();
        assert!(matches!(
            err,
            StreamError::Execution(ExecutionError::ClassMismatch {
                expected: EntityClass::Session,
                found: EntityClass::Driver,
                ..
            })
        ));
    }
    fired.extend(kinds(&engine.process(&trips(17, 2))));
    assert_eq!(fired, vec![AlertKind::BonusUnlocked]);

    let driver = engine.state(&EntityKey::from("101")).unwrap().unwrap();
    assert_eq!(driver.class, EntityClass::Driver);
    assert!(driver.flag(fields::BONUS_UNLOCKED));
    assert_eq!(engine.stats().class_mismatches, 2);
}

#[test]
fn session_start_on_driver_key_keeps_driver_matchable() {
    let (engine, _) = engine();
    let here = Location::new(47.60, -122.33);
    engine.process(&ev("101", EventKind::DriverPing, 0).at(here).with("status", "IDLE"));
    assert!(engine.process(&ev("101", EventKind::SessionStart, 1)).is_empty());

    let driver = engine.state(&EntityKey::from("101")).unwrap().unwrap();
    assert_eq!((driver.class, driver.status), (EntityClass::Driver, EntityStatus::Idle));

    let out = engine.process(&ev("ORD-1", EventKind::OrderReady, 2).at(here));
    assert_eq!(kinds(&out), vec![AlertKind::MatchSuccess]);
    assert_eq!(
        out[0].as_match().unwrap().result.matched_entity_key,
        Some(EntityKey::from("101"))
    );
}
