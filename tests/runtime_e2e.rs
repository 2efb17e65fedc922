use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;

use kyrostream::entity::fields;
use kyrostream::{
    AlertKind, CallbackSink, ChannelSink, Engine, EngineConfig, EntityKey, Event, EventKind, ExecutionError, Location,
    ManualClock, MemorySink, OutputSink, StreamError, StreamRuntime, Timestamp,
};

fn config(shards: usize, queue_capacity: usize) -> EngineConfig {
    EngineConfig {
        shards,
        queue_capacity,
        ..EngineConfig::default()
    }
}

fn ev(key: &str, kind: EventKind, ms: i64) -> Event {
    Event::new(key, kind, Timestamp::from_millis(ms))
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn per_key_order_is_preserved_across_shards() {
    let engine = Engine::new(config(8, 32), ManualClock::new(Timestamp::EPOCH)).unwrap();
    let sink = Arc::new(MemorySink::new());
    let runtime = StreamRuntime::start(engine, Arc::clone(&sink) as Arc<dyn OutputSink>).unwrap();

    let users: Vec<String> = (0..50).map(|u| format!("user_{u}")).collect();
    for user in &users {
        runtime.ingest(ev(user, EventKind::SessionStart, 0)).unwrap();
    }
    // Interleave keys so every shard queue sees mixed traffic.
    for step in 1..=20 {
        for user in &users {
            let kind = if step % 4 == 0 { EventKind::Buffer } else { EventKind::Heartbeat };
            runtime.ingest(ev(user, kind, step)).unwrap();
        }
    }
    runtime.shutdown().unwrap();

    let engine = runtime.engine();
    for user in &users {
        let state = engine.state(&EntityKey::from(user.as_str())).unwrap().unwrap();
        assert_eq!(state.counter(fields::HEARTBEATS), 15, "{user}");
        assert_eq!(state.counter(fields::BUFFER_COUNT), 5, "{user}");
    }
    assert_eq!(engine.stats().unknown_entity, 0);

    let qoe: Vec<_> = sink
        .alerts()
        .into_iter()
        .filter(|a| a.kind == AlertKind::QoeCritical)
        .collect();
    assert_eq!(qoe.len(), users.len());
    // Third buffer is step 12.
    assert!(qoe.iter().all(|a| a.timestamp == Timestamp::from_millis(12)));
}

#[test]
fn try_ingest_reports_full_queue() {
    let engine = Engine::new(config(1, 2), ManualClock::new(Timestamp::EPOCH)).unwrap();
    engine.process(&ev("d1", EventKind::DriverPing, 0).at(Location::new(1.0, 1.0)));

    let (entered_tx, entered_rx) = unbounded::<()>();
    let (release_tx, release_rx) = unbounded::<()>();
    let sink = CallbackSink::new(move |_| {
        let _ = entered_tx.send(());
        // Blocks until the sender side is dropped.
        let _ = release_rx.recv();
    });
    let runtime = StreamRuntime::start(engine, Arc::new(sink) as Arc<dyn OutputSink>).unwrap();

    let order = |id: &str| ev(id, EventKind::OrderReady, 1).at(Location::new(1.0, 1.0));
    runtime.try_ingest(order("ORD-1")).unwrap();
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    runtime.try_ingest(order("ORD-2")).unwrap();
    runtime.try_ingest(order("ORD-3")).unwrap();
    let err = runtime.try_ingest(order("ORD-4")).unwrap_err();
    assert!(matches!(
        err,
        StreamError::Execution(ExecutionError::QueueFull { capacity: 2, .. })
    ));
    assert!(err.is_retryable());
    assert_eq!(runtime.queue_depths(), vec![2]);

    let timed_out = runtime
        .ingest_timeout(order("ORD-5"), Duration::from_millis(10))
        .unwrap_err();
    assert!(matches!(timed_out, StreamError::Execution(ExecutionError::Timeout { .. })));

    drop(release_tx);
    runtime.shutdown().unwrap();
    let stats = runtime.engine().stats();
    assert_eq!(stats.received, 4);
    assert_eq!((stats.matches, stats.match_failures), (1, 2));
}

#[test]
fn shutdown_drains_and_leaves_sessions_active() {
    let engine = Engine::new(config(4, 16), ManualClock::new(Timestamp::EPOCH)).unwrap();
    let (sink, stream) = ChannelSink::new(1024);
    let runtime = StreamRuntime::start(engine, Arc::new(sink) as Arc<dyn OutputSink>).unwrap();

    runtime.ingest(ev("viewer", EventKind::SessionStart, 0)).unwrap();
    for i in 0..20 {
        runtime.ingest(ev("post_7", EventKind::Interaction, i)).unwrap();
    }
    runtime.shutdown().unwrap();

    let kinds: Vec<AlertKind> = stream.drain().iter().filter_map(|o| o.as_alert().map(|a| a.kind)).collect();
    assert_eq!(kinds, vec![AlertKind::Rising, AlertKind::ViralTrend]);

    let viewer = runtime.engine().state(&EntityKey::from("viewer")).unwrap().unwrap();
    assert_eq!(viewer.status, kyrostream::EntityStatus::Active);

    let err = runtime.ingest(ev("viewer", EventKind::Heartbeat, 1)).unwrap_err();
    assert_eq!(err, StreamError::Execution(ExecutionError::ShuttingDown));
}

#[test]
fn ticker_follows_engine_clock() {
    let clock = Arc::new(ManualClock::new(Timestamp::EPOCH));
    let engine = Engine::new(config(2, 64), Arc::clone(&clock)).unwrap();
    let runtime = StreamRuntime::start(engine, Arc::new(MemorySink::new()) as Arc<dyn OutputSink>).unwrap();

    for i in 0..3 {
        runtime.ingest(ev("post_1", EventKind::Interaction, i)).unwrap();
    }
    let engine = Arc::clone(runtime.engine());
    assert!(wait_until(Duration::from_secs(5), || engine.stats().processed == 3));
    assert_eq!(engine.stats().ticks, 0);
    assert_eq!(engine.windows().count(&EntityKey::from("post_1")).unwrap(), 3);

    clock.advance(Duration::from_millis(2_000));
    assert!(wait_until(Duration::from_secs(5), || engine.stats().ticks >= 1));
    assert_eq!(engine.windows().count(&EntityKey::from("post_1")).unwrap(), 0);

    runtime.shutdown().unwrap();
}
