//! Sharded execution runtime.
//!
//! One worker thread per shard, each fed by its own bounded queue. A key is
//! always routed to the same shard, so all events for a key are processed in
//! arrival order by a single thread while different keys proceed in parallel.
//! A ticker thread drives the engine's window schedule.
//!
//! Backpressure: `ingest` blocks when the target shard's queue is full; it is
//! the only blocking point. `try_ingest` fails fast instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::error::{ExecutionError, StreamError, StreamResult};
use crate::event::Event;

use super::sink::OutputSink;
use super::Engine;

/// Upper bound on how long the ticker sleeps between schedule checks.
const MAX_TICK_POLL: Duration = Duration::from_millis(50);

struct Ticker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Running engine with shard workers and a window ticker.
pub struct StreamRuntime {
    engine: Arc<Engine>,
    senders: RwLock<Option<Vec<Sender<Event>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    ticker: Mutex<Option<Ticker>>,
    shard_count: usize,
    queue_capacity: usize,
    closed: AtomicBool,
}

impl std::fmt::Debug for StreamRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRuntime")
            .field("shards", &self.shard_count)
            .field("queue_capacity", &self.queue_capacity)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl StreamRuntime {
    /// Starts shard workers and the ticker. Shard count and queue capacity
    /// come from the engine's configuration.
    ///
    /// # Errors
    ///
    /// `Internal` if a thread cannot be spawned.
    pub fn start(engine: Engine, sink: Arc<dyn OutputSink>) -> StreamResult<Self> {
        let engine = Arc::new(engine);
        let shard_count = engine.config().shards.max(1);
        let queue_capacity = engine.config().queue_capacity.max(1);

        let mut senders = Vec::with_capacity(shard_count);
        let mut workers = Vec::with_capacity(shard_count);
        for shard in 0..shard_count {
            let (tx, rx) = bounded::<Event>(queue_capacity);
            let engine = Arc::clone(&engine);
            let sink = Arc::clone(&sink);
            let handle = thread::Builder::new()
                .name(format!("kyrostream-shard-{shard}"))
                .spawn(move || shard_loop(shard, &engine, &*sink, &rx))
                .map_err(|e| StreamError::internal(format!("failed to spawn shard worker: {e}")))?;
            senders.push(tx);
            workers.push(handle);
        }

        let ticker = spawn_ticker(Arc::clone(&engine))?;
        info!(shards = shard_count, queue_capacity, "stream runtime started");

        Ok(Self {
            engine,
            senders: RwLock::new(Some(senders)),
            workers: Mutex::new(workers),
            ticker: Mutex::new(Some(ticker)),
            shard_count,
            queue_capacity,
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub const fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    #[must_use]
    pub const fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Shard that owns `event`'s key.
    #[must_use]
    pub fn shard_for(&self, event: &Event) -> usize {
        event.entity_key.shard(self.shard_count)
    }

    /// Events waiting in each shard queue.
    #[must_use]
    pub fn queue_depths(&self) -> Vec<usize> {
        self.senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or_else(Vec::new, |s| s.iter().map(Sender::len).collect())
    }

    fn sender(&self, shard: usize) -> StreamResult<Sender<Event>> {
        let guard = self
            .senders
            .read()
            .map_err(|_| StreamError::internal("runtime sender lock poisoned"))?;
        guard
            .as_ref()
            .and_then(|s| s.get(shard).cloned())
            .ok_or(StreamError::Execution(ExecutionError::ShuttingDown))
    }

    /// Enqueues an event, blocking while its shard queue is full.
    ///
    /// # Errors
    ///
    /// `ShuttingDown` after `shutdown`, `Disconnected` if the worker is gone.
    pub fn ingest(&self, event: Event) -> StreamResult<()> {
        let shard = self.shard_for(&event);
        self.sender(shard)?
            .send(event)
            .map_err(|_| disconnected(shard))
    }

    /// Enqueues an event without blocking.
    ///
    /// # Errors
    ///
    /// `QueueFull` when the shard queue is at capacity (retryable), otherwise
    /// as [`StreamRuntime::ingest`].
    pub fn try_ingest(&self, event: Event) -> StreamResult<()> {
        let shard = self.shard_for(&event);
        match self.sender(shard)?.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(StreamError::Execution(ExecutionError::QueueFull {
                path: shard_path(shard),
                capacity: self.queue_capacity,
            })),
            Err(TrySendError::Disconnected(_)) => Err(disconnected(shard)),
        }
    }

    /// Enqueues an event, waiting at most `timeout` for queue space.
    ///
    /// # Errors
    ///
    /// `Timeout` if the queue stayed full, otherwise as [`StreamRuntime::ingest`].
    pub fn ingest_timeout(&self, event: Event, timeout: Duration) -> StreamResult<()> {
        let shard = self.shard_for(&event);
        self.sender(shard)?
            .send_timeout(event, timeout)
            .map_err(|err| match err {
                SendTimeoutError::Timeout(_) => StreamError::Execution(ExecutionError::Timeout {
                    duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
                SendTimeoutError::Disconnected(_) => disconnected(shard),
            })
    }

    /// Stops accepting events, drains every shard queue, and joins all
    /// threads. Active sessions are left as they are. Idempotent.
    ///
    /// # Errors
    ///
    /// `Internal` if a worker thread panicked.
    pub fn shutdown(&self) -> StreamResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // Closing the channels lets workers finish what is queued, then exit.
        drop(self.senders.write().unwrap_or_else(PoisonError::into_inner).take());

        let mut panicked = 0usize;
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in workers {
            if handle.join().is_err() {
                panicked += 1;
            }
        }

        if let Some(ticker) = self.ticker.lock().unwrap_or_else(PoisonError::into_inner).take() {
            drop(ticker.stop);
            if ticker.handle.join().is_err() {
                panicked += 1;
            }
        }

        let stats = self.engine.stats();
        info!(received = stats.received, alerts = stats.alerts, "stream runtime stopped");

        if panicked > 0 {
            return Err(StreamError::internal(format!("{panicked} runtime thread(s) panicked")));
        }
        Ok(())
    }
}

impl Drop for StreamRuntime {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(error = %err, "stream runtime shutdown failed");
        }
    }
}

fn shard_loop(shard: usize, engine: &Engine, sink: &dyn OutputSink, rx: &Receiver<Event>) {
    debug!(shard, "shard worker started");
    for event in rx.iter() {
        for output in engine.process(&event) {
            sink.emit(output);
        }
    }
    debug!(shard, "shard worker drained");
}

fn spawn_ticker(engine: Arc<Engine>) -> StreamResult<Ticker> {
    let (stop, stop_rx) = bounded::<()>(1);
    let poll = engine.config().window_tick_interval().min(MAX_TICK_POLL);
    let handle = thread::Builder::new()
        .name("kyrostream-ticker".to_string())
        .spawn(move || loop {
            match stop_rx.recv_timeout(poll) {
                Err(RecvTimeoutError::Timeout) => {
                    if let Err(err) = engine.maybe_tick() {
                        warn!(error = %err, "window tick failed");
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        })
        .map_err(|e| StreamError::internal(format!("failed to spawn ticker: {e}")))?;
    Ok(Ticker { stop, handle })
}

fn shard_path(shard: usize) -> String {
    format!("shard-{shard}")
}

fn disconnected(shard: usize) -> StreamError {
    StreamError::Execution(ExecutionError::Disconnected {
        path: shard_path(shard),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::MemorySink;
    use crate::event::EventKind;
    use crate::time::{ManualClock, Timestamp};

    fn runtime(shards: usize, queue_capacity: usize) -> (StreamRuntime, Arc<MemorySink>) {
        let cfg = EngineConfig {
            shards,
            queue_capacity,
            ..EngineConfig::default()
        };
        let engine = Engine::new(cfg, ManualClock::new(Timestamp::EPOCH)).unwrap();
        let sink = Arc::new(MemorySink::new());
        let rt = StreamRuntime::start(engine, Arc::clone(&sink) as Arc<dyn OutputSink>).unwrap();
        (rt, sink)
    }

    #[test]
    fn test_shutdown_drains_queues() {
        let (rt, _sink) = runtime(4, 64);
        for i in 0..200 {
            rt.ingest(Event::new(format!("post_{}", i % 7), EventKind::Interaction, Timestamp::EPOCH))
                .unwrap();
        }
        rt.shutdown().unwrap();
        assert_eq!(rt.engine().stats().processed, 200);
        assert!(rt.queue_depths().is_empty());
    }

    #[test]
    fn test_ingest_after_shutdown_is_rejected() {
        let (rt, _sink) = runtime(2, 8);
        rt.shutdown().unwrap();
        rt.shutdown().unwrap();
        let err = rt
            .ingest(Event::new("u1", EventKind::SessionStart, Timestamp::EPOCH))
            .unwrap_err();
        assert_eq!(err, StreamError::Execution(ExecutionError::ShuttingDown));
        assert!(rt
            .try_ingest(Event::new("u1", EventKind::SessionStart, Timestamp::EPOCH))
            .is_err());
    }

    #[test]
    fn test_shard_routing_is_stable() {
        let (rt, _sink) = runtime(8, 8);
        let a = Event::new("driver-101", EventKind::Heartbeat, Timestamp::EPOCH);
        let b = Event::new("driver-101", EventKind::DriverPing, Timestamp::from_millis(9));
        assert_eq!(rt.shard_for(&a), rt.shard_for(&b));
        assert!(rt.shard_for(&a) < rt.shard_count());
    }
}
