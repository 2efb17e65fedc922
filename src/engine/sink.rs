//! Output sinks for engine results.
//!
//! The runtime hands every `EngineOutput` to one `OutputSink`. Sinks must not
//! block the shard worker for long: `ChannelSink` uses a bounded queue and
//! drops (and counts) outputs when the consumer falls behind.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use tracing::{info, warn};

use crate::alert::Alert;
use crate::error::{ExecutionError, StreamError, StreamResult};

use super::EngineOutput;

/// Destination for engine outputs.
pub trait OutputSink: Send + Sync {
    /// Delivers one output. Must not panic.
    fn emit(&self, output: EngineOutput);
}

impl<S: OutputSink + ?Sized> OutputSink for Arc<S> {
    fn emit(&self, output: EngineOutput) {
        (**self).emit(output);
    }
}

/// Bounded channel sink. Pair with the [`OutputStream`] returned by
/// [`ChannelSink::new`].
#[derive(Debug)]
pub struct ChannelSink {
    tx: Sender<EngineOutput>,
    capacity: usize,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Creates a sink and its receiving stream.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, OutputStream) {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                capacity,
                dropped: AtomicU64::new(0),
            },
            OutputStream { rx },
        )
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Outputs discarded because the stream was full or gone.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl OutputSink for ChannelSink {
    fn emit(&self, output: EngineOutput) {
        match self.tx.try_send(output) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(capacity = self.capacity, dropped, "output stream full; dropping output");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Receiving end of a [`ChannelSink`].
#[derive(Debug)]
pub struct OutputStream {
    rx: Receiver<EngineOutput>,
}

impl OutputStream {
    /// Receive the next output (blocking).
    ///
    /// # Errors
    ///
    /// `Disconnected` once the sink is gone and the queue is empty.
    pub fn recv(&self) -> StreamResult<EngineOutput> {
        self.rx.recv().map_err(|_| disconnected())
    }

    /// Receive the next output with a timeout.
    ///
    /// # Errors
    ///
    /// `Timeout` if nothing arrives in time, `Disconnected` if the sink is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> StreamResult<EngineOutput> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => StreamError::Execution(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => disconnected(),
        })
    }

    /// Next output if one is ready.
    #[must_use]
    pub fn try_recv(&self) -> Option<EngineOutput> {
        match self.rx.try_recv() {
            Ok(output) => Some(output),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Everything currently queued.
    #[must_use]
    pub fn drain(&self) -> Vec<EngineOutput> {
        self.rx.try_iter().collect()
    }

    /// Blocking iterator that ends when the sink is dropped.
    pub fn iter(&self) -> impl Iterator<Item = EngineOutput> + '_ {
        self.rx.iter()
    }
}

fn disconnected() -> StreamError {
    StreamError::Execution(ExecutionError::Disconnected {
        path: "output_stream".to_string(),
    })
}

/// Calls a closure for every output.
pub struct CallbackSink {
    callback: Box<dyn Fn(EngineOutput) + Send + Sync>,
}

impl CallbackSink {
    pub fn new(callback: impl Fn(EngineOutput) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl fmt::Debug for CallbackSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSink").finish_non_exhaustive()
    }
}

impl OutputSink for CallbackSink {
    fn emit(&self, output: EngineOutput) {
        (self.callback)(output);
    }
}

/// Collects outputs in memory. Intended for tests and replay.
#[derive(Debug, Default)]
pub struct MemorySink {
    outputs: Mutex<Vec<EngineOutput>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything collected so far.
    #[must_use]
    pub fn outputs(&self) -> Vec<EngineOutput> {
        self.outputs.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Collected alerts only, in emission order.
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|o| o.as_alert().cloned())
            .collect()
    }

    /// Removes and returns everything collected so far.
    #[must_use]
    pub fn take(&self) -> Vec<EngineOutput> {
        std::mem::take(&mut *self.outputs.lock().unwrap_or_else(PoisonError::into_inner))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.outputs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OutputSink for MemorySink {
    fn emit(&self, output: EngineOutput) {
        self.outputs.lock().unwrap_or_else(PoisonError::into_inner).push(output);
    }
}

/// Logs every output through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl OutputSink for LogSink {
    fn emit(&self, output: EngineOutput) {
        match output {
            EngineOutput::Alert(alert) => info!(
                kind = %alert.kind,
                key = %alert.key,
                value = alert.metric_value,
                id = %alert.alert_id,
                "alert"
            ),
            EngineOutput::Match(outcome) => info!(
                demand = %outcome.demand_id,
                matched = outcome.result.matched_entity_key.as_ref().map_or("-", |k| k.as_str()),
                distance = ?outcome.result.distance,
                "match"
            ),
        }
    }
}
