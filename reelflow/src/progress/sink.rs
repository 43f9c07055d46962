//! Progress sink trait and implementations.

use super::ProgressEvent;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Level;

/// Receiver of progress events.
///
/// Implementations must return quickly and must not block the caller.
pub trait ProgressSink: Send + Sync {
    /// Accepts one event.
    fn report(&self, event: ProgressEvent);
}

/// A sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProgressSink;

impl ProgressSink for NoOpProgressSink {
    fn report(&self, _event: ProgressEvent) {}
}

/// A sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingProgressSink {
    level: Level,
}

impl Default for LoggingProgressSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingProgressSink {
    /// Creates a new logging sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl ProgressSink for LoggingProgressSink {
    fn report(&self, event: ProgressEvent) {
        macro_rules! emit {
            ($level:expr) => {
                tracing::event!(
                    $level,
                    stage = %event.stage_name,
                    percent = event.percent_complete,
                    stage_percent = event.stage_percent,
                    "{}", event.message
                )
            };
        }
        match self.level {
            Level::TRACE => emit!(Level::TRACE),
            Level::DEBUG => emit!(Level::DEBUG),
            Level::INFO => emit!(Level::INFO),
            Level::WARN => emit!(Level::WARN),
            _ => emit!(Level::ERROR),
        }
    }
}

/// A collecting sink for tests and in-process inspection.
#[derive(Debug, Default)]
pub struct CollectingProgressSink {
    events: RwLock<Vec<ProgressEvent>>,
}

impl CollectingProgressSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events reported by one stage.
    #[must_use]
    pub fn events_for(&self, stage_name: &str) -> Vec<ProgressEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.stage_name == stage_name)
            .cloned()
            .collect()
    }
}

impl ProgressSink for CollectingProgressSink {
    fn report(&self, event: ProgressEvent) {
        self.events.write().push(event);
    }
}

/// Forwards events over a bounded channel.
///
/// When the receiver falls behind, events are dropped and counted rather
/// than applying backpressure to the stage.
#[derive(Debug)]
pub struct ChannelProgressSink {
    tx: mpsc::Sender<ProgressEvent>,
    dropped: AtomicU64,
}

impl ChannelProgressSink {
    /// Creates a sink and the receiver the caller drains.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Returns the number of events dropped because the channel was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ProgressSink for ChannelProgressSink {
    fn report(&self, event: ProgressEvent) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Forwards each event to several sinks.
#[derive(Default)]
pub struct FanoutProgressSink {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl FanoutProgressSink {
    /// Creates an empty fanout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a downstream sink.
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ProgressSink for FanoutProgressSink {
    fn report(&self, event: ProgressEvent) {
        for sink in &self.sinks {
            sink.report(event.clone());
        }
    }
}
