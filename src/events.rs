use crate::core::{LogEvent, ProgressEvent};
use tokio::sync::broadcast;

pub const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out of build notifications on two independent topics.
///
/// Ordering is FIFO within a topic. A subscriber only sees events published
/// after it subscribed.
#[derive(Clone)]
pub struct EventBus {
    progress_tx: broadcast::Sender<ProgressEvent>,
    log_tx: broadcast::Sender<LogEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (progress_tx, _) = broadcast::channel(capacity);
        let (log_tx, _) = broadcast::channel(capacity);
        Self {
            progress_tx,
            log_tx,
        }
    }

    pub fn publish_progress(&self, event: ProgressEvent) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.progress_tx.send(event);
    }

    pub fn publish_log(&self, event: LogEvent) {
        let _ = self.log_tx.send(event);
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress_tx.subscribe()
    }

    /// Log batches published after this call.
    ///
    /// A subscriber that falls more than the bus capacity behind gets
    /// `RecvError::Lagged(n)` and the oldest `n` batches are gone, so the
    /// output it reconstructs has a gap. Callers should surface that rather
    /// than keep concatenating.
    pub fn subscribe_log(&self) -> broadcast::Receiver<LogEvent> {
        self.log_tx.subscribe()
    }
}
