use crate::core::LogEvent;
use crate::events::EventBus;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(250);

/// Coalesces small output chunks into periodic log events.
///
/// A chunk is never split: `flush` swaps the whole buffer out under the lock
/// and publishes it as one event.
pub struct LogBatcher {
    buffer: Arc<Mutex<Vec<String>>>,
    bus: EventBus,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl LogBatcher {
    pub fn new(bus: EventBus) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
            bus,
            ticker: Mutex::new(None),
        }
    }

    pub fn enqueue(&self, chunk: impl Into<String>) {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return;
        }
        self.buffer.lock().push(chunk);
    }

    /// Publishes everything buffered so far as a single event.
    pub fn flush(&self) {
        flush_into(&self.buffer, &self.bus);
    }

    pub fn pending_chunks(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Starts the periodic flush. Calling it again replaces the running ticker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_ticker(&self, interval: Duration) {
        let buffer = Arc::clone(&self.buffer);
        let bus = self.bus.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                flush_into(&buffer, &bus);
            }
        });

        if let Some(previous) = self.ticker.lock().replace(handle) {
            previous.abort();
        }
    }
}

impl Drop for LogBatcher {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
        }
        flush_into(&self.buffer, &self.bus);
    }
}

fn flush_into(buffer: &Mutex<Vec<String>>, bus: &EventBus) {
    // Publish while holding the lock so concurrent flushes cannot reorder batches.
    let mut guard = buffer.lock();
    if guard.is_empty() {
        return;
    }
    let chunks = std::mem::take(&mut *guard);
    bus.publish_log(LogEvent {
        data: chunks.concat(),
    });
}
