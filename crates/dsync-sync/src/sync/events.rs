//! Event fan-out for shells.
//!
//! Every message goes to the `log` facade first and is then broadcast to
//! whichever shells are subscribed. Sending with no subscribers is not an
//! error; lagging subscribers lose the oldest events.

use crate::sync::types::*;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    pub fn info(&self, text: impl Into<String>) {
        let text = text.into();
        info!("{}", text);
        self.message(EventLevel::Info, text);
    }

    pub fn warn(&self, text: impl Into<String>) {
        let text = text.into();
        warn!("{}", text);
        self.message(EventLevel::Warning, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        let text = text.into();
        error!("{}", text);
        self.message(EventLevel::Error, text);
    }

    fn message(&self, level: EventLevel, text: String) {
        self.publish(SyncEvent::Message { level, text });
    }

    /// Sink handed to executors; each line is logged at debug level and broadcast.
    pub fn output_sink(&self) -> crate::sync::executor::OutputSink {
        let tx = self.tx.clone();
        Arc::new(move |line: OutputLine| {
            debug!("[{:?}] {}", line.stream, line.line);
            let _ = tx.send(SyncEvent::Output { line });
        })
    }
}
