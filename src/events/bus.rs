//! Event bus fanning lifecycle events out to streams and observers.

use crate::types::SubscriptionId;
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::observer::TransactionObserver;
use super::types::{EventStream, EventStreamConfig, TransactionEvent};

struct StreamSink {
    config: EventStreamConfig,
    sender: Sender<TransactionEvent>,
}

/// Broadcasts [`TransactionEvent`]s.
///
/// Channel subscribers receive through a bounded buffer; one that falls
/// behind by more than its buffer size is dropped. Observers are called
/// synchronously on the emitting task.
pub struct EventBus {
    streams: RwLock<HashMap<SubscriptionId, StreamSink>>,
    observers: RwLock<Vec<Arc<dyn TransactionObserver>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, config: EventStreamConfig) -> EventStream {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size);
        self.streams.write().insert(id, StreamSink { config, sender });
        EventStream { id, receiver }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.streams.write().remove(&id).is_some()
    }

    pub fn subscription_count(&self) -> usize {
        self.streams.read().len()
    }

    pub fn add_observer(&self, observer: Arc<dyn TransactionObserver>) {
        self.observers.write().push(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Deliver `event` to every observer and matching stream.
    pub fn emit(&self, event: TransactionEvent) {
        let observers = self.observers.read().clone();
        for observer in &observers {
            observer.on_event(&event);
        }

        let mut dropped = Vec::new();
        {
            let streams = self.streams.read();
            for (id, sink) in streams.iter() {
                if !sink.config.filter.matches(&event) {
                    continue;
                }
                match sink.sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                        dropped.push(*id)
                    }
                }
            }
        }

        if !dropped.is_empty() {
            let mut streams = self.streams.write();
            for id in dropped {
                streams.remove(&id);
                tracing::warn!(subscription = %id, "dropping slow event subscriber");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
