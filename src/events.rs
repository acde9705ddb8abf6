use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::classifier::Classification;
use crate::error::{ClassifierError, DecodeError};
use crate::sample::{CorrectedSample, DeviceRole};
use crate::segmenter::ActivitySegment;
use crate::sequence::GapStatus;

/// Everything the pipeline reports to its listeners
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Sample {
        role: DeviceRole,
        sample: CorrectedSample,
    },
    Gap {
        role: DeviceRole,
        status: GapStatus,
        seq: u16,
    },
    FrameDropped {
        role: DeviceRole,
        error: DecodeError,
    },
    Classified(Classification),
    ClassificationFailed {
        model: String,
        epoch: u64,
        error: ClassifierError,
    },
    SegmentClosed(ActivitySegment),
}

/// Fan-out of session events to any number of subscribers.
/// A full bounded subscriber misses events and the loss is counted; unbounded
/// subscribers see everything. A dropped subscriber is forgotten.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<SessionEvent>>>>,
    lost: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, capacity: usize) -> Receiver<SessionEvent> {
        self.register(channel::bounded(capacity))
    }

    /// Lossless feed for consumers that must see every sample, such as recorders
    pub fn subscribe_unbounded(&self) -> Receiver<SessionEvent> {
        self.register(channel::unbounded())
    }

    fn register(
        &self,
        (tx, rx): (Sender<SessionEvent>, Receiver<SessionEvent>),
    ) -> Receiver<SessionEvent> {
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push(tx),
            Err(_) => log::error!("event bus lock poisoned, subscriber not registered"),
        }
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Events not delivered because a subscriber was full, summed over subscribers
    pub fn lost_events(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }

    pub fn publish(&self, event: SessionEvent) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return;
        };
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                if self.lost.fetch_add(1, Ordering::Relaxed) == 0 {
                    log::warn!("event subscriber full, events are being dropped");
                }
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}
