//! Event Bus (C8, spec §4.8): in-process fan-out of state changes to
//! subscribers, for push notifications to external collaborators.

use crate::models::{MetricsSnapshot, RecordingJob};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Subscription class a caller registers for (§4.8, §6 push channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Metrics,
    Recordings,
    Scaling,
}

/// A scaling advisory, published alongside each metrics snapshot when the
/// Metrics Aggregator's `recommendations()` yields one (§4.7).
#[derive(Debug, Clone)]
pub struct ScalingAdvisory {
    pub region: Option<String>,
    pub direction: ScalingDirection,
    pub priority: ScalingPriority,
    pub delta: i32,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalingDirection {
    ScaleUp,
    ScaleDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// Events published on the bus. Variants are grouped by the `EventClass`
/// they are delivered to.
#[derive(Debug, Clone)]
pub enum Event {
    /// A job was created, transitioned, or removed. Delivered to `Recordings`.
    JobUpdated(Box<RecordingJob>),
    /// A fresh fleet snapshot. Delivered to `Metrics`.
    MetricsPublished(Box<MetricsSnapshot>),
    /// A scaling advisory. Delivered to `Scaling`.
    ScalingAdvisory(Box<ScalingAdvisory>),
}

impl Event {
    fn class(&self) -> EventClass {
        match self {
            Event::JobUpdated(_) => EventClass::Recordings,
            Event::MetricsPublished(_) => EventClass::Metrics,
            Event::ScalingAdvisory(_) => EventClass::Scaling,
        }
    }
}

struct Subscription {
    class: EventClass,
    sender: mpsc::Sender<Event>,
}

/// Bounded channel capacity per subscriber; delivery is best-effort and
/// drops rather than blocks a state transition (§4.8, §5 suspension points).
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;

/// In-process fan-out bus. Cheaply cloneable; all clones share the same
/// subscriber list.
#[derive(Clone)]
pub struct EventBus {
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register a subscriber for a class of events, returning the receiving
    /// half of its channel.
    pub async fn subscribe(&self, class: EventClass) -> mpsc::Receiver<Event> {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        self.subscriptions
            .write()
            .await
            .push(Subscription { class, sender });
        receiver
    }

    /// Publish an event to every subscriber whose class matches. Never
    /// blocks: a full channel is dropped, a closed one is removed (§4.8).
    pub async fn publish(&self, event: Event) {
        let class = event.class();
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.retain(|sub| {
            if sub.class != class {
                return true;
            }
            match sub.sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(target: "orchestrator.events", "subscriber channel full, dropping event");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }
}
