//! Push event bus for the UI front-end.
//!
//! `tokio::sync::broadcast` gives best-effort fan-out with no per-
//! publisher blocking: a slow subscriber falls behind and sees
//! `RecvError::Lagged` rather than stalling the detector.

use serde::Serialize;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct LabelScore {
    pub name: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Clap {
        source_id: String,
        timestamp: u64,
        score: f32,
    },
    Labels {
        source: String,
        detected: Vec<LabelScore>,
    },
    DetectionStatus {
        status: DetectionStatus,
    },
    Debug {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    Started,
    Stopped,
}

/// Handle shared by every publisher and subscriber.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Best-effort publish: never blocks, and a publish with zero
    /// subscribers is not an error.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(Event::DetectionStatus {
            status: DetectionStatus::Started,
        });
        let received = rx.recv().await.unwrap();
        assert!(matches!(
            received,
            Event::DetectionStatus {
                status: DetectionStatus::Started
            }
        ));
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(Event::Debug {
            message: "no one is listening".into(),
        });
    }

    #[tokio::test]
    async fn lagging_subscriber_gets_lagged_error_not_a_hang() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        for i in 0..(CHANNEL_CAPACITY + 10) {
            bus.publish(Event::Debug {
                message: format!("msg {i}"),
            });
        }
        let result = rx.recv().await;
        assert!(matches!(result, Err(broadcast::error::RecvError::Lagged(_))));
    }
}
