//! In-process typed pub/sub (C10).
//!
//! Per-topic `tokio::sync::broadcast` channels. Topics are namespaced
//! strings (`provider.*`, `cache.*`, `debate.*`, `task.*`, `system.*`);
//! subscribers get a receiver plus the topic name for bookkeeping. The
//! bus never panics on a subscriber closing its receiver — broadcast
//! sends simply count fewer receivers.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// One event on the bus. `topic` is the exact topic it was published on;
/// `kind` is a dotted event name (e.g. `cache.evicted`); `data` is the
/// event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    pub kind: String,
    pub data: serde_json::Value,
}

/// Backpressure policy for a topic whose subscriber can't keep up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Oldest buffered events are dropped to admit the new one (default).
    DropOldest,
    /// Publish blocks until there is room, bounded by a timeout.
    Block,
}

const DEFAULT_CAPACITY: usize = 1024;

struct Topic {
    sender: broadcast::Sender<Event>,
    policy: OverflowPolicy,
    /// Queue depth (per `broadcast::Sender::len`) a `Block`-policy
    /// publisher waits to drain below before sending. Independent of the
    /// channel's own hard capacity (`DEFAULT_CAPACITY`), which is fixed
    /// at channel creation and never shrinks.
    block_limit: usize,
}

/// Process-wide singleton event bus. Construct once at startup and share
/// via `Arc`.
#[derive(Clone)]
pub struct EventBus {
    topics: Arc<DashMap<String, Topic>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
        }
    }

    fn topic_entry(&self, topic: &str) -> broadcast::Sender<Event> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic {
                sender: broadcast::channel(DEFAULT_CAPACITY).0,
                policy: OverflowPolicy::DropOldest,
                block_limit: DEFAULT_CAPACITY,
            })
            .sender
            .clone()
    }

    /// Subscribe to `topic`. Returns a receiver; dropping it unsubscribes
    /// with no bookkeeping required on the bus side.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Event> {
        self.topic_entry(topic).subscribe()
    }

    /// Set the overflow policy for `topic`. No-op if no one has
    /// subscribed or published to it yet (the topic is created lazily on
    /// first use with `DropOldest`).
    pub fn set_policy(&self, topic: &str, policy: OverflowPolicy) {
        self.topic_entry(topic);
        if let Some(mut t) = self.topics.get_mut(topic) {
            t.policy = policy;
        }
    }

    /// Sets the queue-depth threshold a `Block`-policy publisher waits
    /// to drain below before sending. Mostly useful for tests; the
    /// default is `DEFAULT_CAPACITY`, the channel's own hard limit.
    pub fn set_block_limit(&self, topic: &str, limit: usize) {
        self.topic_entry(topic);
        if let Some(mut t) = self.topics.get_mut(topic) {
            t.block_limit = limit;
        }
    }

    /// Publish `event` on its own `topic`. Under `DropOldest` this never
    /// blocks (broadcast channels drop oldest outstanding entries when
    /// a lagging receiver falls behind); under `Block` the caller is
    /// expected to have bounded the number of publishers, since
    /// `tokio::sync::broadcast` itself never blocks on send — the "block"
    /// policy is honored by the publisher awaiting `publish_blocking`
    /// instead.
    pub fn publish(&self, event: Event) {
        let sender = self.topic_entry(&event.topic);
        // broadcast::Sender::send fails only when there are zero receivers;
        // that's a normal, non-error condition for an event bus.
        let _ = sender.send(event);
    }

    /// Publish honoring a per-publisher timeout for the `Block` policy:
    /// the publisher actually stalls while the topic's queue depth is at
    /// or above its `block_limit`, up to `timeout`, before sending
    /// regardless (best-effort, matching `DropOldest`'s own tolerance for
    /// a lagging receiver). With no active receivers the queue never
    /// grows, so this returns immediately.
    pub async fn publish_blocking(&self, event: Event, timeout: std::time::Duration) {
        let topic = event.topic.clone();
        let sender = self.topic_entry(&topic);
        let (policy, block_limit) = self
            .topics
            .get(&topic)
            .map(|t| (t.policy, t.block_limit))
            .unwrap_or((OverflowPolicy::DropOldest, DEFAULT_CAPACITY));
        match policy {
            OverflowPolicy::DropOldest => self.publish(event),
            OverflowPolicy::Block => {
                let _ = tokio::time::timeout(timeout, Self::wait_for_room(&sender, block_limit)).await;
                let _ = sender.send(event);
            }
        }
    }

    async fn wait_for_room(sender: &broadcast::Sender<Event>, block_limit: usize) {
        while sender.len() >= block_limit {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}

pub mod topics {
    pub const PROVIDER: &str = "provider";
    pub const CACHE: &str = "cache";
    pub const DEBATE: &str = "debate";
    pub const TASK: &str = "task";
    pub const SYSTEM: &str = "system";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(topics::CACHE);
        bus.publish(Event {
            topic: topics::CACHE.to_string(),
            kind: "cache.evicted".to_string(),
            data: serde_json::json!({"key": "k1"}),
        });
        let evt = rx.recv().await.unwrap();
        assert_eq!(evt.kind, "cache.evicted");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(Event {
            topic: topics::SYSTEM.to_string(),
            kind: "system.started".to_string(),
            data: serde_json::json!({}),
        });
    }

    #[tokio::test]
    async fn block_policy_stalls_the_publisher_until_the_timeout_elapses() {
        let bus = EventBus::new();
        bus.set_policy(topics::SYSTEM, OverflowPolicy::Block);
        bus.set_block_limit(topics::SYSTEM, 1);
        let _rx = bus.subscribe(topics::SYSTEM); // never drained, so the queue stays full
        bus.publish(Event {
            topic: topics::SYSTEM.to_string(),
            kind: "system.first".to_string(),
            data: serde_json::json!({}),
        });

        let started = std::time::Instant::now();
        bus.publish_blocking(
            Event {
                topic: topics::SYSTEM.to_string(),
                kind: "system.second".to_string(),
                data: serde_json::json!({}),
            },
            std::time::Duration::from_millis(50),
        )
        .await;
        assert!(started.elapsed() >= std::time::Duration::from_millis(45));
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_affect_other_subscribers() {
        let bus = EventBus::new();
        let rx1 = bus.subscribe(topics::TASK);
        let mut rx2 = bus.subscribe(topics::TASK);
        drop(rx1);
        bus.publish(Event {
            topic: topics::TASK.to_string(),
            kind: "task.created".to_string(),
            data: serde_json::json!({}),
        });
        let evt = rx2.recv().await.unwrap();
        assert_eq!(evt.kind, "task.created");
    }
}
