//! Delayed message bus.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur publishing or subscribing.
#[derive(Debug, Error)]
pub enum BusError {
    /// The message could not be handed to the broker.
    #[error("publish failed: {0}")]
    Publish(String),

    /// The subscription could not be registered.
    #[error("subscribe failed: {0}")]
    Subscribe(String),
}

/// A subscriber callback. Returns true to acknowledge the message; false
/// requests redelivery.
pub type MessageHandler =
    Arc<dyn Fn(Vec<u8>) -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync>;

/// Publish/subscribe with per-message delay and at-least-once delivery.
///
/// A message published with delay `d` is first offered to subscribers no
/// earlier than `d` after publish. An unacknowledged message is redelivered;
/// consumers must therefore tolerate duplicates.
#[async_trait]
pub trait DelayedMessageBus: Send + Sync {
    /// Publishes a message to a topic, to be delivered after `delay`.
    async fn publish(&self, topic: &str, body: Vec<u8>, delay: Duration) -> Result<(), BusError>;

    /// Registers a handler for a topic.
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), BusError>;
}

struct BusInner {
    subscribers: RwLock<HashMap<String, Vec<MessageHandler>>>,
    redelivery_interval: Duration,
    max_deliveries: u32,
    fail_on_publish: AtomicBool,
    published: AtomicU64,
    dropped: AtomicU64,
}

/// In-memory delayed message bus built on tokio timers.
///
/// Each published message gets its own delivery task: sleep for the delay,
/// offer the body to every subscriber, and redeliver after
/// `redelivery_interval` until every handler acknowledges or the attempt cap
/// is hit.
#[derive(Clone)]
pub struct InMemoryDelayedBus {
    inner: Arc<BusInner>,
}

impl InMemoryDelayedBus {
    /// Creates a bus with the given redelivery tuning.
    pub fn new(redelivery_interval: Duration, max_deliveries: u32) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                redelivery_interval,
                max_deliveries,
                fail_on_publish: AtomicBool::new(false),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Configures the bus to reject the next publishes, for compensation
    /// tests.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.inner.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    /// Number of messages accepted so far.
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::SeqCst)
    }

    /// Number of messages that exhausted their delivery attempts.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryDelayedBus {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), 16)
    }
}

async fn deliver(inner: Arc<BusInner>, topic: String, body: Vec<u8>, delay: Duration) {
    tokio::time::sleep(delay).await;

    for attempt in 1..=inner.max_deliveries {
        let handlers: Vec<MessageHandler> = inner
            .subscribers
            .read()
            .unwrap()
            .get(&topic)
            .cloned()
            .unwrap_or_default();

        let mut acked = !handlers.is_empty();
        for handler in &handlers {
            if !handler(body.clone()).await {
                acked = false;
            }
        }

        if acked {
            return;
        }

        tracing::debug!(topic, attempt, "message not acknowledged, redelivering");
        tokio::time::sleep(inner.redelivery_interval).await;
    }

    inner.dropped.fetch_add(1, Ordering::SeqCst);
    tracing::error!(topic, "message dropped after exhausting delivery attempts");
}

#[async_trait]
impl DelayedMessageBus for InMemoryDelayedBus {
    async fn publish(&self, topic: &str, body: Vec<u8>, delay: Duration) -> Result<(), BusError> {
        if self.inner.fail_on_publish.load(Ordering::SeqCst) {
            return Err(BusError::Publish("broker unavailable".to_string()));
        }

        self.inner.published.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(deliver(
            self.inner.clone(),
            topic.to_string(),
            body,
            delay,
        ));
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), BusError> {
        self.inner
            .subscribers
            .write()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counting_handler(count: Arc<AtomicU32>, ack: bool) -> MessageHandler {
        Arc::new(move |_body| {
            let count = count.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
                ack
            })
        })
    }

    async fn wait_for(count: &Arc<AtomicU32>, at_least: u32) {
        for _ in 0..200 {
            if count.load(Ordering::SeqCst) >= at_least {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "handler called {} times, expected at least {at_least}",
            count.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn delivers_after_delay() {
        let bus = InMemoryDelayedBus::new(Duration::from_millis(10), 4);
        let count = Arc::new(AtomicU32::new(0));
        bus.subscribe("t", counting_handler(count.clone(), true))
            .await
            .unwrap();

        bus.publish("t", b"body".to_vec(), Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0, "delivered too early");

        wait_for(&count, 1).await;
        // Acknowledged: no redelivery.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn nack_triggers_redelivery() {
        let bus = InMemoryDelayedBus::new(Duration::from_millis(10), 3);
        let count = Arc::new(AtomicU32::new(0));
        bus.subscribe("t", counting_handler(count.clone(), false))
            .await
            .unwrap();

        bus.publish("t", b"body".to_vec(), Duration::from_millis(1))
            .await
            .unwrap();

        wait_for(&count, 3).await;
        // Attempt cap respected.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(bus.dropped_count(), 1);
    }

    #[tokio::test]
    async fn publish_failure_knob() {
        let bus = InMemoryDelayedBus::default();
        bus.set_fail_on_publish(true);

        let result = bus.publish("t", vec![], Duration::ZERO).await;
        assert!(matches!(result, Err(BusError::Publish(_))));
        assert_eq!(bus.published_count(), 0);

        bus.set_fail_on_publish(false);
        bus.publish("t", vec![], Duration::ZERO).await.unwrap();
        assert_eq!(bus.published_count(), 1);
    }

    #[tokio::test]
    async fn message_without_subscriber_is_retried_until_one_appears() {
        let bus = InMemoryDelayedBus::new(Duration::from_millis(10), 20);
        bus.publish("t", b"body".to_vec(), Duration::from_millis(1))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(25)).await;
        let count = Arc::new(AtomicU32::new(0));
        bus.subscribe("t", counting_handler(count.clone(), true))
            .await
            .unwrap();

        wait_for(&count, 1).await;
    }
}
