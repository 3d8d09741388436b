//! Message bus seam.
//!
//! Publishing is split in two steps: `publish` hands the message to the broker and
//! returns an [`AckFuture`] that later resolves to the broker's acknowledgment id.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Mutex;

use crate::error::{RelayError, Result};

/// Resolves to the acknowledgment id of one published message.
pub type AckFuture = BoxFuture<'static, Result<String>>;

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Create the topic, or reuse it when it already exists.
    async fn ensure_topic(&self, topic: &str) -> Result<()>;

    /// `message_id` lets the broker drop repeated publications of the same log.
    async fn publish(&self, topic: &str, message_id: &str, payload: Vec<u8>) -> Result<AckFuture>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub message_id: String,
    pub payload: Vec<u8>,
}

/// In-process bus for tests: keeps every message and answers with `<topic>:<sequence>`
/// ack ids.
#[derive(Default)]
pub struct MemoryBus {
    topics: Mutex<BTreeSet<String>>,
    messages: Mutex<Vec<PublishedMessage>>,
    sequence: AtomicU64,
    fail_topics: AtomicBool,
    fail_publish: AtomicBool,
    fail_ack: AtomicBool,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_topics(&self, fail: bool) {
        self.fail_topics.store(fail, Ordering::SeqCst);
    }

    pub fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Publications still go through but their acknowledgment never arrives.
    pub fn fail_ack(&self, fail: bool) {
        self.fail_ack.store(fail, Ordering::SeqCst);
    }

    pub async fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().await.clone()
    }

    pub async fn has_topic(&self, topic: &str) -> bool {
        self.topics.lock().await.contains(topic)
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn ensure_topic(&self, topic: &str) -> Result<()> {
        if self.fail_topics.load(Ordering::SeqCst) {
            return Err(RelayError::Bus(format!("cannot create topic '{}'", topic)));
        }
        self.topics.lock().await.insert(topic.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, message_id: &str, payload: Vec<u8>) -> Result<AckFuture> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(RelayError::Bus(format!("publish to '{}' rejected", topic)));
        }
        if !self.has_topic(topic).await {
            return Err(RelayError::Bus(format!("no such topic '{}'", topic)));
        }

        self.messages.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            message_id: message_id.to_string(),
            payload,
        });
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        let ack = if self.fail_ack.load(Ordering::SeqCst) {
            Err(RelayError::Bus(format!("no acknowledgment for message {}", message_id)))
        } else {
            Ok(format!("{}:{}", topic, sequence))
        };
        Ok(async move { ack }.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_resolves_to_sequenced_ack() {
        let bus = MemoryBus::new();
        bus.ensure_topic("crowdsale-events").await.unwrap();

        let first = bus.publish("crowdsale-events", "a", b"{}".to_vec()).await.unwrap();
        let second = bus.publish("crowdsale-events", "b", b"{}".to_vec()).await.unwrap();

        assert_eq!(first.await.unwrap(), "crowdsale-events:1");
        assert_eq!(second.await.unwrap(), "crowdsale-events:2");
        assert_eq!(bus.messages().await.len(), 2);
    }

    #[tokio::test]
    async fn publish_to_unknown_topic_fails() {
        let bus = MemoryBus::new();
        assert!(matches!(
            bus.publish("nowhere", "a", Vec::new()).await,
            Err(RelayError::Bus(_))
        ));
    }

    #[tokio::test]
    async fn injected_ack_failure_keeps_message() {
        let bus = MemoryBus::new();
        bus.ensure_topic("t").await.unwrap();
        bus.fail_ack(true);

        let ack = bus.publish("t", "a", b"{}".to_vec()).await.unwrap();
        assert!(ack.await.is_err());
        assert_eq!(bus.messages().await.len(), 1);
    }
}
