//! MemTransport - in-process broker
//!
//! Records every published message per topic. Failures can be injected for
//! opening, publishing and closing, which is what the sink's tests and the
//! CLI's dry runs rely on.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use contracts::{ContractError, Transport};
use tracing::{debug, instrument};

/// One message as seen by a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Bytes,
    pub ordering_key: Bytes,
}

/// Opened topic handle
#[derive(Debug)]
pub struct MemTopic {
    name: String,
    closed: AtomicBool,
}

impl MemTopic {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Default)]
struct Broker {
    messages: Mutex<HashMap<String, Vec<PublishedMessage>>>,
    publish_attempts: AtomicU64,
    opened: Mutex<Vec<String>>,
    closed: Mutex<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
struct Faults {
    /// 1-based publish attempt that fails
    publish_at: Option<u64>,
    /// Fail every publish whose payload contains these bytes
    payload_containing: Option<Vec<u8>>,
    open: HashSet<String>,
    close: HashSet<String>,
    publish_delay: Option<Duration>,
}

/// In-memory publish/subscribe transport.
///
/// Clones share the same broker, so a test keeps one clone to inspect what the
/// sink published through the other.
#[derive(Debug, Clone, Default)]
pub struct MemTransport {
    broker: Arc<Broker>,
    faults: Faults,
}

impl MemTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `attempt`-th publish call (1-based, across all topics)
    pub fn with_publish_failure_at(mut self, attempt: u64) -> Self {
        self.faults.publish_at = Some(attempt);
        self
    }

    /// Fail every publish whose payload contains `needle`
    pub fn with_publish_failure_on(mut self, needle: impl Into<Vec<u8>>) -> Self {
        self.faults.payload_containing = Some(needle.into());
        self
    }

    /// Fail opening the topic called `topic`
    pub fn with_open_failure(mut self, topic: impl Into<String>) -> Self {
        self.faults.open.insert(topic.into());
        self
    }

    /// Fail closing the topic called `topic`
    pub fn with_close_failure(mut self, topic: impl Into<String>) -> Self {
        self.faults.close.insert(topic.into());
        self
    }

    /// Sleep this long inside every publish call
    pub fn with_publish_delay(mut self, delay: Duration) -> Self {
        self.faults.publish_delay = Some(delay);
        self
    }

    /// Messages published to `topic`, in arrival order
    pub fn messages(&self, topic: &str) -> Vec<PublishedMessage> {
        lock(&self.broker.messages)
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Messages published across every topic
    pub fn total_published(&self) -> usize {
        lock(&self.broker.messages).values().map(Vec::len).sum()
    }

    /// Publish calls made, successful or not
    pub fn publish_attempts(&self) -> u64 {
        self.broker.publish_attempts.load(Ordering::SeqCst)
    }

    /// Topics opened, in order
    pub fn opened_topics(&self) -> Vec<String> {
        lock(&self.broker.opened).clone()
    }

    /// Topics closed (or attempted), in order
    pub fn closed_topics(&self) -> Vec<String> {
        lock(&self.broker.closed).clone()
    }

    fn injected_publish_failure(&self, attempt: u64, payload: &[u8]) -> bool {
        if self.faults.publish_at == Some(attempt) {
            return true;
        }
        match self.faults.payload_containing.as_deref() {
            Some(needle) if !needle.is_empty() => {
                payload.windows(needle.len()).any(|window| window == needle)
            }
            _ => false,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Transport for MemTransport {
    type Topic = MemTopic;

    fn name(&self) -> &str {
        "mem"
    }

    #[instrument(name = "mem_transport_open", skip(self))]
    async fn open_topic(&self, name: &str) -> Result<MemTopic, ContractError> {
        if self.faults.open.contains(name) {
            return Err(ContractError::transport_open(name, "injected open failure"));
        }
        lock(&self.broker.opened).push(name.to_string());
        Ok(MemTopic {
            name: name.to_string(),
            closed: AtomicBool::new(false),
        })
    }

    async fn publish(
        &self,
        topic: &MemTopic,
        payload: Bytes,
        ordering_key: &[u8],
    ) -> Result<(), ContractError> {
        let attempt = self.broker.publish_attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(delay) = self.faults.publish_delay {
            tokio::time::sleep(delay).await;
        }
        if topic.closed.load(Ordering::Acquire) {
            return Err(ContractError::transport_publish(&topic.name, "topic is closed"));
        }
        if self.injected_publish_failure(attempt, &payload) {
            return Err(ContractError::transport_publish(
                &topic.name,
                format!("injected failure on publish #{attempt}"),
            ));
        }

        let message = PublishedMessage {
            topic: topic.name.clone(),
            payload,
            ordering_key: Bytes::copy_from_slice(ordering_key),
        };
        lock(&self.broker.messages)
            .entry(topic.name.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    #[instrument(name = "mem_transport_close", skip(self, topic), fields(topic = %topic.name))]
    async fn close_topic(&self, topic: &MemTopic) -> Result<(), ContractError> {
        lock(&self.broker.closed).push(topic.name.clone());
        if self.faults.close.contains(&topic.name) {
            return Err(ContractError::transport_close(&topic.name, "injected close failure"));
        }
        topic.closed.store(true, Ordering::Release);
        debug!(topic = %topic.name, "MemTransport topic closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_records_messages() {
        let transport = MemTransport::new();
        let topic = transport.open_topic("orders").await.unwrap();

        transport
            .publish(&topic, Bytes::from_static(b"one"), b"k")
            .await
            .unwrap();
        transport
            .publish(&topic, Bytes::from_static(b"two"), b"k")
            .await
            .unwrap();

        let messages = transport.messages("orders");
        assert_eq!(messages.len(), 2);
        assert_eq!(&messages[0].payload[..], b"one");
        assert_eq!(&messages[1].ordering_key[..], b"k");
        assert_eq!(transport.opened_topics(), vec!["orders".to_string()]);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let transport = MemTransport::new()
            .with_publish_failure_at(2)
            .with_publish_failure_on("poison");
        let topic = transport.open_topic("orders").await.unwrap();

        assert!(transport.publish(&topic, Bytes::from_static(b"a"), b"").await.is_ok());
        assert!(transport.publish(&topic, Bytes::from_static(b"b"), b"").await.is_err());
        assert!(transport
            .publish(&topic, Bytes::from_static(b"some poison here"), b"")
            .await
            .is_err());
        assert_eq!(transport.publish_attempts(), 3);
        assert_eq!(transport.total_published(), 1);
    }

    #[tokio::test]
    async fn test_publish_after_close_fails() {
        let transport = MemTransport::new();
        let topic = transport.open_topic("orders").await.unwrap();
        transport.close_topic(&topic).await.unwrap();

        let err = transport
            .publish(&topic, Bytes::from_static(b"late"), b"")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("topic is closed"));
    }

    #[tokio::test]
    async fn test_open_and_close_failures() {
        let transport = MemTransport::new()
            .with_open_failure("broken")
            .with_close_failure("sticky");

        assert!(transport.open_topic("broken").await.is_err());
        let sticky = transport.open_topic("sticky").await.unwrap();
        assert!(transport.close_topic(&sticky).await.is_err());
        assert_eq!(transport.closed_topics(), vec!["sticky".to_string()]);
    }
}
