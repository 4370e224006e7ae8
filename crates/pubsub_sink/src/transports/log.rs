//! LogTransport - publishes messages into the structured log

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use contracts::{ContractError, Transport};
use tracing::{info, instrument};

/// Transport that logs every message instead of sending it anywhere
#[derive(Debug, Clone, Default)]
pub struct LogTransport {
    published: Arc<AtomicU64>,
}

impl LogTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages logged so far
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Transport for LogTransport {
    type Topic = String;

    fn name(&self) -> &str {
        "log"
    }

    #[instrument(name = "log_transport_open", skip(self))]
    async fn open_topic(&self, name: &str) -> Result<String, ContractError> {
        info!(topic = %name, "LogTransport topic opened");
        Ok(name.to_string())
    }

    async fn publish(
        &self,
        topic: &String,
        payload: Bytes,
        ordering_key: &[u8],
    ) -> Result<(), ContractError> {
        self.published.fetch_add(1, Ordering::Relaxed);
        info!(
            topic = %topic,
            ordering_key = %String::from_utf8_lossy(ordering_key),
            bytes = payload.len(),
            payload = %String::from_utf8_lossy(&payload),
            "Message published"
        );
        Ok(())
    }

    #[instrument(name = "log_transport_close", skip(self))]
    async fn close_topic(&self, topic: &String) -> Result<(), ContractError> {
        info!(topic = %topic, "LogTransport topic closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_transport_publish() {
        let transport = LogTransport::new();
        let topic = transport.open_topic("orders").await.unwrap();

        let result = transport
            .publish(&topic, Bytes::from_static(br#"{"k":1}"#), b"[1]")
            .await;
        assert!(result.is_ok());
        assert_eq!(transport.published(), 1);
        assert!(transport.close_topic(&topic).await.is_ok());
    }

    #[test]
    fn test_log_transport_name() {
        assert_eq!(LogTransport::new().name(), "log");
    }
}
