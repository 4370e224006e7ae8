//! Transport trait - the external publish/subscribe client boundary
//!
//! Defines the abstract interface the sink publishes through.

use bytes::Bytes;

use crate::ContractError;

/// Publish/subscribe transport client.
///
/// `publish` must be callable concurrently from many workers, both on
/// different topic handles and on the same one.
#[trait_variant::make(Transport: Send)]
pub trait LocalTransport {
    /// Opened topic handle; owned by the sink's topic registry
    type Topic: Send + Sync + 'static;

    /// Transport name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Open the topic called `name`.
    ///
    /// # Errors
    /// Returns `ContractError::TransportOpen` when the topic cannot be opened.
    async fn open_topic(&self, name: &str) -> Result<Self::Topic, ContractError>;

    /// Publish one message with the given ordering key.
    async fn publish(
        &self,
        topic: &Self::Topic,
        payload: Bytes,
        ordering_key: &[u8],
    ) -> Result<(), ContractError>;

    /// Close a topic handle, called once per handle during shutdown
    async fn close_topic(&self, topic: &Self::Topic) -> Result<(), ContractError>;
}
