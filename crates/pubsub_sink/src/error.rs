//! Sink error types
//!
//! Three families: transport failures (recorded once, fatal to the sink),
//! cancellation observed by a blocked caller, and configuration errors that
//! never reach the runtime path.

use std::sync::Arc;

use contracts::{ContractError, ResourceToken, SourceId};
use thiserror::Error;

/// Pub/sub sink errors
#[derive(Debug, Error)]
pub enum SinkError {
    /// First fatal transport or encoding failure, shared by every caller
    #[error("pubsub sink failed: {0}")]
    Transport(Arc<ContractError>),

    /// Caller-supplied cancellation fired while blocked
    #[error("operation cancelled")]
    Cancelled,

    /// The sink was closed while the caller was blocked
    #[error("pubsub sink is shutting down")]
    ShuttingDown,

    /// Invalid configuration
    #[error("invalid sink configuration: {0}")]
    Configuration(#[source] ContractError),

    /// Operation requires a dialed sink
    #[error("pubsub sink has not been dialed")]
    NotDialed,

    /// Dial may only be attempted once
    #[error("pubsub sink already dialed")]
    AlreadyDialed,

    /// Row for a source without a topic
    #[error("no topic registered for source {source_id}")]
    UnknownSource { source_id: SourceId },

    /// Topic could not be opened during dial
    #[error("opening topic '{topic}': {source}")]
    OpenTopic {
        topic: String,
        #[source]
        source: ContractError,
    },

    /// Topic could not be closed during shutdown
    #[error("closing pubsub topic '{topic}': {source}")]
    CloseTopic {
        topic: String,
        #[source]
        source: ContractError,
    },

    /// Resolved timestamp could not be encoded
    #[error("encoding resolved timestamp: {0}")]
    Encode(#[source] ContractError),
}

impl SinkError {
    /// Whether the error is the sink's recorded fatal failure
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether the error only reports cancellation or shutdown
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::ShuttingDown)
    }
}

/// A row the sink did not accept.
///
/// The resource token was never handed to a worker and is returned to the
/// caller, who may retry with it or drop it.
#[derive(Debug, Error)]
#[error("row not accepted: {error}")]
pub struct EmitError {
    #[source]
    pub error: SinkError,
    pub token: ResourceToken,
}

impl EmitError {
    pub(crate) fn new(error: SinkError, token: ResourceToken) -> Self {
        Self { error, token }
    }

    /// Split into the error and the returned token
    pub fn into_parts(self) -> (SinkError, ResourceToken) {
        (self.error, self.token)
    }
}
