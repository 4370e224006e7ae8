//! Layered error definitions
//!
//! Categorized by source: config / transport / encode

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Transport Errors =====
    /// Topic could not be opened
    #[error("opening topic '{topic}': {message}")]
    TransportOpen { topic: String, message: String },

    /// Publish call failed
    #[error("publishing to topic '{topic}': {message}")]
    TransportPublish { topic: String, message: String },

    /// Topic could not be closed
    #[error("closing topic '{topic}': {message}")]
    TransportClose { topic: String, message: String },

    // ===== Encoding Errors =====
    /// Payload could not be encoded
    #[error("encode error: {message}")]
    Encode { message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create topic open error
    pub fn transport_open(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransportOpen {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Create publish error
    pub fn transport_publish(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransportPublish {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Create topic close error
    pub fn transport_close(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransportClose {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Create encode error
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Whether the error came from the transport collaborator
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::TransportOpen { .. } | Self::TransportPublish { .. } | Self::TransportClose { .. }
        )
    }
}
