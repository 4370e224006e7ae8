//! Error types for CLI operations.

use pubsub_sink::SinkError;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// The sink rejected an operation
    #[error("Sink {operation} failed: {source}")]
    Sink {
        operation: &'static str,
        #[source]
        source: SinkError,
    },

    /// Run options that cannot drive the sink
    #[error("Invalid run options: {message}")]
    InvalidOptions { message: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn sink(operation: &'static str, source: SinkError) -> Self {
        Self::Sink { operation, source }
    }

    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::InvalidOptions {
            message: message.into(),
        }
    }
}
