//! SinkConfig - pub/sub sink configuration
//!
//! Describes the transport endpoint, worker pool shape, encoding options and
//! the change sources (targets) that are mapped onto topics.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use validator::Validate;

use crate::{ContractError, SourceId};

/// Complete sink configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SinkConfig {
    /// Transport endpoint, `<scheme>://<path>` (e.g. `mem://changefeed`)
    #[validate(length(min = 1))]
    pub uri: String,

    /// Publish every target to this topic instead of the target's own name
    #[serde(default)]
    pub topic_name: Option<String>,

    /// Number of concurrent senders
    #[serde(default = "default_num_workers")]
    #[validate(range(min = 1, max = 4096))]
    pub num_workers: usize,

    /// Capacity of each worker mailbox
    #[serde(default = "default_mailbox_capacity")]
    #[validate(range(min = 1))]
    pub mailbox_capacity: usize,

    /// Row encoding format produced upstream
    #[serde(default)]
    pub format: FormatType,

    /// Row envelope produced upstream
    #[serde(default)]
    pub envelope: EnvelopeType,

    /// Watched change sources
    #[validate(length(min = 1))]
    pub targets: Vec<TargetConfig>,
}

fn default_num_workers() -> usize {
    100
}

fn default_mailbox_capacity() -> usize {
    1
}

/// One watched change source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Source identifier
    pub id: SourceId,
    /// Name of the source at statement time; the default topic name
    pub name: String,
}

/// Row encoding format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatType {
    #[default]
    Json,
    Avro,
}

impl fmt::Display for FormatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Avro => write!(f, "avro"),
        }
    }
}

/// Row envelope shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    #[default]
    Wrapped,
    KeyOnly,
    Row,
    Bare,
}

impl fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wrapped => write!(f, "wrapped"),
            Self::KeyOnly => write!(f, "key_only"),
            Self::Row => write!(f, "row"),
            Self::Bare => write!(f, "bare"),
        }
    }
}

/// Supported transport schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportScheme {
    /// In-process broker
    Mem,
    /// Publishes into the structured log
    Log,
}

impl TransportScheme {
    /// Parse the scheme of a `<scheme>://<path>` uri
    pub fn from_uri(uri: &str) -> Result<Self, ContractError> {
        let (scheme, _) = uri.split_once("://").ok_or_else(|| {
            ContractError::config_validation("uri", format!("'{uri}' has no scheme"))
        })?;

        match scheme {
            "mem" => Ok(Self::Mem),
            "log" => Ok(Self::Log),
            other => Err(ContractError::config_validation(
                "uri",
                format!("unknown scheme: {other}"),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mem => "mem",
            Self::Log => "log",
        }
    }
}

impl SinkConfig {
    /// Minimal configuration for the given uri and targets
    pub fn new(uri: impl Into<String>, targets: Vec<TargetConfig>) -> Self {
        Self {
            uri: uri.into(),
            topic_name: None,
            num_workers: default_num_workers(),
            mailbox_capacity: default_mailbox_capacity(),
            format: FormatType::default(),
            envelope: EnvelopeType::default(),
            targets,
        }
    }

    /// Set the worker count
    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Set the mailbox capacity
    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    /// Transport scheme of `uri`
    pub fn scheme(&self) -> Result<TransportScheme, ContractError> {
        TransportScheme::from_uri(&self.uri)
    }

    /// Topic name for every target
    pub fn topic_names(&self) -> BTreeMap<SourceId, String> {
        self.targets
            .iter()
            .map(|target| {
                let name = self
                    .topic_name
                    .clone()
                    .unwrap_or_else(|| target.name.clone());
                (target.id, name)
            })
            .collect()
    }

    /// Field validation, target rules and encoding compatibility.
    ///
    /// # Errors
    /// Returns `ConfigValidation` for out-of-range fields, unknown schemes,
    /// duplicate target ids, empty names and encoding options the sink
    /// cannot publish.
    pub fn check(&self) -> Result<(), ContractError> {
        self.validate().map_err(|e| {
            let field = e
                .field_errors()
                .keys()
                .next()
                .map(|k| k.to_string())
                .unwrap_or_else(|| "sink".to_string());
            ContractError::config_validation(field, e.to_string())
        })?;

        self.scheme()?;
        self.check_targets()?;
        self.check_topic_override()?;

        if self.format != FormatType::Json {
            return Err(ContractError::config_validation(
                "format",
                format!("this sink is incompatible with format={}", self.format),
            ));
        }
        if self.envelope != EnvelopeType::Wrapped {
            return Err(ContractError::config_validation(
                "envelope",
                format!("this sink is incompatible with envelope={}", self.envelope),
            ));
        }
        Ok(())
    }

    /// Target ids map to topics one to one, so they must be unique
    fn check_targets(&self) -> Result<(), ContractError> {
        let mut seen = HashSet::new();
        for (idx, target) in self.targets.iter().enumerate() {
            if !seen.insert(target.id) {
                return Err(ContractError::config_validation(
                    format!("targets[id={}]", target.id),
                    "duplicate target id",
                ));
            }
            if target.name.trim().is_empty() {
                return Err(ContractError::config_validation(
                    format!("targets[{idx}].name"),
                    "target name cannot be empty",
                ));
            }
        }
        Ok(())
    }

    fn check_topic_override(&self) -> Result<(), ContractError> {
        match self.topic_name.as_deref() {
            Some(name) if name.trim().is_empty() => Err(ContractError::config_validation(
                "topic_name",
                "topic name cannot be empty",
            )),
            _ => Ok(()),
        }
    }
}
