//! Config validation
//!
//! Rules, all enforced by `SinkConfig::check`:
//! - field ranges and encoding compatibility
//! - target ids unique
//! - target names non-empty
//! - explicit topic name non-empty

use contracts::{ContractError, SinkConfig};

/// Validate a SinkConfig
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(config: &SinkConfig) -> Result<(), ContractError> {
    config.check()
}
