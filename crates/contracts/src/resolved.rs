//! Resolved timestamps - checkpoints broadcast to every topic

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ContractError;

/// Hybrid-logical-clock checkpoint: every change at or below it has been emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResolvedTimestamp {
    /// Wall time in nanoseconds since the unix epoch
    pub wall_time: i64,
    /// Logical counter within the same wall time
    pub logical: i32,
}

impl ResolvedTimestamp {
    pub const fn new(wall_time: i64, logical: i32) -> Self {
        Self { wall_time, logical }
    }
}

impl fmt::Display for ResolvedTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:010}", self.wall_time, self.logical)
    }
}

/// Encodes checkpoint payloads for the wire.
///
/// Row values arrive already encoded; only resolved timestamps are encoded by
/// the sink itself.
pub trait Encoder: Send + Sync {
    /// Encode a resolved timestamp destined for `topic`.
    fn encode_resolved_timestamp(
        &self,
        topic: &str,
        resolved: ResolvedTimestamp,
    ) -> Result<Bytes, ContractError>;
}
