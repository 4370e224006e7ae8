//! SourceId - logical change-source identifier

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a logical change source (one watched table).
///
/// Every source maps to exactly one topic in the sink's registry.
///
/// # Examples
/// ```
/// use contracts::SourceId;
///
/// let id = SourceId::from(52);
/// assert_eq!(id.get(), 52);
/// assert_eq!(id.to_string(), "52");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(u32);

impl SourceId {
    /// Create a new SourceId.
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw numeric value.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for SourceId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
