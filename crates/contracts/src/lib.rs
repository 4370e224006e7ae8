//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the change-feed pub/sub sink.
//! Business crates depend only on this crate, reverse dependencies are prohibited.
//!
//! ## Ownership model
//! - A [`ResourceToken`] is owned either by the caller of the sink or by exactly one
//!   worker, never both; handing an event to the sink moves the token.
//! - A [`Transport`] is the external publish/subscribe client, consumed only through
//!   its topic-open / publish / topic-close boundary.

mod config;
mod error;
mod resolved;
mod sink;
mod source_id;
mod token;

pub use config::*;
pub use error::*;
pub use resolved::{Encoder, ResolvedTimestamp};
pub use sink::*;
pub use source_id::SourceId;
pub use token::{MemoryMonitor, ResourceToken};
