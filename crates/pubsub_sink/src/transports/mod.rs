//! Transport implementations
//!
//! Contains MemTransport and LogTransport.

mod log;
mod mem;

pub use self::log::LogTransport;
pub use self::mem::{MemTopic, MemTransport, PublishedMessage};
