//! # Pubsub Sink
//!
//! Change-feed sink publishing row changes to pub/sub topics.
//!
//! Responsibilities:
//! - One topic per watched source, opened at dial and closed once
//! - A fixed pool of workers; every key maps to one worker, so updates to a
//!   key are published in the order they were emitted
//! - Flush barriers that wait for everything accepted before the flush
//! - A single fatal error, recorded once and reported to every caller

mod dispatcher;
mod encoding;
mod error;
mod error_signal;
mod flush;
mod metrics;
mod registry;
mod sink;
pub mod transports;
mod worker;

pub use contracts::{
    ContractError, Encoder, MemoryMonitor, ResolvedTimestamp, ResourceToken, SinkConfig, SourceId,
    Transport,
};
pub use dispatcher::worker_index;
pub use encoding::{JsonEncoder, encode_row};
pub use error::{EmitError, SinkError};
pub use error_signal::ErrorSignal;
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use registry::{TopicEntry, TopicRegistry};
pub use sink::PubsubSink;
pub use transports::{LogTransport, MemTopic, MemTransport, PublishedMessage};
