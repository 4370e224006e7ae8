//! Pipeline statistics.

use std::time::Duration;

use observability::RunningStats;
use pubsub_sink::MetricsSnapshot;

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Rows the sink accepted
    pub rows_emitted: u64,

    /// Rows handed back by the sink
    pub rows_rejected: u64,

    /// Completed flushes
    pub flushes: u64,

    /// Resolved timestamps broadcast after a flush
    pub resolved_emitted: u64,

    /// Tokens handed out by the memory monitor
    pub tokens_acquired: u64,

    /// Tokens given back, by the sink or by the driver
    pub tokens_released: u64,

    /// Total duration of the pipeline run
    pub duration: Duration,

    /// Sink counters at close
    pub sink: MetricsSnapshot,

    /// Flush latency in milliseconds
    pub flush_latency: RunningStats,
}

impl PipelineStats {
    /// Accepted rows per second
    pub fn rows_per_sec(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.rows_emitted as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Tokens still held by someone
    pub fn tokens_outstanding(&self) -> u64 {
        self.tokens_acquired.saturating_sub(self.tokens_released)
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Pipeline Statistics ===\n");

        println!("Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Rows emitted: {}", self.rows_emitted);
        println!("   ├─ Rows rejected: {}", self.rows_rejected);
        println!("   ├─ Rows/s: {:.2}", self.rows_per_sec());
        println!("   ├─ Flushes: {}", self.flushes);
        println!("   └─ Resolved timestamps: {}", self.resolved_emitted);

        println!("\nSink");
        println!("   ├─ Published: {}", self.sink.published);
        println!("   ├─ Publish failures: {}", self.sink.publish_failures);
        println!("   ├─ Discarded on shutdown: {}", self.sink.discarded);
        println!("   └─ Flush latency (ms): {}", self.flush_latency.summary());

        println!("\nResource tokens");
        println!("   ├─ Acquired: {}", self.tokens_acquired);
        println!("   ├─ Released: {}", self.tokens_released);
        println!("   └─ Outstanding: {}", self.tokens_outstanding());

        println!();
    }
}
