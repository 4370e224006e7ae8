//! Sink metrics
//!
//! Global counters and histograms recorded through the `metrics` facade, plus
//! an online statistics accumulator for end-of-run summaries.

use metrics::{counter, histogram};

/// Record a row accepted into a worker mailbox
pub fn record_row_accepted() {
    counter!("cdc_pubsub_rows_accepted_total").increment(1);
}

/// Record a publish attempt against a topic
pub fn record_publish(topic: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "cdc_pubsub_publish_total",
        "topic" => topic.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record the duration of a completed flush
pub fn record_flush_latency_ms(latency_ms: f64) {
    histogram!("cdc_pubsub_flush_latency_ms").record(latency_ms);
}

/// Record released resource tokens
pub fn record_tokens_released(count: u64) {
    counter!("cdc_pubsub_tokens_released_total").increment(count);
}

/// Record the first fatal error of a sink
pub fn record_sink_error(kind: &'static str) {
    counter!("cdc_pubsub_errors_total", "kind" => kind).increment(1);
}

/// Statistics summary
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online statistics (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// Add a sample
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
            return;
        }

        self.min = self.min.min(value);
        self.max = self.max.max(value);

        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Summary view
    pub fn summary(&self) -> StatsSummary {
        StatsSummary::from(self)
    }
}
