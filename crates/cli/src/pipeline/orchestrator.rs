//! Pipeline orchestrator - drives a synthetic change feed through the sink.
//!
//! Rows are spread round-robin over the configured targets and over a fixed
//! set of keys. Every row carries a token from a [`MemoryMonitor`], so the run
//! ends with a check that each token came back exactly once.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use bytes::Bytes;
use contracts::{MemoryMonitor, ResolvedTimestamp, SinkConfig, SourceId, Transport, TransportScheme};
use pubsub_sink::{JsonEncoder, LogTransport, MemTransport, PubsubSink, SinkError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::PipelineStats;
use crate::error::CliError;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Sink configuration
    pub sink: SinkConfig,

    /// Rows to emit
    pub rows: u64,

    /// Distinct keys
    pub keys: u64,

    /// Flush every N rows (0 = only at the end)
    pub flush_every: u64,

    /// Pipeline timeout (None = no timeout)
    pub timeout: Option<Duration>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

/// Whether the feed should keep going after a step
enum Step {
    Continue,
    Stop,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Result<Self, CliError> {
        if config.keys == 0 {
            return Err(CliError::invalid_options("--keys must be at least 1"));
        }
        Ok(Self { config })
    }

    /// Run the pipeline to completion.
    ///
    /// Cancelling `shutdown` stops the feed early; the sink is closed either way.
    pub async fn run(self, shutdown: CancellationToken) -> Result<PipelineStats> {
        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        match self.config.sink.scheme()? {
            TransportScheme::Mem => {
                let transport = MemTransport::new();
                let stats = self.run_with(transport.clone(), shutdown).await?;
                info!(
                    messages = transport.total_published(),
                    topics = ?transport.opened_topics(),
                    "In-memory broker contents"
                );
                Ok(stats)
            }
            TransportScheme::Log => self.run_with(LogTransport::new(), shutdown).await,
        }
    }

    async fn run_with<T>(&self, transport: T, shutdown: CancellationToken) -> Result<PipelineStats>
    where
        T: Transport + Sync + 'static,
    {
        let start_time = Instant::now();
        let mut sink = PubsubSink::new(self.config.sink.clone(), transport)
            .map_err(|e| CliError::sink("create", e))?;
        let monitor = MemoryMonitor::new();

        let cancel = shutdown.child_token();
        let timer = self.config.timeout.map(|timeout| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!(timeout_secs = timeout.as_secs(), "Pipeline timed out");
                cancel.cancel();
            })
        });

        let mut stats = PipelineStats::default();
        let driven = self.drive(&mut sink, &monitor, &cancel, &mut stats).await;
        if let Some(timer) = timer {
            timer.abort();
        }

        info!("Shutting down pipeline...");
        let closed = sink.close().await;

        stats.duration = start_time.elapsed();
        stats.sink = sink.metrics();
        stats.tokens_acquired = monitor.acquired();
        stats.tokens_released = monitor.released();

        driven?;
        closed.map_err(|e| CliError::sink("close", e))?;

        if stats.tokens_outstanding() > 0 {
            warn!(
                outstanding = stats.tokens_outstanding(),
                "Resource tokens were not released"
            );
        }
        info!(
            duration_secs = stats.duration.as_secs_f64(),
            rows_per_sec = format!("{:.2}", stats.rows_per_sec()),
            "Pipeline shutdown complete"
        );

        Ok(stats)
    }

    async fn drive<T>(
        &self,
        sink: &mut PubsubSink<T>,
        monitor: &Arc<MemoryMonitor>,
        cancel: &CancellationToken,
        stats: &mut PipelineStats,
    ) -> Result<(), CliError>
    where
        T: Transport + Sync + 'static,
    {
        sink.dial().await.map_err(|e| CliError::sink("dial", e))?;

        let sources: Vec<SourceId> = self.config.sink.targets.iter().map(|t| t.id).collect();
        let encoder = JsonEncoder;
        let mut unflushed = 0u64;

        info!(
            rows = self.config.rows,
            keys = self.config.keys,
            flush_every = self.config.flush_every,
            "Change feed running"
        );

        for seq in 0..self.config.rows {
            if cancel.is_cancelled() {
                info!(emitted = stats.rows_emitted, "Change feed stopped early");
                return Ok(());
            }

            let source_id = sources[(seq % sources.len() as u64) as usize];
            let key = Bytes::from(format!("\"key-{}\"", seq % self.config.keys));
            let value = Bytes::from(
                serde_json::json!({ "seq": seq, "source": source_id.get() }).to_string(),
            );
            let token = monitor.acquire(value.len() as u64);

            if let Err(e) = sink.emit_row(cancel, source_id, key, value, token).await {
                let (error, token) = e.into_parts();
                token.release();
                stats.rows_rejected += 1;
                return stop_or_fail("emit", error);
            }
            stats.rows_emitted += 1;
            unflushed += 1;

            if self.config.flush_every > 0 && unflushed >= self.config.flush_every {
                unflushed = 0;
                if let Step::Stop = self.checkpoint(sink, &encoder, cancel, stats).await? {
                    return Ok(());
                }
            }
        }

        if unflushed > 0 {
            if let Step::Stop = self.checkpoint(sink, &encoder, cancel, stats).await? {
                return Ok(());
            }
        }

        // Push the last resolved timestamps out before close.
        if stats.resolved_emitted > 0 {
            if let Err(e) = sink.flush(cancel).await {
                stop_or_fail("flush", e)?;
            }
        }
        Ok(())
    }

    /// Flush, then tell every topic how far the feed has got
    async fn checkpoint<T>(
        &self,
        sink: &PubsubSink<T>,
        encoder: &JsonEncoder,
        cancel: &CancellationToken,
        stats: &mut PipelineStats,
    ) -> Result<Step, CliError>
    where
        T: Transport + Sync + 'static,
    {
        let started = Instant::now();
        if let Err(e) = sink.flush(cancel).await {
            stop_or_fail("flush", e)?;
            return Ok(Step::Stop);
        }
        stats
            .flush_latency
            .push(started.elapsed().as_secs_f64() * 1000.0);
        stats.flushes += 1;

        let resolved = ResolvedTimestamp::new(now_nanos(), 0);
        if let Err(e) = sink.emit_resolved_timestamp(cancel, encoder, resolved).await {
            stop_or_fail("emit resolved timestamp", e)?;
            return Ok(Step::Stop);
        }
        stats.resolved_emitted += 1;
        debug!(resolved = %resolved, epoch = sink.flush_epoch(), "Checkpoint emitted");

        Ok(Step::Continue)
    }
}

/// Cancellation ends the feed quietly; anything else fails the run
fn stop_or_fail(operation: &'static str, error: SinkError) -> Result<(), CliError> {
    if error.is_cancellation() {
        warn!(operation, error = %error, "Change feed interrupted");
        Ok(())
    } else {
        Err(CliError::sink(operation, error))
    }
}

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
