//! FlushCoordinator - barrier protocol across every worker mailbox
//!
//! A flush hands one barrier marker to each mailbox. Mailboxes are FIFO, so a
//! worker only acknowledges its marker after every event queued ahead of it
//! has been published or has failed. No lock is shared across workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::dispatcher::Dispatcher;
use crate::error::SinkError;
use crate::error_signal::ErrorSignal;
use crate::metrics::SinkMetrics;
use crate::worker::Message;

/// Runs flush rounds and counts the completed ones
#[derive(Debug, Default)]
pub(crate) struct FlushCoordinator {
    epoch: AtomicU64,
}

impl FlushCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed flush rounds
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Flush every mailbox.
    ///
    /// Guarantees a publish attempt for every event whose hand-off completed
    /// before this call handed its marker to the same mailbox. Events
    /// enqueued after that point may or may not be covered.
    #[instrument(
        name = "flush_coordinator_flush",
        skip_all,
        fields(workers = dispatcher.num_workers())
    )]
    pub async fn flush(
        &self,
        dispatcher: &Dispatcher,
        errors: &ErrorSignal,
        metrics: &SinkMetrics,
        caller: &CancellationToken,
    ) -> Result<(), SinkError> {
        errors.check_result()?;
        let started = Instant::now();

        let mut acks = Vec::with_capacity(dispatcher.num_workers());
        for index in 0..dispatcher.num_workers() {
            let (ack_tx, ack_rx) = oneshot::channel();
            dispatcher
                .hand_off(index, Message::Barrier(ack_tx), caller, errors)
                .await?;
            acks.push(ack_rx);
        }

        for ack in acks {
            tokio::select! {
                biased;
                _ = errors.cancelled() => return Err(errors.stop_reason()),
                _ = caller.cancelled() => return Err(SinkError::Cancelled),
                observed = ack => {
                    // Worker stopped before reaching the marker.
                    if observed.is_err() {
                        return Err(errors.stop_reason());
                    }
                }
            }
        }

        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics.inc_flushes();
        observability::record_flush_latency_ms(elapsed_ms);
        debug!(epoch, elapsed_ms, "Flush complete");

        errors.check_result()
    }
}
