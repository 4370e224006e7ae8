//! ErrorSignal - single-slot holder for the sink's first fatal error
//!
//! Recording is first-write-wins and the winning write cancels the whole
//! worker pool. Later errors are discarded; the slot never changes once set.

use std::sync::{Arc, OnceLock};

use contracts::ContractError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, error};

use crate::error::SinkError;

/// First fatal error plus the sink-wide cancellation it triggers
#[derive(Debug)]
pub struct ErrorSignal {
    slot: OnceLock<Arc<ContractError>>,
    cancel: CancellationToken,
}

impl ErrorSignal {
    /// Create an empty signal bound to the sink's cancellation token
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            slot: OnceLock::new(),
            cancel,
        }
    }

    /// Record `err` if no error has been recorded yet.
    ///
    /// Returns `true` when this call won the slot; only the winner cancels
    /// the pool.
    pub fn record(&self, err: ContractError) -> bool {
        match self.slot.set(Arc::new(err)) {
            Ok(()) => {
                if let Some(recorded) = self.slot.get() {
                    error!(error = %recorded, "Pubsub sink failed, stopping workers");
                    observability::record_sink_error(error_kind(recorded));
                }
                self.cancel.cancel();
                true
            }
            Err(discarded) => {
                debug!(error = %discarded, "Sink already failed, discarding error");
                false
            }
        }
    }

    /// Non-blocking read of the recorded error
    pub fn check(&self) -> Option<Arc<ContractError>> {
        self.slot.get().cloned()
    }

    /// `Err` carrying the recorded error, if any
    pub fn check_result(&self) -> Result<(), SinkError> {
        match self.check() {
            Some(err) => Err(SinkError::Transport(err)),
            None => Ok(()),
        }
    }

    /// Why the sink stopped: the recorded error if any, else `ShuttingDown`
    pub fn stop_reason(&self) -> SinkError {
        match self.check() {
            Some(err) => SinkError::Transport(err),
            None => SinkError::ShuttingDown,
        }
    }

    /// Sink-wide cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Resolves once the pool has been cancelled, by an error or by shutdown
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

fn error_kind(err: &ContractError) -> &'static str {
    match err {
        ContractError::Encode { .. } => "encode",
        e if e.is_transport() => "transport",
        _ => "other",
    }
}
