//! Worker - one sender of the pool, draining its own mailbox
//!
//! `Idle -> Processing -> Idle` per message, `Stopped` once the sink is
//! cancelled or the mailbox is closed.

use std::sync::Arc;

use bytes::Bytes;
use contracts::{ContractError, ResourceToken, SourceId, Transport};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::encoding::encode_row;
use crate::error_signal::ErrorSignal;
use crate::metrics::SinkMetrics;
use crate::registry::TopicRegistry;

/// Mailbox item
#[derive(Debug)]
pub(crate) enum Message {
    /// Row change owning its resource token
    Row(RowEvent),
    /// Pre-encoded checkpoint for one topic
    Resolved { source_id: SourceId, payload: Bytes },
    /// Flush marker; acknowledged, never published
    Barrier(oneshot::Sender<()>),
}

#[derive(Debug)]
pub(crate) struct RowEvent {
    pub source_id: SourceId,
    pub key: Bytes,
    pub value: Bytes,
    pub token: ResourceToken,
}

/// Shared state every worker reads
pub(crate) struct WorkerContext<T: Transport> {
    pub transport: Arc<T>,
    pub registry: Arc<TopicRegistry<T::Topic>>,
    pub errors: Arc<ErrorSignal>,
    pub metrics: Arc<SinkMetrics>,
}

impl<T: Transport> Clone for WorkerContext<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            registry: Arc::clone(&self.registry),
            errors: Arc::clone(&self.errors),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// Result of a publish attempt that did not fail
enum Published {
    Sent,
    /// Cancelled mid-call; nothing to record
    Abandoned,
}

pub(crate) struct Worker<T: Transport> {
    index: usize,
    rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
    ctx: WorkerContext<T>,
}

impl<T> Worker<T>
where
    T: Transport + Sync + 'static,
{
    /// Spawn a worker task consuming `rx`
    pub fn spawn(index: usize, rx: mpsc::Receiver<Message>, ctx: WorkerContext<T>) -> JoinHandle<()> {
        let cancel = ctx.errors.token().clone();
        let worker = Self {
            index,
            rx,
            cancel,
            ctx,
        };
        tokio::spawn(worker.run())
    }

    #[instrument(name = "pubsub_worker_loop", skip(self), fields(worker = self.index))]
    async fn run(mut self) {
        trace!("Worker started");
        let mut guard = StopGuard {
            index: self.index,
            errors: Arc::clone(&self.ctx.errors),
            armed: true,
        };

        loop {
            let message = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                message = self.rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            self.process(message).await;
        }

        self.discard_pending().await;
        guard.armed = false;
        trace!("Worker stopped");
    }

    async fn process(&self, message: Message) {
        match message {
            Message::Barrier(ack) => {
                // The flush may have given up already.
                let _ = ack.send(());
            }
            Message::Row(RowEvent {
                source_id,
                key,
                value,
                token,
            }) => {
                let result = self.publish_row(source_id, &key, &value).await;
                self.finish(result);
                token.release();
                self.ctx.metrics.inc_tokens_released();
                observability::record_tokens_released(1);
            }
            Message::Resolved { source_id, payload } => {
                let result = self.publish(source_id, payload, &[]).await;
                self.finish(result);
            }
        }
    }

    async fn publish_row(
        &self,
        source_id: SourceId,
        key: &[u8],
        value: &[u8],
    ) -> Result<Published, ContractError> {
        let topic = self.topic_name(source_id)?;
        let payload = encode_row(topic, key, value)?;
        self.publish(source_id, payload, key).await
    }

    /// Single publish call, abandoned if the sink is cancelled meanwhile
    async fn publish(
        &self,
        source_id: SourceId,
        payload: Bytes,
        ordering_key: &[u8],
    ) -> Result<Published, ContractError> {
        let entry = self
            .ctx
            .registry
            .get(source_id)
            .ok_or_else(|| ContractError::Other(format!("no topic for source {source_id}")))?;
        let handle = entry.handle().ok_or_else(|| {
            ContractError::transport_publish(entry.name(), "topic has not been opened")
        })?;

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(topic = %entry.name(), "Publish abandoned, sink cancelled");
                return Ok(Published::Abandoned);
            }
            result = self.ctx.transport.publish(handle, payload, ordering_key) => result,
        };
        observability::record_publish(entry.name(), result.is_ok());
        result.map(|()| Published::Sent)
    }

    fn topic_name(&self, source_id: SourceId) -> Result<&str, ContractError> {
        self.ctx
            .registry
            .get(source_id)
            .map(|entry| entry.name())
            .ok_or_else(|| ContractError::Other(format!("no topic for source {source_id}")))
    }

    fn finish(&self, result: Result<Published, ContractError>) {
        match result {
            Ok(Published::Sent) => self.ctx.metrics.inc_published(),
            Ok(Published::Abandoned) => {}
            Err(e) => {
                self.ctx.metrics.inc_publish_failures();
                self.ctx.errors.record(e);
            }
        }
    }

    /// Close the mailbox and release tokens of rows that will never be sent.
    ///
    /// `recv` keeps yielding until every permit reserved before the close has
    /// been used or dropped, so late hand-offs are counted too.
    async fn discard_pending(&mut self) {
        self.rx.close();

        let mut discarded = 0u64;
        while let Some(message) = self.rx.recv().await {
            if let Message::Row(event) = message {
                event.token.release();
                discarded += 1;
            }
        }

        if discarded > 0 {
            self.ctx.metrics.add_discarded(discarded);
            debug!(worker = self.index, discarded, "Discarded queued rows on shutdown");
        }
    }
}

/// Records a fatal error if the worker task ends without finishing its loop,
/// e.g. when a transport call panics. Tokio drops the task's future after
/// catching the panic, which is when this runs.
struct StopGuard {
    index: usize,
    errors: Arc<ErrorSignal>,
    armed: bool,
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        if self.armed {
            self.errors.record(ContractError::Other(format!(
                "pubsub worker {} stopped unexpectedly",
                self.index
            )));
        }
    }
}
