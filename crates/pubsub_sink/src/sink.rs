//! PubsubSink - the sink-facing entry point
//!
//! Lifecycle: constructed (mailboxes created, transport not connected) ->
//! dialed (topics opened, workers consuming) -> running -> closed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use contracts::{Encoder, ResolvedTimestamp, ResourceToken, SinkConfig, SourceId, Transport};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{EmitError, SinkError};
use crate::error_signal::ErrorSignal;
use crate::flush::FlushCoordinator;
use crate::metrics::{MetricsSnapshot, SinkMetrics};
use crate::registry::TopicRegistry;
use crate::worker::{Message, RowEvent, Worker, WorkerContext};

/// Change-feed sink publishing rows to one topic per source
pub struct PubsubSink<T: Transport> {
    transport: Arc<T>,
    registry: Arc<TopicRegistry<T::Topic>>,
    dispatcher: Dispatcher,
    flusher: FlushCoordinator,
    errors: Arc<ErrorSignal>,
    metrics: Arc<SinkMetrics>,
    /// Mailbox receivers waiting for dial
    pending: Mutex<Vec<mpsc::Receiver<Message>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    dial_attempted: bool,
    dialed: bool,
    closed: AtomicBool,
}

impl<T> PubsubSink<T>
where
    T: Transport + Sync + 'static,
{
    /// Build a sink from `config`.
    ///
    /// Creates the topic registry and every mailbox; nothing touches the
    /// transport until [`dial`](Self::dial).
    ///
    /// # Errors
    /// Returns `SinkError::Configuration` for invalid or incompatible options.
    #[instrument(
        name = "pubsub_sink_new",
        skip_all,
        fields(uri = %config.uri, workers = config.num_workers)
    )]
    pub fn new(config: SinkConfig, transport: T) -> Result<Self, SinkError> {
        config.check().map_err(SinkError::Configuration)?;

        let registry = TopicRegistry::new(config.topic_names());
        let (dispatcher, pending) = Dispatcher::new(config.num_workers, config.mailbox_capacity);

        info!(
            transport = %transport.name(),
            topics = registry.len(),
            workers = config.num_workers,
            "Pubsub sink created"
        );

        Ok(Self {
            transport: Arc::new(transport),
            registry: Arc::new(registry),
            dispatcher,
            flusher: FlushCoordinator::new(),
            errors: Arc::new(ErrorSignal::new(CancellationToken::new())),
            metrics: Arc::new(SinkMetrics::new()),
            pending: Mutex::new(pending),
            workers: Mutex::new(Vec::new()),
            dial_attempted: false,
            dialed: false,
            closed: AtomicBool::new(false),
        })
    }

    /// Open every topic and start the workers.
    ///
    /// Any error is fatal to the sink: topics opened before the failure are
    /// kept so [`close`](Self::close) can release them, and dial cannot be
    /// retried.
    #[instrument(name = "pubsub_sink_dial", skip(self))]
    pub async fn dial(&mut self) -> Result<(), SinkError> {
        if self.dial_attempted {
            return Err(SinkError::AlreadyDialed);
        }
        self.dial_attempted = true;

        let registry = Arc::get_mut(&mut self.registry).ok_or(SinkError::AlreadyDialed)?;
        registry.open_all(self.transport.as_ref()).await?;

        let ctx = WorkerContext {
            transport: Arc::clone(&self.transport),
            registry: Arc::clone(&self.registry),
            errors: Arc::clone(&self.errors),
            metrics: Arc::clone(&self.metrics),
        };
        let receivers = std::mem::take(
            self.pending
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let handles: Vec<_> = receivers
            .into_iter()
            .enumerate()
            .map(|(index, rx)| Worker::spawn(index, rx, ctx.clone()))
            .collect();
        *self.workers.lock().unwrap_or_else(PoisonError::into_inner) = handles;
        self.dialed = true;

        info!(
            topics = self.registry.len(),
            workers = self.dispatcher.num_workers(),
            "Pubsub sink dialed"
        );
        Ok(())
    }

    /// Hand one row change to the worker owning its key.
    ///
    /// On success the token belongs to the worker, which releases it after
    /// the publish attempt. On failure the token comes back in [`EmitError`].
    pub async fn emit_row(
        &self,
        cancel: &CancellationToken,
        source_id: SourceId,
        key: Bytes,
        value: Bytes,
        token: ResourceToken,
    ) -> Result<(), EmitError> {
        if let Err(e) = self.ensure_dialed() {
            return Err(EmitError::new(e, token));
        }
        if !self.registry.contains(source_id) {
            return Err(EmitError::new(SinkError::UnknownSource { source_id }, token));
        }

        let index = self.dispatcher.index_for(&key);
        match self.dispatcher.reserve(index, cancel, &self.errors).await {
            Ok(permit) => {
                permit.send(Message::Row(RowEvent {
                    source_id,
                    key,
                    value,
                    token,
                }));
                self.metrics.inc_accepted();
                observability::record_row_accepted();
                Ok(())
            }
            Err(e) => Err(EmitError::new(e, token)),
        }
    }

    /// Broadcast a checkpoint to every topic.
    ///
    /// One message per topic, routed like a row with an empty key. Stops at
    /// the first failure.
    #[instrument(name = "pubsub_sink_emit_resolved", skip_all, fields(resolved = %resolved))]
    pub async fn emit_resolved_timestamp(
        &self,
        cancel: &CancellationToken,
        encoder: &dyn Encoder,
        resolved: ResolvedTimestamp,
    ) -> Result<(), SinkError> {
        self.ensure_dialed()?;
        let index = self.dispatcher.index_for(&[]);

        for source_id in self.registry.source_ids() {
            let Some(entry) = self.registry.get(source_id) else {
                continue;
            };
            let payload = encoder
                .encode_resolved_timestamp(entry.name(), resolved)
                .map_err(SinkError::Encode)?;
            self.dispatcher
                .hand_off(index, Message::Resolved { source_id, payload }, cancel, &self.errors)
                .await?;
            self.metrics.inc_resolved_emitted();
        }
        debug!(topics = self.registry.len(), "Resolved timestamp emitted");
        Ok(())
    }

    /// Wait until every row accepted before this call has been published or
    /// has failed.
    pub async fn flush(&self, cancel: &CancellationToken) -> Result<(), SinkError> {
        self.ensure_dialed()?;
        self.flusher
            .flush(&self.dispatcher, &self.errors, &self.metrics, cancel)
            .await
    }

    /// Stop the workers and close every opened topic.
    ///
    /// Every handle gets a close call even if an earlier one fails; the first
    /// failure is returned. Calling `close` again is a no-op.
    #[instrument(name = "pubsub_sink_close", skip(self))]
    pub async fn close(&self) -> Result<(), SinkError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Pubsub sink already closed");
            return Ok(());
        }

        self.errors.token().cancel();

        // Mailboxes of a sink that never started its workers.
        drop(std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
        ));

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for (index, handle) in workers.into_iter().enumerate() {
            if let Err(e) = handle.await {
                error!(worker = index, error = ?e, "Worker task panicked");
            }
        }

        let mut failures = self.registry.close_all(self.transport.as_ref()).await;
        let snapshot = self.metrics.snapshot();
        info!(
            published = snapshot.published,
            discarded = snapshot.discarded,
            close_failures = failures.len(),
            "Pubsub sink closed"
        );

        if failures.is_empty() {
            Ok(())
        } else {
            if failures.len() > 1 {
                warn!(count = failures.len(), "Several topics failed to close");
            }
            Err(failures.swap_remove(0))
        }
    }

    /// Recorded fatal error, if any
    pub fn error(&self) -> Option<SinkError> {
        self.errors.check().map(SinkError::Transport)
    }

    /// Current metrics
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Completed flush rounds
    pub fn flush_epoch(&self) -> u64 {
        self.flusher.epoch()
    }

    pub fn num_workers(&self) -> usize {
        self.dispatcher.num_workers()
    }

    /// Topic name registered for `source_id`
    pub fn topic_name(&self, source_id: SourceId) -> Option<&str> {
        self.registry.get(source_id).map(|entry| entry.name())
    }

    pub fn is_dialed(&self) -> bool {
        self.dialed
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_dialed(&self) -> Result<(), SinkError> {
        if self.is_closed() {
            return Err(self.errors.stop_reason());
        }
        if !self.dialed {
            return Err(SinkError::NotDialed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::JsonEncoder;
    use crate::transports::MemTransport;
    use contracts::{MemoryMonitor, TargetConfig};
    use std::collections::HashMap;
    use std::time::Duration;

    fn config(workers: usize, capacity: usize) -> SinkConfig {
        SinkConfig::new(
            "mem://test",
            vec![
                TargetConfig {
                    id: SourceId::new(1),
                    name: "orders".to_string(),
                },
                TargetConfig {
                    id: SourceId::new(2),
                    name: "users".to_string(),
                },
            ],
        )
        .with_num_workers(workers)
        .with_mailbox_capacity(capacity)
    }

    async fn dialed(transport: &MemTransport, workers: usize) -> PubsubSink<MemTransport> {
        let mut sink = PubsubSink::new(config(workers, 1), transport.clone()).unwrap();
        sink.dial().await.unwrap();
        sink
    }

    fn key(i: usize) -> Bytes {
        Bytes::from(format!("\"k{i}\""))
    }

    fn value(seq: usize) -> Bytes {
        Bytes::from(format!("{{\"seq\":{seq}}}"))
    }

    /// (key, seq) pairs in publish order
    fn published_rows(transport: &MemTransport, topic: &str) -> Vec<(String, u64)> {
        transport
            .messages(topic)
            .iter()
            .map(|m| {
                let body: serde_json::Value = serde_json::from_slice(&m.payload).unwrap();
                (
                    body["key"].as_str().unwrap().to_string(),
                    body["value"]["seq"].as_u64().unwrap(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let err = PubsubSink::new(config(0, 1), MemTransport::new()).err().unwrap();
        assert!(matches!(err, SinkError::Configuration(_)));

        let mut bad_scheme = config(4, 1);
        bad_scheme.uri = "kafka://x".to_string();
        let err = PubsubSink::new(bad_scheme, MemTransport::new()).err().unwrap();
        assert!(err.to_string().contains("unknown scheme"));
    }

    #[tokio::test]
    async fn test_emit_before_dial_returns_token() {
        let monitor = MemoryMonitor::new();
        let sink = PubsubSink::new(config(4, 1), MemTransport::new()).unwrap();

        let err = sink
            .emit_row(
                &CancellationToken::new(),
                SourceId::new(1),
                key(0),
                value(0),
                monitor.acquire(10),
            )
            .await
            .unwrap_err();
        assert!(matches!(err.error, SinkError::NotDialed));
        assert_eq!(monitor.outstanding(), 1);

        let (_, token) = err.into_parts();
        token.release();
        assert_eq!(monitor.outstanding(), 0);
        sink.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_dial_opens_topics_once() {
        let transport = MemTransport::new();
        let mut sink = dialed(&transport, 4).await;

        assert!(sink.is_dialed());
        assert_eq!(
            transport.opened_topics(),
            vec!["orders".to_string(), "users".to_string()]
        );
        assert!(matches!(sink.dial().await, Err(SinkError::AlreadyDialed)));
        sink.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_emit_preserves_per_key_order() {
        let transport = MemTransport::new();
        let monitor = MemoryMonitor::new();
        let sink = dialed(&transport, 4).await;
        let cancel = CancellationToken::new();

        for seq in 0..200 {
            let source = SourceId::new(1 + (seq % 2) as u32);
            sink.emit_row(&cancel, source, key(seq % 7), value(seq), monitor.acquire(16))
                .await
                .unwrap();
        }
        sink.flush(&cancel).await.unwrap();

        for topic in ["orders", "users"] {
            let mut last: HashMap<String, u64> = HashMap::new();
            for (key, seq) in published_rows(&transport, topic) {
                if let Some(prev) = last.insert(key.clone(), seq) {
                    assert!(prev < seq, "{key}: {seq} published after {prev}");
                }
            }
        }
        assert_eq!(transport.total_published(), 200);
        assert_eq!(monitor.outstanding(), 0);
        sink.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_covers_every_accepted_row() {
        let transport = MemTransport::new().with_publish_delay(Duration::from_millis(1));
        let sink = dialed(&transport, 8).await;
        let cancel = CancellationToken::new();

        for seq in 0..50 {
            sink.emit_row(
                &cancel,
                SourceId::new(1),
                key(seq),
                value(seq),
                ResourceToken::untracked(1),
            )
            .await
            .unwrap();
        }
        sink.flush(&cancel).await.unwrap();

        assert_eq!(transport.messages("orders").len(), 50);
        assert_eq!(sink.flush_epoch(), 1);
        let snapshot = sink.metrics();
        assert_eq!(snapshot.accepted, 50);
        assert_eq!(snapshot.published, 50);
        assert_eq!(snapshot.tokens_released, 50);
        sink.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_source_returns_token() {
        let monitor = MemoryMonitor::new();
        let sink = dialed(&MemTransport::new(), 2).await;

        let err = sink
            .emit_row(
                &CancellationToken::new(),
                SourceId::new(99),
                key(0),
                value(0),
                monitor.acquire(8),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.error,
            SinkError::UnknownSource { source_id } if source_id == SourceId::new(99)
        ));
        drop(err);
        assert_eq!(monitor.outstanding(), 0);
        sink.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_failure_surfaces_through_emit_and_flush() {
        let transport = MemTransport::new().with_publish_failure_at(3);
        let monitor = MemoryMonitor::new();
        let sink = dialed(&transport, 1).await;
        let cancel = CancellationToken::new();

        let mut rejected = None;
        for seq in 0..20 {
            if let Err(e) = sink
                .emit_row(&cancel, SourceId::new(1), key(0), value(seq), monitor.acquire(4))
                .await
            {
                rejected = Some(e);
                break;
            }
        }
        let rejected = rejected.expect("emit keeps failing once the error is recorded");
        assert!(rejected.error.is_transport());
        assert!(rejected.error.to_string().contains("publish #3"));

        let err = sink.flush(&cancel).await.unwrap_err();
        assert!(err.to_string().contains("publish #3"));
        assert!(sink.error().is_some());

        drop(rejected);
        sink.close().await.unwrap();
        assert_eq!(monitor.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_first_error_wins() {
        let transport = MemTransport::new().with_publish_failure_on("bad");
        let sink = dialed(&transport, 4).await;
        let cancel = CancellationToken::new();

        for i in 0..4 {
            let _ = sink
                .emit_row(
                    &cancel,
                    SourceId::new(1),
                    key(i),
                    Bytes::from(format!("\"bad{i}\"")),
                    ResourceToken::untracked(1),
                )
                .await;
        }
        let first = sink.flush(&cancel).await.unwrap_err().to_string();
        for _ in 0..3 {
            assert_eq!(sink.flush(&cancel).await.unwrap_err().to_string(), first);
        }
        sink.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_caller_cancel_unblocks_full_mailbox() {
        let transport = MemTransport::new().with_publish_delay(Duration::from_secs(30));
        let monitor = MemoryMonitor::new();
        let mut sink = PubsubSink::new(config(1, 1), transport).unwrap();
        sink.dial().await.unwrap();
        let cancel = CancellationToken::new();

        // One row in the worker, one in the mailbox.
        for seq in 0..2 {
            sink.emit_row(&cancel, SourceId::new(1), key(0), value(seq), monitor.acquire(1))
                .await
                .unwrap();
        }

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let err = sink
            .emit_row(&cancel, SourceId::new(1), key(0), value(2), monitor.acquire(1))
            .await
            .unwrap_err();
        assert!(err.error.is_cancellation());
        assert_eq!(err.token.bytes(), 1);
        drop(err);

        sink.close().await.unwrap();
        assert_eq!(monitor.outstanding(), 0);
        assert_eq!(sink.metrics().published, 0);
    }

    #[tokio::test]
    async fn test_resolved_timestamp_reaches_every_topic() {
        let transport = MemTransport::new();
        let sink = dialed(&transport, 3).await;
        let cancel = CancellationToken::new();

        sink.emit_resolved_timestamp(&cancel, &JsonEncoder, ResolvedTimestamp::new(42, 7))
            .await
            .unwrap();
        sink.flush(&cancel).await.unwrap();

        for topic in ["orders", "users"] {
            let messages = transport.messages(topic);
            assert_eq!(messages.len(), 1);
            assert_eq!(
                &messages[0].payload[..],
                br#"{"resolved":"42.0000000007"}"#
            );
            assert!(messages[0].ordering_key.is_empty());
        }
        assert_eq!(sink.metrics().resolved_emitted, 2);
        sink.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_reports_first_failure() {
        let transport = MemTransport::new().with_close_failure("orders");
        let sink = dialed(&transport, 2).await;

        let err = sink.close().await.unwrap_err();
        assert!(matches!(err, SinkError::CloseTopic { ref topic, .. } if topic == "orders"));
        assert_eq!(
            transport.closed_topics(),
            vec!["orders".to_string(), "users".to_string()]
        );

        sink.close().await.unwrap();
        assert_eq!(transport.closed_topics().len(), 2);

        let err = sink
            .emit_row(
                &CancellationToken::new(),
                SourceId::new(1),
                key(0),
                value(0),
                ResourceToken::untracked(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err.error, SinkError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_failed_dial_closes_opened_topics() {
        let transport = MemTransport::new().with_open_failure("users");
        let mut sink = PubsubSink::new(config(2, 1), transport.clone()).unwrap();

        let err = sink.dial().await.unwrap_err();
        assert!(matches!(err, SinkError::OpenTopic { ref topic, .. } if topic == "users"));
        assert!(!sink.is_dialed());
        assert!(matches!(sink.dial().await, Err(SinkError::AlreadyDialed)));

        sink.close().await.unwrap();
        assert_eq!(transport.closed_topics(), vec!["orders".to_string()]);
    }

    /// Transport whose publish call panics
    struct PanickingTransport;

    impl Transport for PanickingTransport {
        type Topic = String;

        fn name(&self) -> &str {
            "panicking"
        }

        async fn open_topic(&self, name: &str) -> Result<String, contracts::ContractError> {
            Ok(name.to_string())
        }

        async fn publish(
            &self,
            _topic: &String,
            _payload: Bytes,
            _ordering_key: &[u8],
        ) -> Result<(), contracts::ContractError> {
            panic!("publish exploded");
        }

        async fn close_topic(&self, _topic: &String) -> Result<(), contracts::ContractError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_new_rejects_duplicate_target_ids() {
        let config = SinkConfig::new(
            "mem://test",
            vec![
                TargetConfig {
                    id: SourceId::new(1),
                    name: "orders".to_string(),
                },
                TargetConfig {
                    id: SourceId::new(1),
                    name: "users".to_string(),
                },
            ],
        );

        let err = PubsubSink::new(config, MemTransport::new()).err().unwrap();
        assert!(matches!(err, SinkError::Configuration(_)));
        assert!(err.to_string().contains("duplicate target id"));
    }

    #[tokio::test]
    async fn test_flush_observes_caller_cancel() {
        let transport = MemTransport::new().with_publish_delay(Duration::from_secs(30));
        let monitor = MemoryMonitor::new();
        let mut sink = PubsubSink::new(config(1, 1), transport).unwrap();
        sink.dial().await.unwrap();
        let cancel = CancellationToken::new();

        sink.emit_row(&cancel, SourceId::new(1), key(0), value(0), monitor.acquire(1))
            .await
            .unwrap();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let err = tokio::time::timeout(Duration::from_secs(2), sink.flush(&cancel))
            .await
            .expect("flush returns once the caller cancels")
            .unwrap_err();
        assert!(matches!(err, SinkError::Cancelled));
        assert_eq!(sink.flush_epoch(), 0);
        assert!(sink.error().is_none());

        sink.close().await.unwrap();
        assert_eq!(monitor.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_worker_panic_is_recorded() {
        let mut sink = PubsubSink::new(config(1, 1), PanickingTransport).unwrap();
        sink.dial().await.unwrap();
        let cancel = CancellationToken::new();
        let monitor = MemoryMonitor::new();

        sink.emit_row(&cancel, SourceId::new(1), key(0), value(0), monitor.acquire(1))
            .await
            .unwrap();

        let err = tokio::time::timeout(Duration::from_secs(2), sink.flush(&cancel))
            .await
            .expect("flush returns once the worker is gone")
            .unwrap_err();
        assert!(err.is_transport());
        assert!(err.to_string().contains("pubsub worker 0 stopped unexpectedly"));
        assert!(sink.error().is_some());

        sink.close().await.unwrap();
        assert_eq!(monitor.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_close_without_dial_releases_mailboxes() {
        let sink = PubsubSink::new(config(3, 1), MemTransport::new()).unwrap();
        assert_eq!(sink.pending.lock().unwrap().len(), 3);

        sink.close().await.unwrap();
        assert!(sink.pending.lock().unwrap().is_empty());
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn test_close_accounts_for_every_accepted_row() {
        let transport = MemTransport::new().with_publish_delay(Duration::from_secs(30));
        let monitor = MemoryMonitor::new();
        let mut sink = PubsubSink::new(config(1, 4), transport).unwrap();
        sink.dial().await.unwrap();
        let cancel = CancellationToken::new();

        for seq in 0..4 {
            sink.emit_row(&cancel, SourceId::new(1), key(0), value(seq), monitor.acquire(1))
                .await
                .unwrap();
        }
        sink.close().await.unwrap();

        let snapshot = sink.metrics();
        assert_eq!(snapshot.accepted, 4);
        assert_eq!(snapshot.published, 0);
        assert_eq!(snapshot.tokens_released + snapshot.discarded, 4);
        assert!(snapshot.discarded >= 3);
        assert_eq!(monitor.outstanding(), 0);
    }
}
