//! # Integration Tests
//!
//! End-to-end scenarios across crates.
//!
//! Covers:
//! - Config file -> sink -> in-memory broker
//! - Per-key ordering and flush completeness under load
//! - Failure propagation and token conservation

#[cfg(test)]
mod contract_tests {
    use contracts::{ResolvedTimestamp, SourceId};

    #[test]
    fn test_contracts_compile() {
        assert_eq!(SourceId::new(3).get(), 3);
        assert_eq!(ResolvedTimestamp::new(1, 2).to_string(), "1.0000000002");
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{MemoryMonitor, SinkConfig, SourceId, TargetConfig};
    use pubsub_sink::{JsonEncoder, MemTransport, PubsubSink, ResolvedTimestamp, SinkError};
    use tokio_util::sync::CancellationToken;

    const TOPICS: [(u32, &str); 2] = [(1, "orders"), (2, "users")];

    fn two_topic_config(workers: usize) -> SinkConfig {
        let targets = TOPICS
            .iter()
            .map(|&(id, name)| TargetConfig {
                id: SourceId::new(id),
                name: name.to_string(),
            })
            .collect();
        SinkConfig::new("mem://e2e", targets).with_num_workers(workers)
    }

    async fn dialed_sink(transport: &MemTransport, workers: usize) -> PubsubSink<MemTransport> {
        let mut sink = PubsubSink::new(two_topic_config(workers), transport.clone()).unwrap();
        sink.dial().await.unwrap();
        sink
    }

    fn row(seq: u64, keys: u64) -> (SourceId, Bytes, Bytes) {
        let source = SourceId::new(TOPICS[(seq % 2) as usize].0);
        let key = Bytes::from(format!("\"key-{}\"", seq % keys));
        let value = Bytes::from(format!("{{\"seq\":{seq}}}"));
        (source, key, value)
    }

    /// Assert that every key's rows arrived in increasing `seq` order
    fn assert_key_order(transport: &MemTransport, topic: &str) -> usize {
        let mut last: HashMap<String, u64> = HashMap::new();
        let mut rows = 0;
        for message in transport.messages(topic) {
            let body: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
            let Some(seq) = body["value"]["seq"].as_u64() else {
                continue;
            };
            let key = body["key"].as_str().unwrap().to_string();
            assert_eq!(body["topic"], topic);
            assert_eq!(&message.ordering_key[..], format!("\"{key}\"").as_bytes());
            if let Some(prev) = last.insert(key.clone(), seq) {
                assert!(prev < seq, "{topic}/{key}: seq {seq} arrived after {prev}");
            }
            rows += 1;
        }
        rows
    }

    /// 4 workers, 2 topics, 1000 rows over 10 keys
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_e2e_ordering_and_flush_completeness() {
        let transport = MemTransport::new();
        let monitor = MemoryMonitor::new();
        let sink = dialed_sink(&transport, 4).await;
        let cancel = CancellationToken::new();

        for seq in 0..1000 {
            let (source, key, value) = row(seq, 10);
            let token = monitor.acquire(value.len() as u64);
            sink.emit_row(&cancel, source, key, value, token)
                .await
                .unwrap();
        }
        sink.flush(&cancel).await.unwrap();

        let observed: usize = TOPICS
            .iter()
            .map(|&(_, topic)| assert_key_order(&transport, topic))
            .sum();
        assert_eq!(observed, 1000);
        assert_eq!(sink.metrics().published, 1000);
        assert_eq!(monitor.released(), 1000);

        sink.close().await.unwrap();
        assert_eq!(monitor.outstanding(), 0);
        assert_eq!(monitor.in_flight_bytes(), 0);
    }

    /// Publish of row 501 fails; everything after must report it
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_e2e_failure_on_event_501() {
        let transport = MemTransport::new().with_publish_failure_on("\"seq\":501}");
        let monitor = MemoryMonitor::new();
        let sink = dialed_sink(&transport, 4).await;
        let cancel = CancellationToken::new();

        let feed = async {
            let mut first_rejected = None;
            for seq in 0..1000u64 {
                let (source, key, value) = row(seq, 10);
                let token = monitor.acquire(value.len() as u64);
                match sink.emit_row(&cancel, source, key, value, token).await {
                    Ok(()) => assert!(first_rejected.is_none(), "row {seq} accepted after a failure"),
                    Err(e) => {
                        assert!(e.error.is_transport(), "unexpected error: {}", e.error);
                        assert!(e.error.to_string().contains("injected failure"));
                        first_rejected.get_or_insert(seq);
                    }
                }
            }
            first_rejected
        };
        let first_rejected = tokio::time::timeout(Duration::from_secs(10), feed)
            .await
            .expect("emit blocked after the failure")
            .expect("the failure never surfaced through emit");
        assert!(first_rejected > 501);

        let err = tokio::time::timeout(Duration::from_secs(5), sink.flush(&cancel))
            .await
            .expect("flush blocked after the failure")
            .unwrap_err();
        assert!(err.to_string().contains("injected failure"));
        assert!(transport.messages("orders").iter().all(|m| {
            !String::from_utf8_lossy(&m.payload).contains("\"seq\":501}")
        }));

        sink.close().await.unwrap();
        assert_eq!(monitor.outstanding(), 0);
    }

    /// Several producers share one sink
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_e2e_concurrent_producers() {
        let transport = MemTransport::new();
        let sink = Arc::new(dialed_sink(&transport, 8).await);
        let monitor = MemoryMonitor::new();
        let cancel = CancellationToken::new();

        let mut producers = Vec::new();
        for producer in 0..4u64 {
            let sink = Arc::clone(&sink);
            let monitor = Arc::clone(&monitor);
            let cancel = cancel.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..250u64 {
                    let seq = producer * 1000 + i;
                    let source = SourceId::new(1 + (producer % 2) as u32);
                    // Keys are private to a producer, so order is well defined.
                    let key = Bytes::from(format!("\"p{producer}-k{}\"", i % 5));
                    let value = Bytes::from(format!("{{\"seq\":{seq}}}"));
                    sink.emit_row(&cancel, source, key, value, monitor.acquire(1))
                        .await
                        .unwrap();
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        sink.flush(&cancel).await.unwrap();

        let observed: usize = TOPICS
            .iter()
            .map(|&(_, topic)| assert_key_order(&transport, topic))
            .sum();
        assert_eq!(observed, 1000);
        sink.close().await.unwrap();
        assert_eq!(monitor.outstanding(), 0);
    }

    /// Shutdown with rows still queued gives every token back
    #[tokio::test]
    async fn test_e2e_close_discards_queued_rows() {
        let transport = MemTransport::new().with_publish_delay(Duration::from_millis(50));
        let monitor = MemoryMonitor::new();
        let mut sink = PubsubSink::new(
            two_topic_config(2).with_mailbox_capacity(16),
            transport.clone(),
        )
        .unwrap();
        sink.dial().await.unwrap();
        let cancel = CancellationToken::new();

        for seq in 0..20 {
            let (source, key, value) = row(seq, 4);
            sink.emit_row(&cancel, source, key, value, monitor.acquire(8))
                .await
                .unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), sink.close())
            .await
            .expect("close hung")
            .unwrap();

        let metrics = sink.metrics();
        assert!(metrics.discarded > 0);
        assert!(metrics.published < 20);
        assert_eq!(monitor.outstanding(), 0);
        assert!(matches!(sink.flush(&cancel).await, Err(SinkError::ShuttingDown)));
    }

    /// Config text through to published checkpoints
    #[tokio::test]
    async fn test_e2e_config_to_resolved_timestamps() {
        let config = ConfigLoader::load_from_str(
            r#"
uri = "mem://from-config"
topic_name = "changefeed"
num_workers = 3

[[targets]]
id = 10
name = "orders"

[[targets]]
id = 11
name = "users"
"#,
            ConfigFormat::Toml,
        )
        .unwrap();

        let transport = MemTransport::new();
        let mut sink = PubsubSink::new(config, transport.clone()).unwrap();
        sink.dial().await.unwrap();
        assert_eq!(sink.topic_name(SourceId::new(11)), Some("changefeed"));
        assert_eq!(sink.num_workers(), 3);

        let cancel = CancellationToken::new();
        sink.emit_row(
            &cancel,
            SourceId::new(10),
            Bytes::from_static(b"1"),
            Bytes::from_static(br#"{"total":9}"#),
            contracts::ResourceToken::untracked(1),
        )
        .await
        .unwrap();
        sink.emit_resolved_timestamp(&cancel, &JsonEncoder, ResolvedTimestamp::new(5, 0))
            .await
            .unwrap();
        sink.flush(&cancel).await.unwrap();

        let messages = transport.messages("changefeed");
        assert_eq!(messages.len(), 3);
        assert!(messages
            .iter()
            .any(|m| &m.payload[..] == br#"{"key":1,"value":{"total":9},"topic":"changefeed"}"#));
        assert_eq!(
            messages
                .iter()
                .filter(|m| &m.payload[..] == br#"{"resolved":"5.0000000000"}"#)
                .count(),
            2
        );
        sink.close().await.unwrap();
        assert_eq!(transport.closed_topics().len(), 2);
    }
}
