//! TopicRegistry - maps change sources onto opened topic handles
//!
//! Built from the configuration at sink construction, filled in once during
//! dial, read-only afterwards.

use std::collections::BTreeMap;

use contracts::{SourceId, Transport};
use tracing::{debug, instrument, warn};

use crate::error::SinkError;

/// One registered topic
#[derive(Debug)]
pub struct TopicEntry<H> {
    name: String,
    handle: Option<H>,
}

impl<H> TopicEntry<H> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opened handle, `None` until dialed
    pub fn handle(&self) -> Option<&H> {
        self.handle.as_ref()
    }
}

/// Registry of topics keyed by source
#[derive(Debug)]
pub struct TopicRegistry<H> {
    topics: BTreeMap<SourceId, TopicEntry<H>>,
}

impl<H> TopicRegistry<H> {
    /// Create an undialed registry from resolved topic names
    pub fn new(names: BTreeMap<SourceId, String>) -> Self {
        let topics = names
            .into_iter()
            .map(|(id, name)| (id, TopicEntry { name, handle: None }))
            .collect();
        Self { topics }
    }

    pub fn get(&self, source_id: SourceId) -> Option<&TopicEntry<H>> {
        self.topics.get(&source_id)
    }

    pub fn contains(&self, source_id: SourceId) -> bool {
        self.topics.contains_key(&source_id)
    }

    /// Registered sources in ascending order
    pub fn source_ids(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.topics.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Number of topics with an opened handle
    pub fn opened(&self) -> usize {
        self.topics.values().filter(|t| t.handle.is_some()).count()
    }

    /// Open every topic through `transport`.
    ///
    /// Stops at the first failure. Handles opened before it stay in the
    /// registry so shutdown can close them.
    #[instrument(
        name = "topic_registry_open_all",
        skip(self, transport),
        fields(transport = %transport.name(), topics = self.topics.len())
    )]
    pub async fn open_all<T>(&mut self, transport: &T) -> Result<(), SinkError>
    where
        T: Transport<Topic = H>,
    {
        for (source_id, entry) in &mut self.topics {
            if entry.handle.is_some() {
                continue;
            }
            let handle = transport
                .open_topic(&entry.name)
                .await
                .map_err(|source| SinkError::OpenTopic {
                    topic: entry.name.clone(),
                    source,
                })?;
            debug!(source_id = %source_id, topic = %entry.name, "Topic opened");
            entry.handle = Some(handle);
        }
        Ok(())
    }

    /// Close every opened handle.
    ///
    /// A failing close does not stop the remaining ones; every failure is
    /// returned in registry order.
    #[instrument(
        name = "topic_registry_close_all",
        skip(self, transport),
        fields(transport = %transport.name())
    )]
    pub async fn close_all<T>(&self, transport: &T) -> Vec<SinkError>
    where
        T: Transport<Topic = H>,
    {
        let mut failures = Vec::new();
        for entry in self.topics.values() {
            let Some(handle) = entry.handle.as_ref() else {
                continue;
            };
            match transport.close_topic(handle).await {
                Ok(()) => debug!(topic = %entry.name, "Topic closed"),
                Err(source) => {
                    warn!(topic = %entry.name, error = %source, "Topic close failed");
                    failures.push(SinkError::CloseTopic {
                        topic: entry.name.clone(),
                        source,
                    });
                }
            }
        }
        failures
    }
}
