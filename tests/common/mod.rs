//! In-memory cluster and partition streams for consumer tests.

use async_trait::async_trait;
use fluxmq_client::{
    ClientError, Cluster, ClusterState, Offset, PartitionId, PartitionMeta, PartitionStream,
    PartitionSubscription, ReceivedMessage, ResolvedOffsets, Result, SerialExecutor,
    StartLocation,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Scripted broker cluster: each partition delivers a fixed message sequence.
pub struct MockCluster {
    topic: String,
    executor: SerialExecutor,
    state: Mutex<ClusterState>,
    scripts: HashMap<PartitionId, Vec<ReceivedMessage>>,
    pub metadata_calls: AtomicUsize,
    pub resolve_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
    pub fail_lookups: AtomicBool,
    pub fail_close: AtomicBool,
}

impl MockCluster {
    pub fn new(topic: &str, scripts: HashMap<PartitionId, Vec<ReceivedMessage>>) -> Arc<Self> {
        Arc::new(Self {
            topic: topic.to_string(),
            executor: SerialExecutor::new(),
            state: Mutex::new(ClusterState::Disconnected),
            scripts,
            metadata_calls: AtomicUsize::new(0),
            resolve_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            fail_lookups: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
        })
    }

    /// Script `count` messages per partition with offsets `0..count`.
    pub fn with_sequential_messages(
        topic: &str,
        partitions: &[PartitionId],
        count: u64,
    ) -> Arc<Self> {
        let scripts = partitions
            .iter()
            .map(|&p| {
                let messages = (0..count)
                    .map(|offset| {
                        ReceivedMessage::new(topic, p, offset, format!("p{p}-m{offset}"))
                    })
                    .collect();
                (p, messages)
            })
            .collect();
        Self::new(topic, scripts)
    }

    fn check_topic(&self, topic: &str) -> Result<()> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(ClientError::Broker("lookup failed".to_string()));
        }
        if topic != self.topic {
            return Err(ClientError::TopicNotFound {
                topic: topic.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Cluster for MockCluster {
    async fn connect(&self) -> Result<()> {
        *self.state.lock() = ClusterState::Connected;
        Ok(())
    }

    async fn close(&self, _timeout: Duration) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(ClientError::Connection("close failed".to_string()));
        }
        *self.state.lock() = ClusterState::Disconnected;
        Ok(())
    }

    fn state(&self) -> ClusterState {
        *self.state.lock()
    }

    async fn partition_metadata(&self, topic: &str) -> Result<Vec<PartitionMeta>> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.check_topic(topic)?;
        let mut metas: Vec<PartitionMeta> = self
            .scripts
            .keys()
            .map(|&id| PartitionMeta {
                id,
                leader: Some("broker-1".to_string()),
            })
            .collect();
        metas.sort_by_key(|m| m.id);
        Ok(metas)
    }

    async fn resolve_offsets(
        &self,
        topic: &str,
        location: &StartLocation,
    ) -> Result<ResolvedOffsets> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.check_topic(topic)?;
        let next_offsets = self
            .scripts
            .iter()
            .map(|(&id, messages)| {
                let next = match location {
                    StartLocation::Latest => {
                        messages.last().map(|m| m.offset + 1).unwrap_or(0)
                    }
                    // Earliest and Timestamp both start at the head here
                    _ => messages.first().map(|m| m.offset).unwrap_or(0),
                };
                (id, next)
            })
            .collect();
        Ok(ResolvedOffsets::new(next_offsets))
    }

    fn executor(&self) -> &SerialExecutor {
        &self.executor
    }

    fn partition_stream(
        &self,
        _topic: &str,
        partition: PartitionId,
        start_offset: Offset,
    ) -> Arc<dyn PartitionStream> {
        let messages = self
            .scripts
            .get(&partition)
            .map(|script| {
                script
                    .iter()
                    .filter(|m| m.offset >= start_offset)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Arc::new(MockPartitionStream { messages })
    }
}

/// Replays a scripted message sequence into the relay sink.
pub struct MockPartitionStream {
    messages: Vec<ReceivedMessage>,
}

impl PartitionStream for MockPartitionStream {
    fn subscribe(&self, sink: mpsc::Sender<Result<ReceivedMessage>>) -> PartitionSubscription {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let messages = self.messages.clone();

        tokio::spawn(async move {
            for message in messages {
                tokio::select! {
                    _ = cancelled.cancelled() => return,
                    sent = sink.send(Ok(message)) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        PartitionSubscription::new(token)
    }
}

/// Install a test-writer subscriber so `tracing` output lands in test output.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Poll until the condition holds or the deadline passes.
pub async fn wait_for(mut condition: impl FnMut() -> bool, deadline: Duration) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
