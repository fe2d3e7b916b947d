use crate::{
    config::StartLocation,
    error::Result,
    executor::SerialExecutor,
    message::{Offset, PartitionId, ReceivedMessage},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Connection state of the cluster collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    /// Broker connections are established
    Connected,

    /// No broker connection, either never connected or closed
    Disconnected,
}

/// Metadata for a single partition of a topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionMeta {
    /// Partition ID
    pub id: PartitionId,

    /// Current leader broker, when known
    pub leader: Option<String>,
}

/// Result of an offset-resolution request: per partition, the next offset to
/// read for the requested start location.
#[derive(Debug, Clone, Default)]
pub struct ResolvedOffsets {
    next_offsets: HashMap<PartitionId, Offset>,
}

impl ResolvedOffsets {
    /// Wrap a partition-to-offset map
    pub fn new(next_offsets: HashMap<PartitionId, Offset>) -> Self {
        Self { next_offsets }
    }

    /// Partitions covered by this resolution
    pub fn partitions(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.next_offsets.keys().copied()
    }

    /// Next offset to read for a partition
    pub fn next_offset(&self, partition: PartitionId) -> Option<Offset> {
        self.next_offsets.get(&partition).copied()
    }

    /// Number of partitions covered
    pub fn len(&self) -> usize {
        self.next_offsets.len()
    }

    /// True when no partitions were resolved
    pub fn is_empty(&self) -> bool {
        self.next_offsets.is_empty()
    }
}

/// Broker cluster collaborator.
///
/// Everything behind this trait — connection management, fetch/retry
/// machinery, wire protocol, metadata RPCs — lives outside the consumer core.
/// Implementations are internally thread-safe; retry of failed metadata or
/// offset lookups is their responsibility, not the consumer's. The serialized
/// scheduler that drives all partition bookkeeping is owned here and exposed
/// through [`Cluster::executor`].
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Establish broker connections
    async fn connect(&self) -> Result<()>;

    /// Close broker connections within the given timeout
    async fn close(&self, timeout: Duration) -> Result<()>;

    /// Current connection state
    fn state(&self) -> ClusterState;

    /// Fetch (or return cached) partition metadata for a topic
    async fn partition_metadata(&self, topic: &str) -> Result<Vec<PartitionMeta>>;

    /// Resolve per-partition start offsets for a topic.
    ///
    /// Only the resolved location kinds (`Earliest`, `Latest`, `Timestamp`)
    /// reach this call; the explicit-provider strategy goes through
    /// [`Cluster::partition_metadata`] instead.
    async fn resolve_offsets(&self, topic: &str, location: &StartLocation)
        -> Result<ResolvedOffsets>;

    /// The serialized scheduler owned by this collaborator
    fn executor(&self) -> &SerialExecutor;

    /// Construct a partition handle streaming from the given start offset
    fn partition_stream(
        &self,
        topic: &str,
        partition: PartitionId,
        start_offset: Offset,
    ) -> Arc<dyn PartitionStream>;
}

/// A per-partition message source.
///
/// `subscribe` routes the partition's messages, in partition order, into the
/// given sink until the returned subscription is cancelled. A fatal fetch
/// failure is reported by sending an `Err` item, which ends delivery on the
/// composed stream.
pub trait PartitionStream: Send + Sync {
    /// Start streaming into the sink; returns a cancelable handle
    fn subscribe(&self, sink: mpsc::Sender<Result<ReceivedMessage>>) -> PartitionSubscription;
}

/// Cancelable handle for one partition's subscription.
///
/// Cancellation stops future delivery only; messages already in flight are not
/// drained. `cancel` is idempotent.
#[derive(Debug, Clone)]
pub struct PartitionSubscription {
    token: CancellationToken,
}

impl PartitionSubscription {
    /// Wrap a cancellation token controlling the partition's delivery task
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Stop future delivery from this partition
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether this subscription has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
