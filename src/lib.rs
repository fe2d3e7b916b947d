//! FluxMQ Client Library
//!
//! Consumer-side message delivery for the FluxMQ message queue: per-partition
//! feeds are merged into one ordered, flow-controlled stream for a single
//! subscriber, with watermark-based backpressure for slow consumers. Broker
//! connections, fetching, and the wire protocol live behind the [`Cluster`]
//! and [`PartitionStream`] traits.

pub mod assignment;
pub mod cluster;
pub mod config;
pub mod consumer;
pub mod error;
pub mod executor;
pub mod flow_control;
pub mod message;

pub use assignment::PartitionPlan;
pub use cluster::{
    Cluster, ClusterState, PartitionMeta, PartitionStream, PartitionSubscription, ResolvedOffsets,
};
pub use config::{ConsumerConfig, OffsetProvider, StartLocation};
pub use consumer::{Consumer, ConsumerBuilder, ConsumerMetrics, Subscription};
pub use error::{ClientError, Result};
pub use executor::SerialExecutor;
pub use flow_control::{FlowControlGate, FlowSignal};
pub use message::{Offset, PartitionId, ReceivedMessage};
