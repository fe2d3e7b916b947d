use crate::{
    assignment::resolve_partitions,
    cluster::{Cluster, ClusterState, PartitionSubscription},
    config::ConsumerConfig,
    error::{ClientError, Result},
    flow_control::{FlowControlGate, FlowSignal},
    message::{PartitionId, ReceivedMessage},
};
use futures::Stream;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Capacity of the relay and delivery channels
const CHANNEL_CAPACITY: usize = 128;

/// Bounded timeout for the best-effort cluster close during shutdown
const SHUTDOWN_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Consumer performance counters
#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    /// Messages that entered the relay
    pub messages_received: AtomicU64,

    /// Messages handed to the caller's stream
    pub messages_delivered: AtomicU64,

    /// Bytes that entered the relay
    pub bytes_received: AtomicU64,

    /// Flow-control signal edges emitted
    pub flow_transitions: AtomicU64,
}

struct ConsumerInner {
    id: String,
    config: ConsumerConfig,
    cluster: Arc<dyn Cluster>,

    // Single-assignment subscriber slot: unclaimed -> claimed, never reset.
    // One subscription per consumer instance, for life.
    subscriber_slot: AtomicBool,

    // Monotonic flags guarding teardown and shutdown
    torn_down: AtomicBool,
    disposed: AtomicBool,

    // Outstanding unacknowledged message count. May go transiently negative
    // when an ack races an arrival; that is not an error.
    outstanding: AtomicI64,

    // The gate lock also orders signal emission with the counter updates that
    // produced it.
    gate: Mutex<FlowControlGate>,
    flow_tx: watch::Sender<FlowSignal>,

    // Partition tracker: mutated only on the coordination worker, except for
    // the drain in teardown. A partition id appears at most once.
    tracker: Mutex<HashMap<PartitionId, PartitionSubscription>>,

    metrics: ConsumerMetrics,
}

impl ConsumerInner {
    /// Apply a counter delta and emit a flow signal edge if the gate flipped.
    ///
    /// The counter update and the emission happen under the gate lock, so
    /// hysteresis transitions are never reordered.
    fn account(&self, delta: i64) {
        let mut gate = self.gate.lock();
        let count = self.outstanding.fetch_add(delta, Ordering::SeqCst) + delta;
        if let Some(signal) = gate.update(count) {
            self.metrics.flow_transitions.fetch_add(1, Ordering::Relaxed);
            // send_replace publishes even while nobody watches the signal
            self.flow_tx.send_replace(signal);
        }
    }

    /// Cancel every per-partition subscription and clear the tracker.
    ///
    /// Idempotent; stops future delivery only, in-flight messages are not
    /// drained.
    fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut tracker = self.tracker.lock();
        let cancelled = tracker.len();
        for (partition, subscription) in tracker.drain() {
            subscription.cancel();
            debug!(partition, "cancelled partition subscription");
        }

        if cancelled > 0 {
            info!(consumer = %self.id, partitions = cancelled, "subscription torn down");
        }
    }
}

/// Consumer for a single topic.
///
/// One subscription per consumer instance: the first [`Consumer::subscribe`]
/// claims the only subscriber slot; every later attempt fails with an
/// invariant-violation error. Offsets are resolved before `subscribe` returns,
/// so no message can be produced ahead of its partition's start offset. When
/// flow control is enabled, every relayed message raises the outstanding
/// count and [`Consumer::ack`] lowers it; the watermark gate's signal is
/// published for upstream fetch throttling.
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<ConsumerInner>,
}

/// Builder for creating consumers
pub struct ConsumerBuilder {
    topic: Option<String>,
    config: Option<ConsumerConfig>,
    cluster: Option<Arc<dyn Cluster>>,
}

impl ConsumerBuilder {
    /// Create a new consumer builder
    pub fn new() -> Self {
        Self {
            topic: None,
            config: None,
            cluster: None,
        }
    }

    /// Set topic for the consumer
    pub fn topic<T: Into<String>>(mut self, topic: T) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set consumer configuration
    pub fn config(mut self, config: ConsumerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the cluster collaborator
    pub fn cluster(mut self, cluster: Arc<dyn Cluster>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Build the consumer
    pub fn build(self) -> Result<Consumer> {
        let cluster = self
            .cluster
            .ok_or_else(|| ClientError::InvalidConfig("Cluster is required".to_string()))?;

        let mut config = self.config.unwrap_or_default();
        if let Some(topic) = self.topic {
            config.topic = topic;
        }
        config.validate()?;

        let id = config
            .consumer_id
            .clone()
            .unwrap_or_else(|| format!("consumer-{}", Uuid::new_v4()));

        let gate = FlowControlGate::new(config.low_watermark, config.high_watermark);
        let (flow_tx, _flow_rx) = watch::channel(gate.signal());

        info!(consumer = %id, topic = %config.topic, "created consumer");

        Ok(Consumer {
            inner: Arc::new(ConsumerInner {
                id,
                config,
                cluster,
                subscriber_slot: AtomicBool::new(false),
                torn_down: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                outstanding: AtomicI64::new(0),
                gate: Mutex::new(gate),
                flow_tx,
                tracker: Mutex::new(HashMap::new()),
                metrics: ConsumerMetrics::default(),
            }),
        })
    }
}

impl Default for ConsumerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Consumer {
    /// Subscribe to the composed message stream.
    ///
    /// The first call claims the single-subscriber slot and drives partition
    /// and offset resolution on the cluster's serialized scheduler; it
    /// completes once every resolved partition is streaming into the relay.
    /// Any later call fails immediately with an invariant-violation error,
    /// without touching the scheduler or cluster state. A resolution failure
    /// propagates out of this call; the slot stays claimed for the consumer's
    /// lifetime either way.
    pub async fn subscribe(&self) -> Result<Subscription> {
        if self
            .inner
            .subscriber_slot
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ClientError::InvalidOperation(
                "only one subscriber allowed".to_string(),
            ));
        }

        if self.inner.disposed.load(Ordering::Acquire) {
            return Err(ClientError::Consumer(
                "consumer has been shut down".to_string(),
            ));
        }

        let inner = self.inner.clone();
        self.inner
            .cluster
            .executor()
            .run(move || async move { setup_subscription(inner).await })
            .await?
    }

    /// Acknowledge processed messages, lowering the outstanding count.
    ///
    /// Valid only when flow control is enabled; otherwise fails with an
    /// invariant-violation error and leaves the counter untouched.
    pub fn ack(&self, count: u64) -> Result<()> {
        if !self.inner.config.use_flow_control {
            return Err(ClientError::InvalidOperation(
                "ack requires flow control to be enabled".to_string(),
            ));
        }

        // Saturate so an oversized count cannot wrap the counter positive
        let delta = i64::try_from(count).unwrap_or(i64::MAX);
        self.inner.account(-delta);
        Ok(())
    }

    /// Whether watermark flow control is enabled
    pub fn flow_control_enabled(&self) -> bool {
        self.inner.config.use_flow_control
    }

    /// Flow-control signal stream for upstream fetch throttling
    pub fn flow_signal(&self) -> watch::Receiver<FlowSignal> {
        self.inner.flow_tx.subscribe()
    }

    /// Current outstanding unacknowledged message count
    pub fn outstanding(&self) -> i64 {
        self.inner.outstanding.load(Ordering::SeqCst)
    }

    /// Connect the underlying cluster; failures surface unmodified
    pub async fn connect(&self) -> Result<()> {
        self.inner.cluster.connect().await
    }

    /// Close the consumer: tear down the subscription, then close the
    /// cluster within the given timeout.
    ///
    /// Runs on the serialized scheduler so it cannot race in-flight partition
    /// setup. A failure from the cluster's close is surfaced to the caller.
    pub async fn close(&self, timeout: Duration) -> Result<()> {
        let inner = self.inner.clone();
        self.inner
            .cluster
            .executor()
            .run(move || async move {
                inner.teardown();
                inner.cluster.close(timeout).await
            })
            .await?
    }

    /// Release all resources. Safe to call any number of times, with or
    /// without a prior connect, and never returns an error.
    pub async fn shutdown(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Best-effort subscription teardown first
        self.inner.teardown();

        if self.inner.cluster.state() != ClusterState::Disconnected {
            let close = self.inner.cluster.close(SHUTDOWN_CLOSE_TIMEOUT);
            match tokio::time::timeout(SHUTDOWN_CLOSE_TIMEOUT, close).await {
                Ok(Ok(())) => debug!(consumer = %self.inner.id, "cluster closed during shutdown"),
                Ok(Err(e)) => {
                    warn!(consumer = %self.inner.id, error = %e, "cluster close failed during shutdown")
                }
                Err(_) => {
                    warn!(consumer = %self.inner.id, "cluster close timed out during shutdown")
                }
            }
        }

        info!(consumer = %self.inner.id, "consumer shut down");
    }

    /// Get consumer ID
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Get topic
    pub fn topic(&self) -> &str {
        &self.inner.config.topic
    }

    /// Get configuration
    pub fn config(&self) -> &ConsumerConfig {
        &self.inner.config
    }

    /// Get consumer metrics
    pub fn metrics(&self) -> &ConsumerMetrics {
        &self.inner.metrics
    }
}

/// Scheduled subscription setup: runs on the coordination worker.
async fn setup_subscription(inner: Arc<ConsumerInner>) -> Result<Subscription> {
    // Relay fan-in: every partition stream sends into relay_tx; the relay
    // task forwards into the delivery channel handed to the caller.
    let (relay_tx, mut relay_rx) = mpsc::channel::<Result<ReceivedMessage>>(CHANNEL_CAPACITY);
    let (delivery_tx, delivery_rx) = mpsc::channel::<Result<ReceivedMessage>>(CHANNEL_CAPACITY);

    let already_tracked: HashSet<PartitionId> = inner.tracker.lock().keys().copied().collect();
    let plans = resolve_partitions(
        inner.cluster.as_ref(),
        &inner.config.topic,
        &inner.config.start_location,
        &already_tracked,
    )
    .await?;

    {
        let mut tracker = inner.tracker.lock();
        if inner.torn_down.load(Ordering::Acquire) {
            return Err(ClientError::Consumer(
                "consumer was shut down during subscribe".to_string(),
            ));
        }

        for plan in &plans {
            let stream = inner.cluster.partition_stream(
                &inner.config.topic,
                plan.partition,
                plan.start_offset,
            );
            let subscription = stream.subscribe(relay_tx.clone());
            tracker.insert(plan.partition, subscription);
            debug!(
                partition = plan.partition,
                start_offset = plan.start_offset,
                "partition streaming into relay"
            );
        }
    }
    // Partition streams now hold the only relay senders; when teardown
    // cancels them the relay drains and the caller's stream ends.
    drop(relay_tx);

    let relay_inner = inner.clone();
    tokio::spawn(async move {
        while let Some(item) = relay_rx.recv().await {
            match item {
                Ok(message) => {
                    relay_inner
                        .metrics
                        .messages_received
                        .fetch_add(1, Ordering::Relaxed);
                    relay_inner
                        .metrics
                        .bytes_received
                        .fetch_add(message.size() as u64, Ordering::Relaxed);

                    if relay_inner.config.use_flow_control {
                        relay_inner.account(1);
                    }

                    if delivery_tx.send(Ok(message)).await.is_err() {
                        break;
                    }
                    relay_inner
                        .metrics
                        .messages_delivered
                        .fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    // Terminal failure: surface it and end delivery
                    let _ = delivery_tx.send(Err(e)).await;
                    break;
                }
            }
        }
        debug!(consumer = %relay_inner.id, "relay stopped");
    });

    info!(
        consumer = %inner.id,
        topic = %inner.config.topic,
        partitions = plans.len(),
        "subscription active"
    );

    Ok(Subscription {
        receiver: delivery_rx,
        inner,
    })
}

/// The composed, single-subscriber message stream.
///
/// Yields messages from all subscribed partitions; order within a partition
/// is preserved, interleaving across partitions is unconstrained. An `Err`
/// item is terminal. Dropping the subscription stops delivery to the caller
/// but does not tear down partition subscriptions; use [`Subscription::cancel`]
/// or the consumer's close/shutdown for that.
pub struct Subscription {
    receiver: mpsc::Receiver<Result<ReceivedMessage>>,
    inner: Arc<ConsumerInner>,
}

impl Subscription {
    /// Receive the next message; `None` once delivery has ended
    pub async fn recv(&mut self) -> Option<Result<ReceivedMessage>> {
        self.receiver.recv().await
    }

    /// Cancel the subscription: stops every partition's delivery and clears
    /// the tracker. Idempotent, never blocks on in-flight messages.
    pub fn cancel(&self) {
        self.inner.teardown();
    }
}

impl Stream for Subscription {
    type Item = Result<ReceivedMessage>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}
