use crate::{
    cluster::Cluster,
    config::StartLocation,
    error::Result,
    message::{Offset, PartitionId},
};
use std::collections::HashSet;
use tracing::debug;

/// One partition to subscribe and the offset to start it from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPlan {
    /// Partition ID
    pub partition: PartitionId,

    /// First offset to read
    pub start_offset: Offset,
}

/// Resolve which partitions to consume and where each one starts.
///
/// Under [`StartLocation::Explicit`] the partition list comes from topic
/// metadata and start offsets from the caller-supplied provider; under the
/// resolved kinds a single offset-resolution request yields both. Either way,
/// partitions in `already_tracked` are skipped so that resolving again (for
/// example on reconnect) never double-subscribes a partition. Lookup failures
/// from the cluster propagate unresolved; retry belongs to the cluster, not
/// here.
pub async fn resolve_partitions(
    cluster: &dyn Cluster,
    topic: &str,
    location: &StartLocation,
    already_tracked: &HashSet<PartitionId>,
) -> Result<Vec<PartitionPlan>> {
    let mut plans = match location {
        StartLocation::Explicit(provider) => {
            let metadata = cluster.partition_metadata(topic).await?;
            metadata
                .iter()
                .filter(|meta| !already_tracked.contains(&meta.id))
                .map(|meta| PartitionPlan {
                    partition: meta.id,
                    start_offset: provider(meta.id),
                })
                .collect::<Vec<_>>()
        }
        resolved => {
            let offsets = cluster.resolve_offsets(topic, resolved).await?;
            offsets
                .partitions()
                .filter(|id| !already_tracked.contains(id))
                .map(|id| PartitionPlan {
                    partition: id,
                    // The partition came out of this same resolution
                    start_offset: offsets.next_offset(id).unwrap_or(0),
                })
                .collect::<Vec<_>>()
        }
    };

    plans.sort_by_key(|plan| plan.partition);
    debug!(
        topic,
        new = plans.len(),
        tracked = already_tracked.len(),
        "resolved partition set"
    );

    Ok(plans)
}
