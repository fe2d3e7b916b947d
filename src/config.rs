use crate::{
    error::{ClientError, Result},
    message::{Offset, PartitionId},
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Per-partition start offset provider used by [`StartLocation::Explicit`]
pub type OffsetProvider = Arc<dyn Fn(PartitionId) -> Offset + Send + Sync>;

/// Where a subscription starts reading each partition.
///
/// The resolved kinds (`Earliest`, `Latest`, `Timestamp`) are answered by a
/// single offset-resolution request against the cluster; `Explicit` instead
/// fetches partition metadata and asks the caller-supplied provider for each
/// partition's start offset. The two strategies are mutually exclusive.
#[derive(Clone)]
pub enum StartLocation {
    /// Start from the earliest available message
    Earliest,

    /// Start from the latest message
    Latest,

    /// Start from the first message at or after this timestamp (ms since epoch)
    Timestamp(u64),

    /// Start each partition at the offset returned by the provider
    Explicit(OffsetProvider),
}

impl fmt::Debug for StartLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartLocation::Earliest => write!(f, "Earliest"),
            StartLocation::Latest => write!(f, "Latest"),
            StartLocation::Timestamp(ts) => write!(f, "Timestamp({ts})"),
            StartLocation::Explicit(_) => write!(f, "Explicit(..)"),
        }
    }
}

impl StartLocation {
    /// Whether this location requires the explicit per-partition provider path
    pub fn is_explicit(&self) -> bool {
        matches!(self, StartLocation::Explicit(_))
    }
}

/// Consumer configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Topic to consume
    pub topic: String,

    /// Seed broker endpoints
    pub brokers: Vec<String>,

    /// Consumer ID, generated when absent
    pub consumer_id: Option<String>,

    /// Outstanding-message count below which flow reopens
    pub low_watermark: u64,

    /// Outstanding-message count above which flow closes
    pub high_watermark: u64,

    /// Enable watermark-based flow control
    pub use_flow_control: bool,

    /// Starting position for all partitions
    pub start_location: StartLocation,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Request timeout for metadata and offset lookups
    pub request_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: String::new(),
            brokers: vec!["localhost:9092".to_string()],
            consumer_id: None,
            low_watermark: 10,
            high_watermark: 50,
            use_flow_control: false,
            start_location: StartLocation::Latest,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ConsumerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.topic.is_empty() {
            return Err(ClientError::InvalidConfig(
                "Consumer topic is required".to_string(),
            ));
        }

        if self.brokers.is_empty() {
            return Err(ClientError::InvalidConfig(
                "At least one seed broker is required".to_string(),
            ));
        }

        if self.low_watermark >= self.high_watermark {
            return Err(ClientError::InvalidConfig(format!(
                "Low watermark ({}) must be below high watermark ({})",
                self.low_watermark, self.high_watermark
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_once_topic_is_set() {
        let config = ConsumerConfig {
            topic: "events".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_topic_is_rejected() {
        let config = ConsumerConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ClientError::InvalidConfig(_))
        ));
    }

    #[test]
    fn inverted_watermarks_are_rejected() {
        let config = ConsumerConfig {
            topic: "events".to_string(),
            low_watermark: 50,
            high_watermark: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        // Equal watermarks leave no hysteresis band
        let config = ConsumerConfig {
            topic: "events".to_string(),
            low_watermark: 10,
            high_watermark: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_broker_list_is_rejected() {
        let config = ConsumerConfig {
            topic: "events".to_string(),
            brokers: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
