use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifier of a partition within a topic
pub type PartitionId = u32;

/// Monotonic per-partition message position
pub type Offset = u64;

/// A message delivered to the consumer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivedMessage {
    /// Topic the message belongs to
    pub topic: String,

    /// Partition ID
    pub partition: PartitionId,

    /// Message offset within partition
    pub offset: Offset,

    /// Message key for partitioning
    pub key: Option<Bytes>,

    /// Message payload
    pub value: Bytes,

    /// Message headers/properties
    pub headers: HashMap<String, String>,

    /// Timestamp when message was produced (ms since epoch)
    pub timestamp: u64,
}

impl ReceivedMessage {
    /// Create a message with the given coordinates and payload
    pub fn new(
        topic: impl Into<String>,
        partition: PartitionId,
        offset: Offset,
        value: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            value: value.into(),
            headers: HashMap::new(),
            timestamp: now_ms(),
        }
    }

    /// Set the message key
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Add a header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Get message payload as string (UTF-8)
    pub fn value_as_string(&self) -> std::result::Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.value.to_vec())
    }

    /// Get message key as string (UTF-8)
    pub fn key_as_string(&self) -> Option<std::result::Result<String, std::string::FromUtf8Error>> {
        self.key.as_ref().map(|k| String::from_utf8(k.to_vec()))
    }

    /// Get header value
    pub fn get_header(&self, key: &str) -> Option<&String> {
        self.headers.get(key)
    }

    /// Check if message has a specific header
    pub fn has_header(&self, key: &str) -> bool {
        self.headers.contains_key(key)
    }

    /// Message size in bytes (key + payload)
    pub fn size(&self) -> usize {
        self.value.len() + self.key.as_ref().map_or(0, |k| k.len())
    }

    /// Calculate message age in milliseconds
    pub fn age_ms(&self) -> u64 {
        now_ms().saturating_sub(self.timestamp)
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
