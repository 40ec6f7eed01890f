//! Log broker client contract
//!
//! logfs only needs a handful of broker primitives: synchronous publish,
//! partition assignment with seek and poll, and two admin calls (drop whole
//! topics, truncate a partition's prefix). Implementations can wrap a real
//! Kafka-compatible client or use the in-process [`MemoryBroker`].

mod memory;
#[cfg(test)]
pub(crate) mod testing;

pub use memory::{MemoryBroker, NUM_PARTITIONS_PROPERTY};

use crate::Result;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// One partition of one topic
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        TopicPartition {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// A record returned by a poll
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub partition: i32,
    pub offset: i64,
    pub payload: Bytes,
}

/// Where a published record landed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Prefix truncation request for one partition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordsToDelete {
    /// Delete every record with a lower offset
    BeforeOffset(i64),
    /// Delete everything currently in the partition
    All,
}

/// Consumer construction options
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// Consumer group; `None` for a standalone, manually assigned consumer
    pub group_id: Option<String>,
    /// Upper bound on records returned by a single poll
    pub max_poll_records: usize,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        ConsumerOptions {
            group_id: None,
            max_poll_records: 500,
        }
    }
}

/// Publishes records. Shared between threads.
pub trait Producer: Send + Sync {
    /// Publish one record and wait for its assigned position
    fn send(&self, topic: &str, payload: Bytes) -> Result<RecordMetadata>;

    /// Wait until every sent record is durable
    fn flush(&self) -> Result<()>;

    /// Release the producer; later calls fail
    fn close(&self) -> Result<()>;
}

/// Reads records from manually assigned partitions
pub trait Consumer: Send {
    /// Replace the current assignment with a single partition
    fn assign(&mut self, partition: &TopicPartition) -> Result<()>;

    /// Position the next poll at `offset`
    fn seek(&mut self, partition: &TopicPartition, offset: i64) -> Result<()>;

    /// Position the next poll at the partition's log start
    fn seek_to_beginning(&mut self, partition: &TopicPartition) -> Result<()>;

    /// Position the next poll after the partition's last record
    fn seek_to_end(&mut self, partition: &TopicPartition) -> Result<()>;

    /// Offset of the next record a poll would return
    fn position(&self, partition: &TopicPartition) -> Result<i64>;

    /// Fetch records, waiting up to `timeout` when none are available.
    /// An empty batch is not an end-of-log signal.
    fn poll(&mut self, timeout: Duration) -> Result<Vec<Record>>;

    /// Release the consumer; later calls fail
    fn close(&mut self) -> Result<()>;
}

/// Factory for producers and consumers plus the admin primitives
pub trait Broker: Send + Sync {
    fn producer(&self) -> Result<Box<dyn Producer>>;

    fn consumer(&self, options: ConsumerOptions) -> Result<Box<dyn Consumer>>;

    /// Drop topics with all their partitions
    fn delete_topics(&self, topics: &[&str]) -> Result<()>;

    /// Truncate partition prefixes of one topic
    fn delete_records(
        &self,
        topic: &str,
        partitions: &BTreeMap<i32, RecordsToDelete>,
    ) -> Result<()>;
}
