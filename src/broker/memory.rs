//! In-process broker
//!
//! Keeps every topic in memory with Kafka-like offset semantics: offsets are
//! assigned per partition, never reused while the topic exists, and prefix
//! truncation moves the log start forward. Useful for embedding logfs in a
//! single process and for testing without a running cluster.

use super::{
    Broker, Consumer, ConsumerOptions, Producer, Record, RecordMetadata, RecordsToDelete,
    TopicPartition,
};
use crate::{Error, Result};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Broker property holding the partition count of auto-created topics
pub const NUM_PARTITIONS_PROPERTY: &str = "num.partitions";

/// Topics with this prefix are internal and always get one partition
const INTERNAL_TOPIC_PREFIX: &str = "__";

/// A broker living entirely in this process
///
/// Cloning is cheap; clones share the same topics.
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

struct Shared {
    topics: Mutex<HashMap<String, TopicLog>>,
    /// Signalled on every append so waiting polls can wake up
    appended: Condvar,
    num_partitions: usize,
}

struct TopicLog {
    partitions: Vec<PartitionLog>,
    next_partition: usize,
}

impl TopicLog {
    fn new(partitions: usize) -> Self {
        TopicLog {
            partitions: (0..partitions).map(|_| PartitionLog::default()).collect(),
            next_partition: 0,
        }
    }

    fn partition(&self, partition: i32) -> Option<&PartitionLog> {
        usize::try_from(partition)
            .ok()
            .and_then(|p| self.partitions.get(p))
    }

    fn partition_mut(&mut self, partition: i32) -> Option<&mut PartitionLog> {
        usize::try_from(partition)
            .ok()
            .and_then(|p| self.partitions.get_mut(p))
    }
}

#[derive(Default)]
struct PartitionLog {
    log_start: i64,
    records: VecDeque<Bytes>,
}

impl PartitionLog {
    fn end(&self) -> i64 {
        self.log_start + self.records.len() as i64
    }

    fn append(&mut self, payload: Bytes) -> i64 {
        let offset = self.end();
        self.records.push_back(payload);
        offset
    }

    fn truncate_before(&mut self, offset: i64) {
        while self.log_start < offset && self.records.pop_front().is_some() {
            self.log_start += 1;
        }
    }

    fn read(&self, partition: i32, from: i64, max: usize) -> Vec<Record> {
        let skip = (from - self.log_start) as usize;
        self.records
            .iter()
            .skip(skip)
            .take(max)
            .enumerate()
            .map(|(i, payload)| Record {
                partition,
                offset: from + i as i64,
                payload: payload.clone(),
            })
            .collect()
    }
}

impl MemoryBroker {
    /// Create a broker whose topics have a single partition
    pub fn new() -> Self {
        Self::with_partitions(1)
    }

    /// Create a broker whose auto-created data topics have `partitions` partitions
    pub fn with_partitions(partitions: usize) -> Self {
        MemoryBroker {
            shared: Arc::new(Shared {
                topics: Mutex::new(HashMap::new()),
                appended: Condvar::new(),
                num_partitions: partitions.max(1),
            }),
        }
    }

    /// Create a broker from connection properties, honoring `num.partitions`
    pub fn from_properties(properties: &BTreeMap<String, String>) -> Result<Self> {
        let partitions = match properties.get(NUM_PARTITIONS_PROPERTY) {
            Some(value) => value
                .parse::<usize>()
                .ok()
                .filter(|p| *p > 0)
                .ok_or_else(|| {
                    Error::Config(format!(
                        "invalid {}: '{}'",
                        NUM_PARTITIONS_PROPERTY, value
                    ))
                })?,
            None => 1,
        };
        Ok(Self::with_partitions(partitions))
    }

    /// Names of all existing topics, sorted
    pub fn topic_names(&self) -> Vec<String> {
        let topics = self.shared.topics.lock();
        let mut names: Vec<String> = topics.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn topic_exists(&self, topic: &str) -> bool {
        self.shared.topics.lock().contains_key(topic)
    }

    /// First retained offset of a partition
    pub fn log_start_offset(&self, partition: &TopicPartition) -> Option<i64> {
        let topics = self.shared.topics.lock();
        topics
            .get(&partition.topic)
            .and_then(|log| log.partition(partition.partition))
            .map(|p| p.log_start)
    }

    /// Offset the next record of a partition will get
    pub fn end_offset(&self, partition: &TopicPartition) -> Option<i64> {
        let topics = self.shared.topics.lock();
        topics
            .get(&partition.topic)
            .and_then(|log| log.partition(partition.partition))
            .map(|p| p.end())
    }

    /// Number of records currently retained across all partitions of a topic
    pub fn record_count(&self, topic: &str) -> usize {
        let topics = self.shared.topics.lock();
        topics
            .get(topic)
            .map(|log| log.partitions.iter().map(|p| p.records.len()).sum())
            .unwrap_or(0)
    }

    fn partitions_for(&self, topic: &str) -> usize {
        if topic.starts_with(INTERNAL_TOPIC_PREFIX) {
            1
        } else {
            self.shared.num_partitions
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker for MemoryBroker {
    fn producer(&self) -> Result<Box<dyn Producer>> {
        Ok(Box::new(MemoryProducer {
            broker: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn consumer(&self, options: ConsumerOptions) -> Result<Box<dyn Consumer>> {
        Ok(Box::new(MemoryConsumer {
            shared: Arc::clone(&self.shared),
            options,
            assignment: None,
            position: None,
            closed: false,
        }))
    }

    fn delete_topics(&self, topics: &[&str]) -> Result<()> {
        let mut logs = self.shared.topics.lock();
        let mut missing = Vec::new();
        for topic in topics {
            if logs.remove(*topic).is_none() {
                missing.push(*topic);
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::UnknownTopic(missing.join(", ")))
        }
    }

    fn delete_records(
        &self,
        topic: &str,
        partitions: &BTreeMap<i32, RecordsToDelete>,
    ) -> Result<()> {
        let mut logs = self.shared.topics.lock();
        let log = logs
            .get_mut(topic)
            .ok_or_else(|| Error::UnknownTopic(topic.to_string()))?;

        for (partition, request) in partitions {
            let part = log.partition_mut(*partition).ok_or_else(|| {
                Error::Broker(format!("unknown partition {}-{}", topic, partition))
            })?;

            let before = match request {
                RecordsToDelete::BeforeOffset(offset) => *offset,
                RecordsToDelete::All => part.end(),
            };
            if before < 0 || before > part.end() {
                return Err(Error::OffsetOutOfRange {
                    topic: topic.to_string(),
                    partition: *partition,
                    offset: before,
                });
            }
            part.truncate_before(before);
        }

        Ok(())
    }
}

struct MemoryProducer {
    broker: MemoryBroker,
    closed: AtomicBool,
}

impl Producer for MemoryProducer {
    fn send(&self, topic: &str, payload: Bytes) -> Result<RecordMetadata> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed("producer".into()));
        }

        let partitions = self.broker.partitions_for(topic);
        let (partition, offset) = {
            let mut logs = self.broker.shared.topics.lock();
            let log = logs
                .entry(topic.to_string())
                .or_insert_with(|| TopicLog::new(partitions));

            let index = log.next_partition % log.partitions.len();
            log.next_partition = log.next_partition.wrapping_add(1);
            (index as i32, log.partitions[index].append(payload))
        };
        self.broker.shared.appended.notify_all();

        Ok(RecordMetadata {
            topic: topic.to_string(),
            partition,
            offset,
        })
    }

    fn flush(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed("producer".into()));
        }
        // Sends are applied synchronously
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

struct MemoryConsumer {
    shared: Arc<Shared>,
    options: ConsumerOptions,
    assignment: Option<TopicPartition>,
    /// `None` until the first seek; resolves to the log start
    position: Option<i64>,
    closed: bool,
}

impl MemoryConsumer {
    fn check_open(&self) -> Result<()> {
        if self.closed {
            let name = self.options.group_id.as_deref().unwrap_or("consumer");
            return Err(Error::Closed(name.to_string()));
        }
        Ok(())
    }

    fn check_assigned(&self, partition: &TopicPartition) -> Result<()> {
        self.check_open()?;
        match &self.assignment {
            Some(assigned) if assigned == partition => Ok(()),
            _ => Err(Error::Broker(format!("{} is not assigned", partition))),
        }
    }

    /// (log start, end) of a partition; an absent partition reads as empty
    fn bounds(&self, partition: &TopicPartition) -> (i64, i64) {
        let topics = self.shared.topics.lock();
        topics
            .get(&partition.topic)
            .and_then(|log| log.partition(partition.partition))
            .map(|p| (p.log_start, p.end()))
            .unwrap_or((0, 0))
    }
}

impl Consumer for MemoryConsumer {
    fn assign(&mut self, partition: &TopicPartition) -> Result<()> {
        self.check_open()?;
        self.assignment = Some(partition.clone());
        self.position = None;
        Ok(())
    }

    fn seek(&mut self, partition: &TopicPartition, offset: i64) -> Result<()> {
        self.check_assigned(partition)?;
        self.position = Some(offset);
        Ok(())
    }

    fn seek_to_beginning(&mut self, partition: &TopicPartition) -> Result<()> {
        self.check_assigned(partition)?;
        self.position = Some(self.bounds(partition).0);
        Ok(())
    }

    fn seek_to_end(&mut self, partition: &TopicPartition) -> Result<()> {
        self.check_assigned(partition)?;
        self.position = Some(self.bounds(partition).1);
        Ok(())
    }

    fn position(&self, partition: &TopicPartition) -> Result<i64> {
        self.check_assigned(partition)?;
        Ok(self
            .position
            .unwrap_or_else(|| self.bounds(partition).0))
    }

    fn poll(&mut self, timeout: Duration) -> Result<Vec<Record>> {
        self.check_open()?;
        let assigned = self
            .assignment
            .clone()
            .ok_or_else(|| Error::Broker("poll without assignment".into()))?;

        let deadline = Instant::now() + timeout;
        let mut topics = self.shared.topics.lock();
        loop {
            if let Some(part) = topics
                .get(&assigned.topic)
                .and_then(|log| log.partition(assigned.partition))
            {
                let position = self.position.unwrap_or(part.log_start);
                if position < part.log_start || position > part.end() {
                    return Err(Error::OffsetOutOfRange {
                        topic: assigned.topic.clone(),
                        partition: assigned.partition,
                        offset: position,
                    });
                }
                if position < part.end() {
                    let records =
                        part.read(assigned.partition, position, self.options.max_poll_records);
                    self.position = Some(position + records.len() as i64);
                    return Ok(records);
                }
            }

            if self.shared.appended.wait_until(&mut topics, deadline).timed_out() {
                return Ok(Vec::new());
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.assignment = None;
        Ok(())
    }
}
