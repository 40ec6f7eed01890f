//! Fault-injecting wrapper around [`MemoryBroker`] for unit tests

use super::{
    Broker, Consumer, ConsumerOptions, MemoryBroker, Producer, Record, RecordsToDelete,
    TopicPartition,
};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// When consumers answer a poll with an empty batch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EmptyPolls {
    Never,
    /// Every other poll, starting with the first
    Alternate,
    Always,
}

pub(crate) struct FaultyBroker {
    inner: MemoryBroker,
    truncation_failures: AtomicUsize,
    empty_polls: EmptyPolls,
}

impl FaultyBroker {
    pub(crate) fn new(inner: MemoryBroker) -> Self {
        FaultyBroker {
            inner,
            truncation_failures: AtomicUsize::new(0),
            empty_polls: EmptyPolls::Never,
        }
    }

    /// Fail the next `count` calls to `delete_records`
    pub(crate) fn fail_truncations(self, count: usize) -> Self {
        self.truncation_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Inject empty batches; affected consumers also fetch at most two records per poll
    pub(crate) fn empty_polls(mut self, mode: EmptyPolls) -> Self {
        self.empty_polls = mode;
        self
    }
}

impl Broker for FaultyBroker {
    fn producer(&self) -> Result<Box<dyn Producer>> {
        self.inner.producer()
    }

    fn consumer(&self, options: ConsumerOptions) -> Result<Box<dyn Consumer>> {
        if self.empty_polls == EmptyPolls::Never {
            return self.inner.consumer(options);
        }
        let options = ConsumerOptions {
            max_poll_records: options.max_poll_records.min(2),
            ..options
        };
        Ok(Box::new(FaultyConsumer {
            inner: self.inner.consumer(options)?,
            mode: self.empty_polls,
            polls: 0,
        }))
    }

    fn delete_topics(&self, topics: &[&str]) -> Result<()> {
        self.inner.delete_topics(topics)
    }

    fn delete_records(
        &self,
        topic: &str,
        partitions: &BTreeMap<i32, RecordsToDelete>,
    ) -> Result<()> {
        let fail = self
            .truncation_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(Error::Broker(format!("delete_records on {} failed", topic)));
        }
        self.inner.delete_records(topic, partitions)
    }
}

struct FaultyConsumer {
    inner: Box<dyn Consumer>,
    mode: EmptyPolls,
    polls: usize,
}

impl Consumer for FaultyConsumer {
    fn assign(&mut self, partition: &TopicPartition) -> Result<()> {
        self.inner.assign(partition)
    }

    fn seek(&mut self, partition: &TopicPartition, offset: i64) -> Result<()> {
        self.inner.seek(partition, offset)
    }

    fn seek_to_beginning(&mut self, partition: &TopicPartition) -> Result<()> {
        self.inner.seek_to_beginning(partition)
    }

    fn seek_to_end(&mut self, partition: &TopicPartition) -> Result<()> {
        self.inner.seek_to_end(partition)
    }

    fn position(&self, partition: &TopicPartition) -> Result<i64> {
        self.inner.position(partition)
    }

    fn poll(&mut self, timeout: Duration) -> Result<Vec<Record>> {
        self.polls += 1;
        match self.mode {
            EmptyPolls::Always => Ok(Vec::new()),
            EmptyPolls::Alternate if self.polls % 2 == 1 => Ok(Vec::new()),
            _ => self.inner.poll(timeout),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}
