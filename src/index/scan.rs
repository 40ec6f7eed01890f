//! One-shot replay of a single-partition log
//!
//! Both indices rebuild their in-memory state the same way: a throwaway
//! consumer captures the end offset first, rewinds to the log start, and
//! polls until the record just before that captured end has been read.
//! Records appended after the end was captured are not part of the replay.

use crate::broker::{Broker, Consumer, ConsumerOptions, Record, TopicPartition};
use crate::config::ScanSettings;
use crate::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static SCAN_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A consumer group id no other consumer uses
pub(crate) fn unique_group_id(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!(
        "{}-{}-{}-{}",
        prefix,
        std::process::id(),
        nanos,
        SCAN_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    )
}

/// Read every record of partition 0 of `topic`, in offset order
pub(crate) fn read_log(
    broker: &dyn Broker,
    topic: &str,
    settings: ScanSettings,
) -> Result<Vec<Record>> {
    let mut consumer = broker.consumer(ConsumerOptions {
        group_id: Some(unique_group_id(topic)),
        ..ConsumerOptions::default()
    })?;

    let result = replay(consumer.as_mut(), topic, settings);
    let closed = consumer.close();
    let records = result?;
    closed?;

    tracing::debug!(topic = %topic, records = records.len(), "Replayed log");
    Ok(records)
}

fn replay(consumer: &mut dyn Consumer, topic: &str, settings: ScanSettings) -> Result<Vec<Record>> {
    let partition = TopicPartition::new(topic, 0);
    consumer.assign(&partition)?;

    consumer.seek_to_end(&partition)?;
    let end = consumer.position(&partition)?;
    consumer.seek_to_beginning(&partition)?;
    let beginning = consumer.position(&partition)?;

    let mut records = Vec::new();
    if end <= beginning {
        return Ok(records);
    }

    let last = end - 1;
    let mut next = beginning;
    let mut idle_polls = 0;
    while next <= last {
        let batch = consumer.poll(settings.poll_timeout)?;
        if batch.is_empty() {
            idle_polls += 1;
            if idle_polls >= settings.idle_poll_limit {
                return Err(Error::Broker(format!(
                    "replay of {} stalled at offset {} of {}",
                    topic, next, last
                )));
            }
            continue;
        }

        idle_polls = 0;
        for record in batch {
            if record.offset > last {
                break;
            }
            next = record.offset + 1;
            records.push(record);
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::testing::{EmptyPolls, FaultyBroker};
    use crate::broker::{MemoryBroker, RecordsToDelete};
    use bytes::Bytes;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn settings() -> ScanSettings {
        ScanSettings {
            poll_timeout: Duration::from_millis(10),
            idle_poll_limit: 3,
        }
    }

    #[test]
    fn test_unique_group_ids() {
        assert_ne!(unique_group_id("t"), unique_group_id("t"));
    }

    #[test]
    fn test_missing_topic_is_empty() {
        let broker = MemoryBroker::new();
        assert!(read_log(&broker, "__missing", settings()).unwrap().is_empty());
    }

    #[test]
    fn test_reads_everything_in_order() {
        let broker = MemoryBroker::new();
        let producer = broker.producer().unwrap();
        for i in 0..1200u32 {
            producer
                .send("__log", Bytes::from(i.to_be_bytes().to_vec()))
                .unwrap();
        }

        let records = read_log(&broker, "__log", settings()).unwrap();
        assert_eq!(records.len(), 1200);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.offset, i as i64);
            assert_eq!(&record.payload[..], &(i as u32).to_be_bytes());
        }
    }

    #[test]
    fn test_starts_at_log_start() {
        let broker = MemoryBroker::new();
        let producer = broker.producer().unwrap();
        for payload in ["a", "b", "c"] {
            producer.send("__log", Bytes::from(payload)).unwrap();
        }
        let mut request = BTreeMap::new();
        request.insert(0, RecordsToDelete::BeforeOffset(2));
        broker.delete_records("__log", &request).unwrap();

        let records = read_log(&broker, "__log", settings()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].offset, 2);
        assert_eq!(&records[0].payload[..], b"c");
    }

    #[test]
    fn test_tolerates_empty_polls() {
        let broker = MemoryBroker::new();
        let producer = broker.producer().unwrap();
        for i in 0..7u8 {
            producer.send("__log", Bytes::from(vec![i])).unwrap();
        }

        let flaky = FaultyBroker::new(broker).empty_polls(EmptyPolls::Alternate);
        let records = read_log(&flaky, "__log", settings()).unwrap();
        assert_eq!(
            records.iter().map(|r| r.offset).collect::<Vec<_>>(),
            (0..7).collect::<Vec<i64>>()
        );
    }

    #[test]
    fn test_stalled_replay_fails() {
        let broker = MemoryBroker::new();
        let producer = broker.producer().unwrap();
        for payload in ["a", "b", "c"] {
            producer.send("__log", Bytes::from(payload)).unwrap();
        }

        let stalled = FaultyBroker::new(broker).empty_polls(EmptyPolls::Always);
        match read_log(&stalled, "__log", settings()) {
            Err(Error::Broker(message)) => {
                assert!(message.contains("__log"), "{}", message);
                assert!(message.contains("offset 0"), "{}", message);
            }
            other => panic!("expected a stalled replay, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_log_is_empty() {
        let broker = MemoryBroker::new();
        let producer = broker.producer().unwrap();
        producer.send("__log", Bytes::from("a")).unwrap();
        let mut request = BTreeMap::new();
        request.insert(0, RecordsToDelete::All);
        broker.delete_records("__log", &request).unwrap();

        assert!(read_log(&broker, "__log", settings()).unwrap().is_empty());
    }
}
