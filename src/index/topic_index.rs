//! Per-file blob catalog, persisted as a log of 28-byte records
//!
//! Every file's data topic has a companion index topic holding one record
//! per blob in append order. The catalog is replayed into memory on first
//! access; afterwards the in-memory list is authoritative and the log is
//! kept in step with it.
//!
//! Removing blobs cannot be done selectively on an append-only log, so a
//! removal rewrites the whole catalog in two phases:
//!
//! 1. truncate the index topic completely
//! 2. republish every surviving blob
//!
//! These phases are not atomic. Between them the catalog is marked as
//! pending; the next mutation re-runs both phases from memory before doing
//! anything else. A process that dies in between loses the survivors'
//! catalog entries.

use super::scan::read_log;
use crate::broker::{Broker, Producer, RecordsToDelete};
use crate::config::ScanSettings;
use crate::model::Blob;
use crate::Result;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Name of the index topic belonging to a data topic
pub fn index_topic_name(data_topic: &str) -> String {
    format!("__{}_index", data_topic)
}

/// Ordered catalog of the blobs of one file
pub struct TopicIndex {
    broker: Arc<dyn Broker>,
    topic: String,
    index_topic: String,
    settings: ScanSettings,
    state: Mutex<IndexState>,
}

#[derive(Default)]
struct IndexState {
    /// `None` until the index topic has been replayed
    blobs: Option<Vec<Blob>>,
    producer: Option<Arc<dyn Producer>>,
    /// Set between truncating the log and republishing the survivors
    rewrite_pending: bool,
}

impl TopicIndex {
    pub(crate) fn new(broker: Arc<dyn Broker>, topic: impl Into<String>, settings: ScanSettings) -> Self {
        let topic = topic.into();
        TopicIndex {
            broker,
            index_topic: index_topic_name(&topic),
            topic,
            settings,
            state: Mutex::new(IndexState::default()),
        }
    }

    /// Data topic this index describes
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn index_topic(&self) -> &str {
        &self.index_topic
    }

    /// Snapshot of all blobs in append order
    pub fn get(&self) -> Result<Vec<Blob>> {
        let mut state = self.state.lock();
        Ok(self.loaded(&mut state)?.clone())
    }

    /// Append blobs to the catalog
    ///
    /// Publishes one record per blob and flushes once; the in-memory list
    /// only grows after the whole batch is in the log.
    pub fn put(&self, blobs: &[Blob]) -> Result<()> {
        if blobs.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock();
        self.loaded(&mut state)?;
        self.finish_pending_rewrite(&mut state)?;

        self.publish(&mut state, blobs)?;
        if let Some(list) = state.blobs.as_mut() {
            list.extend_from_slice(blobs);
        }
        Ok(())
    }

    /// Drop every blob whose offset lies below its partition's threshold
    ///
    /// Partitions without a threshold keep all their blobs. When anything
    /// was dropped the index topic is rewritten. Returns whether the
    /// catalog changed.
    pub fn delete(&self, delete_before: &BTreeMap<i32, i64>) -> Result<bool> {
        let mut state = self.state.lock();
        self.loaded(&mut state)?;
        self.finish_pending_rewrite(&mut state)?;

        let list = state.blobs.get_or_insert_with(Vec::new);
        let before = list.len();
        list.retain(|blob| {
            delete_before
                .get(&blob.partition())
                .map_or(true, |threshold| blob.offset() >= *threshold)
        });
        let removed = before - list.len();
        if removed == 0 {
            return Ok(false);
        }

        tracing::info!(
            topic = %self.topic,
            removed = removed,
            remaining = before - removed,
            "Rewriting blob catalog"
        );
        state.rewrite_pending = true;
        self.truncate_log()?;
        self.republish(&mut state)?;
        Ok(true)
    }

    /// Forget the in-memory catalog and release the producer
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.blobs = None;
        state.rewrite_pending = false;
        match state.producer.take() {
            Some(producer) => producer.close(),
            None => Ok(()),
        }
    }

    /// The in-memory list, replaying the index topic on first use
    fn loaded<'a>(&self, state: &'a mut IndexState) -> Result<&'a mut Vec<Blob>> {
        if state.blobs.is_none() {
            let records = read_log(self.broker.as_ref(), &self.index_topic, self.settings)?;
            let blobs = records
                .iter()
                .map(|record| Blob::decode(self.topic.as_str(), &record.payload))
                .collect::<Result<Vec<_>>>()?;

            tracing::debug!(topic = %self.topic, blobs = blobs.len(), "Loaded blob catalog");
            state.blobs = Some(blobs);
        }
        Ok(state.blobs.get_or_insert_with(Vec::new))
    }

    /// Rewrite phase one: remove every record of the index topic
    fn truncate_log(&self) -> Result<()> {
        let mut request = BTreeMap::new();
        request.insert(0, RecordsToDelete::All);
        match self.broker.delete_records(&self.index_topic, &request) {
            Err(crate::Error::UnknownTopic(_)) => Ok(()),
            other => other,
        }
    }

    /// Rewrite phase two: publish the in-memory catalog as a fresh batch
    fn republish(&self, state: &mut IndexState) -> Result<()> {
        let survivors = state.blobs.clone().unwrap_or_default();
        self.publish(state, &survivors)?;
        state.rewrite_pending = false;
        Ok(())
    }

    fn finish_pending_rewrite(&self, state: &mut IndexState) -> Result<()> {
        if state.rewrite_pending {
            tracing::warn!(topic = %self.topic, "Retrying interrupted catalog rewrite");
            self.truncate_log()?;
            self.republish(state)?;
        }
        Ok(())
    }

    fn publish(&self, state: &mut IndexState, blobs: &[Blob]) -> Result<()> {
        if blobs.is_empty() {
            return Ok(());
        }
        let producer = self.producer(state)?;
        for blob in blobs {
            producer.send(&self.index_topic, blob.encode())?;
        }
        producer.flush()
    }

    fn producer(&self, state: &mut IndexState) -> Result<Arc<dyn Producer>> {
        if let Some(producer) = &state.producer {
            return Ok(Arc::clone(producer));
        }
        let producer: Arc<dyn Producer> = Arc::from(self.broker.producer()?);
        state.producer = Some(Arc::clone(&producer));
        Ok(producer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::testing::FaultyBroker;
    use crate::broker::{MemoryBroker, TopicPartition};
    use crate::config::ConnectorConfig;

    fn blob(partition: i32, offset: i64, start: i64, end: i64) -> Blob {
        Blob::new("file", partition, offset, start, end).unwrap()
    }

    fn index(broker: &MemoryBroker) -> TopicIndex {
        TopicIndex::new(
            Arc::new(broker.clone()),
            "file",
            ConnectorConfig::default().scan_settings(),
        )
    }

    #[test]
    fn test_index_topic_name() {
        assert_eq!(index_topic_name("a_b_c.txt"), "__a_b_c.txt_index");
    }

    #[test]
    fn test_put_then_get() {
        let broker = MemoryBroker::new();
        let index = index(&broker);
        assert!(index.get().unwrap().is_empty());

        let blobs = vec![blob(0, 0, 0, 9), blob(0, 1, 10, 19)];
        index.put(&blobs).unwrap();
        assert_eq!(index.get().unwrap(), blobs);
        assert_eq!(broker.record_count("__file_index"), 2);
    }

    #[test]
    fn test_reload_from_log() {
        let broker = MemoryBroker::new();
        let blobs = vec![blob(0, 0, 0, 9), blob(0, 1, 10, 19), blob(0, 2, 20, 24)];
        index(&broker).put(&blobs).unwrap();

        let reopened = index(&broker);
        assert_eq!(reopened.get().unwrap(), blobs);
    }

    #[test]
    fn test_put_appends_to_existing_log() {
        let broker = MemoryBroker::new();
        index(&broker).put(&[blob(0, 0, 0, 9)]).unwrap();

        // a fresh instance must not lose what is already in the log
        let reopened = index(&broker);
        reopened.put(&[blob(0, 1, 10, 19)]).unwrap();
        assert_eq!(
            reopened.get().unwrap(),
            vec![blob(0, 0, 0, 9), blob(0, 1, 10, 19)]
        );
    }

    #[test]
    fn test_delete_rewrites_survivors() {
        let broker = MemoryBroker::new();
        let catalog = index(&broker);
        catalog
            .put(&[blob(0, 0, 0, 9), blob(0, 1, 10, 19), blob(0, 2, 20, 29)])
            .unwrap();

        let mut thresholds = BTreeMap::new();
        thresholds.insert(0, 2);
        assert!(catalog.delete(&thresholds).unwrap());
        assert_eq!(catalog.get().unwrap(), vec![blob(0, 2, 20, 29)]);

        // old records are gone, the survivor was appended after them
        let tp = TopicPartition::new("__file_index", 0);
        assert_eq!(broker.log_start_offset(&tp), Some(3));
        assert_eq!(broker.end_offset(&tp), Some(4));

        assert_eq!(index(&broker).get().unwrap(), vec![blob(0, 2, 20, 29)]);
    }

    #[test]
    fn test_delete_nothing_leaves_log_alone() {
        let broker = MemoryBroker::new();
        let index = index(&broker);
        index.put(&[blob(0, 5, 0, 9)]).unwrap();

        let mut thresholds = BTreeMap::new();
        thresholds.insert(0, 5);
        thresholds.insert(1, 100);
        assert!(!index.delete(&thresholds).unwrap());
        assert_eq!(broker.record_count("__file_index"), 1);
    }

    #[test]
    fn test_delete_is_per_partition() {
        let broker = MemoryBroker::new();
        let index = index(&broker);
        index
            .put(&[blob(0, 0, 0, 9), blob(1, 0, 10, 19), blob(0, 1, 20, 29)])
            .unwrap();

        let mut thresholds = BTreeMap::new();
        thresholds.insert(0, 1);
        assert!(index.delete(&thresholds).unwrap());
        assert_eq!(
            index.get().unwrap(),
            vec![blob(1, 0, 10, 19), blob(0, 1, 20, 29)]
        );
    }

    #[test]
    fn test_interrupted_rewrite_is_retried() {
        let broker = MemoryBroker::new();
        let faulty = FaultyBroker::new(broker.clone()).fail_truncations(1);
        let catalog = TopicIndex::new(
            Arc::new(faulty),
            "file",
            ConnectorConfig::default().scan_settings(),
        );
        catalog
            .put(&[blob(0, 0, 0, 9), blob(0, 1, 10, 19), blob(0, 2, 20, 29)])
            .unwrap();

        let mut thresholds = BTreeMap::new();
        thresholds.insert(0, 1);
        assert!(catalog.delete(&thresholds).is_err());
        // the log still holds the dropped blob
        assert_eq!(broker.record_count("__file_index"), 3);

        catalog.put(&[blob(0, 3, 30, 39)]).unwrap();
        let expected = vec![blob(0, 1, 10, 19), blob(0, 2, 20, 29), blob(0, 3, 30, 39)];
        assert_eq!(catalog.get().unwrap(), expected);

        let tp = TopicPartition::new("__file_index", 0);
        assert_eq!(broker.log_start_offset(&tp), Some(3));
        assert_eq!(broker.end_offset(&tp), Some(6));
        assert_eq!(index(&broker).get().unwrap(), expected);
    }

    #[test]
    fn test_close_releases_state() {
        let broker = MemoryBroker::new();
        let index = index(&broker);
        index.put(&[blob(0, 0, 0, 9)]).unwrap();
        index.close().unwrap();

        // state is replayed again after close
        assert_eq!(index.get().unwrap(), vec![blob(0, 0, 0, 9)]);
    }
}
