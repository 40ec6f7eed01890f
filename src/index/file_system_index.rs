//! Global registry of file paths, persisted as one shared log
//!
//! Each record is the UTF-8 full qualified name of a file. Removal uses the
//! same truncate-then-republish rewrite as the blob catalog.

use super::scan::read_log;
use crate::broker::{Broker, Producer, RecordsToDelete};
use crate::config::ScanSettings;
use crate::{Error, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Topic holding every registered path
pub const FILE_SYSTEM_INDEX_TOPIC: &str = "__filesystem_index";

/// Set of all known file paths
pub struct FileSystemIndex {
    broker: Arc<dyn Broker>,
    settings: ScanSettings,
    state: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    files: Option<BTreeSet<String>>,
    producer: Option<Arc<dyn Producer>>,
    rewrite_pending: bool,
}

impl FileSystemIndex {
    pub(crate) fn new(broker: Arc<dyn Broker>, settings: ScanSettings) -> Self {
        FileSystemIndex {
            broker,
            settings,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Snapshot of all registered paths, sorted
    pub fn files(&self) -> Result<BTreeSet<String>> {
        let mut state = self.state.lock();
        Ok(self.loaded(&mut state)?.clone())
    }

    pub fn contains(&self, path: &str) -> Result<bool> {
        let mut state = self.state.lock();
        Ok(self.loaded(&mut state)?.contains(path))
    }

    /// Register a path; registering a known path publishes nothing
    pub fn put(&self, path: &str) -> Result<()> {
        let mut state = self.state.lock();
        if self.loaded(&mut state)?.contains(path) {
            return Ok(());
        }
        self.finish_pending_rewrite(&mut state)?;

        let producer = self.producer(&mut state)?;
        producer.send(FILE_SYSTEM_INDEX_TOPIC, Bytes::copy_from_slice(path.as_bytes()))?;
        producer.flush()?;

        if let Some(files) = state.files.as_mut() {
            files.insert(path.to_string());
        }
        Ok(())
    }

    /// Unregister a path, rewriting the registry log. Returns whether it was known.
    pub fn delete(&self, path: &str) -> Result<bool> {
        let mut state = self.state.lock();
        if !self.loaded(&mut state)?.remove(path) {
            return Ok(false);
        }

        tracing::info!(path = %path, "Rewriting file registry");
        state.rewrite_pending = true;
        self.truncate_log()?;
        self.republish(&mut state)?;
        Ok(true)
    }

    /// Forget the in-memory set and release the producer
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.files = None;
        state.rewrite_pending = false;
        match state.producer.take() {
            Some(producer) => producer.close(),
            None => Ok(()),
        }
    }

    fn loaded<'a>(&self, state: &'a mut RegistryState) -> Result<&'a mut BTreeSet<String>> {
        if state.files.is_none() {
            let records = read_log(self.broker.as_ref(), FILE_SYSTEM_INDEX_TOPIC, self.settings)?;
            let files = records
                .into_iter()
                .map(|record| {
                    String::from_utf8(record.payload.to_vec()).map_err(|_| {
                        Error::Corruption(format!(
                            "non UTF-8 path at offset {} of {}",
                            record.offset, FILE_SYSTEM_INDEX_TOPIC
                        ))
                    })
                })
                .collect::<Result<BTreeSet<_>>>()?;

            tracing::debug!(files = files.len(), "Loaded file registry");
            state.files = Some(files);
        }
        Ok(state.files.get_or_insert_with(BTreeSet::new))
    }

    fn truncate_log(&self) -> Result<()> {
        let mut request = BTreeMap::new();
        request.insert(0, RecordsToDelete::All);
        self.broker.delete_records(FILE_SYSTEM_INDEX_TOPIC, &request)
    }

    fn republish(&self, state: &mut RegistryState) -> Result<()> {
        let remaining = state.files.clone().unwrap_or_default();
        if !remaining.is_empty() {
            let producer = self.producer(state)?;
            for path in &remaining {
                producer.send(FILE_SYSTEM_INDEX_TOPIC, Bytes::copy_from_slice(path.as_bytes()))?;
            }
            producer.flush()?;
        }
        state.rewrite_pending = false;
        Ok(())
    }

    fn finish_pending_rewrite(&self, state: &mut RegistryState) -> Result<()> {
        if state.rewrite_pending {
            tracing::warn!("Retrying interrupted file registry rewrite");
            self.truncate_log()?;
            self.republish(state)?;
        }
        Ok(())
    }

    fn producer(&self, state: &mut RegistryState) -> Result<Arc<dyn Producer>> {
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
    use crate::broker::MemoryBroker;
    use crate::config::ConnectorConfig;

    fn registry(broker: &MemoryBroker) -> FileSystemIndex {
        FileSystemIndex::new(
            Arc::new(broker.clone()),
            ConnectorConfig::default().scan_settings(),
        )
    }

    #[test]
    fn test_put_and_delete() {
        let broker = MemoryBroker::new();
        let index = registry(&broker);

        index.put("a/b/c.txt").unwrap();
        assert!(index.files().unwrap().contains("a/b/c.txt"));

        assert!(index.delete("a/b/c.txt").unwrap());
        assert!(!index.files().unwrap().contains("a/b/c.txt"));
        assert!(!index.delete("a/b/c.txt").unwrap());
    }

    #[test]
    fn test_put_is_idempotent() {
        let broker = MemoryBroker::new();
        let index = registry(&broker);

        index.put("a/b/c.txt").unwrap();
        index.put("a/b/c.txt").unwrap();
        assert_eq!(index.files().unwrap().len(), 1);
        assert_eq!(broker.record_count(FILE_SYSTEM_INDEX_TOPIC), 1);
    }

    #[test]
    fn test_delete_keeps_other_paths() {
        let broker = MemoryBroker::new();
        let index = registry(&broker);
        for path in ["s/one", "s/two", "s/three"] {
            index.put(path).unwrap();
        }

        index.delete("s/two").unwrap();
        assert_eq!(broker.record_count(FILE_SYSTEM_INDEX_TOPIC), 2);

        let reopened = registry(&broker);
        let files: Vec<String> = reopened.files().unwrap().into_iter().collect();
        assert_eq!(files, vec!["s/one".to_string(), "s/three".to_string()]);
    }

    #[test]
    fn test_interrupted_rewrite_is_retried() {
        let broker = MemoryBroker::new();
        let faulty = FaultyBroker::new(broker.clone()).fail_truncations(1);
        let index = FileSystemIndex::new(
            Arc::new(faulty),
            ConnectorConfig::default().scan_settings(),
        );
        index.put("s/one").unwrap();
        index.put("s/two").unwrap();

        assert!(index.delete("s/one").is_err());
        assert_eq!(broker.record_count(FILE_SYSTEM_INDEX_TOPIC), 2);

        index.put("s/three").unwrap();
        let expected = vec!["s/three".to_string(), "s/two".to_string()];
        assert_eq!(index.files().unwrap().into_iter().collect::<Vec<_>>(), expected);
        assert_eq!(broker.record_count(FILE_SYSTEM_INDEX_TOPIC), 2);

        let reopened = registry(&broker);
        assert_eq!(reopened.files().unwrap().into_iter().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_rejects_non_utf8_records() {
        let broker = MemoryBroker::new();
        broker
            .producer()
            .unwrap()
            .send(FILE_SYSTEM_INDEX_TOPIC, Bytes::from_static(&[0xff, 0xfe]))
            .unwrap();

        assert!(matches!(
            registry(&broker).files(),
            Err(Error::Corruption(_))
        ));
    }
}
