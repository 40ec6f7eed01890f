//! File operations on top of a log broker
//!
//! Every file maps onto two topics: a data topic holding the file's bytes
//! in records of at most `chunk_size` bytes, and an index topic holding the
//! file's blob catalog (see [`TopicIndex`]). A single shared topic
//! registers all file paths (see [`FileSystemIndex`]).
//!
//! Writes always append. Ranged deletion is emulated on top of prefix-only
//! truncation:
//!
//! 1. compute, per partition, the offset just past the highest doomed blob
//! 2. read every surviving blob into memory
//! 3. truncate the data topic's partitions up to those offsets
//! 4. drop all affected blobs from the catalog
//! 5. append the buffered survivors again
//!
//! A crash between steps 3 and 5 loses the survivors.

use crate::broker::{Broker, Consumer, ConsumerOptions, Producer, RecordsToDelete, TopicPartition};
use crate::config::ConnectorConfig;
use crate::index::{index_topic_name, FileSystemIndex, TopicIndex};
use crate::model::{Blob, StorePath, SEPARATOR};
use crate::validate::{is_topic_char, PathValidator, TopicNameValidator};
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Data topic name of a path: every character outside `[a-zA-Z0-9._-]`,
/// the separator included, becomes `_`
pub fn topic_name(path: &StorePath) -> String {
    path.full_qualified_name()
        .chars()
        .map(|c| if is_topic_char(c) { c } else { '_' })
        .collect()
}

/// Direct children of a directory
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryListing {
    /// Names of subdirectories holding at least one file, sorted
    pub directories: Vec<String>,
    /// Names of files, sorted
    pub files: Vec<String>,
}

type SharedConsumer = Arc<Mutex<Box<dyn Consumer>>>;

/// Memoized answers, keyed by full qualified name
#[derive(Default)]
struct MetadataCache {
    directory_exists: HashMap<String, bool>,
    file_exists: HashMap<String, bool>,
    file_size: HashMap<String, u64>,
}

/// Blob-store connector for a log broker
///
/// All operations block the calling thread for their broker round trips.
/// Operations on different files only contend briefly on the resource
/// caches; reads of the same file share one consumer and are serialized
/// on it.
pub struct Connector {
    broker: Arc<dyn Broker>,
    config: ConnectorConfig,
    validator: Box<dyn PathValidator>,
    open: AtomicBool,
    file_system_index: FileSystemIndex,
    topic_indices: Mutex<HashMap<String, Arc<TopicIndex>>>,
    consumers: Mutex<HashMap<String, SharedConsumer>>,
    producers: Mutex<HashMap<String, Arc<dyn Producer>>>,
    cache: Option<Mutex<MetadataCache>>,
}

impl Connector {
    /// Create a connector on top of a broker
    pub fn new(broker: Arc<dyn Broker>, config: ConnectorConfig) -> Result<Self> {
        config.validate()?;

        let file_system_index = FileSystemIndex::new(Arc::clone(&broker), config.scan_settings());
        let cache = config.use_cache.then(|| Mutex::new(MetadataCache::default()));

        Ok(Connector {
            broker,
            validator: Box::new(TopicNameValidator),
            open: AtomicBool::new(true),
            file_system_index,
            topic_indices: Mutex::new(HashMap::new()),
            consumers: Mutex::new(HashMap::new()),
            producers: Mutex::new(HashMap::new()),
            cache,
            config,
        })
    }

    /// Replace the path validator
    pub fn with_validator(mut self, validator: impl PathValidator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// The registry of all file paths
    pub fn file_system_index(&self) -> &FileSystemIndex {
        &self.file_system_index
    }

    /// The blob catalog of a file
    pub fn topic_index(&self, file: &StorePath) -> Result<Arc<TopicIndex>> {
        self.check(file)?;
        Ok(self.index_for(file))
    }

    /// Blobs of a file in byte order
    pub fn blobs(&self, file: &StorePath) -> Result<Vec<Blob>> {
        self.check(file)?;
        self.index_for(file).get()
    }

    // === Queries ===

    /// Total size of a file in bytes
    pub fn file_size(&self, file: &StorePath) -> Result<u64> {
        self.check(file)?;
        let key = file.full_qualified_name();
        if let Some(size) = self.with_cache(|c| c.file_size.get(&key).copied()).flatten() {
            return Ok(size);
        }

        let size = self.internal_file_size(file)?;
        self.with_cache(|c| c.file_size.insert(key, size));
        Ok(size)
    }

    /// Whether a file holds at least one blob
    pub fn file_exists(&self, file: &StorePath) -> Result<bool> {
        self.check(file)?;
        let key = file.full_qualified_name();
        if let Some(exists) = self.with_cache(|c| c.file_exists.get(&key).copied()).flatten() {
            return Ok(exists);
        }

        let exists = !self.index_for(file).get()?.is_empty();
        self.with_cache(|c| c.file_exists.insert(key, exists));
        Ok(exists)
    }

    /// Directories only exist implicitly, so every directory exists
    pub fn directory_exists(&self, directory: &StorePath) -> Result<bool> {
        self.check(directory)?;
        let key = directory.full_qualified_name();
        if let Some(exists) = self
            .with_cache(|c| c.directory_exists.get(&key).copied())
            .flatten()
        {
            return Ok(exists);
        }

        self.with_cache(|c| c.directory_exists.insert(key, true));
        Ok(true)
    }

    /// Direct children of a directory
    pub fn list(&self, directory: &StorePath) -> Result<DirectoryListing> {
        self.check(directory)?;
        let prefix = format!("{}{}", directory.full_qualified_name(), SEPARATOR);

        let mut directories = BTreeSet::new();
        let mut files = BTreeSet::new();
        for key in self.file_system_index.files()? {
            let Some(rest) = key.strip_prefix(prefix.as_str()) else {
                continue;
            };
            match rest.split_once(SEPARATOR) {
                Some((name, _)) => directories.insert(name.to_string()),
                None => files.insert(rest.to_string()),
            };
        }

        Ok(DirectoryListing {
            directories: directories.into_iter().collect(),
            files: files.into_iter().collect(),
        })
    }

    /// Whether no registered file lives below a directory
    pub fn is_empty(&self, directory: &StorePath) -> Result<bool> {
        self.check(directory)?;
        let prefix = format!("{}{}", directory.full_qualified_name(), SEPARATOR);
        Ok(!self
            .file_system_index
            .files()?
            .iter()
            .any(|key| key.starts_with(prefix.as_str())))
    }

    // === Creation ===

    /// Directories come into being with the files below them
    pub fn create_directory(&self, directory: &StorePath) -> Result<bool> {
        self.check(directory)?;
        let key = directory.full_qualified_name();
        self.with_cache(|c| c.directory_exists.insert(key, true));
        Ok(true)
    }

    /// Files come into being with their first write
    pub fn create_file(&self, file: &StorePath) -> Result<bool> {
        self.check(file)?;
        Ok(true)
    }

    // === Reading ===

    /// Read `length` bytes starting at `offset`
    ///
    /// Reading past the end returns only the bytes that exist.
    pub fn read_data(&self, file: &StorePath, offset: u64, length: u64) -> Result<Bytes> {
        self.check(file)?;
        if length == 0 {
            return Ok(Bytes::new());
        }

        let mut target = BytesMut::new();
        self.internal_read_data(file, &mut target, offset, Some(length))?;
        Ok(target.freeze())
    }

    /// Read a whole file
    pub fn read_all(&self, file: &StorePath) -> Result<Bytes> {
        self.check(file)?;
        let mut target = BytesMut::new();
        self.internal_read_data(file, &mut target, 0, None)?;
        Ok(target.freeze())
    }

    /// Append `length` bytes starting at `offset` to `target`, returning
    /// how many were read
    pub fn read_data_into(
        &self,
        file: &StorePath,
        target: &mut BytesMut,
        offset: u64,
        length: u64,
    ) -> Result<u64> {
        self.check(file)?;
        if length == 0 {
            return Ok(0);
        }
        self.internal_read_data(file, target, offset, Some(length))
    }

    // === Writing ===

    /// Append the concatenation of `sources` to a file
    pub fn write_data<B: AsRef<[u8]>>(&self, file: &StorePath, sources: &[B]) -> Result<u64> {
        self.check(file)?;
        let written = self.internal_write_data(file, sources)?;

        let key = file.full_qualified_name();
        self.with_cache(|c| {
            if written > 0 {
                c.file_exists.insert(key.clone(), true);
            }
            if let Some(size) = c.file_size.get_mut(&key) {
                *size += written;
            }
        });
        Ok(written)
    }

    /// Append a byte range of one file to another
    ///
    /// `length` of `None` copies everything from `offset` to the end.
    pub fn copy_file(
        &self,
        source: &StorePath,
        target: &StorePath,
        offset: u64,
        length: Option<u64>,
    ) -> Result<u64> {
        self.check(source)?;
        self.check(target)?;
        if length == Some(0) {
            return Ok(0);
        }

        let mut buffer = BytesMut::new();
        self.internal_read_data(source, &mut buffer, offset, length)?;
        if buffer.is_empty() {
            return Ok(0);
        }
        self.write_data(target, &[buffer.freeze()])
    }

    /// Copy a file, then delete the source
    pub fn move_file(&self, source: &StorePath, target: &StorePath) -> Result<()> {
        self.check(source)?;
        self.check(target)?;

        self.copy_file(source, target, 0, None)?;
        self.internal_delete_file(source)?;

        let key = source.full_qualified_name();
        self.with_cache(|c| {
            c.file_exists.insert(key.clone(), false);
            c.file_size.remove(&key);
        });
        Ok(())
    }

    // === Deletion ===

    /// Drop a file's topics and forget it. Returns whether the file existed.
    pub fn delete_file(&self, file: &StorePath) -> Result<bool> {
        self.check(file)?;
        let deleted = self.internal_delete_file(file)?;
        self.forget(file);
        Ok(deleted)
    }

    /// Remove blobs from a file, keeping the bytes of all other blobs
    ///
    /// Survivors are republished after the truncation and end up as new
    /// blobs at the end of the data topic, in their original byte order.
    pub fn delete_blobs(&self, file: &StorePath, blobs: &[Blob]) -> Result<bool> {
        self.check(file)?;
        let deleted = self.internal_delete_blobs(file, blobs)?;
        self.forget(file);
        Ok(deleted)
    }

    /// Cut a file down to `new_length` bytes
    pub fn truncate_file(&self, file: &StorePath, new_length: u64) -> Result<()> {
        if new_length == 0 {
            self.delete_file(file)?;
            return Ok(());
        }

        self.check(file)?;
        self.internal_truncate_file(file, new_length)?;

        let key = file.full_qualified_name();
        self.with_cache(|c| c.file_size.insert(key, new_length));
        Ok(())
    }

    /// Release every cached index, consumer and producer
    ///
    /// Later calls on this connector fail. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!("Closing connector");

        let mut first_error = None;
        let mut record = |result: Result<()>| {
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        };

        record(self.file_system_index.close());
        for (_, index) in self.topic_indices.lock().drain() {
            record(index.close());
        }
        for (_, consumer) in self.consumers.lock().drain() {
            record(consumer.lock().close());
        }
        for (_, producer) in self.producers.lock().drain() {
            record(producer.close());
        }
        if let Some(cache) = &self.cache {
            *cache.lock() = MetadataCache::default();
        }

        first_error.map_or(Ok(()), Err)
    }

    // === Internals ===

    fn check(&self, path: &StorePath) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Closed("connector".into()));
        }
        self.validator.validate(path)
    }

    fn with_cache<R>(&self, f: impl FnOnce(&mut MetadataCache) -> R) -> Option<R> {
        self.cache.as_ref().map(|cache| f(&mut *cache.lock()))
    }

    fn forget(&self, file: &StorePath) {
        let key = file.full_qualified_name();
        self.with_cache(|c| {
            c.file_exists.remove(&key);
            c.file_size.remove(&key);
        });
    }

    fn index_for(&self, file: &StorePath) -> Arc<TopicIndex> {
        let topic = topic_name(file);
        let mut indices = self.topic_indices.lock();
        let index = indices.entry(topic.clone()).or_insert_with(|| {
            tracing::debug!(topic = %topic, "Creating topic index");
            Arc::new(TopicIndex::new(
                Arc::clone(&self.broker),
                topic,
                self.config.scan_settings(),
            ))
        });
        Arc::clone(index)
    }

    fn consumer(&self, topic: &str) -> Result<SharedConsumer> {
        let mut consumers = self.consumers.lock();
        if let Some(consumer) = consumers.get(topic) {
            return Ok(Arc::clone(consumer));
        }

        tracing::debug!(topic = %topic, "Creating consumer");
        // one record per poll: a read only ever wants the record it seeked to
        let consumer = self.broker.consumer(ConsumerOptions {
            group_id: None,
            max_poll_records: 1,
        })?;
        let consumer = Arc::new(Mutex::new(consumer));
        consumers.insert(topic.to_string(), Arc::clone(&consumer));
        Ok(consumer)
    }

    fn producer(&self, topic: &str) -> Result<Arc<dyn Producer>> {
        let mut producers = self.producers.lock();
        if let Some(producer) = producers.get(topic) {
            return Ok(Arc::clone(producer));
        }

        tracing::debug!(topic = %topic, "Creating producer");
        let producer: Arc<dyn Producer> = Arc::from(self.broker.producer()?);
        producers.insert(topic.to_string(), Arc::clone(&producer));
        Ok(producer)
    }

    fn internal_file_size(&self, file: &StorePath) -> Result<u64> {
        Ok(self.index_for(file).get()?.iter().map(Blob::size).sum())
    }

    /// Copy `[offset, offset + length)` of one blob's record into `target`
    fn read_blob_data(
        &self,
        file: &StorePath,
        blob: &Blob,
        target: &mut BytesMut,
        offset: u64,
        length: u64,
    ) -> Result<()> {
        let topic = topic_name(file);
        let partition = TopicPartition::new(topic.as_str(), blob.partition());

        let shared = self.consumer(&topic)?;
        let records = {
            let mut consumer = shared.lock();
            consumer.assign(&partition)?;
            consumer.seek(&partition, blob.offset())?;

            let mut attempts = 0;
            loop {
                let records = consumer.poll(self.config.poll_timeout())?;
                if !records.is_empty() {
                    break records;
                }
                attempts += 1;
                if attempts >= self.config.poll_attempts {
                    return Err(Error::NoDataAvailable {
                        file: file.full_qualified_name(),
                        offset,
                        length,
                    });
                }
                tracing::warn!(
                    partition = %partition,
                    offset = blob.offset(),
                    attempt = attempts,
                    "Empty poll, retrying"
                );
            }
        };

        let record = &records[0];
        if record.offset != blob.offset() {
            return Err(Error::Corruption(format!(
                "expected record {} of {}, got {}",
                blob.offset(),
                partition,
                record.offset
            )));
        }

        let from = offset as usize;
        let to = from + length as usize;
        if to > record.payload.len() {
            return Err(Error::Corruption(format!(
                "record {} of {} holds {} bytes, needed {}",
                record.offset,
                partition,
                record.payload.len(),
                to
            )));
        }
        target.extend_from_slice(&record.payload[from..to]);
        Ok(())
    }

    /// Walk the catalog in byte order, reading the parts that overlap the range
    fn internal_read_data(
        &self,
        file: &StorePath,
        target: &mut BytesMut,
        offset: u64,
        length: Option<u64>,
    ) -> Result<u64> {
        let blobs = self.index_for(file).get()?;
        let total: u64 = blobs.iter().map(Blob::size).sum();
        let available = total.saturating_sub(offset);
        let mut remaining = length.map_or(available, |l| l.min(available));
        target.reserve(remaining as usize);

        let mut skipped = 0u64;
        let mut read = 0u64;
        for blob in &blobs {
            if remaining == 0 {
                break;
            }
            let size = blob.size();
            if skipped + size <= offset {
                skipped += size;
                continue;
            }

            let blob_offset = if skipped < offset {
                let inner = offset - skipped;
                skipped = offset;
                inner
            } else {
                0
            };
            let amount = (size - blob_offset).min(remaining);
            self.read_blob_data(file, blob, target, blob_offset, amount)?;
            remaining -= amount;
            read += amount;
        }

        Ok(read)
    }

    fn internal_write_data<B: AsRef<[u8]>>(&self, file: &StorePath, sources: &[B]) -> Result<u64> {
        let total: u64 = sources.iter().map(|s| s.as_ref().len() as u64).sum();
        let plan = chunk_plan(total, self.config.chunk_size)?;

        let topic = topic_name(file);
        let producer = self.producer(&topic)?;
        let index = self.index_for(file);
        let mut cursor = self.internal_file_size(file)?;

        let mut blobs = Vec::with_capacity(plan.len());
        let mut pending: &[u8] = &[];
        let mut rest = sources.iter();
        for size in plan {
            let mut chunk = BytesMut::with_capacity(size);
            while chunk.len() < size {
                if pending.is_empty() {
                    match rest.next() {
                        Some(source) => pending = source.as_ref(),
                        None => break,
                    }
                    continue;
                }
                let take = (size - chunk.len()).min(pending.len());
                chunk.extend_from_slice(&pending[..take]);
                pending = &pending[take..];
            }

            let metadata = producer.send(&topic, chunk.freeze())?;
            let start = cursor as i64;
            blobs.push(Blob::new(
                topic.as_str(),
                metadata.partition,
                metadata.offset,
                start,
                start + size as i64 - 1,
            )?);
            cursor += size as u64;
        }
        producer.flush()?;

        self.file_system_index.put(&file.full_qualified_name())?;
        index.put(&blobs)?;

        tracing::debug!(
            file = %file,
            bytes = total,
            blobs = blobs.len(),
            "Wrote data"
        );
        Ok(total)
    }

    fn internal_delete_file(&self, file: &StorePath) -> Result<bool> {
        let path = file.full_qualified_name();
        let topic = topic_name(file);

        let has_blobs = !self.index_for(file).get()?.is_empty();
        if !has_blobs && !self.file_system_index.contains(&path)? {
            return Ok(false);
        }

        let index_topic = index_topic_name(&topic);
        match self.broker.delete_topics(&[topic.as_str(), index_topic.as_str()]) {
            Ok(()) => {}
            Err(Error::UnknownTopic(missing)) => {
                tracing::warn!(file = %file, topics = %missing, "Topics already gone");
            }
            Err(e) => return Err(e),
        }

        let (index, consumer, producer, unregistered) = {
            let mut indices = self.topic_indices.lock();
            let mut consumers = self.consumers.lock();
            let mut producers = self.producers.lock();
            (
                indices.remove(&topic),
                consumers.remove(&topic),
                producers.remove(&topic),
                self.file_system_index.delete(&path),
            )
        };

        // evicted entries are unreachable, close them before reporting a registry failure
        if let Some(index) = index {
            index.close()?;
        }
        if let Some(consumer) = consumer {
            consumer.lock().close()?;
        }
        if let Some(producer) = producer {
            producer.close()?;
        }
        unregistered?;

        tracing::info!(file = %file, topic = %topic, "Deleted file");
        Ok(true)
    }

    fn internal_delete_blobs(&self, file: &StorePath, doomed: &[Blob]) -> Result<bool> {
        if doomed.is_empty() {
            return Ok(false);
        }

        let topic = topic_name(file);
        if let Some(foreign) = doomed.iter().find(|blob| blob.topic() != topic) {
            return Err(Error::InvalidArgument(format!(
                "blob of topic '{}' does not belong to {}",
                foreign.topic(),
                file
            )));
        }

        let index = self.index_for(file);
        let doomed_set: HashSet<&Blob> = doomed.iter().collect();
        let survivors: Vec<Blob> = index
            .get()?
            .into_iter()
            .filter(|blob| !doomed_set.contains(blob))
            .collect();
        let truncation = delete_before_offsets(doomed);

        // buffered first: truncation also takes survivors below the thresholds
        let staged = self.stage_blobs(file, &survivors)?;

        tracing::info!(
            file = %file,
            deleted = doomed.len(),
            survivors = survivors.len(),
            "Truncating data topic"
        );
        let request: BTreeMap<i32, RecordsToDelete> = truncation
            .iter()
            .map(|(partition, offset)| (*partition, RecordsToDelete::BeforeOffset(*offset)))
            .collect();
        self.broker.delete_records(&topic, &request)?;

        // survivors are appended again below, so the catalog drops them too
        let mut catalog_truncation = truncation;
        for blob in &survivors {
            let threshold = catalog_truncation.entry(blob.partition()).or_insert(0);
            *threshold = (*threshold).max(blob.offset() + 1);
        }
        index.delete(&catalog_truncation)?;

        if !staged.is_empty() {
            self.internal_write_data(file, &staged)?;
        }
        Ok(true)
    }

    fn stage_blobs(&self, file: &StorePath, blobs: &[Blob]) -> Result<Vec<Bytes>> {
        blobs
            .iter()
            .map(|blob| {
                let mut buffer = BytesMut::with_capacity(blob.size() as usize);
                self.read_blob_data(file, blob, &mut buffer, 0, blob.size())?;
                Ok(buffer.freeze())
            })
            .collect()
    }

    fn internal_truncate_file(&self, file: &StorePath, new_length: u64) -> Result<()> {
        let blobs = self.index_for(file).get()?;
        let size: u64 = blobs.iter().map(Blob::size).sum();
        if new_length > size {
            return Err(Error::InvalidArgument(format!(
                "new length {} > file length {}",
                new_length, size
            )));
        }
        if new_length == size {
            return Ok(());
        }
        if new_length == 1 {
            return Err(Error::InvalidArgument(
                "a file cannot be truncated to a single byte".into(),
            ));
        }

        let mut position = 0u64;
        for (i, blob) in blobs.iter().enumerate() {
            let blob_size = blob.size();
            if new_length >= position + blob_size {
                position += blob_size;
                continue;
            }

            let mut head = new_length - position;
            let mut first = i;
            // a one-byte head cannot stand alone, carry the previous blob with it
            if head == 1 {
                first = i - 1;
                position -= blobs[first].size();
                head += blobs[first].size();
            }

            let mut buffer = BytesMut::with_capacity(head as usize);
            self.internal_read_data(file, &mut buffer, position, Some(head))?;
            self.internal_delete_blobs(file, &blobs[first..])?;
            if !buffer.is_empty() {
                self.internal_write_data(file, &[buffer.freeze()])?;
            }
            return Ok(());
        }

        Ok(())
    }
}

impl Drop for Connector {
    fn drop(&mut self) {
        // Best-effort release on drop
        let _ = self.close();
    }
}

/// Per partition, the offset just past the highest given blob
fn delete_before_offsets(blobs: &[Blob]) -> BTreeMap<i32, i64> {
    let mut offsets = BTreeMap::new();
    for blob in blobs {
        let threshold = offsets.entry(blob.partition()).or_insert(0);
        *threshold = (*threshold).max(blob.offset() + 1);
    }
    offsets
}

/// Sizes of the records a write of `total` bytes is split into
///
/// Every record but the last is `chunk_size` bytes. A one-byte tail would
/// make an invalid blob, so it borrows a byte from the record before it.
fn chunk_plan(total: u64, chunk_size: usize) -> Result<Vec<usize>> {
    if total == 1 {
        return Err(Error::InvalidBlob(
            "a single byte cannot be stored as a blob".into(),
        ));
    }

    let mut plan = Vec::new();
    let mut remaining = total;
    while remaining > 0 {
        let size = remaining.min(chunk_size as u64) as usize;
        plan.push(size);
        remaining -= size as u64;
    }

    let n = plan.len();
    if n > 1 && plan[n - 1] == 1 {
        plan[n - 2] -= 1;
        plan[n - 1] += 1;
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::testing::FaultyBroker;

    #[test]
    fn test_topic_name() {
        let path = StorePath::parse("a/b/c.txt").unwrap();
        assert_eq!(topic_name(&path), "a_b_c.txt");

        let path = StorePath::new("store", ["na me*", "ü.dat"]);
        assert_eq!(topic_name(&path), "store_na_me___.dat");
    }

    #[test]
    fn test_topic_name_is_idempotent() {
        let path = StorePath::new("s", ["weird name!", "x?y"]);
        let once = topic_name(&path);
        let twice = topic_name(&StorePath::parse(&once).unwrap());
        assert_eq!(once, twice);
        assert!(once.chars().all(is_topic_char));
    }

    #[test]
    fn test_chunk_plan() {
        assert_eq!(
            chunk_plan(2_500_000, 1_000_000).unwrap(),
            vec![1_000_000, 1_000_000, 500_000]
        );
        assert_eq!(chunk_plan(1_000_000, 1_000_000).unwrap(), vec![1_000_000]);
        assert!(chunk_plan(0, 10).unwrap().is_empty());
    }

    #[test]
    fn test_chunk_plan_avoids_one_byte_tail() {
        assert_eq!(chunk_plan(21, 10).unwrap(), vec![10, 9, 2]);
        assert!(matches!(chunk_plan(1, 10), Err(Error::InvalidBlob(_))));
    }

    #[test]
    fn test_delete_file_closes_evicted_resources_on_failure() {
        let broker = crate::broker::MemoryBroker::new();
        let faulty = FaultyBroker::new(broker.clone()).fail_truncations(1);
        let config = ConnectorConfig {
            chunk_size: 10,
            ..ConnectorConfig::default()
        };
        let connector = Connector::new(Arc::new(faulty), config).unwrap();
        let file = StorePath::parse("store/doomed").unwrap();
        connector.write_data(&file, &[b"0123456789".as_slice()]).unwrap();
        assert_eq!(&connector.read_all(&file).unwrap()[..], b"0123456789");

        let topic = topic_name(&file);
        let producer = connector.producer(&topic).unwrap();
        let consumer = connector.consumer(&topic).unwrap();

        // unregistering the path truncates the registry log, which fails
        assert!(matches!(connector.delete_file(&file), Err(Error::Broker(_))));

        assert!(connector.producers.lock().is_empty());
        assert!(connector.consumers.lock().is_empty());
        assert!(matches!(
            producer.send(&topic, Bytes::from_static(b"xx")),
            Err(Error::Closed(_))
        ));
        assert!(matches!(
            consumer.lock().assign(&TopicPartition::new(topic.as_str(), 0)),
            Err(Error::Closed(_))
        ));
        assert!(!broker.topic_exists(&topic));
    }

    #[test]
    fn test_delete_before_offsets() {
        let blobs = vec![
            Blob::new("t", 0, 4, 0, 9).unwrap(),
            Blob::new("t", 0, 2, 10, 19).unwrap(),
            Blob::new("t", 1, 7, 20, 29).unwrap(),
        ];
        let offsets = delete_before_offsets(&blobs);
        assert_eq!(offsets.get(&0), Some(&5));
        assert_eq!(offsets.get(&1), Some(&8));
        assert_eq!(offsets.len(), 2);
    }
}
