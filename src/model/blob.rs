//! Blob type - one broker record holding one contiguous byte range of a file

use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of a blob's index record in bytes
///
/// ```text
/// [0..4)   partition        i32 BE
/// [4..12)  record offset    i64 BE
/// [12..20) logical start    i64 BE
/// [20..28) logical end      i64 BE
/// ```
pub const BLOB_RECORD_SIZE: usize = 28;

/// Descriptor of one physical record in a file's data topic
///
/// The logical range `[start, end]` is inclusive on both ends and
/// `start < end` is enforced, so a blob always covers at least two bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Blob {
    topic: String,
    partition: i32,
    offset: i64,
    start: i64,
    end: i64,
}

impl Blob {
    /// Create a new blob, rejecting empty or negative ranges
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        start: i64,
        end: i64,
    ) -> Result<Self> {
        if start < 0 {
            return Err(Error::InvalidBlob(format!("start must be >= 0, got {}", start)));
        }
        if end <= start {
            return Err(Error::InvalidBlob(format!(
                "end must be > start, got start={} end={}",
                start, end
            )));
        }

        Ok(Blob {
            topic: topic.into(),
            partition,
            offset,
            start,
            end,
        })
    }

    /// Data topic the record lives in
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Broker-assigned offset of the record within its partition
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// First logical byte position covered
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Last logical byte position covered (inclusive)
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Number of bytes the blob holds
    pub fn size(&self) -> u64 {
        (self.end - self.start) as u64 + 1
    }

    /// Encode as a fixed-width index record
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(BLOB_RECORD_SIZE);
        buf.put_i32(self.partition);
        buf.put_i64(self.offset);
        buf.put_i64(self.start);
        buf.put_i64(self.end);
        buf.freeze()
    }

    /// Decode an index record, attaching it to the given data topic
    pub fn decode(topic: impl Into<String>, payload: &[u8]) -> Result<Self> {
        if payload.len() != BLOB_RECORD_SIZE {
            return Err(Error::Corruption(format!(
                "blob record must be {} bytes, got {}",
                BLOB_RECORD_SIZE,
                payload.len()
            )));
        }

        let mut buf = payload;
        let partition = buf.get_i32();
        let offset = buf.get_i64();
        let start = buf.get_i64();
        let end = buf.get_i64();

        Blob::new(topic, partition, offset, start, end)
            .map_err(|e| Error::Corruption(format!("bad blob record: {}", e)))
    }
}
