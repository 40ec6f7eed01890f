//! # logfs
//!
//! File semantics on top of an append-only, partitioned log broker.
//!
//! A file is stored as a sequence of immutable blobs, each one a record of
//! the file's data topic. The order of the blobs lives in a second,
//! single-partition index topic; a shared registry topic knows every file
//! path. All metadata is rebuilt by replaying those topics, so the broker
//! is the only state there is.
//!
//! ## Core Concepts
//!
//! - **Blob**: a byte range of a file, located at one record of its data topic
//! - **TopicIndex**: the ordered blob catalog of a single file
//! - **FileSystemIndex**: the set of all registered file paths
//! - **Connector**: read, write, list, copy, move, truncate and delete files
//!
//! ## Example
//!
//! ```ignore
//! use logfs::{Connector, ConnectorConfig, MemoryBroker, StorePath};
//! use std::sync::Arc;
//!
//! let connector = Connector::new(Arc::new(MemoryBroker::new()), ConnectorConfig::default())?;
//! let file = StorePath::parse("store/ledger/block_0.dat")?;
//! connector.write_data(&file, &[b"hello".as_slice()])?;
//! assert_eq!(&connector.read_all(&file)?[..], b"hello");
//! ```

pub mod broker;
pub mod config;
pub mod index;
pub mod model;
pub mod validate;

mod connector;
mod error;

pub use broker::{
    Broker, Consumer, ConsumerOptions, MemoryBroker, Producer, Record, RecordMetadata,
    RecordsToDelete, TopicPartition,
};
pub use config::ConnectorConfig;
pub use connector::{topic_name, Connector, DirectoryListing};
pub use error::{Error, Result};
pub use index::{index_topic_name, FileSystemIndex, TopicIndex, FILE_SYSTEM_INDEX_TOPIC};
pub use model::{Blob, StorePath, BLOB_RECORD_SIZE};
pub use validate::{PathValidator, TopicNameValidator};
