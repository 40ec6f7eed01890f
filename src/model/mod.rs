//! Core data model types for logfs

mod blob;
mod path;

pub use blob::{Blob, BLOB_RECORD_SIZE};
pub use path::{StorePath, SEPARATOR};
