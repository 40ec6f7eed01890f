//! Log-backed metadata: the per-file blob catalogs and the path registry

mod file_system_index;
mod scan;
mod topic_index;

pub use file_system_index::{FileSystemIndex, FILE_SYSTEM_INDEX_TOPIC};
pub use topic_index::{index_topic_name, TopicIndex};
