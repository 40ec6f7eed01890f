//! Path validation
//!
//! Paths end up as broker topic names, which only allow a small character
//! set and a bounded length.

use crate::model::StorePath;
use crate::{Error, Result};

/// Longest topic name a broker accepts
pub const MAX_TOPIC_NAME_LENGTH: usize = 249;

/// Syntactic check run before a path is used
pub trait PathValidator: Send + Sync {
    fn validate(&self, path: &StorePath) -> Result<()>;
}

/// Characters allowed in a topic name: `[a-zA-Z0-9._-]`
pub fn is_topic_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Accepts paths that map onto legal topic names
#[derive(Clone, Copy, Debug, Default)]
pub struct TopicNameValidator;

impl PathValidator for TopicNameValidator {
    fn validate(&self, path: &StorePath) -> Result<()> {
        for element in path.elements() {
            if element.is_empty() {
                return Err(Error::InvalidPath(format!("'{}' has an empty element", path)));
            }
            if let Some(c) = element.chars().find(|c| !is_topic_char(*c)) {
                return Err(Error::InvalidPath(format!(
                    "'{}' contains illegal character {:?}, allowed are [a-zA-Z0-9._-]",
                    path, c
                )));
            }
        }

        // Separators become '_', one character each
        let length = path.full_qualified_name().chars().count();
        if length > MAX_TOPIC_NAME_LENGTH {
            return Err(Error::InvalidPath(format!(
                "'{}' exceeds max length of {} ({})",
                path, MAX_TOPIC_NAME_LENGTH, length
            )));
        }

        Ok(())
    }
}
