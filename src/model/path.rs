//! Hierarchical paths of files and directories in a store

use crate::{Error, Result};
use std::fmt;

/// Separator between path elements
pub const SEPARATOR: char = '/';

/// A container-rooted path, e.g. `storage/channel_0/transactions.dat`
///
/// The first element is the container; there is always at least one element.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath {
    elements: Vec<String>,
}

impl StorePath {
    /// Create a path from a container and the elements below it
    pub fn new<I, S>(container: impl Into<String>, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut all = vec![container.into()];
        all.extend(elements.into_iter().map(Into::into));
        StorePath { elements: all }
    }

    /// Parse a `/`-separated path, ignoring empty segments
    pub fn parse(path: &str) -> Result<Self> {
        let elements: Vec<String> = path
            .split(SEPARATOR)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if elements.is_empty() {
            return Err(Error::InvalidPath(format!("empty path: '{}'", path)));
        }

        Ok(StorePath { elements })
    }

    pub fn elements(&self) -> &[String] {
        &self.elements
    }

    pub fn container(&self) -> &str {
        &self.elements[0]
    }

    /// Last element: the file or directory name
    pub fn name(&self) -> &str {
        &self.elements[self.elements.len() - 1]
    }

    /// All elements joined by the separator
    pub fn full_qualified_name(&self) -> String {
        self.elements.join("/")
    }

    /// The enclosing directory, or `None` for a bare container
    pub fn parent(&self) -> Option<StorePath> {
        if self.elements.len() < 2 {
            return None;
        }
        Some(StorePath {
            elements: self.elements[..self.elements.len() - 1].to_vec(),
        })
    }

    /// A path one level below this one
    pub fn child(&self, name: impl Into<String>) -> StorePath {
        let mut elements = self.elements.clone();
        elements.push(name.into());
        StorePath { elements }
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_qualified_name())
    }
}

impl fmt::Debug for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorePath({})", self.full_qualified_name())
    }
}
