//! Object graph paths

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// A logical path into the object graph, e.g. `/root/world`.
///
/// The empty path means "unset".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath(String);

impl NodePath {
    /// The unset path
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Wrap a path without validating it
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Parse a path that must be absolute or empty
    pub fn parse_root(path: impl Into<String>) -> CoreResult<Self> {
        let path = Self(path.into());
        if !path.is_empty() && !path.is_absolute() {
            return Err(CoreError::InvalidParameter(format!(
                "Root path must be absolute: {}",
                path
            )));
        }
        Ok(path)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_absolute(&self) -> bool {
        self.0.starts_with('/')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodePath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}
