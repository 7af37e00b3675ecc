//! Structured path reads over JSON log bodies
//!
//! Provides [`LogReader`], a cheap cursor into a `serde_json::Value` that
//! resolves dotted paths (`protoPayload.methodName`) to typed scalars or
//! sub-readers.

use serde_json::Value;
use std::sync::Arc;

/// Errors raised by typed reads
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// No value at the requested path
    #[error("no value at path '{0}'")]
    Missing(String),

    /// Value exists but has a different JSON type
    #[error("value at '{path}' is not a {expected}")]
    WrongType {
        path: String,
        expected: &'static str,
    },
}

/// Read cursor over a shared JSON document
///
/// Cloning is cheap: the underlying document is shared, the cursor only
/// remembers the path prefix it is anchored at.
#[derive(Debug, Clone)]
pub struct LogReader {
    root: Arc<Value>,
    prefix: Vec<String>,
}

impl LogReader {
    /// Anchor a reader at the root of a document
    #[inline]
    #[must_use]
    pub fn new(root: Arc<Value>) -> Self {
        Self {
            root,
            prefix: Vec::new(),
        }
    }

    /// Wrap an owned value
    #[inline]
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        Self::new(Arc::new(value))
    }

    fn resolve(&self, path: &str) -> Option<&Value> {
        let mut cur: &Value = &self.root;
        for seg in self.prefix.iter().map(String::as_str) {
            cur = cur.get(seg)?;
        }
        if path.is_empty() {
            return Some(cur);
        }
        for seg in path.split('.') {
            cur = match cur {
                Value::Object(map) => map.get(seg)?,
                Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Raw value at `path`, if any
    #[must_use]
    pub fn value(&self, path: &str) -> Option<&Value> {
        self.resolve(path)
    }

    /// Whether anything exists at `path`
    #[inline]
    #[must_use]
    pub fn has(&self, path: &str) -> bool {
        self.resolve(path).is_some()
    }

    /// Sub-reader anchored at `path`
    ///
    /// Returns `None` when nothing exists there.
    #[must_use]
    pub fn reader(&self, path: &str) -> Option<LogReader> {
        self.resolve(path)?;
        let mut prefix = self.prefix.clone();
        prefix.extend(path.split('.').map(str::to_string));
        Some(LogReader {
            root: Arc::clone(&self.root),
            prefix,
        })
    }

    /// String at `path`
    ///
    /// # Errors
    /// [`ReadError::Missing`] or [`ReadError::WrongType`].
    pub fn read_str(&self, path: &str) -> Result<&str, ReadError> {
        match self.resolve(path) {
            None => Err(ReadError::Missing(path.to_string())),
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(ReadError::WrongType {
                path: path.to_string(),
                expected: "string",
            }),
        }
    }

    /// String at `path`, or `default` when missing or mistyped
    #[must_use]
    pub fn read_str_or<'a>(&'a self, path: &str, default: &'a str) -> &'a str {
        self.read_str(path).unwrap_or(default)
    }

    /// Integer at `path`
    ///
    /// # Errors
    /// [`ReadError::Missing`] or [`ReadError::WrongType`].
    pub fn read_i64(&self, path: &str) -> Result<i64, ReadError> {
        match self.resolve(path) {
            None => Err(ReadError::Missing(path.to_string())),
            Some(Value::Number(n)) => n.as_i64().ok_or(ReadError::WrongType {
                path: path.to_string(),
                expected: "integer",
            }),
            Some(_) => Err(ReadError::WrongType {
                path: path.to_string(),
                expected: "integer",
            }),
        }
    }

    /// Boolean at `path`
    ///
    /// # Errors
    /// [`ReadError::Missing`] or [`ReadError::WrongType`].
    pub fn read_bool(&self, path: &str) -> Result<bool, ReadError> {
        match self.resolve(path) {
            None => Err(ReadError::Missing(path.to_string())),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(ReadError::WrongType {
                path: path.to_string(),
                expected: "boolean",
            }),
        }
    }

    /// Elements of the array at `path`, each wrapped in its own reader
    #[must_use]
    pub fn read_array(&self, path: &str) -> Option<Vec<LogReader>> {
        match self.resolve(path)? {
            Value::Array(items) => Some(
                (0..items.len())
                    .map(|i| {
                        let mut prefix = self.prefix.clone();
                        if !path.is_empty() {
                            prefix.extend(path.split('.').map(str::to_string));
                        }
                        prefix.push(i.to_string());
                        LogReader {
                            root: Arc::clone(&self.root),
                            prefix,
                        }
                    })
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Clone of the value this reader is anchored at
    #[must_use]
    pub fn to_value(&self) -> Option<Value> {
        self.resolve("").cloned()
    }
}
