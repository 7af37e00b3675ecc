//! References into the chunk store

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Pointer to a byte region inside one chunk
///
/// Stable for the lifetime of the store that issued it: a reference always
/// resolves to the same bytes, before and after its chunk is sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinaryReference {
    /// Index of the chunk the bytes live in
    pub buffer_index: u32,
    /// Byte offset inside the chunk
    pub offset: u32,
    /// Length of the region
    pub length: u32,
}

impl BinaryReference {
    /// Create a reference
    #[inline]
    #[must_use]
    pub const fn new(buffer_index: u32, offset: u32, length: u32) -> Self {
        Self {
            buffer_index,
            offset,
            length,
        }
    }

    /// Exclusive end offset of the region
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset as u64 + self.length as u64
    }

    /// Whether the region is empty
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }
}

impl Display for BinaryReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}+{}", self.buffer_index, self.offset, self.length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_accessors() {
        let r = BinaryReference::new(2, 100, 50);
        assert_eq!(r.end(), 150);
        assert!(!r.is_empty());
        assert!(BinaryReference::new(0, 0, 0).is_empty());
    }

    #[test]
    fn reference_display() {
        assert_eq!(BinaryReference::new(1, 2, 3).to_string(), "1:2+3");
    }

    #[test]
    fn reference_serde_round_trip() {
        let r = BinaryReference::new(7, 8, 9);
        let json = serde_json::to_string(&r).unwrap();
        let back: BinaryReference = serde_json::from_str(&json).unwrap();
        assert_eq!(r, back);
    }
}
