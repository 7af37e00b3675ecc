//! Heterogeneous typed maps
//!
//! Keys carry their value type at compile time and are unique by string
//! identity across the process; registering two keys with the same name and
//! different types is a programming error and surfaces as a failed typed
//! read.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::warn;

/// Typed key into a [`TypedMap`] or label set
pub struct TypedKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedKey<T> {
    /// Key named `name`
    #[inline]
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// The key's unique name
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for TypedKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TypedKey<T> {}

/// Concurrent heterogeneous map
///
/// Two instances exist per process: the global shared map (process
/// lifetime) and the inspection shared map (one per run).
#[derive(Default)]
pub struct TypedMap {
    entries: RwLock<HashMap<&'static str, Arc<dyn Any + Send + Sync>>>,
}

impl TypedMap {
    /// Empty map
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any prior value
    pub fn insert<T: Send + Sync + 'static>(&self, key: TypedKey<T>, value: T) {
        self.insert_arc(key, Arc::new(value));
    }

    /// Store an already-shared value under `key`
    pub fn insert_arc<T: Send + Sync + 'static>(&self, key: TypedKey<T>, value: Arc<T>) {
        self.entries.write().insert(key.name, value);
    }

    /// Typed read of `key`
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self, key: TypedKey<T>) -> Option<Arc<T>> {
        let entry = self.entries.read().get(key.name)?.clone();
        match entry.downcast::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(key = key.name, "typed map entry has an unexpected type");
                None
            }
        }
    }

    /// Typed read, inserting the result of `init` when absent
    #[must_use]
    pub fn get_or_insert_with<T: Send + Sync + 'static>(
        &self,
        key: TypedKey<T>,
        init: impl FnOnce() -> T,
    ) -> Arc<T> {
        if let Some(existing) = self.get(key) {
            return existing;
        }
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(key.name) {
            if let Ok(value) = existing.clone().downcast::<T>() {
                return value;
            }
        }
        let value = Arc::new(init());
        entries.insert(key.name, Arc::clone(&value) as Arc<dyn Any + Send + Sync>);
        value
    }

    /// Whether anything is stored under `name`
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }
}

impl std::fmt::Debug for TypedMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<_> = self.entries.read().keys().copied().collect();
        f.debug_struct("TypedMap").field("keys", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static COUNTER: TypedKey<u64> = TypedKey::new("test/counter");
    static NAME: TypedKey<String> = TypedKey::new("test/name");

    #[test]
    fn insert_and_get() {
        let map = TypedMap::new();
        map.insert(COUNTER, 7);
        assert_eq!(*map.get(COUNTER).unwrap(), 7);
        assert!(map.get(NAME).is_none());
        assert!(map.contains("test/counter"));
    }

    #[test]
    fn replace_value() {
        let map = TypedMap::new();
        map.insert(COUNTER, 1);
        map.insert(COUNTER, 2);
        assert_eq!(*map.get(COUNTER).unwrap(), 2);
    }

    #[test]
    fn get_or_insert_with_initializes_once() {
        let map = TypedMap::new();
        let first = map.get_or_insert_with(NAME, || "init".to_string());
        let second = map.get_or_insert_with(NAME, || "other".to_string());
        assert_eq!(*first, "init");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn mismatched_type_under_same_name_reads_none() {
        static CLASH: TypedKey<bool> = TypedKey::new("test/clash");
        static CLASH_STR: TypedKey<String> = TypedKey::new("test/clash");
        let map = TypedMap::new();
        map.insert(CLASH, true);
        assert!(map.get(CLASH_STR).is_none());
    }
}
