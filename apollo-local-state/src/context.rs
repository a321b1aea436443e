//! Provide a [`Context`] shared by the local resolvers of one execution.
//!
//! The context contains a DashMap which lets callers hand data to their resolvers, and
//! lets resolvers leave data behind for later fields or for the caller.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use serde::Serialize;

use crate::error::BoxError;
use crate::json_ext::Value;

/// Holds [`Context`] entries.
pub(crate) type Entries = Arc<DashMap<String, Value>>;

/// User data made available to local resolvers.
///
/// Cloning is cheap: clones share the same entries.
#[derive(Clone, Debug, Default)]
pub struct Context {
    entries: Entries,
}

impl Context {
    pub fn new() -> Self {
        Context {
            entries: Default::default(),
        }
    }

    /// Get a value from the context using the provided key.
    pub fn get<K, V>(&self, key: K) -> Result<Option<V>, BoxError>
    where
        K: Into<String>,
        V: for<'de> Deserialize<'de>,
    {
        self.entries
            .get(&key.into())
            .map(|v| serde_json_bytes::from_value(v.value().clone()))
            .transpose()
            .map_err(|e| e.into())
    }

    /// Insert a value into the context, returning the previous one if any.
    pub fn insert<K, V>(&self, key: K, value: V) -> Result<Option<V>, BoxError>
    where
        K: Into<String>,
        V: for<'de> Deserialize<'de> + Serialize,
    {
        let value = serde_json_bytes::to_value(value)?;
        self.entries
            .insert(key.into(), value)
            .map(serde_json_bytes::from_value)
            .transpose()
            .map_err(|e| e.into())
    }

    /// Update a value in the context, inserting `default()` first if the key is absent.
    pub fn upsert<K, V>(
        &self,
        key: K,
        upsert: impl FnOnce(V) -> V,
        default: impl FnOnce() -> V,
    ) -> Result<(), BoxError>
    where
        K: Into<String>,
        V: for<'de> Deserialize<'de> + Serialize,
    {
        let key = key.into();
        let mut entry = self
            .entries
            .entry(key)
            .or_try_insert_with(|| serde_json_bytes::to_value(default()))?;
        let value: V = serde_json_bytes::from_value(entry.value().clone())?;
        *entry.value_mut() = serde_json_bytes::to_value(upsert(value))?;
        Ok(())
    }

    pub fn contains_key<K>(&self, key: K) -> bool
    where
        K: Into<String>,
    {
        self.entries.contains_key(&key.into())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use crate::Context;

    #[test]
    fn test_context_insert() {
        let c = Context::new();
        assert!(c.insert("key1", 1).is_ok());
        assert_eq!(c.get("key1").unwrap(), Some(1));
        assert_eq!(c.get::<_, i32>("absent").unwrap(), None);
    }

    #[test]
    fn test_context_overwrite() {
        let c = Context::new();
        assert!(c.insert("overwrite", 2).is_ok());
        assert_eq!(c.insert("overwrite", 3).unwrap(), Some(2));
        assert_eq!(c.get("overwrite").unwrap(), Some(3));
    }

    #[test]
    fn test_context_upsert() {
        let c = Context::new();
        assert!(c.insert("present", 1).is_ok());
        assert!(c.upsert("present", |v: i32| v + 1, || 0).is_ok());
        assert_eq!(c.get("present").unwrap(), Some(2));
        assert!(c.upsert("not_present", |v: i32| v + 1, || 0).is_ok());
        assert_eq!(c.get("not_present").unwrap(), Some(1));
    }

    #[test]
    fn test_context_marshall_errors() {
        let c = Context::new();
        assert!(c.insert("string", "Some value".to_string()).is_ok());
        assert!(c.upsert("string", |v: i32| v + 1, || 0).is_err());
        // the failed upsert leaves the entry untouched
        assert_eq!(
            c.get::<_, String>("string").unwrap().as_deref(),
            Some("Some value")
        );
    }

    #[test]
    fn test_context_clones_share_entries() {
        let c = Context::new();
        let clone = c.clone();
        clone.insert("shared", true).unwrap();
        assert!(c.contains_key("shared"));
        assert_eq!(c.len(), 1);
    }
}
