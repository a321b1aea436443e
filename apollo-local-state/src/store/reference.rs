//! References between normalized records.
//!
//! A reference is stored as `{"__ref": "<identity key>"}` and only followed when a
//! reader descends into the field holding it.

use std::sync::Arc;

use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::store::IdentityKey;
use crate::store::Record;
use crate::store::StoreSnapshot;

pub(crate) const REF: &str = "__ref";

/// Outcome of following a value that may be a reference.
#[derive(Debug)]
pub enum Resolved<'a> {
    /// The value is not a reference.
    NotReference(&'a Value),
    /// The value references a record present in the snapshot.
    Entity {
        key: &'a IdentityKey,
        record: &'a Arc<Record>,
    },
    /// The value references a key absent from the snapshot.
    Missing(&'a str),
}

/// Encodes a reference to `key`.
pub fn make_reference(key: &IdentityKey) -> Value {
    let mut reference = Object::new();
    reference.insert(REF, Value::String(key.as_str().into()));
    Value::Object(reference)
}

/// The key a value references, if it is a reference.
pub fn as_reference(value: &Value) -> Option<&str> {
    match value {
        Value::Object(object) if object.len() == 1 => object.get(REF)?.as_str(),
        _ => None,
    }
}

impl StoreSnapshot {
    /// Follows `value` if it is a reference.
    pub fn resolve<'a>(&'a self, value: &'a Value) -> Resolved<'a> {
        match as_reference(value) {
            None => Resolved::NotReference(value),
            Some(key) => match self.records.get_key_value(key) {
                Some((key, record)) => Resolved::Entity { key, record },
                None => Resolved::Missing(key),
            },
        }
    }
}
