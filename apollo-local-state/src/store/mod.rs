//! Normalized entity store.
//!
//! Server data is kept as flat records keyed by [`IdentityKey`]. Executions read an
//! immutable [`StoreSnapshot`]; writes build a new snapshot and swap it in atomically,
//! so in-flight executions keep reading the data they started with.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::configuration::TypePolicy;
use crate::error::StoreError;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::plan::QueryPlan;

mod identity;
mod normalize;
mod reference;

pub use identity::IdentityKey;
pub(crate) use identity::Identifier;
pub use reference::as_reference;
pub use reference::make_reference;
pub use reference::Resolved;

/// A normalized record: field storage names to values.
pub type Record = Object;

/// An immutable view of every record of the store.
#[derive(Clone, Debug, Default)]
pub struct StoreSnapshot {
    records: HashMap<IdentityKey, Arc<Record>>,
}

impl StoreSnapshot {
    pub fn get(&self, key: &str) -> Result<&Arc<Record>, StoreError> {
        self.records
            .get(key)
            .ok_or_else(|| StoreError::MissingEntity { key: key.into() })
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every record, sorted by key.
    pub fn extract(&self) -> Value {
        let sorted: BTreeMap<_, _> = self.records.iter().collect();
        Value::Object(
            sorted
                .into_iter()
                .map(|(key, record)| (key.as_str().into(), Value::Object(Record::clone(record))))
                .collect(),
        )
    }
}

/// The normalized cache of server data.
#[derive(Debug, Default)]
pub struct EntityStore {
    snapshot: RwLock<Arc<StoreSnapshot>>,
    identifier: Identifier,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store identifying the configured types by their key fields.
    pub fn with_type_policies(type_policies: &HashMap<String, TypePolicy>) -> Self {
        Self {
            snapshot: Default::default(),
            identifier: Identifier::new(type_policies),
        }
    }

    pub fn get(&self, key: &str) -> Result<Arc<Record>, StoreError> {
        self.snapshot.read().get(key).cloned()
    }

    /// The current content of the store.
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        self.snapshot.read().clone()
    }

    /// Replaces the record stored under `key`.
    pub fn write(&self, key: impl Into<IdentityKey>, record: Record) {
        let mut snapshot = self.snapshot.write();
        Arc::make_mut(&mut snapshot)
            .records
            .insert(key.into(), Arc::new(record));
    }

    /// Merges records into the store, field by field: incoming fields overwrite existing
    /// ones, other existing fields are kept.
    pub fn merge(&self, records: impl IntoIterator<Item = (IdentityKey, Record)>) {
        let mut snapshot = self.snapshot.write();
        let snapshot = Arc::make_mut(&mut snapshot);
        for (key, fields) in records {
            match snapshot.records.get_mut(&key) {
                Some(record) => {
                    let record = Arc::make_mut(record);
                    for (name, value) in fields {
                        record.insert(name, value);
                    }
                }
                None => {
                    snapshot.records.insert(key, Arc::new(fields));
                }
            }
        }
    }

    /// Writes a server response for `plan` into the store.
    ///
    /// Identified objects become their own records; their positions in the response are
    /// replaced by references. Local fields are not written.
    #[tracing::instrument(skip_all, level = "trace")]
    pub fn ingest(
        &self,
        plan: &QueryPlan,
        data: &Value,
        variables: &Object,
    ) -> Result<(), StoreError> {
        let data = data
            .as_object()
            .ok_or_else(|| StoreError::MalformedResponse {
                reason: format!("expected an object as response data, found {data:?}"),
            })?;
        let variables = plan.variables(variables);
        let records =
            normalize::Normalizer::new(&self.identifier, &variables).normalize(plan, data);
        tracing::trace!(records = records.len(), "writing response to the cache");
        self.merge(records);
        Ok(())
    }

    /// Identity of `object` under this store's type policies.
    pub fn identify(&self, object: &Object) -> Option<IdentityKey> {
        self.identifier.identify(object)
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;
    use test_log::test;

    use super::*;
    use crate::plan::Planner;
    use crate::spec::Query;

    fn object(value: Value) -> Object {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn get_and_write() {
        let store = EntityStore::new();
        assert_eq!(
            store.get("Item:1"),
            Err(StoreError::MissingEntity {
                key: "Item:1".into()
            })
        );
        store.write("Item:1", object(json!({"id": "1", "name": "a"})));
        store.write("Item:1", object(json!({"id": "1"})));
        assert_eq!(*store.get("Item:1").unwrap(), object(json!({"id": "1"})));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn merge_keeps_other_fields() {
        let store = EntityStore::new();
        store.write("Item:1", object(json!({"id": "1", "name": "a"})));
        store.merge([
            ("Item:1".into(), object(json!({"name": "b", "size": 2}))),
            ("Item:2".into(), object(json!({"id": "2"}))),
        ]);
        assert_eq!(
            store.snapshot().extract(),
            json!({
                "Item:1": {"id": "1", "name": "b", "size": 2},
                "Item:2": {"id": "2"}
            })
        );
    }

    #[test]
    fn snapshots_are_isolated_from_writes() {
        let store = EntityStore::new();
        store.write("Item:1", object(json!({"id": "1"})));
        let before = store.snapshot();
        store.merge([("Item:1".into(), object(json!({"name": "new"})))]);
        store.write("Item:2", object(json!({"id": "2"})));

        assert_eq!(**before.get("Item:1").unwrap(), object(json!({"id": "1"})));
        assert!(!before.contains_key("Item:2"));
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn ingest_response() {
        let store = EntityStore::new();
        let plan = Planner::plan(
            &Query::parse("query($n: Int = 2) { items(first: $n) { id name } }").unwrap(),
            None,
        )
        .unwrap();
        store
            .ingest(
                &plan,
                &json!({"items": [
                    {"__typename": "Item", "id": "1", "name": "a"},
                    {"__typename": "Item", "id": "2", "name": "b"}
                ]}),
                &Object::new(),
            )
            .unwrap();

        insta::assert_json_snapshot!(store.snapshot().extract(), @r###"
        {
          "Item:1": {
            "__typename": "Item",
            "id": "1",
            "name": "a"
          },
          "Item:2": {
            "__typename": "Item",
            "id": "2",
            "name": "b"
          },
          "ROOT_QUERY": {
            "items({\"first\":2})": [
              {
                "__ref": "Item:1"
              },
              {
                "__ref": "Item:2"
              }
            ]
          }
        }
        "###);

        assert!(matches!(
            store.ingest(&plan, &json!([1]), &Object::new()),
            Err(StoreError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn ingest_with_type_policies() {
        let store = EntityStore::with_type_policies(&HashMap::from([(
            "Book".to_string(),
            TypePolicy {
                key_fields: vec!["isbn".to_string()],
            },
        )]));
        let plan = Planner::plan(&Query::parse("{ book { isbn title } }").unwrap(), None).unwrap();
        store
            .ingest(
                &plan,
                &json!({"book": {"__typename": "Book", "isbn": "123", "title": "T"}}),
                &Object::new(),
            )
            .unwrap();
        assert_eq!(
            *store.get("ROOT_QUERY").unwrap(),
            object(json!({"book": {"__ref": "Book:{\"isbn\":\"123\"}"}}))
        );
        assert!(store.get("Book:{\"isbn\":\"123\"}").is_ok());
    }
}
