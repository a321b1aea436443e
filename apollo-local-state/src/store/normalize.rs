//! The write pass: splits a response into normalized records.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::plan::FieldKind;
use crate::plan::QueryPlan;
use crate::plan::SelectionPlan;
use crate::spec::TYPENAME;
use crate::store::identity::Identifier;
use crate::store::reference::make_reference;
use crate::store::IdentityKey;
use crate::store::Record;

/// Walks a response along its plan and stages one record per identified object.
///
/// Only remote fields are written, under their storage names. Objects without an
/// identity stay embedded in their parent record.
pub(crate) struct Normalizer<'a> {
    identifier: &'a Identifier,
    variables: &'a Object,
    records: HashMap<IdentityKey, Record>,
}

impl<'a> Normalizer<'a> {
    pub(crate) fn new(identifier: &'a Identifier, variables: &'a Object) -> Self {
        Self {
            identifier,
            variables,
            records: HashMap::new(),
        }
    }

    pub(crate) fn normalize(
        mut self,
        plan: &QueryPlan,
        data: &Object,
    ) -> HashMap<IdentityKey, Record> {
        let mut root = Record::new();
        self.write_selection(plan.selection(), data, &mut root);
        self.stage(plan.root_key(), root);
        self.records
    }

    /// Merges `fields` into the staged record for `key`.
    fn stage(&mut self, key: IdentityKey, fields: Record) {
        match self.records.entry(key) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                for (name, value) in fields {
                    record.insert(name, value);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(fields);
            }
        }
    }

    fn write_selection(&mut self, selection: &SelectionPlan, object: &Object, record: &mut Record) {
        let typename = object.get(TYPENAME);
        if let Some(typename) = typename {
            record.insert(TYPENAME, typename.clone());
        }
        let typename = typename.and_then(Value::as_str);

        for field in selection.fields() {
            if field.kind() == FieldKind::Local
                || field.is_skipped(self.variables)
                || !field.applies_to(typename)
            {
                continue;
            }
            let Some(value) = object.get(field.response_key()) else {
                tracing::debug!(
                    field = field.response_key(),
                    "missing field while writing a response to the cache"
                );
                continue;
            };
            let value = match field.selection() {
                Some(selection) => self.write_value(selection, value),
                None => value.clone(),
            };
            record.insert(field.storage_key(self.variables), value);
        }
    }

    fn write_value(&mut self, selection: &SelectionPlan, value: &Value) -> Value {
        match value {
            Value::Array(values) => Value::Array(
                values
                    .iter()
                    .map(|value| self.write_value(selection, value))
                    .collect(),
            ),
            Value::Object(object) => {
                let mut record = Record::new();
                self.write_selection(selection, object, &mut record);
                match self.identifier.identify(&record) {
                    Some(key) => {
                        let reference = make_reference(&key);
                        self.stage(key, record);
                        reference
                    }
                    None => Value::Object(record),
                }
            }
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;
    use test_log::test;

    use super::*;
    use crate::plan::Planner;
    use crate::spec::Query;

    fn normalize(query: &str, data: Value, variables: Value) -> HashMap<IdentityKey, Record> {
        let plan = Planner::plan(&Query::parse(query).unwrap(), None).unwrap();
        let identifier = Identifier::default();
        Normalizer::new(&identifier, variables.as_object().unwrap())
            .normalize(&plan, data.as_object().unwrap())
    }

    fn record(records: &HashMap<IdentityKey, Record>, key: &str) -> Value {
        Value::Object(records.get(key).unwrap().clone())
    }

    #[test]
    fn entities_become_references() {
        let records = normalize(
            "{ items { id foo { bar { baz } } serverOrClient @client } }",
            json!({"items": [
                {"__typename": "Item", "id": "1", "foo": [{"bar": {"baz": 0}}], "serverOrClient": "server"},
                {"__typename": "Item", "id": "2", "foo": [], "serverOrClient": "server"},
            ]}),
            json!({}),
        );

        assert_eq!(records.len(), 3);
        assert_eq!(
            record(&records, "ROOT_QUERY"),
            json!({"items": [{"__ref": "Item:1"}, {"__ref": "Item:2"}]})
        );
        // local fields are never written
        assert_eq!(
            record(&records, "Item:1"),
            json!({"__typename": "Item", "id": "1", "foo": [{"bar": {"baz": 0}}]})
        );
    }

    #[test]
    fn storage_names_and_aliases() {
        let records = normalize(
            "query($n: Int) { first: items(first: $n) { id } all: items { id } }",
            json!({"first": [{"id": 1}], "all": [{"id": 1}, {"id": 2}]}),
            json!({"n": 1}),
        );
        assert_eq!(
            record(&records, "ROOT_QUERY"),
            json!({
                "items({\"first\":1})": [{"id": 1}],
                "items": [{"id": 1}, {"id": 2}]
            })
        );
    }

    #[test]
    fn same_entity_merges_fields() {
        let records = normalize(
            "{ a { __typename id name } b { __typename id age } }",
            json!({
                "a": {"__typename": "User", "id": "1", "name": "Ada"},
                "b": {"__typename": "User", "id": "1", "age": 36},
            }),
            json!({}),
        );
        assert_eq!(
            record(&records, "User:1"),
            json!({"__typename": "User", "id": "1", "name": "Ada", "age": 36})
        );
    }

    #[test]
    fn missing_fields_are_skipped() {
        let records = normalize("{ a b }", json!({"a": 1}), json!({}));
        assert_eq!(record(&records, "ROOT_QUERY"), json!({"a": 1}));
    }
}
