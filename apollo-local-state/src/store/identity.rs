use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::configuration::TypePolicy;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::spec::OperationKind;
use crate::spec::TYPENAME;

pub(crate) const ROOT_QUERY: &str = "ROOT_QUERY";
pub(crate) const ROOT_MUTATION: &str = "ROOT_MUTATION";
pub(crate) const ROOT_SUBSCRIPTION: &str = "ROOT_SUBSCRIPTION";

/// Key of a normalized record, such as `Item:1` or `ROOT_QUERY`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn new(key: impl Into<String>) -> Self {
        IdentityKey(key.into())
    }

    pub fn root_query() -> Self {
        IdentityKey(ROOT_QUERY.to_string())
    }

    pub(crate) fn for_operation(kind: OperationKind) -> Self {
        IdentityKey(
            match kind {
                OperationKind::Query => ROOT_QUERY,
                OperationKind::Mutation => ROOT_MUTATION,
                OperationKind::Subscription => ROOT_SUBSCRIPTION,
            }
            .to_string(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for IdentityKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityKey {
    fn from(key: &str) -> Self {
        IdentityKey(key.to_string())
    }
}

impl From<String> for IdentityKey {
    fn from(key: String) -> Self {
        IdentityKey(key)
    }
}

/// Computes identity keys for objects found in responses.
///
/// Objects are identified by their `__typename` and their `id` (or `_id`) field, unless
/// a type policy lists the key fields of their type. Objects without a `__typename`, or
/// without their key fields, have no identity and stay embedded in their parent record.
#[derive(Clone, Debug, Default)]
pub(crate) struct Identifier {
    key_fields: HashMap<String, Vec<String>>,
}

const DEFAULT_KEY_FIELDS: [&str; 2] = ["id", "_id"];

impl Identifier {
    pub(crate) fn new(type_policies: &HashMap<String, TypePolicy>) -> Self {
        Self {
            key_fields: type_policies
                .iter()
                .map(|(type_name, policy)| (type_name.clone(), policy.key_fields.clone()))
                .collect(),
        }
    }

    /// Identity of `object`, if it has one.
    pub(crate) fn identify(&self, object: &Object) -> Option<IdentityKey> {
        let typename = object.get(TYPENAME)?.as_str()?;
        match self.key_fields.get(typename) {
            Some(fields) => {
                let mut key = Object::new();
                for field in fields {
                    let value = object.get(field.as_str()).filter(|v| !v.is_null())?;
                    key.insert(field.as_str(), value.clone());
                }
                let key = serde_json::to_string(&Value::Object(key)).ok()?;
                Some(IdentityKey(format!("{typename}:{key}")))
            }
            None => DEFAULT_KEY_FIELDS
                .iter()
                .find_map(|field| object.get(*field).filter(|v| !v.is_null()))
                .map(|id| IdentityKey(format!("{typename}:{}", id_to_string(id)))),
        }
    }
}

fn id_to_string(id: &Value) -> String {
    match id {
        Value::String(id) => id.as_str().to_string(),
        Value::Number(id) => id.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    fn identify(identifier: &Identifier, value: Value) -> Option<String> {
        identifier
            .identify(value.as_object().unwrap())
            .map(|key| key.to_string())
    }

    #[test]
    fn default_key_fields() {
        let identifier = Identifier::default();
        assert_eq!(
            identify(&identifier, json!({"__typename": "Item", "id": "1"})),
            Some("Item:1".to_string())
        );
        assert_eq!(
            identify(&identifier, json!({"__typename": "Item", "id": 7})),
            Some("Item:7".to_string())
        );
        assert_eq!(
            identify(&identifier, json!({"__typename": "Item", "_id": "x"})),
            Some("Item:x".to_string())
        );
        assert_eq!(
            identify(&identifier, json!({"__typename": "Item", "id": "1", "_id": "x"})),
            Some("Item:1".to_string())
        );
        assert_eq!(identify(&identifier, json!({"id": "1"})), None);
        assert_eq!(identify(&identifier, json!({"__typename": "Foo"})), None);
        assert_eq!(
            identify(&identifier, json!({"__typename": "Item", "id": null})),
            None
        );
    }

    #[test]
    fn type_policies() {
        let identifier = Identifier::new(&HashMap::from([(
            "Book".to_string(),
            TypePolicy {
                key_fields: vec!["isbn".to_string(), "edition".to_string()],
            },
        )]));
        assert_eq!(
            identify(
                &identifier,
                json!({"__typename": "Book", "edition": 2, "id": "ignored", "isbn": "123"})
            ),
            Some(r#"Book:{"isbn":"123","edition":2}"#.to_string())
        );
        assert_eq!(
            identify(&identifier, json!({"__typename": "Book", "isbn": "123"})),
            None
        );
        assert_eq!(
            identify(&identifier, json!({"__typename": "Item", "id": 1})),
            Some("Item:1".to_string())
        );
    }

    #[test]
    fn root_keys() {
        assert_eq!(IdentityKey::root_query().as_str(), "ROOT_QUERY");
        assert_eq!(
            IdentityKey::for_operation(OperationKind::Mutation).as_str(),
            "ROOT_MUTATION"
        );
    }
}
