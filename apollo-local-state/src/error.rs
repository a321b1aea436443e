//! Local state errors.
use displaydoc::Display;
use serde::Serialize;
use thiserror::Error;

use crate::graphql::Error;
use crate::graphql::ErrorExtension;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::store::IdentityKey;

/// Error type accepted from local resolvers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Data-level errors raised while executing one field.
///
/// They never abort an execution: the field's slot is set to `null` and the error is
/// converted to JSON for [`struct@Error`].
#[derive(Error, Display, Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(untagged)]
#[ignore_extra_doc_attributes]
#[non_exhaustive]
pub enum FieldError {
    /// entity '{key}' is missing from the cache
    MissingEntity {
        /// Identity key of the dangling reference.
        key: String,
    },

    /// no local resolver registered for '{type_name}.{field}'
    UnresolvedLocalField {
        /// Runtime type of the parent object.
        type_name: String,
        /// Field name.
        field: String,
    },

    /// local resolver for '{type_name}.{field}' failed: {reason}
    ResolverFailure {
        /// Parent type the resolver is registered on.
        type_name: String,
        /// Field name.
        field: String,
        /// The failure reason.
        reason: String,
    },

    /// expected {expected} but found {found}
    ShapeMismatch {
        /// What the selection set requires.
        expected: String,
        /// What the data contains.
        found: String,
    },

    /// missing field '{field}'
    ///
    /// A remote field that the cached object does not carry.
    MissingField {
        /// Name of the absent field.
        field: String,
    },
}

impl FieldError {
    /// Convert the field error to a GraphQL error located at `path`.
    pub fn to_graphql_error(&self, path: Path) -> Error {
        let value: Value = serde_json_bytes::to_value(self).unwrap_or_default();
        Error::builder()
            .message(self.to_string())
            .path(path)
            .extension_code(self.extension_code())
            .extensions(match value {
                Value::Object(extensions) => extensions,
                _ => Default::default(),
            })
            .build()
    }

    pub(crate) fn shape_mismatch(expected: impl Into<String>, found: &Value) -> Self {
        use crate::json_ext::ValueExt;

        FieldError::ShapeMismatch {
            expected: expected.into(),
            found: found.kind().to_string(),
        }
    }
}

impl ErrorExtension for FieldError {
    fn extension_code(&self) -> String {
        match self {
            FieldError::MissingEntity { .. } => "MISSING_ENTITY",
            FieldError::UnresolvedLocalField { .. } => "UNRESOLVED_LOCAL_FIELD",
            FieldError::ResolverFailure { .. } => "RESOLVER_FAILURE",
            FieldError::ShapeMismatch { .. } => "SHAPE_MISMATCH",
            FieldError::MissingField { .. } => "MISSING_FIELD",
        }
        .to_string()
    }
}

/// Structural errors found while planning or validating a query.
///
/// They are raised before any data is read.
#[derive(Error, Display, Debug, Clone, Serialize, Eq, PartialEq)]
#[non_exhaustive]
pub enum PlanningError {
    /// parsing failed: {0}
    Parsing(String),

    /// the document does not contain any operation
    NoOperation,

    /// an operation name is required when the document contains several operations
    AmbiguousOperation,

    /// unknown operation '{0}'
    UnknownOperation(String),

    /// {0} operations are not supported
    UnsupportedOperation(String),

    /// unknown fragment '{0}'
    UnknownFragment(String),

    /// fragment '{0}' spreads itself
    RecursiveFragment(String),

    /// selection set nesting exceeds the recursion limit of {0}
    RecursionLimitExceeded(usize),

    /// no local resolver registered for '{type_name}.{field}'
    UnresolvedLocalField {
        /// Parent type, or `*` when it is only known at runtime.
        type_name: String,
        /// Field name.
        field: String,
    },
}

impl ErrorExtension for PlanningError {
    fn extension_code(&self) -> String {
        match self {
            PlanningError::Parsing(_) => "GRAPHQL_PARSE_FAILED",
            PlanningError::NoOperation
            | PlanningError::AmbiguousOperation
            | PlanningError::UnknownOperation(_) => "GRAPHQL_UNKNOWN_OPERATION_NAME",
            PlanningError::UnsupportedOperation(_) => "UNSUPPORTED_OPERATION",
            PlanningError::UnknownFragment(_) | PlanningError::RecursiveFragment(_) => {
                "GRAPHQL_VALIDATION_FAILED"
            }
            PlanningError::RecursionLimitExceeded(_) => "RECURSION_LIMIT_EXCEEDED",
            PlanningError::UnresolvedLocalField { .. } => "UNRESOLVED_LOCAL_FIELD",
        }
        .to_string()
    }
}

impl PlanningError {
    /// Convert the planning error to a GraphQL request error.
    pub fn to_graphql_error(&self) -> Error {
        Error::builder()
            .message(self.to_string())
            .extension_code(self.extension_code())
            .build()
    }
}

/// Errors raised by the [`crate::EntityStore`].
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum StoreError {
    /// entity '{key}' is missing from the cache
    MissingEntity {
        /// The key that was looked up.
        key: IdentityKey,
    },

    /// response data cannot be written to the cache: {reason}
    MalformedResponse {
        /// The reason the data was rejected.
        reason: String,
    },
}

/// Errors that abort a whole execution.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExecutionError {
    /// entity '{key}' is missing from the cache at '{path}'
    MissingEntity {
        /// The dangling identity key.
        key: String,
        /// Where the reference was followed.
        path: Path,
    },

    /// query could not be planned: {0}
    Planning(#[from] PlanningError),

    /// cache access failed: {0}
    Store(#[from] StoreError),

    /// the request does not contain a query
    MissingQuery,
}

impl ErrorExtension for ExecutionError {
    fn extension_code(&self) -> String {
        match self {
            ExecutionError::MissingEntity { .. } => "MISSING_ENTITY".to_string(),
            ExecutionError::Planning(error) => error.extension_code(),
            ExecutionError::Store(StoreError::MissingEntity { .. }) => {
                "MISSING_ENTITY".to_string()
            }
            ExecutionError::Store(_) => "MALFORMED_RESPONSE".to_string(),
            ExecutionError::MissingQuery => "MISSING_QUERY_STRING".to_string(),
        }
    }
}

impl ExecutionError {
    /// Convert the error to a GraphQL error, keeping the path of aborted traversals.
    pub fn to_graphql_error(&self) -> Error {
        let path = match self {
            ExecutionError::MissingEntity { path, .. } => Some(path.clone()),
            _ => None,
        };
        Error::builder()
            .message(self.to_string())
            .and_path(path)
            .extension_code(self.extension_code())
            .build()
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn field_error_carries_its_details() {
        let error = FieldError::ResolverFailure {
            type_name: "Item".to_string(),
            field: "serverOrClient".to_string(),
            reason: "offline".to_string(),
        }
        .to_graphql_error(Path::from("/items/3/serverOrClient"));

        assert_eq!(
            serde_json_bytes::to_value(&error).unwrap(),
            json!({
                "message": "local resolver for 'Item.serverOrClient' failed: offline",
                "path": ["items", 3, "serverOrClient"],
                "extensions": {
                    "type_name": "Item",
                    "field": "serverOrClient",
                    "reason": "offline",
                    "code": "RESOLVER_FAILURE"
                }
            })
        );
    }

    #[test]
    fn shape_mismatch_names_the_found_kind() {
        let error = FieldError::shape_mismatch("object", &json!("client"));
        assert_eq!(error.to_string(), "expected object but found string");
        assert_eq!(
            error.to_graphql_error(Path::empty()).code(),
            Some("SHAPE_MISMATCH")
        );
    }

    #[test]
    fn abort_keeps_path() {
        let error = ExecutionError::MissingEntity {
            key: "Item:7".to_string(),
            path: Path::from("/items/6"),
        }
        .to_graphql_error();
        assert_eq!(error.path, Some(Path::from("/items/6")));
        assert_eq!(error.code(), Some("MISSING_ENTITY"));
    }
}
