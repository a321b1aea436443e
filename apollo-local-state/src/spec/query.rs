//! Query parsing.
//!
//! Turns GraphQL text into operations and fragments made of [`Selection`] nodes. No schema
//! is involved: the local state layer trusts the shapes found in the cache and returned
//! by resolvers.

use std::collections::HashMap;

use apollo_compiler::ast;
use serde::Deserialize;
use serde::Serialize;

use crate::configuration::DEFAULT_LOCAL_DIRECTIVE;
use crate::error::PlanningError;
use crate::json_ext::Object;
use crate::spec::selection::parse_const_value;
use crate::spec::Selection;

/// A parsed GraphQL document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    string: String,
    operations: Vec<Operation>,
    fragments: Fragments,
}

impl Query {
    /// Parses `query`, marking fields annotated with `@client` as local.
    pub fn parse(query: impl Into<String>) -> Result<Self, PlanningError> {
        Self::parse_with_local_directive(query, DEFAULT_LOCAL_DIRECTIVE)
    }

    /// Parses `query`, marking fields annotated with `@{local_directive}` as local.
    #[tracing::instrument(skip_all, level = "trace")]
    pub fn parse_with_local_directive(
        query: impl Into<String>,
        local_directive: &str,
    ) -> Result<Self, PlanningError> {
        let string = query.into();
        let document = ast::Document::parse(string.as_str(), "query.graphql")
            .map_err(|with_errors| PlanningError::Parsing(with_errors.errors.to_string()))?;

        let mut operations = Vec::new();
        let mut fragments = Fragments::default();
        for definition in &document.definitions {
            match definition {
                // Spec: https://spec.graphql.org/draft/#OperationDefinition
                ast::Definition::OperationDefinition(operation) => {
                    operations.push(Operation::from_ast(operation, local_directive)?);
                }
                // Spec: https://spec.graphql.org/draft/#FragmentDefinition
                ast::Definition::FragmentDefinition(fragment) => {
                    fragments.insert(
                        fragment.name.as_str(),
                        Fragment {
                            type_condition: fragment.type_condition.as_str().to_owned(),
                            selection_set: Selection::from_ast_set(
                                &fragment.selection_set,
                                local_directive,
                                0,
                            )?,
                        },
                    );
                }
                _ => {
                    failfast_debug!("ignoring type system definition in an executable document");
                }
            }
        }

        Ok(Query {
            string,
            operations,
            fragments,
        })
    }

    /// Selects the operation to execute.
    ///
    /// Without a name, the document must contain exactly one operation.
    pub fn operation(&self, name: Option<&str>) -> Result<&Operation, PlanningError> {
        match name {
            Some(name) => self
                .operations
                .iter()
                .find(|operation| operation.name.as_deref() == Some(name))
                .ok_or_else(|| PlanningError::UnknownOperation(name.to_owned())),
            None => match self.operations.as_slice() {
                [] => Err(PlanningError::NoOperation),
                [operation] => Ok(operation),
                _ => Err(PlanningError::AmbiguousOperation),
            },
        }
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn fragments(&self) -> &Fragments {
        &self.fragments
    }

    pub fn as_str(&self) -> &str {
        &self.string
    }
}

/// One operation of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub(crate) name: Option<String>,
    pub(crate) kind: OperationKind,
    /// Default values of the declared variables.
    pub(crate) variables: Object,
    pub(crate) selection_set: Vec<Selection>,
}

impl Operation {
    fn from_ast(
        operation: &ast::OperationDefinition,
        local_directive: &str,
    ) -> Result<Self, PlanningError> {
        let variables = operation
            .variables
            .iter()
            .filter_map(|definition| {
                let default = definition.default_value.as_ref()?;
                parse_const_value(default).map(|value| (definition.name.as_str().into(), value))
            })
            .collect();

        Ok(Operation {
            name: operation.name.as_ref().map(|name| name.as_str().to_owned()),
            kind: operation.operation_type.into(),
            variables,
            selection_set: Selection::from_ast_set(&operation.selection_set, local_directive, 0)?,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn selection_set(&self) -> &[Selection] {
        &self.selection_set
    }

    pub fn variable_defaults(&self) -> &Object {
        &self.variables
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    /// Name of the root type the operation selects from.
    pub fn default_type_name(&self) -> &'static str {
        match self {
            OperationKind::Query => "Query",
            OperationKind::Mutation => "Mutation",
            OperationKind::Subscription => "Subscription",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        }
    }
}

impl From<ast::OperationType> for OperationKind {
    // Spec: https://spec.graphql.org/draft/#OperationType
    fn from(operation_type: ast::OperationType) -> Self {
        match operation_type {
            ast::OperationType::Query => Self::Query,
            ast::OperationType::Mutation => Self::Mutation,
            ast::OperationType::Subscription => Self::Subscription,
        }
    }
}

/// Named fragment definitions of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragments {
    map: HashMap<String, Fragment>,
}

impl Fragments {
    pub fn get(&self, name: impl AsRef<str>) -> Option<&Fragment> {
        self.map.get(name.as_ref())
    }

    pub fn insert(&mut self, name: impl Into<String>, fragment: Fragment) {
        self.map.insert(name.into(), fragment);
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub type_condition: String,
    pub selection_set: Vec<Selection>,
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;
    use test_log::test;

    use super::*;

    #[test]
    fn parse_operations_and_fragments() {
        let query = Query::parse(
            r#"
            query Items($count: Int = 10, $flag: Boolean) {
                items(first: $count) { ...ItemFields }
            }
            mutation Touch { touch }
            fragment ItemFields on Item { id serverOrClient @client }
            "#,
        )
        .unwrap();

        assert_eq!(query.operations().len(), 2);
        let items = query.operation(Some("Items")).unwrap();
        assert_eq!(items.kind(), OperationKind::Query);
        assert_eq!(items.variable_defaults(), json!({"count": 10}).as_object().unwrap());
        assert_eq!(
            query.operation(Some("Touch")).unwrap().kind().default_type_name(),
            "Mutation"
        );

        let fragment = query.fragments().get("ItemFields").unwrap();
        assert_eq!(fragment.type_condition, "Item");
        assert_eq!(
            fragment.selection_set,
            vec![
                Selection::leaf("id"),
                Selection::leaf("serverOrClient").into_local()
            ]
        );
    }

    #[test]
    fn operation_selection() {
        let query = Query::parse("query A { a } query B { b }").unwrap();
        assert_eq!(query.operation(None), Err(PlanningError::AmbiguousOperation));
        assert_eq!(
            query.operation(Some("C")),
            Err(PlanningError::UnknownOperation("C".to_string()))
        );
        assert_eq!(query.operation(Some("B")).unwrap().name(), Some("B"));

        let query = Query::parse("fragment F on T { a }").unwrap();
        assert_eq!(query.operation(None), Err(PlanningError::NoOperation));
    }

    #[test]
    fn custom_local_directive() {
        let query = Query::parse_with_local_directive("{ a @local b @client }", "local").unwrap();
        assert_eq!(
            query.operation(None).unwrap().selection_set(),
            &[Selection::leaf("a").into_local(), Selection::leaf("b")]
        );
    }

    #[test]
    fn syntax_errors() {
        assert!(matches!(
            Query::parse("{ items { id }"),
            Err(PlanningError::Parsing(_))
        ));
    }
}
