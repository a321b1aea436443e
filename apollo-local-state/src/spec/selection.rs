use apollo_compiler::ast;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;

use crate::error::PlanningError;
use crate::json_ext::Object;
use crate::json_ext::Value;

// The RECURSION_LIMIT is chosen to be:
//   < # expected to cause stack overflow &&
//   > # expected in a legitimate query
pub(crate) const RECURSION_LIMIT: usize = 128;

/// A node of a parsed selection set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selection {
    Field {
        name: ByteString,
        alias: Option<ByteString>,
        arguments: Vec<(ByteString, ArgumentValue)>,
        /// Annotated with the local-only directive.
        local: bool,
        include_skip: IncludeSkip,
        selection_set: Option<Vec<Selection>>,
    },
    InlineFragment {
        type_condition: Option<String>,
        include_skip: IncludeSkip,
        selection_set: Vec<Selection>,
    },
    FragmentSpread {
        name: String,
        include_skip: IncludeSkip,
    },
}

impl Selection {
    /// A remote field without arguments or nested selections.
    pub fn leaf(name: impl Into<ByteString>) -> Self {
        Selection::Field {
            name: name.into(),
            alias: None,
            arguments: Vec::new(),
            local: false,
            include_skip: IncludeSkip::default(),
            selection_set: None,
        }
    }

    /// A remote field with a nested selection set.
    pub fn nested(name: impl Into<ByteString>, selection_set: Vec<Selection>) -> Self {
        Selection::Field {
            name: name.into(),
            alias: None,
            arguments: Vec::new(),
            local: false,
            include_skip: IncludeSkip::default(),
            selection_set: Some(selection_set),
        }
    }

    /// Marks a field as local-only. Fragments are returned unchanged.
    pub fn into_local(mut self) -> Self {
        if let Selection::Field { local, .. } = &mut self {
            *local = true;
        }
        self
    }

    /// Sets the alias of a field. Fragments are returned unchanged.
    pub fn with_alias(mut self, output: impl Into<ByteString>) -> Self {
        if let Selection::Field { alias, .. } = &mut self {
            *alias = Some(output.into());
        }
        self
    }

    pub(crate) fn from_ast(
        selection: &ast::Selection,
        local_directive: &str,
        mut count: usize,
    ) -> Result<Option<Self>, PlanningError> {
        if count > RECURSION_LIMIT {
            tracing::error!("selection processing recursion limit({RECURSION_LIMIT}) exceeded");
            return Err(PlanningError::RecursionLimitExceeded(RECURSION_LIMIT));
        }
        count += 1;
        Ok(match selection {
            // Spec: https://spec.graphql.org/draft/#Field
            ast::Selection::Field(field) => {
                let include_skip = IncludeSkip::parse(&field.directives);
                if include_skip.statically_skipped() {
                    return Ok(None);
                }

                let selection_set = if field.selection_set.is_empty() {
                    None
                } else {
                    Some(Self::from_ast_set(
                        &field.selection_set,
                        local_directive,
                        count,
                    )?)
                };

                Some(Self::Field {
                    name: field.name.as_str().into(),
                    alias: field.alias.as_ref().map(|alias| alias.as_str().into()),
                    arguments: field
                        .arguments
                        .iter()
                        .map(|argument| {
                            (
                                argument.name.as_str().into(),
                                ArgumentValue::from_ast(&argument.value),
                            )
                        })
                        .collect(),
                    local: field
                        .directives
                        .0
                        .iter()
                        .any(|directive| directive.name.as_str() == local_directive),
                    include_skip,
                    selection_set,
                })
            }
            // Spec: https://spec.graphql.org/draft/#InlineFragment
            ast::Selection::InlineFragment(inline_fragment) => {
                let include_skip = IncludeSkip::parse(&inline_fragment.directives);
                if include_skip.statically_skipped() {
                    return Ok(None);
                }
                let selection_set =
                    Self::from_ast_set(&inline_fragment.selection_set, local_directive, count)?;

                // Can be empty with a statically skipped selection set
                if selection_set.is_empty() {
                    return Ok(None);
                }

                Some(Self::InlineFragment {
                    type_condition: inline_fragment
                        .type_condition
                        .as_ref()
                        .map(|name| name.as_str().to_owned()),
                    include_skip,
                    selection_set,
                })
            }
            // Spec: https://spec.graphql.org/draft/#FragmentSpread
            ast::Selection::FragmentSpread(fragment_spread) => {
                let include_skip = IncludeSkip::parse(&fragment_spread.directives);
                if include_skip.statically_skipped() {
                    return Ok(None);
                }

                Some(Self::FragmentSpread {
                    name: fragment_spread.fragment_name.as_str().to_owned(),
                    include_skip,
                })
            }
        })
    }

    pub(crate) fn from_ast_set(
        selections: &[ast::Selection],
        local_directive: &str,
        count: usize,
    ) -> Result<Vec<Self>, PlanningError> {
        selections
            .iter()
            .filter_map(|selection| {
                Selection::from_ast(selection, local_directive, count).transpose()
            })
            .collect()
    }
}

/// A field argument as written in the query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgumentValue {
    /// A value without any variable in it.
    Literal(Value),
    Variable(String),
    List(Vec<ArgumentValue>),
    Object(Vec<(ByteString, ArgumentValue)>),
}

impl ArgumentValue {
    pub(crate) fn from_ast(value: &ast::Value) -> Self {
        match value {
            ast::Value::Variable(name) => ArgumentValue::Variable(name.as_str().to_owned()),
            ast::Value::List(values) => {
                let values: Vec<_> = values.iter().map(|v| Self::from_ast(v)).collect();
                let literals: Option<Vec<Value>> =
                    values.iter().map(|v| v.as_literal().cloned()).collect();
                match literals {
                    Some(literals) => ArgumentValue::Literal(Value::Array(literals)),
                    None => ArgumentValue::List(values),
                }
            }
            ast::Value::Object(fields) => {
                let fields: Vec<(ByteString, ArgumentValue)> = fields
                    .iter()
                    .map(|(name, value)| (name.as_str().into(), Self::from_ast(value)))
                    .collect();
                if fields.iter().all(|(_, value)| value.as_literal().is_some()) {
                    ArgumentValue::Literal(Value::Object(
                        fields
                            .into_iter()
                            .filter_map(|(name, value)| match value {
                                ArgumentValue::Literal(value) => Some((name, value)),
                                _ => None,
                            })
                            .collect(),
                    ))
                } else {
                    ArgumentValue::Object(fields)
                }
            }
            constant => ArgumentValue::Literal(parse_const_value(constant).unwrap_or_default()),
        }
    }

    pub(crate) fn as_literal(&self) -> Option<&Value> {
        match self {
            ArgumentValue::Literal(value) => Some(value),
            _ => None,
        }
    }

    /// Replaces variable references with their values.
    ///
    /// Returns `None` for a bare variable that was not provided.
    pub(crate) fn bind(&self, variables: &Object) -> Option<Value> {
        match self {
            ArgumentValue::Literal(value) => Some(value.clone()),
            ArgumentValue::Variable(name) => variables.get(name.as_str()).cloned(),
            ArgumentValue::List(values) => Some(Value::Array(
                values
                    .iter()
                    .map(|value| value.bind(variables).unwrap_or_default())
                    .collect(),
            )),
            ArgumentValue::Object(fields) => Some(Value::Object(
                fields
                    .iter()
                    .filter_map(|(name, value)| {
                        value.bind(variables).map(|value| (name.clone(), value))
                    })
                    .collect(),
            )),
        }
    }
}

/// Converts a constant GraphQL value to JSON. Variables have no constant value.
pub(crate) fn parse_const_value(value: &ast::Value) -> Option<Value> {
    match value {
        ast::Value::Null => Some(Value::Null),
        ast::Value::Variable(_) => None,
        ast::Value::Enum(name) => Some(name.as_str().into()),
        ast::Value::String(s) => Some(s.as_str().into()),
        ast::Value::Boolean(b) => Some(Value::Bool(*b)),
        ast::Value::Int(i) => i
            .as_str()
            .parse::<i64>()
            .ok()
            .map(Into::into)
            .or_else(|| i.try_to_f64().ok().map(Into::into)),
        ast::Value::Float(f) => f.try_to_f64().ok().map(Into::into),
        ast::Value::List(values) => values
            .iter()
            .map(|v| parse_const_value(v))
            .collect::<Option<_>>()
            .map(Value::Array),
        ast::Value::Object(fields) => fields
            .iter()
            .map(|(name, value)| parse_const_value(value).map(|v| (name.as_str().into(), v)))
            .collect::<Option<_>>()
            .map(Value::Object),
    }
}

/// `@include` and `@skip` conditions of a selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IncludeSkip {
    include: Condition,
    skip: Condition,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    Yes,
    No,
    Variable(String),
}

impl IncludeSkip {
    pub(crate) fn parse(directives: &ast::DirectiveList) -> Self {
        let mut include = None;
        let mut skip = None;
        for directive in &directives.0 {
            if include.is_none() && directive.name.as_str() == "include" {
                include = Condition::parse(directive)
            }
            if skip.is_none() && directive.name.as_str() == "skip" {
                skip = Condition::parse(directive)
            }
        }
        Self {
            include: include.unwrap_or(Condition::Yes),
            skip: skip.unwrap_or(Condition::No),
        }
    }

    pub(crate) fn statically_skipped(&self) -> bool {
        matches!(self.skip, Condition::Yes) || matches!(self.include, Condition::No)
    }

    pub(crate) fn is_unconditional(&self) -> bool {
        matches!(self.skip, Condition::No) && matches!(self.include, Condition::Yes)
    }

    pub(crate) fn should_skip(&self, variables: &Object) -> bool {
        // Variables are not validated against a schema: a missing or non-boolean
        // condition keeps the selection.
        self.skip.eval(variables).unwrap_or(false) || !self.include.eval(variables).unwrap_or(true)
    }
}

impl Default for IncludeSkip {
    fn default() -> Self {
        Self {
            include: Condition::Yes,
            skip: Condition::No,
        }
    }
}

impl Condition {
    pub(crate) fn parse(directive: &ast::Directive) -> Option<Self> {
        let argument = directive
            .arguments
            .iter()
            .find(|argument| argument.name.as_str() == "if")?;
        match argument.value.as_ref() {
            ast::Value::Boolean(true) => Some(Condition::Yes),
            ast::Value::Boolean(false) => Some(Condition::No),
            ast::Value::Variable(variable) => {
                Some(Condition::Variable(variable.as_str().to_owned()))
            }
            _ => None,
        }
    }

    pub(crate) fn eval(&self, variables: &Object) -> Option<bool> {
        match self {
            Condition::Yes => Some(true),
            Condition::No => Some(false),
            Condition::Variable(variable_name) => variables
                .get(variable_name.as_str())
                .and_then(|v| v.as_bool()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    fn parse_fields(query: &str) -> Vec<Selection> {
        let document = ast::Document::parse(query, "query.graphql").unwrap();
        let operation = document
            .definitions
            .iter()
            .find_map(|definition| match definition {
                ast::Definition::OperationDefinition(operation) => Some(operation),
                _ => None,
            })
            .unwrap();
        Selection::from_ast_set(&operation.selection_set, "client", 0).unwrap()
    }

    #[test]
    fn local_flag_and_alias() {
        let selections = parse_fields("{ items { id mine: serverOrClient @client } }");
        let Selection::Field {
            selection_set: Some(items),
            ..
        } = &selections[0]
        else {
            panic!("expected a nested field")
        };
        assert_eq!(items[0], Selection::leaf("id"));
        assert_eq!(
            items[1],
            Selection::leaf("serverOrClient").into_local().with_alias("mine")
        );
    }

    #[test]
    fn statically_skipped_selections_are_dropped() {
        let selections = parse_fields(
            "{ a @skip(if: true) b @include(if: false) c @include(if: true) ... on T @skip(if: true) { d } }",
        );
        assert_eq!(selections, vec![Selection::leaf("c")]);
    }

    #[test]
    fn conditional_selection() {
        let selections = parse_fields("query($hide: Boolean) { a @skip(if: $hide) }");
        let Selection::Field { include_skip, .. } = &selections[0] else {
            panic!("expected a field")
        };
        assert!(!include_skip.is_unconditional());
        assert!(include_skip.should_skip(json!({"hide": true}).as_object().unwrap()));
        assert!(!include_skip.should_skip(json!({"hide": false}).as_object().unwrap()));
        assert!(!include_skip.should_skip(&Object::new()));
    }

    #[test]
    fn arguments_keep_variables_apart() {
        let selections =
            parse_fields(r#"query($n: Int) { items(first: 10, filter: {name: "a", max: $n}, tags: [A, B]) { id } }"#);
        let Selection::Field { arguments, .. } = &selections[0] else {
            panic!("expected a field")
        };
        assert_eq!(arguments[0].1, ArgumentValue::Literal(json!(10)));
        assert!(matches!(arguments[1].1, ArgumentValue::Object(_)));
        assert_eq!(arguments[2].1, ArgumentValue::Literal(json!(["A", "B"])));

        let variables = json!({"n": 3});
        assert_eq!(
            arguments[1].1.bind(variables.as_object().unwrap()),
            Some(json!({"name": "a", "max": 3}))
        );
        assert_eq!(
            arguments[1].1.bind(&Object::new()),
            Some(json!({"name": "a"}))
        );
        assert_eq!(ArgumentValue::Variable("n".into()).bind(&Object::new()), None);
    }
}
