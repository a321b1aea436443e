//! Selection planning.
//!
//! A [`QueryPlan`] is the query flattened for execution: fragments are inlined, fields
//! are classified as local or remote, storage names are computed once and every nested
//! selection set gets a stable numeric id.

use std::sync::Arc;

use serde::Serialize;
use serde_json_bytes::ByteString;

use crate::error::PlanningError;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::spec::ArgumentValue;
use crate::spec::Fragments;
use crate::spec::IncludeSkip;
use crate::spec::OperationKind;
use crate::spec::Query;
use crate::spec::Selection;
use crate::spec::RECURSION_LIMIT;
use crate::store::IdentityKey;

pub(crate) mod caching;

pub(crate) use caching::PlanCache;

/// An executable plan for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryPlan {
    pub(crate) kind: OperationKind,
    pub(crate) operation_name: Option<String>,
    pub(crate) root_type: String,
    pub(crate) variable_defaults: Object,
    pub(crate) selection: Arc<SelectionPlan>,
}

impl QueryPlan {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn operation_name(&self) -> Option<&str> {
        self.operation_name.as_deref()
    }

    pub fn root_type(&self) -> &str {
        &self.root_type
    }

    pub fn selection(&self) -> &SelectionPlan {
        &self.selection
    }

    /// Key of the cache record holding the operation's root fields.
    pub fn root_key(&self) -> IdentityKey {
        IdentityKey::for_operation(self.kind)
    }

    /// The request variables completed with the operation's defaults.
    pub fn variables(&self, provided: &Object) -> Object {
        let mut variables = self.variable_defaults.clone();
        for (name, value) in provided {
            variables.insert(name.clone(), value.clone());
        }
        variables
    }

    /// Number of selection sets in the plan.
    pub fn selection_count(&self) -> usize {
        self.selection.count()
    }

    /// `true` if any field of the plan is local.
    pub fn has_local_fields(&self) -> bool {
        self.selection.has_local_fields()
    }
}

/// The fields of one selection set, in query order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionPlan {
    pub(crate) id: usize,
    pub(crate) fields: Vec<FieldPlan>,
}

impl SelectionPlan {
    /// Depth-first position of this selection set in its plan.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn fields(&self) -> &[FieldPlan] {
        &self.fields
    }

    fn count(&self) -> usize {
        1 + self
            .fields
            .iter()
            .filter_map(|field| field.selection.as_ref())
            .map(SelectionPlan::count)
            .sum::<usize>()
    }

    pub(crate) fn has_local_fields(&self) -> bool {
        self.fields.iter().any(|field| {
            field.kind == FieldKind::Local
                || field
                    .selection
                    .as_ref()
                    .map(SelectionPlan::has_local_fields)
                    .unwrap_or_default()
        })
    }
}

/// Where a field's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FieldKind {
    /// Computed by a local resolver.
    Local,
    /// Read from the cache or the response payload.
    Remote,
}

/// One selected field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldPlan {
    pub(crate) name: ByteString,
    pub(crate) response_key: ByteString,
    pub(crate) kind: FieldKind,
    pub(crate) arguments: Vec<(ByteString, ArgumentValue)>,
    /// Arguments bound at plan time, when none of them references a variable.
    pub(crate) static_arguments: Option<Object>,
    pub(crate) storage_key: Option<ByteString>,
    /// Parent type known from the query itself.
    pub(crate) parent_type: Option<String>,
    pub(crate) type_conditions: Vec<String>,
    pub(crate) conditions: Vec<IncludeSkip>,
    pub(crate) selection: Option<SelectionPlan>,
}

impl FieldPlan {
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn response_key(&self) -> &str {
        self.response_key.as_str()
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn parent_type(&self) -> Option<&str> {
        self.parent_type.as_deref()
    }

    pub fn selection(&self) -> Option<&SelectionPlan> {
        self.selection.as_ref()
    }

    pub(crate) fn is_typename(&self) -> bool {
        self.name.as_str() == crate::spec::TYPENAME
    }

    /// Arguments with variables replaced by their values.
    pub fn arguments(&self, variables: &Object) -> Object {
        match &self.static_arguments {
            Some(arguments) => arguments.clone(),
            None => bind_arguments(&self.arguments, variables),
        }
    }

    /// Name of the field inside a cache record.
    pub fn storage_key(&self, variables: &Object) -> ByteString {
        match &self.storage_key {
            Some(key) => key.clone(),
            None => storage_key(self.name.as_str(), &self.arguments(variables)),
        }
    }

    /// `true` when `@skip`/`@include` exclude this field for these variables.
    pub(crate) fn is_skipped(&self, variables: &Object) -> bool {
        self.conditions
            .iter()
            .any(|condition| condition.should_skip(variables))
    }

    /// Checks the field's fragment type conditions against a runtime type name.
    ///
    /// Objects without a `__typename` match every condition.
    pub(crate) fn applies_to(&self, typename: Option<&str>) -> bool {
        match typename {
            Some(typename) => self
                .type_conditions
                .iter()
                .all(|condition| condition == typename),
            None => true,
        }
    }
}

fn bind_arguments(arguments: &[(ByteString, ArgumentValue)], variables: &Object) -> Object {
    arguments
        .iter()
        .filter_map(|(name, value)| value.bind(variables).map(|value| (name.clone(), value)))
        .collect()
}

/// Storage name of a field: the bare name, or `name({"arg":value})` with sorted argument
/// names.
pub(crate) fn storage_key(name: &str, arguments: &Object) -> ByteString {
    if arguments.is_empty() {
        return name.into();
    }
    let arguments = sorted(&Value::Object(arguments.clone()));
    let arguments = serde_json::to_string(&arguments).unwrap_or_default();
    format!("{name}({arguments})").into()
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut entries: Vec<_> = object.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.as_str().cmp(b.as_str()));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), sorted(value)))
                    .collect(),
            )
        }
        Value::Array(values) => Value::Array(values.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// Builds [`QueryPlan`]s from parsed queries.
///
/// Planning is pure: it only depends on the query text, so plans can be cached and
/// shared between executions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Planner;

impl Planner {
    /// Plans the operation `operation_name` of `query`.
    #[tracing::instrument(skip_all, level = "trace", fields(operation_name = ?operation_name))]
    pub fn plan(query: &Query, operation_name: Option<&str>) -> Result<QueryPlan, PlanningError> {
        let operation = query.operation(operation_name)?;
        if operation.kind() == OperationKind::Subscription {
            return Err(PlanningError::UnsupportedOperation(
                operation.kind().as_str().to_string(),
            ));
        }
        let root_type = operation.kind().default_type_name();
        let selection = PlanBuilder::new(query.fragments()).build(
            &[operation.selection_set()],
            Some(root_type),
            &[],
            0,
        )?;

        Ok(QueryPlan {
            kind: operation.kind(),
            operation_name: operation.name().map(str::to_owned),
            root_type: root_type.to_string(),
            variable_defaults: operation.variable_defaults().clone(),
            selection: Arc::new(selection),
        })
    }

    /// Plans a bare selection set read from an object of type `root_type`.
    pub fn plan_selection_set(
        selections: &[Selection],
        fragments: &Fragments,
        root_type: &str,
    ) -> Result<QueryPlan, PlanningError> {
        let selection = PlanBuilder::new(fragments).build(&[selections], Some(root_type), &[], 0)?;
        Ok(QueryPlan {
            kind: OperationKind::Query,
            operation_name: None,
            root_type: root_type.to_string(),
            variable_defaults: Object::new(),
            selection: Arc::new(selection),
        })
    }
}

/// A field collected from a selection set and its fragments, before its own selection
/// set is planned.
struct CollectedField<'a> {
    name: &'a ByteString,
    response_key: &'a ByteString,
    arguments: &'a [(ByteString, ArgumentValue)],
    local: bool,
    parent_type: Option<String>,
    type_conditions: Vec<String>,
    conditions: Vec<IncludeSkip>,
    selection_sets: Vec<&'a [Selection]>,
    leaf: bool,
    /// Fragments being expanded where the field was found.
    fragments: Vec<&'a str>,
}

impl CollectedField<'_> {
    fn merges_with(&self, other: &Self) -> bool {
        self.response_key == other.response_key
            && self.name == other.name
            && self.arguments == other.arguments
            && self.local == other.local
            && self.leaf == other.leaf
            && self.type_conditions == other.type_conditions
            && self.conditions == other.conditions
    }
}

/// Fragment context of the selections being collected.
#[derive(Clone, Default)]
struct Scope<'a> {
    parent_type: Option<String>,
    type_conditions: Vec<String>,
    conditions: Vec<IncludeSkip>,
    fragments: Vec<&'a str>,
}

impl<'a> Scope<'a> {
    fn nested(&self, type_condition: Option<&str>, include_skip: &IncludeSkip) -> Self {
        let mut scope = self.clone();
        if let Some(type_condition) = type_condition {
            scope.parent_type = Some(type_condition.to_owned());
            if !scope.type_conditions.iter().any(|c| c == type_condition) {
                scope.type_conditions.push(type_condition.to_owned());
            }
        }
        if !include_skip.is_unconditional() {
            scope.conditions.push(include_skip.clone());
        }
        scope
    }
}

struct PlanBuilder<'a> {
    fragments: &'a Fragments,
    next_id: usize,
}

impl<'a> PlanBuilder<'a> {
    fn new(fragments: &'a Fragments) -> Self {
        Self {
            fragments,
            next_id: 0,
        }
    }

    fn build(
        &mut self,
        selection_sets: &[&'a [Selection]],
        parent_type: Option<&str>,
        fragments: &[&'a str],
        depth: usize,
    ) -> Result<SelectionPlan, PlanningError> {
        check_depth(depth)?;
        let id = self.next_id;
        self.next_id += 1;

        let scope = Scope {
            parent_type: parent_type.map(str::to_owned),
            fragments: fragments.to_vec(),
            ..Default::default()
        };
        let mut collected = Vec::new();
        for selections in selection_sets.iter().copied() {
            self.collect(selections, &scope, depth, &mut collected)?;
        }

        let fields = collected
            .into_iter()
            .map(|field| self.plan_field(field, depth))
            .collect::<Result<_, _>>()?;
        Ok(SelectionPlan { id, fields })
    }

    fn collect(
        &self,
        selections: &'a [Selection],
        scope: &Scope<'a>,
        depth: usize,
        collected: &mut Vec<CollectedField<'a>>,
    ) -> Result<(), PlanningError> {
        check_depth(depth)?;
        for selection in selections {
            match selection {
                Selection::Field {
                    name,
                    alias,
                    arguments,
                    local,
                    include_skip,
                    selection_set,
                } => {
                    let mut conditions = scope.conditions.clone();
                    if !include_skip.is_unconditional() {
                        conditions.push(include_skip.clone());
                    }
                    let field = CollectedField {
                        name,
                        response_key: alias.as_ref().unwrap_or(name),
                        arguments,
                        local: *local,
                        parent_type: scope.parent_type.clone(),
                        type_conditions: scope.type_conditions.clone(),
                        conditions,
                        selection_sets: selection_set.as_deref().into_iter().collect(),
                        leaf: selection_set.is_none(),
                        fragments: scope.fragments.clone(),
                    };
                    match collected
                        .iter_mut()
                        .find(|existing| existing.merges_with(&field))
                    {
                        Some(existing) => existing.selection_sets.extend(field.selection_sets),
                        None => collected.push(field),
                    }
                }
                Selection::InlineFragment {
                    type_condition,
                    include_skip,
                    selection_set,
                } => {
                    let scope = scope.nested(type_condition.as_deref(), include_skip);
                    self.collect(selection_set, &scope, depth + 1, collected)?;
                }
                Selection::FragmentSpread { name, include_skip } => {
                    if scope.fragments.contains(&name.as_str()) {
                        return Err(PlanningError::RecursiveFragment(name.clone()));
                    }
                    let fragment = self
                        .fragments
                        .get(name)
                        .ok_or_else(|| PlanningError::UnknownFragment(name.clone()))?;
                    let mut scope =
                        scope.nested(Some(fragment.type_condition.as_str()), include_skip);
                    scope.fragments.push(name.as_str());
                    self.collect(&fragment.selection_set, &scope, depth + 1, collected)?;
                }
            }
        }
        Ok(())
    }

    fn plan_field(
        &mut self,
        field: CollectedField<'a>,
        depth: usize,
    ) -> Result<FieldPlan, PlanningError> {
        let static_arguments: Option<Object> = field
            .arguments
            .iter()
            .map(|(name, value)| value.as_literal().map(|value| (name.clone(), value.clone())))
            .collect();
        let storage_key = static_arguments
            .as_ref()
            .map(|arguments| storage_key(field.name.as_str(), arguments));
        let selection = if field.leaf {
            None
        } else {
            Some(self.build(&field.selection_sets, None, &field.fragments, depth + 1)?)
        };

        Ok(FieldPlan {
            name: field.name.clone(),
            response_key: field.response_key.clone(),
            kind: if field.local {
                FieldKind::Local
            } else {
                FieldKind::Remote
            },
            arguments: field.arguments.to_vec(),
            static_arguments,
            storage_key,
            parent_type: field.parent_type,
            type_conditions: field.type_conditions,
            conditions: field.conditions,
            selection,
        })
    }
}

fn check_depth(depth: usize) -> Result<(), PlanningError> {
    if depth > RECURSION_LIMIT {
        tracing::error!("selection planning recursion limit({RECURSION_LIMIT}) exceeded");
        return Err(PlanningError::RecursionLimitExceeded(RECURSION_LIMIT));
    }
    Ok(())
}
