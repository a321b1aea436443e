//! Hybrid execution.
//!
//! The [`Executor`] walks a [`QueryPlan`] over cached records or a raw payload. Remote
//! fields are copied from the data, local fields are computed by the registered
//! resolvers. Resolvers returning futures suspend only their own field: a `null`
//! placeholder keeps its position in the result and the value is written back at that
//! path once the future completes.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::FutureExt;
use futures::StreamExt;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;

use crate::configuration::MissingEntityPolicy;
use crate::context::Context;
use crate::error::BoxError;
use crate::error::ExecutionError;
use crate::error::FieldError;
use crate::graphql;
use crate::graphql::Response;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::plan::FieldKind;
use crate::plan::FieldPlan;
use crate::plan::QueryPlan;
use crate::plan::SelectionPlan;
use crate::resolver::LocalResolverRegistry;
use crate::resolver::Resolution;
use crate::resolver::ResolverContext;
use crate::resolver::ResolverFuture;
use crate::spec::TYPENAME;
use crate::store::as_reference;
use crate::store::IdentityKey;
use crate::store::Resolved;
use crate::store::StoreSnapshot;

mod assembler;

use assembler::ResultAssembler;
use assembler::Span;

/// Where an execution starts reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Root {
    /// A cache record, usually `ROOT_QUERY`.
    Entity(IdentityKey),
    /// A raw payload: an object, or a list of objects for a list of results.
    Value(Value),
}

impl Root {
    pub fn root_query() -> Self {
        Root::Entity(IdentityKey::root_query())
    }
}

/// Executes one plan against one store snapshot.
#[derive(Clone)]
pub struct Executor {
    plan: Arc<QueryPlan>,
    registry: Arc<LocalResolverRegistry>,
    store: Arc<StoreSnapshot>,
    variables: Arc<Object>,
    context: Context,
    missing_entities: MissingEntityPolicy,
}

#[buildstructor::buildstructor]
impl Executor {
    /// Builder methods:
    ///
    /// * `.plan(Arc<QueryPlan>)` required.
    /// * `.registry(Arc<LocalResolverRegistry>)` required.
    /// * `.store(Arc<StoreSnapshot>)` required.
    /// * `.variables(Object)` or `.variable(name, value)`, completed with the operation's
    ///   default values.
    /// * `.context(Context)` shared with resolvers.
    /// * `.missing_entities(MissingEntityPolicy)`, defaults to nullifying the field.
    #[builder(visibility = "pub")]
    fn new(
        plan: Arc<QueryPlan>,
        registry: Arc<LocalResolverRegistry>,
        store: Arc<StoreSnapshot>,
        // Skip the `Object` type alias in order to use buildstructor’s map special-casing
        variables: JsonMap<ByteString, Value>,
        context: Option<Context>,
        missing_entities: Option<MissingEntityPolicy>,
    ) -> Self {
        let variables = Arc::new(plan.variables(&variables));
        Self {
            plan,
            registry,
            store,
            variables,
            context: context.unwrap_or_default(),
            missing_entities: missing_entities.unwrap_or_default(),
        }
    }

    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    /// Runs the plan from `root`.
    ///
    /// Field-level failures null their field and are reported in the response errors,
    /// ordered by their position in the query. A local field no resolver can serve
    /// fails before anything is read, and so does a missing entity under the `abort`
    /// policy once it is reached.
    #[tracing::instrument(skip_all, level = "trace")]
    pub async fn execute(&self, root: Root) -> Result<Response, ExecutionError> {
        self.registry.validate(&self.plan)?;
        let resolver_context = ResolverContext::new(
            self.variables.clone(),
            self.store.clone(),
            self.context.clone(),
        );
        let execution = Execution {
            plan: &self.plan,
            registry: &self.registry,
            store: &self.store,
            variables: &self.variables,
            resolver_context: &resolver_context,
            missing_entities: self.missing_entities,
        };

        let mut state = State::default();
        let mut data = execution.start(&mut state, root)?;
        execution.drive(&mut state, &mut data).await?;

        Ok(Response::builder()
            .data(data)
            .errors(state.into_errors())
            .build())
    }
}

/// How fields are looked up in the objects being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Cache records, keyed by storage name.
    Record,
    /// Raw payloads and resolver results, keyed by response key.
    Payload,
}

/// Position of the value being completed, turned into a path and an ordering key only
/// when a field error or a pending field needs them.
#[derive(Clone, Copy)]
struct Trail<'p> {
    parent: Option<&'p Trail<'p>>,
    step: Step<'p>,
}

#[derive(Clone, Copy)]
enum Step<'p> {
    Base { path: &'p Path, order: &'p [usize] },
    Field { position: usize, key: &'p ByteString },
    Index(usize),
}

impl<'p> Trail<'p> {
    fn base(path: &'p Path, order: &'p [usize]) -> Self {
        Trail {
            parent: None,
            step: Step::Base { path, order },
        }
    }

    fn field(&'p self, position: usize, key: &'p ByteString) -> Trail<'p> {
        Trail {
            parent: Some(self),
            step: Step::Field { position, key },
        }
    }

    fn index(&'p self, index: usize) -> Trail<'p> {
        Trail {
            parent: Some(self),
            step: Step::Index(index),
        }
    }

    fn collect(&self, path: &mut Vec<PathElement>, order: &mut Vec<usize>) {
        if let Some(parent) = self.parent {
            parent.collect(path, order);
        }
        match self.step {
            Step::Base {
                path: base,
                order: base_order,
            } => {
                path.extend(base.iter().cloned());
                order.extend_from_slice(base_order);
            }
            Step::Field { position, key } => {
                path.push(PathElement::Key(key.clone()));
                order.push(position);
            }
            Step::Index(index) => {
                path.push(PathElement::Index(index));
                order.push(index);
            }
        }
    }

    fn locate(&self) -> (Path, Vec<usize>) {
        let mut path = Vec::new();
        let mut order = Vec::new();
        self.collect(&mut path, &mut order);
        (Path(path), order)
    }

    fn path(&self) -> Path {
        self.locate().0
    }
}

struct PendingField<'a> {
    id: usize,
    path: Path,
    order: Vec<usize>,
    field: &'a FieldPlan,
    type_name: String,
    future: ResolverFuture,
}

/// Mutable state of one execution.
#[derive(Default)]
struct State<'a> {
    /// Field errors with their position in the query.
    errors: Vec<(Vec<usize>, graphql::Error)>,
    /// Pending fields not yet polled.
    pending: Vec<PendingField<'a>>,
    next_pending: usize,
    superseded: HashSet<usize>,
    dropped_errors: HashSet<usize>,
    /// Completed entities by selection set. `None` marks an entity expanded once.
    memo: HashMap<(IdentityKey, usize), Option<Object>>,
}

#[derive(Clone, Copy)]
struct Mark {
    pending: usize,
    errors: usize,
}

impl<'a> State<'a> {
    fn mark(&self) -> Mark {
        Mark {
            pending: self.next_pending,
            errors: self.errors.len(),
        }
    }

    fn span_since(&self, mark: Mark) -> Span {
        Span {
            pending: mark.pending..self.next_pending,
            errors: mark.errors..self.errors.len(),
        }
    }

    /// Discards the pending fields and errors of a field replaced in its object.
    fn supersede(&mut self, span: Span) {
        self.superseded.extend(span.pending);
        self.dropped_errors.extend(span.errors);
    }

    fn field_error(&mut self, error: FieldError, trail: &Trail<'_>) {
        let (path, order) = trail.locate();
        failfast_debug!(%path, %error, "field error");
        self.errors.push((order, error.to_graphql_error(path)));
    }

    fn defer(
        &mut self,
        field: &'a FieldPlan,
        type_name: &str,
        future: ResolverFuture,
        trail: &Trail<'_>,
    ) {
        let (path, order) = trail.locate();
        let id = self.next_pending;
        self.next_pending += 1;
        self.pending.push(PendingField {
            id,
            path,
            order,
            field,
            type_name: type_name.to_string(),
            future,
        });
    }

    fn into_errors(self) -> Vec<graphql::Error> {
        let dropped = self.dropped_errors;
        let mut errors: Vec<_> = self
            .errors
            .into_iter()
            .enumerate()
            .filter(|(index, _)| !dropped.contains(index))
            .map(|(_, error)| error)
            .collect();
        errors.sort_by(|(a, _), (b, _)| a.cmp(b));
        errors.into_iter().map(|(_, error)| error).collect()
    }
}

struct Execution<'a> {
    plan: &'a QueryPlan,
    registry: &'a LocalResolverRegistry,
    store: &'a StoreSnapshot,
    variables: &'a Object,
    resolver_context: &'a ResolverContext,
    missing_entities: MissingEntityPolicy,
}

impl<'a> Execution<'a> {
    /// Synchronous pass over the whole plan.
    fn start(&self, state: &mut State<'a>, root: Root) -> Result<Value, ExecutionError> {
        let root_path = Path::empty();
        let trail = Trail::base(&root_path, &[]);
        let selection: &'a SelectionPlan = &self.plan.selection;
        let root_type = Some(self.plan.root_type());

        match root {
            Root::Entity(key) => {
                let empty = Object::new();
                let record: &Object = match self.store.get(key.as_str()) {
                    Ok(record) => record,
                    // operations may only select local fields before anything was written
                    Err(_) if key == self.plan.root_key() => &empty,
                    Err(_) => return self.missing_entity(state, key.as_str(), &trail),
                };
                self.complete_selection(state, selection, record, Mode::Record, root_type, &trail)
                    .map(Value::Object)
            }
            Root::Value(value) => {
                self.complete_value(state, selection, &value, Mode::Payload, root_type, &trail)
            }
        }
    }

    /// Polls pending fields until none is left, writing each result at its path.
    async fn drive(&self, state: &mut State<'a>, data: &mut Value) -> Result<(), ExecutionError> {
        let mut in_flight = FuturesUnordered::new();
        loop {
            for pending in std::mem::take(&mut state.pending) {
                if state.superseded.contains(&pending.id) {
                    continue;
                }
                let PendingField {
                    id,
                    path,
                    order,
                    field,
                    type_name,
                    future,
                } = pending;
                in_flight.push(
                    future.map(move |result| (id, path, order, field, type_name, result)),
                );
            }

            let Some((id, path, order, field, type_name, result)) = in_flight.next().await else {
                break;
            };
            if state.superseded.contains(&id) {
                continue;
            }

            let trail = Trail::base(&path, &order);
            let value = match result {
                Ok(value) => self.complete_resolved(state, field, value, &trail)?,
                Err(error) => {
                    state.field_error(resolver_failure(&type_name, field, error), &trail);
                    Value::Null
                }
            };
            if !data.replace_at_path(path.as_ref(), value) {
                failfast_error!(%path, "no slot left for a pending field");
            }
        }
        Ok(())
    }

    fn complete_selection(
        &self,
        state: &mut State<'a>,
        selection: &'a SelectionPlan,
        object: &Object,
        mode: Mode,
        type_hint: Option<&str>,
        trail: &Trail<'_>,
    ) -> Result<Object, ExecutionError> {
        let typename = object.get(TYPENAME).and_then(Value::as_str);
        let mut assembler = ResultAssembler::new();

        for (position, field) in selection.fields.iter().enumerate() {
            if field.is_skipped(self.variables) || !field.applies_to(typename) {
                continue;
            }
            let trail = trail.field(position, &field.response_key);
            let known_type = typename.or(field.parent_type()).or(type_hint);
            let mark = state.mark();
            let value = match field.kind {
                FieldKind::Local => self.resolve_local(state, field, object, known_type, &trail)?,
                FieldKind::Remote => {
                    self.read_remote(state, field, object, mode, known_type, &trail)?
                }
            };
            if let Some(superseded) =
                assembler.insert(field.response_key.clone(), value, state.span_since(mark))
            {
                state.supersede(superseded);
            }
        }

        Ok(assembler.finish())
    }

    fn complete_value(
        &self,
        state: &mut State<'a>,
        selection: &'a SelectionPlan,
        value: &Value,
        mode: Mode,
        type_hint: Option<&str>,
        trail: &Trail<'_>,
    ) -> Result<Value, ExecutionError> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Array(values) => values
                .iter()
                .enumerate()
                .map(|(index, value)| {
                    let trail = trail.index(index);
                    self.complete_value(state, selection, value, mode, type_hint, &trail)
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(object) => match self.store.resolve(value) {
                Resolved::Entity { key, record } => self
                    .complete_entity(state, selection, key, record, trail)
                    .map(Value::Object),
                Resolved::Missing(key) => self.missing_entity(state, key, trail),
                Resolved::NotReference(_) => self
                    .complete_selection(state, selection, object, mode, type_hint, trail)
                    .map(Value::Object),
            },
            other => {
                state.field_error(FieldError::shape_mismatch("object", other), trail);
                Ok(Value::Null)
            }
        }
    }

    fn complete_entity(
        &self,
        state: &mut State<'a>,
        selection: &'a SelectionPlan,
        key: &IdentityKey,
        record: &Object,
        trail: &Trail<'_>,
    ) -> Result<Object, ExecutionError> {
        let memo_key = (key.clone(), selection.id);
        let seen = match state.memo.get(&memo_key) {
            Some(Some(object)) => {
                tracing::trace!(%key, selection = selection.id, "reusing completed entity");
                return Ok(object.clone());
            }
            Some(None) => true,
            None => false,
        };

        let mark = state.mark();
        let object = self.complete_selection(state, selection, record, Mode::Record, None, trail)?;
        // only results that do not depend on their position can be reused
        if state.span_since(mark).is_clean() {
            state.memo.insert(memo_key, seen.then(|| object.clone()));
        }
        Ok(object)
    }

    fn read_remote(
        &self,
        state: &mut State<'a>,
        field: &'a FieldPlan,
        object: &Object,
        mode: Mode,
        known_type: Option<&str>,
        trail: &Trail<'_>,
    ) -> Result<Value, ExecutionError> {
        let value = match mode {
            Mode::Record => object.get(field.storage_key(self.variables).as_str()),
            Mode::Payload => object.get(field.response_key()),
        };
        let Some(value) = value else {
            if let (true, Some(known_type)) = (field.is_typename(), known_type) {
                return Ok(Value::String(known_type.into()));
            }
            state.field_error(
                FieldError::MissingField {
                    field: field.name().to_string(),
                },
                trail,
            );
            return Ok(Value::Null);
        };

        match &field.selection {
            None if contains_reference(value) => {
                state.field_error(FieldError::shape_mismatch("leaf value", value), trail);
                Ok(Value::Null)
            }
            None => Ok(value.clone()),
            Some(selection) => self.complete_value(state, selection, value, mode, None, trail),
        }
    }

    fn resolve_local(
        &self,
        state: &mut State<'a>,
        field: &'a FieldPlan,
        parent: &Object,
        known_type: Option<&str>,
        trail: &Trail<'_>,
    ) -> Result<Value, ExecutionError> {
        // parent `__typename`, then the type known from the query, then the root type
        let type_name = known_type.unwrap_or(self.plan.root_type());
        let Some(resolver) = self.registry.lookup(type_name, field.name()) else {
            state.field_error(
                FieldError::UnresolvedLocalField {
                    type_name: type_name.to_string(),
                    field: field.name().to_string(),
                },
                trail,
            );
            return Ok(Value::Null);
        };

        let arguments = field.arguments(self.variables);
        match resolver.resolve(parent, &arguments, self.resolver_context) {
            Resolution::Ready(Ok(value)) => self.complete_resolved(state, field, value, trail),
            Resolution::Ready(Err(error)) => {
                state.field_error(resolver_failure(type_name, field, error), trail);
                Ok(Value::Null)
            }
            Resolution::Pending(future) => {
                state.defer(field, type_name, future, trail);
                Ok(Value::Null)
            }
        }
    }

    /// Completes a resolver result against the field's nested selection, if any.
    fn complete_resolved(
        &self,
        state: &mut State<'a>,
        field: &'a FieldPlan,
        value: Value,
        trail: &Trail<'_>,
    ) -> Result<Value, ExecutionError> {
        match &field.selection {
            None => Ok(value),
            Some(selection) => {
                self.complete_value(state, selection, &value, Mode::Payload, None, trail)
            }
        }
    }

    fn missing_entity(
        &self,
        state: &mut State<'a>,
        key: &str,
        trail: &Trail<'_>,
    ) -> Result<Value, ExecutionError> {
        match self.missing_entities {
            MissingEntityPolicy::Abort => Err(ExecutionError::MissingEntity {
                key: key.to_string(),
                path: trail.path(),
            }),
            MissingEntityPolicy::Nullify => {
                state.field_error(
                    FieldError::MissingEntity {
                        key: key.to_string(),
                    },
                    trail,
                );
                Ok(Value::Null)
            }
        }
    }
}

fn resolver_failure(type_name: &str, field: &FieldPlan, error: BoxError) -> FieldError {
    FieldError::ResolverFailure {
        type_name: type_name.to_string(),
        field: field.name().to_string(),
        reason: error.to_string(),
    }
}

fn contains_reference(value: &Value) -> bool {
    match value {
        Value::Array(values) => values.iter().any(contains_reference),
        value => as_reference(value).is_some(),
    }
}
