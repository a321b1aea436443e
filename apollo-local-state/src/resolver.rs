//! Local field resolvers.
//!
//! Fields marked with the local directive are computed on the client by resolvers
//! registered per `(type, field)`. A resolver either returns its value right away or
//! hands back a future; only the field it resolves waits for that future.

use std::collections::HashMap;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use derivative::Derivative;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::context::Context;
use crate::error::BoxError;
use crate::error::PlanningError;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::plan::FieldKind;
use crate::plan::QueryPlan;
use crate::plan::SelectionPlan;
use crate::store::StoreSnapshot;

/// Future returned by asynchronous resolvers.
pub type ResolverFuture = BoxFuture<'static, Result<Value, BoxError>>;

/// What a resolver returns.
pub enum Resolution {
    /// The value is available now.
    Ready(Result<Value, BoxError>),
    /// The value will be produced by the future.
    Pending(ResolverFuture),
}

impl From<Result<Value, BoxError>> for Resolution {
    fn from(result: Result<Value, BoxError>) -> Self {
        Resolution::Ready(result)
    }
}

/// Data available to resolvers during one execution.
///
/// Cloning is cheap, so asynchronous resolvers can move a clone into their future.
#[derive(Clone, Debug)]
pub struct ResolverContext {
    variables: Arc<Object>,
    store: Arc<StoreSnapshot>,
    context: Context,
}

impl ResolverContext {
    pub(crate) fn new(variables: Arc<Object>, store: Arc<StoreSnapshot>, context: Context) -> Self {
        Self {
            variables,
            store,
            context,
        }
    }

    /// The operation variables, defaults included.
    pub fn variables(&self) -> &Object {
        &self.variables
    }

    /// The cache content the execution reads from.
    pub fn store(&self) -> &Arc<StoreSnapshot> {
        &self.store
    }

    /// User data shared by every resolver of the execution.
    pub fn context(&self) -> &Context {
        &self.context
    }
}

/// Computes the value of one local field.
pub trait LocalResolver: Send + Sync {
    /// `parent` is the object holding the field: a cache record when reading from the
    /// store, or the raw object otherwise. `arguments` are bound to the variables.
    fn resolve(&self, parent: &Object, arguments: &Object, context: &ResolverContext)
        -> Resolution;
}

struct SyncResolver<F>(F);

impl<F> LocalResolver for SyncResolver<F>
where
    F: Fn(&Object, &Object, &ResolverContext) -> Result<Value, BoxError> + Send + Sync,
{
    fn resolve(
        &self,
        parent: &Object,
        arguments: &Object,
        context: &ResolverContext,
    ) -> Resolution {
        Resolution::Ready((self.0)(parent, arguments, context))
    }
}

struct AsyncResolver<F>(F);

impl<F, Fut> LocalResolver for AsyncResolver<F>
where
    F: Fn(&Object, &Object, &ResolverContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
{
    fn resolve(
        &self,
        parent: &Object,
        arguments: &Object,
        context: &ResolverContext,
    ) -> Resolution {
        Resolution::Pending((self.0)(parent, arguments, context).boxed())
    }
}

/// Immutable table of local resolvers, shared between executions.
#[derive(Clone, Default, Derivative)]
#[derivative(Debug)]
pub struct LocalResolverRegistry {
    #[derivative(Debug = "ignore")]
    resolvers: HashMap<String, HashMap<String, Arc<dyn LocalResolver>>>,
    /// Field names with at least one resolver, on any type.
    fields: HashSet<String>,
}

impl LocalResolverRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn lookup(&self, type_name: &str, field: &str) -> Option<&dyn LocalResolver> {
        self.resolvers
            .get(type_name)?
            .get(field)
            .map(|resolver| resolver.as_ref())
    }

    pub fn contains(&self, type_name: &str, field: &str) -> bool {
        self.lookup(type_name, field).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Checks that every local field of `plan` can be resolved.
    ///
    /// A field whose parent type is known from the query needs a resolver on that type.
    /// Otherwise a resolver for the field name on any type is accepted, as the type is
    /// only known once the data is read.
    pub fn validate(&self, plan: &QueryPlan) -> Result<(), PlanningError> {
        self.validate_selection(plan.selection())
    }

    fn validate_selection(&self, selection: &SelectionPlan) -> Result<(), PlanningError> {
        for field in selection.fields() {
            if field.kind() == FieldKind::Local {
                let resolvable = match field.parent_type() {
                    Some(type_name) => self.contains(type_name, field.name()),
                    None => self.fields.contains(field.name()),
                };
                if !resolvable {
                    return Err(PlanningError::UnresolvedLocalField {
                        type_name: field.parent_type().unwrap_or("*").to_string(),
                        field: field.name().to_string(),
                    });
                }
            }
            if let Some(selection) = field.selection() {
                self.validate_selection(selection)?;
            }
        }
        Ok(())
    }
}

/// Collects resolvers before freezing them into a [`LocalResolverRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    resolvers: HashMap<String, HashMap<String, Arc<dyn LocalResolver>>>,
}

impl RegistryBuilder {
    /// Registers a resolver that computes its value synchronously.
    pub fn register<F>(
        self,
        type_name: impl Into<String>,
        field: impl Into<String>,
        resolver: F,
    ) -> Self
    where
        F: Fn(&Object, &Object, &ResolverContext) -> Result<Value, BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.register_resolver(type_name, field, SyncResolver(resolver))
    }

    /// Registers a resolver returning a future.
    pub fn register_async<F, Fut>(
        self,
        type_name: impl Into<String>,
        field: impl Into<String>,
        resolver: F,
    ) -> Self
    where
        F: Fn(&Object, &Object, &ResolverContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.register_resolver(type_name, field, AsyncResolver(resolver))
    }

    /// Registers any [`LocalResolver`]. A later registration for the same field wins.
    pub fn register_resolver(
        mut self,
        type_name: impl Into<String>,
        field: impl Into<String>,
        resolver: impl LocalResolver + 'static,
    ) -> Self {
        self.resolvers
            .entry(type_name.into())
            .or_default()
            .insert(field.into(), Arc::new(resolver));
        self
    }

    pub fn build(self) -> LocalResolverRegistry {
        let fields = self
            .resolvers
            .values()
            .flat_map(|fields| fields.keys().cloned())
            .collect();
        LocalResolverRegistry {
            resolvers: self.resolvers,
            fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;
    use crate::plan::Planner;
    use crate::spec::Query;

    static_assertions::assert_impl_all!(LocalResolverRegistry: Send, Sync);
    static_assertions::assert_impl_all!(ResolverContext: Send, Sync);

    fn context() -> ResolverContext {
        ResolverContext::new(Default::default(), Default::default(), Context::new())
    }

    fn registry() -> LocalResolverRegistry {
        LocalResolverRegistry::builder()
            .register("Query", "serverOrClient", |_, _, _| Ok(json!("client")))
            .register("Item", "serverOrClient", |parent, _, _| {
                Ok(parent.get("id").cloned().unwrap_or_default())
            })
            .register_async("Item", "price", |_, arguments, _| {
                let currency = arguments.get("currency").cloned();
                async move { Ok(currency.unwrap_or_default()) }
            })
            .build()
    }

    fn plan(query: &str) -> QueryPlan {
        Planner::plan(&Query::parse(query).unwrap(), None).unwrap()
    }

    #[test]
    fn lookup_by_type_and_field() {
        let registry = registry();
        assert!(registry.contains("Query", "serverOrClient"));
        assert!(!registry.contains("Query", "price"));
        assert!(registry.lookup("Other", "serverOrClient").is_none());

        let parent = json!({"id": "7"});
        match registry.lookup("Item", "serverOrClient").unwrap().resolve(
            parent.as_object().unwrap(),
            &Object::new(),
            &context(),
        ) {
            Resolution::Ready(Ok(value)) => assert_eq!(value, json!("7")),
            _ => panic!("expected a ready value"),
        }
    }

    #[tokio::test]
    async fn async_resolvers_are_pending() {
        let registry = registry();
        let arguments = json!({"currency": "EUR"});
        let resolution = registry.lookup("Item", "price").unwrap().resolve(
            &Object::new(),
            arguments.as_object().unwrap(),
            &context(),
        );
        let Resolution::Pending(future) = resolution else {
            panic!("expected a future")
        };
        assert_eq!(future.await.unwrap(), json!("EUR"));
    }

    #[test]
    fn validate_plans() {
        let registry = registry();
        assert!(registry
            .validate(&plan("{ serverOrClient @client items { serverOrClient @client } }"))
            .is_ok());
        assert!(registry
            .validate(&plan("{ items { ... on Item { price @client } } }"))
            .is_ok());

        assert_eq!(
            registry.validate(&plan("{ price @client }")),
            Err(PlanningError::UnresolvedLocalField {
                type_name: "Query".to_string(),
                field: "price".to_string()
            })
        );
        assert_eq!(
            registry.validate(&plan("{ items { unknown @client } }")),
            Err(PlanningError::UnresolvedLocalField {
                type_name: "*".to_string(),
                field: "unknown".to_string()
            })
        );
        assert!(registry
            .validate(&plan("{ items { ... on Book { price @client } } }"))
            .is_err());
    }
}
