//! The client facade: one store, one resolver registry and a plan cache.

use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::configuration::Configuration;
use crate::context::Context;
use crate::error::ExecutionError;
use crate::error::PlanningError;
use crate::execution::Executor;
use crate::execution::Root;
use crate::graphql::Request;
use crate::graphql::Response;
use crate::json_ext::Value;
use crate::plan::PlanCache;
use crate::plan::Planner;
use crate::plan::QueryPlan;
use crate::resolver::LocalResolverRegistry;
use crate::spec::Query;
use crate::store::EntityStore;

/// Serves GraphQL requests from cached server data and local resolvers.
///
/// Server responses are written with [`LocalStateClient::write_response`]; reads go
/// through [`LocalStateClient::query`]. Plans are cached per query text and operation
/// name.
#[derive(Debug)]
pub struct LocalStateClient {
    configuration: Arc<Configuration>,
    store: Arc<EntityStore>,
    registry: Arc<LocalResolverRegistry>,
    plans: PlanCache,
    context: Context,
}

#[buildstructor::buildstructor]
impl LocalStateClient {
    /// Builder methods:
    ///
    /// * `.configuration(Configuration)` optional, defaults to [`Configuration::default`].
    /// * `.registry(Arc<LocalResolverRegistry>)` optional, defaults to no
    ///   local resolver.
    /// * `.context(Context)` optional, handed to every resolver.
    #[builder(visibility = "pub")]
    fn new(
        configuration: Option<Configuration>,
        registry: Option<Arc<LocalResolverRegistry>>,
        context: Option<Context>,
    ) -> Self {
        let configuration = configuration.unwrap_or_default();
        let limit =
            NonZeroUsize::new(configuration.plan_cache_limit()).unwrap_or(NonZeroUsize::MIN);
        Self {
            store: Arc::new(EntityStore::with_type_policies(
                configuration.type_policies(),
            )),
            registry: registry.unwrap_or_default(),
            plans: PlanCache::new(limit),
            context: context.unwrap_or_default(),
            configuration: Arc::new(configuration),
        }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<LocalResolverRegistry> {
        &self.registry
    }

    /// Plans `query`, reusing a cached plan for the same text and operation name.
    ///
    /// Local fields without any matching resolver are rejected here, before any data
    /// is read.
    pub fn plan(
        &self,
        query: &str,
        operation_name: Option<&str>,
    ) -> Result<Arc<QueryPlan>, PlanningError> {
        self.plans.get_or_plan(query, operation_name, || {
            let query =
                Query::parse_with_local_directive(query, self.configuration.local_directive())?;
            let plan = Planner::plan(&query, operation_name)?;
            self.registry.validate(&plan)?;
            Ok(plan)
        })
    }

    /// Writes the server's `data` for `request` into the store.
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn write_response(&self, request: &Request, data: &Value) -> Result<(), ExecutionError> {
        let plan = self.plan_request(request)?;
        self.store.ingest(&plan, data, &request.variables)?;
        Ok(())
    }

    /// Executes `request` against the store, starting from the operation's root record.
    #[tracing::instrument(skip_all, level = "debug", fields(operation = ?request.operation_name))]
    pub async fn query(&self, request: &Request) -> Result<Response, ExecutionError> {
        let plan = self.plan_request(request)?;
        let root = Root::Entity(plan.root_key());
        self.execute(plan, request, root).await
    }

    /// Executes `request` over a raw value: a payload, or a list of payloads. References
    /// found in it are followed into the store.
    #[tracing::instrument(skip_all, level = "debug", fields(operation = ?request.operation_name))]
    pub async fn execute_on_value(
        &self,
        request: &Request,
        value: Value,
    ) -> Result<Response, ExecutionError> {
        let plan = self.plan_request(request)?;
        self.execute(plan, request, Root::Value(value)).await
    }

    fn plan_request(&self, request: &Request) -> Result<Arc<QueryPlan>, ExecutionError> {
        let query = request.query.as_deref().ok_or(ExecutionError::MissingQuery)?;
        Ok(self.plan(query, request.operation_name.as_deref())?)
    }

    async fn execute(
        &self,
        plan: Arc<QueryPlan>,
        request: &Request,
        root: Root,
    ) -> Result<Response, ExecutionError> {
        let response = Executor::builder()
            .plan(plan)
            .registry(self.registry.clone())
            .store(self.store.snapshot())
            .variables(request.variables.clone())
            .context(self.context.clone())
            .missing_entities(self.configuration.missing_entities())
            .build()
            .execute(root)
            .await?;
        if !response.is_complete() {
            tracing::debug!(
                errors = response.errors.len(),
                "execution completed with field errors"
            );
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;
    use test_log::test;

    use super::*;
    use crate::configuration::MissingEntityPolicy;

    fn registry() -> Arc<LocalResolverRegistry> {
        let registry = LocalResolverRegistry::builder()
            .register("Item", "serverOrClient", |_, _, _| Ok(json!("client")))
            .register("Query", "greeting", |_, _, resolver_context| {
                let name: Option<String> = resolver_context.context().get("name")?;
                Ok(json!(format!("hello {}", name.unwrap_or_default())))
            })
            .build();
        Arc::new(registry)
    }

    fn request(query: &str) -> Request {
        Request::builder().query(query.to_string()).build()
    }

    #[test(tokio::test)]
    async fn write_then_query() {
        let client = LocalStateClient::builder().registry(registry()).build();
        client
            .write_response(
                &request("{ items { id serverOrClient } }"),
                &json!({"items": [{"__typename": "Item", "id": "1", "serverOrClient": "server"}]}),
            )
            .unwrap();

        let response = client
            .query(&request("{ items { id serverOrClient @client } }"))
            .await
            .unwrap();
        assert_eq!(
            response.data,
            Some(json!({"items": [{"id": "1", "serverOrClient": "client"}]}))
        );
        assert_eq!(client.store().len(), 2);
    }

    #[test]
    fn plans_are_cached() {
        let client = LocalStateClient::builder().registry(registry()).build();
        let first = client.plan("{ items { id } }", None).unwrap();
        let second = client.plan("{ items { id } }", None).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(client.plans.len(), 1);

        assert!(matches!(
            client.plan("{ items { unknown @client } }", None),
            Err(PlanningError::UnresolvedLocalField { .. })
        ));
        assert!(matches!(
            client.plan("{ items", None),
            Err(PlanningError::Parsing(_))
        ));
        assert_eq!(client.plans.len(), 1);
    }

    #[test(tokio::test)]
    async fn missing_query() {
        let client = LocalStateClient::builder().build();
        assert_eq!(
            client.query(&Request::default()).await,
            Err(ExecutionError::MissingQuery)
        );
    }

    #[test(tokio::test)]
    async fn configured_behavior() {
        let configuration: Configuration = r#"
missing_entities: abort
local_directive: local
type_policies:
  Book:
    key_fields: [isbn]
"#
        .parse()
        .unwrap();
        assert_eq!(configuration.missing_entities(), MissingEntityPolicy::Abort);

        let context = Context::new();
        context.insert("name", "Ada".to_string()).unwrap();
        let client = LocalStateClient::builder()
            .configuration(configuration)
            .registry(registry())
            .context(context)
            .build();

        client
            .write_response(
                &request("{ book { isbn title } }"),
                &json!({"book": {"__typename": "Book", "isbn": "1", "title": "T"}}),
            )
            .unwrap();
        assert!(client.store().get("Book:{\"isbn\":\"1\"}").is_ok());

        let response = client
            .query(&request("{ book { title } greeting @local }"))
            .await
            .unwrap();
        assert_eq!(
            response.data,
            Some(json!({"book": {"title": "T"}, "greeting": "hello Ada"}))
        );

        client.store().write(
            "ROOT_QUERY",
            json!({"book": {"__ref": "Book:2"}})
                .as_object()
                .unwrap()
                .clone(),
        );
        assert!(matches!(
            client.query(&request("{ book { title } }")).await,
            Err(ExecutionError::MissingEntity { .. })
        ));
    }
}
