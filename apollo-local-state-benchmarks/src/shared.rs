// fixtures for the benchmarks, pulled in with include!() instead of
// as a pub module, so it is only compiled in dev mode
use std::sync::Arc;

use apollo_local_state::json_ext::Value;
use apollo_local_state::LocalResolverRegistry;
use apollo_local_state::LocalStateClient;
use apollo_local_state::Request;
use once_cell::sync::Lazy;
use serde_json_bytes::json;

pub static LIST_WITHOUT_CLIENT: &str = "{ items { id foo { bar { baz } } serverOrClient } }";
pub static LIST_WITH_CLIENT: &str = "{ items { id foo { bar { baz } } serverOrClient @client } }";
pub static ROOT_WITHOUT_CLIENT: &str = "{ items { id foo } serverOrClient }";
pub static ROOT_WITH_CLIENT: &str = "{ items { id foo } serverOrClient @client }";

pub const ITEM_COUNTS: [usize; 3] = [100, 1000, 10000];

static FOO: Lazy<Value> = Lazy::new(|| {
    Value::Array((0..10).map(|i| json!({"bar": {"baz": i}})).collect())
});

/// Server data for a list of items, each carrying `serverOrClient`.
pub fn list_response(item_count: usize) -> Value {
    let items: Vec<Value> = (0..item_count)
        .map(|i| {
            json!({
                "__typename": "Item",
                "id": i.to_string(),
                "foo": FOO.clone(),
                "serverOrClient": "server"
            })
        })
        .collect();
    json!({ "items": items })
}

/// Server data for a list of items next to a root `serverOrClient` field.
pub fn root_response(item_count: usize) -> Value {
    let items: Vec<Value> = (0..item_count)
        .map(|i| json!({"id": i.to_string(), "foo": format!("foo-{i}")}))
        .collect();
    json!({ "items": items, "serverOrClient": "server" })
}

pub fn setup() -> LocalStateClient {
    let registry = LocalResolverRegistry::builder()
        .register("Item", "serverOrClient", |_, _, _| Ok(json!("client")))
        .register("Query", "serverOrClient", |_, _, _| Ok(json!("client")))
        .build();
    LocalStateClient::builder()
        .registry(Arc::new(registry))
        .build()
}

/// Writes the server data then reads the query back, as a network-only fetch does.
pub async fn fetch_and_read(client: &LocalStateClient, query: &str, data: &Value) -> Value {
    let request = Request::builder().query(query.to_string()).build();
    client
        .write_response(&request, data)
        .expect("server data matches the query");
    let response = client.query(&request).await.expect("query executes");
    assert!(response.errors.is_empty());
    response.data.expect("data is present")
}
