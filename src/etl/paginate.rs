use std::future::Future;

use anyhow::Context;
use log::debug;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use url::Url;

use crate::etl::{graphql::GraphQlClient, loader::BATCH_SIZE};

/// A subgraph query paginated with an `id_gt: $latestId` cursor.
#[derive(Debug, Clone, Copy)]
pub struct PaginatedQuery {
    /// Field of `data` holding the page
    pub root: &'static str,
    pub text: &'static str,
}

/// A subgraph entity: its cursor id plus every other field, untouched.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Entity {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Entity {
    /// The entity as a JSON object, with `extra` fields merged in.
    pub fn into_value_with(self, extra: &[(&str, Value)]) -> Value {
        let mut fields = self.fields;
        fields.insert("id".to_string(), Value::String(self.id));
        for (key, value) in extra {
            fields.insert(key.to_string(), value.clone());
        }
        Value::Object(fields)
    }
}

/// Fetch every page of `query` from `endpoint`, handing each page to `process`
/// before advancing the cursor to the id of the page's last entity.
///
/// Stops at the first page shorter than [`BATCH_SIZE`]. Errors are not
/// retried; they abort the fetch. Returns the number of entities processed.
pub async fn paginated_fetch<C, F, Fut>(
    client: &C,
    endpoint: &Url,
    query: &PaginatedQuery,
    mut process: F,
) -> anyhow::Result<usize>
where
    C: GraphQlClient,
    F: FnMut(Vec<Entity>) -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut latest_id = String::new();
    let mut total = 0;

    loop {
        let mut data = client
            .query(endpoint, query.text, json!({ "latestId": latest_id }))
            .await?;

        let page: Vec<Entity> = match data.get_mut(query.root) {
            Some(entities) => serde_json::from_value(entities.take())
                .with_context(|| format!("Malformed `{}` page from {}", query.root, endpoint))?,
            None => anyhow::bail!("Response from {} has no `{}` field", endpoint, query.root),
        };

        let page_len = page.len();
        let next_id = page.last().map(|entity| entity.id.clone());

        process(page).await?;
        total += page_len;

        debug!("Fetched {} `{}` from {} ({} total)", page_len, query.root, endpoint, total);

        match next_id {
            Some(id) if page_len >= BATCH_SIZE => latest_id = id,
            _ => break,
        }
    }

    Ok(total)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{collections::VecDeque, sync::Mutex};

    use serde_json::{json, Value};
    use url::Url;

    use crate::etl::graphql::{GraphQlClient, GraphQlError};

    /// Serves canned responses in order and records the variables it was called with.
    pub struct MockGraphQl {
        pub responses: Mutex<VecDeque<Result<Value, GraphQlError>>>,
        pub calls: Mutex<Vec<(String, Value)>>,
    }

    impl MockGraphQl {
        pub fn new(responses: Vec<Result<Value, GraphQlError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// One page of `root` with `size` entities whose ids start at `first`.
        pub fn page(root: &str, first: usize, size: usize) -> Value {
            let entities: Vec<Value> = (first..first + size)
                .map(|i| json!({ "id": format!("{i:06}"), "liquidity": "1" }))
                .collect();
            json!({ root: entities })
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl GraphQlClient for MockGraphQl {
        async fn query(
            &self,
            endpoint: &Url,
            _query: &str,
            variables: Value,
        ) -> Result<Value, GraphQlError> {
            self.calls
                .lock()
                .unwrap()
                .push((endpoint.to_string(), variables));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(json!({})))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::MockGraphQl, *};
    use crate::etl::graphql::GraphQlError;

    const QUERY: PaginatedQuery = PaginatedQuery {
        root: "poolSnapshots",
        text: "query PoolSnapshots($latestId: String!) { ... }",
    };

    fn endpoint() -> Url {
        Url::parse("https://example.org/subgraphs/name/balancer-v2").unwrap()
    }

    #[tokio::test]
    async fn test_stops_after_short_page() {
        let client = MockGraphQl::new(vec![
            Ok(MockGraphQl::page("poolSnapshots", 0, 1000)),
            Ok(MockGraphQl::page("poolSnapshots", 1000, 1000)),
            Ok(MockGraphQl::page("poolSnapshots", 2000, 437)),
        ]);

        let mut page_sizes = Vec::new();
        let total = paginated_fetch(&client, &endpoint(), &QUERY, |page| {
            page_sizes.push(page.len());
            async { Ok(()) }
        })
        .await
        .unwrap();

        assert_eq!(total, 2437);
        assert_eq!(page_sizes, vec![1000, 1000, 437]);
        assert_eq!(client.call_count(), 3);

        let cursors: Vec<Value> = client
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, variables)| variables["latestId"].clone())
            .collect();
        assert_eq!(cursors, vec![json!(""), json!("000999"), json!("001999")]);
    }

    #[tokio::test]
    async fn test_empty_page_terminates() {
        let client = MockGraphQl::new(vec![Ok(MockGraphQl::page("poolSnapshots", 0, 0))]);
        let total = paginated_fetch(&client, &endpoint(), &QUERY, |_| async { Ok(()) })
            .await
            .unwrap();

        assert_eq!(total, 0);
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_error_aborts_without_retry() {
        let client = MockGraphQl::new(vec![
            Ok(MockGraphQl::page("poolSnapshots", 0, 1000)),
            Err(GraphQlError::MissingData {
                endpoint: endpoint().to_string(),
            }),
        ]);

        let result = paginated_fetch(&client, &endpoint(), &QUERY, |_| async { Ok(()) }).await;

        assert!(result.is_err());
        assert_eq!(client.call_count(), 2);
    }

    #[test]
    fn test_entity_keeps_fields() {
        let entity: Entity =
            serde_json::from_value(json!({ "id": "0x1", "symbol": "B-stETH-STABLE" })).unwrap();
        let value = entity.into_value_with(&[("network", json!("ethereum"))]);

        assert_eq!(
            value,
            json!({ "id": "0x1", "symbol": "B-stETH-STABLE", "network": "ethereum" })
        );
    }
}
