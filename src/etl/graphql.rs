//! Minimal GraphQL-over-HTTP client for the Balancer subgraphs and API.

use std::{future::Future, time::Duration};

use log::debug;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum GraphQlError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} answered with HTTP {status}")]
    Status { endpoint: String, status: u16 },
    #[error("{endpoint} returned GraphQL errors: {messages}")]
    Query { endpoint: String, messages: String },
    #[error("{endpoint} returned no data")]
    MissingData { endpoint: String },
}

/// Executes one GraphQL query and returns its `data` object.
pub trait GraphQlClient: Send + Sync {
    fn query(
        &self,
        endpoint: &Url,
        query: &str,
        variables: Value,
    ) -> impl Future<Output = Result<Value, GraphQlError>> + Send;
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorMessage {
    message: String,
}

/// [`GraphQlClient`] over a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpGraphQlClient {
    http: reqwest::Client,
}

impl HttpGraphQlClient {
    pub fn new() -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self { http })
    }
}

impl GraphQlClient for HttpGraphQlClient {
    async fn query(
        &self,
        endpoint: &Url,
        query: &str,
        variables: Value,
    ) -> Result<Value, GraphQlError> {
        debug!("Running GraphQL query on {}", endpoint);

        let transport = |source| GraphQlError::Transport {
            endpoint: endpoint.to_string(),
            source,
        };

        let response = self
            .http
            .post(endpoint.clone())
            .json(&serde_json::json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(GraphQlError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }

        let body: GraphQlResponse = response.json().await.map_err(transport)?;
        parse_response(endpoint, body)
    }
}

fn parse_response(endpoint: &Url, body: GraphQlResponse) -> Result<Value, GraphQlError> {
    if !body.errors.is_empty() {
        let messages: Vec<String> = body.errors.into_iter().map(|e| e.message).collect();
        return Err(GraphQlError::Query {
            endpoint: endpoint.to_string(),
            messages: messages.join("; "),
        });
    }

    match body.data {
        Some(data) if !data.is_null() => Ok(data),
        _ => Err(GraphQlError::MissingData {
            endpoint: endpoint.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn endpoint() -> Url {
        Url::parse("https://example.org/subgraphs/name/balancer-v2").unwrap()
    }

    #[test]
    fn test_errors_payload_is_an_error() {
        let body: GraphQlResponse = serde_json::from_value(json!({
            "data": null,
            "errors": [{ "message": "indexing_error" }, { "message": "timeout" }]
        }))
        .unwrap();

        match parse_response(&endpoint(), body) {
            Err(GraphQlError::Query { messages, .. }) => assert_eq!(messages, "indexing_error; timeout"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_missing_data_is_an_error() {
        let body: GraphQlResponse = serde_json::from_value(json!({})).unwrap();
        assert!(matches!(
            parse_response(&endpoint(), body),
            Err(GraphQlError::MissingData { .. })
        ));
    }

    #[test]
    fn test_data_is_returned() {
        let body: GraphQlResponse =
            serde_json::from_value(json!({ "data": { "pools": [] } })).unwrap();
        assert_eq!(parse_response(&endpoint(), body).unwrap(), json!({ "pools": [] }));
    }
}
