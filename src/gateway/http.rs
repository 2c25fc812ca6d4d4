/// PostgREST / edge-function gateway over HTTP
use super::{Filter, Order, RemoteResult, RpcGateway, TableQuery};
use crate::{
    config::BackendConfig,
    error::{ClubError, ClubResult, RemoteError, NETWORK, TIMEOUT},
};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::sync::{Arc, RwLock};

/// Gateway speaking to a hosted Supabase project
#[derive(Clone)]
pub struct HttpGateway {
    http_client: reqwest::Client,
    rest_url: String,
    functions_url: String,
    anon_key: String,
    access_token: Arc<RwLock<Option<String>>>,
}

impl HttpGateway {
    pub fn new(config: &BackendConfig) -> ClubResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClubError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            rest_url: format!("{}/rest/v1", config.url),
            functions_url: format!("{}/functions/v1", config.url),
            anon_key: config.anon_key.clone(),
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    fn bearer(&self) -> String {
        RpcGateway::access_token(self).unwrap_or_else(|| self.anon_key.clone())
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.request_as(method, url, &self.bearer())
    }

    fn request_as(&self, method: Method, url: &str, bearer: &str) -> RequestBuilder {
        self.http_client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        request.send().await.map_err(transport_error)
    }
}

#[async_trait]
impl RpcGateway for HttpGateway {
    async fn rpc(&self, name: &str, args: Value) -> RemoteResult {
        let url = format!("{}/rpc/{}", self.rest_url, name);
        tracing::debug!("rpc {}", name);

        let response = self.send(self.request(Method::POST, &url).json(&args)).await?;
        read_body(response).await
    }

    async fn rpc_with_token(&self, token: Option<&str>, name: &str, args: Value) -> RemoteResult {
        let url = format!("{}/rpc/{}", self.rest_url, name);
        let bearer = token.unwrap_or(&self.anon_key);

        let response = self
            .send(self.request_as(Method::POST, &url, bearer).json(&args))
            .await?;
        read_body(response).await
    }

    async fn select(&self, query: &TableQuery) -> RemoteResult {
        let url = format!("{}/{}", self.rest_url, query.table);
        let request = self
            .request(Method::GET, &url)
            .query(&query_params(query));

        let response = self.send(request).await?;
        read_body(response).await
    }

    async fn insert(&self, table: &str, row: Value) -> RemoteResult {
        let url = format!("{}/{}", self.rest_url, table);
        let request = self
            .request(Method::POST, &url)
            .header("Prefer", "return=representation")
            .json(&row);

        let response = self.send(request).await?;
        // PostgREST answers inserts with an array of the stored rows
        match read_body(response).await? {
            Value::Array(mut rows) if !rows.is_empty() => Ok(rows.swap_remove(0)),
            Value::Array(_) => Err(RemoteError::new("PGRST116", "insert returned no rows")),
            other => Ok(other),
        }
    }

    async fn update(&self, query: &TableQuery, patch: Value) -> RemoteResult {
        if query.filters.is_empty() {
            return Err(RemoteError::new("21000", "UPDATE requires a WHERE clause"));
        }

        let url = format!("{}/{}", self.rest_url, query.table);
        let request = self
            .request(Method::PATCH, &url)
            .header("Prefer", "return=representation")
            .query(&query_params(query))
            .json(&patch);

        let response = self.send(request).await?;
        read_body(response).await
    }

    async fn invoke_function(&self, name: &str, body: Option<Value>) -> RemoteResult {
        let url = format!("{}/{}", self.functions_url, name);
        let mut request = self.request(Method::POST, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = self.send(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RemoteError::capability_missing(name));
        }
        read_body(response).await
    }

    fn set_access_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.access_token.write() {
            *slot = token;
        }
    }

    fn access_token(&self) -> Option<String> {
        self.access_token.read().ok().and_then(|token| token.clone())
    }
}

/// Render a [`TableQuery`] as PostgREST query parameters
pub(crate) fn query_params(query: &TableQuery) -> Vec<(String, String)> {
    let mut params = Vec::new();

    let select = query
        .columns
        .as_ref()
        .map(|columns| columns.join(","))
        .unwrap_or_else(|| "*".to_string());
    params.push(("select".to_string(), select));

    for filter in &query.filters {
        let rendered = match filter {
            Filter::Eq(_, value) => format!("eq.{}", render_value(value)),
            Filter::In(_, values) => {
                let quoted: Vec<String> = values
                    .iter()
                    .map(|v| format!("\"{}\"", render_value(v).replace('"', "\\\"")))
                    .collect();
                format!("in.({})", quoted.join(","))
            }
            Filter::IsNull(_) => "is.null".to_string(),
        };
        params.push((filter.column().to_string(), rendered));
    }

    if let Some((column, order)) = &query.order {
        let direction = match order {
            Order::Asc => "asc",
            Order::Desc => "desc",
        };
        params.push(("order".to_string(), format!("{}.{}", column, direction)));
    }

    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }

    params
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::new(TIMEOUT, format!("Request timed out: {}", e))
    } else {
        RemoteError::new(NETWORK, format!("Request failed: {}", e))
    }
}

async fn read_body(response: Response) -> RemoteResult {
    let status = response.status();
    let text = response.text().await.map_err(transport_error)?;

    if status.is_success() {
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        return serde_json::from_str(&text)
            .map_err(|e| RemoteError::new("PGRST102", format!("Invalid response body: {}", e)));
    }

    Err(parse_error_body(status, &text))
}

/// Decode a PostgREST error body, falling back to the HTTP status
pub(crate) fn parse_error_body(status: StatusCode, text: &str) -> RemoteError {
    match serde_json::from_str::<RemoteError>(text) {
        Ok(error) => error,
        Err(_) => {
            let message = if text.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            } else {
                text.to_string()
            };
            RemoteError::new(status.as_str(), message)
        }
    }
}
