/// Remote Procedure Gateway
///
/// Every remote operation (table query, named procedure, edge function)
/// resolves to either a JSON payload or a [`RemoteError`]. Higher layers
/// depend only on the [`RpcGateway`] trait so the hosted backend and the
/// embedded one are interchangeable.

pub mod http;

pub use http::HttpGateway;

use crate::error::{ClubResult, RemoteError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Outcome of a single remote call
pub type RemoteResult = Result<Value, RemoteError>;

/// Row filter applied to a table query or update
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
    IsNull(String),
}

impl Filter {
    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(column, _) | Filter::In(column, _) | Filter::IsNull(column) => column,
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Declarative table query
#[derive(Debug, Clone, PartialEq)]
pub struct TableQuery {
    pub table: String,
    pub columns: Option<Vec<String>>,
    pub filters: Vec<Filter>,
    pub order: Option<(String, Order)>,
    pub limit: Option<u32>,
}

impl TableQuery {
    pub fn from(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: None,
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.to_string(), value.into()));
        self
    }

    pub fn in_list<V: Into<Value>>(mut self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.filters.push(Filter::In(column.to_string(), values));
        self
    }

    pub fn is_null(mut self, column: &str) -> Self {
        self.filters.push(Filter::IsNull(column.to_string()));
        self
    }

    pub fn order_by(mut self, column: &str, order: Order) -> Self {
        self.order = Some((column.to_string(), order));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Transport-agnostic access to the backend
#[async_trait]
pub trait RpcGateway: Send + Sync {
    /// Invoke a named remote procedure
    async fn rpc(&self, name: &str, args: Value) -> RemoteResult;

    /// Select rows; resolves to a JSON array
    async fn select(&self, query: &TableQuery) -> RemoteResult;

    /// Insert one row; resolves to the stored row
    async fn insert(&self, table: &str, row: Value) -> RemoteResult;

    /// Update every row matching the query's filters; resolves to a JSON array
    /// of the rows actually changed
    async fn update(&self, query: &TableQuery, patch: Value) -> RemoteResult;

    /// Invoke an edge function
    async fn invoke_function(&self, name: &str, body: Option<Value>) -> RemoteResult;

    /// Invoke a named remote procedure under `token` instead of the shared
    /// bearer token (`None` = anonymous)
    async fn rpc_with_token(&self, token: Option<&str>, name: &str, args: Value) -> RemoteResult;

    /// Bearer token used for subsequent calls (`None` = anonymous)
    fn set_access_token(&self, token: Option<String>);

    /// Bearer token currently attached to calls
    fn access_token(&self) -> Option<String>;
}

/// Typed helpers over [`RpcGateway`]
#[async_trait]
pub trait GatewayExt: RpcGateway {
    async fn rpc_as<T: DeserializeOwned>(&self, name: &str, args: Value) -> ClubResult<T> {
        let data = self.rpc(name, args).await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn select_as<T: DeserializeOwned>(&self, query: &TableQuery) -> ClubResult<Vec<T>> {
        let data = self.select(query).await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn insert_as<T: DeserializeOwned>(&self, table: &str, row: Value) -> ClubResult<T> {
        let data = self.insert(table, row).await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn update_as<T: DeserializeOwned>(
        &self,
        query: &TableQuery,
        patch: Value,
    ) -> ClubResult<Vec<T>> {
        let data = self.update(query, patch).await?;
        Ok(serde_json::from_value(data)?)
    }
}

impl<G: RpcGateway + ?Sized> GatewayExt for G {}
