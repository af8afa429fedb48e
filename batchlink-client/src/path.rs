use batchlink_core::codec::{Payload, QueryParams};
use batchlink_core::{ChainError, Method, OperationParams};

use crate::client::Client;
use crate::handle::{CallHandle, SubscriptionCallbacks, SubscriptionHandle};

/// Accumulates path segments and request options. Nothing is sent until one
/// of the call methods runs.
#[derive(Debug, Clone)]
pub struct PathBuilder {
    client: Client,
    segments: Vec<String>,
    query: Option<QueryParams>,
    headers: Vec<(String, String)>,
}

impl PathBuilder {
    pub fn new(client: Client) -> Self {
        PathBuilder {
            client,
            segments: Vec::new(),
            query: None,
            headers: Vec::new(),
        }
    }

    /// Appends one or more `/`-separated segments.
    pub fn at(mut self, segment: impl AsRef<str>) -> Self {
        self.segments.extend(
            segment
                .as_ref()
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
        self
    }

    pub fn query(mut self, query: QueryParams) -> Self {
        self.query = Some(query);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    pub fn get(self) -> Result<CallHandle, ChainError> {
        let params = self.params(Method::GET, None);
        self.client.query(params)
    }

    pub fn post(self, body: impl Into<Payload>) -> Result<CallHandle, ChainError> {
        let params = self.params(Method::POST, Some(body.into()));
        self.client.mutation(params)
    }

    pub fn put(self, body: impl Into<Payload>) -> Result<CallHandle, ChainError> {
        let params = self.params(Method::PUT, Some(body.into()));
        self.client.mutation(params)
    }

    pub fn patch(self, body: impl Into<Payload>) -> Result<CallHandle, ChainError> {
        let params = self.params(Method::PATCH, Some(body.into()));
        self.client.mutation(params)
    }

    pub fn delete(self) -> Result<CallHandle, ChainError> {
        let params = self.params(Method::DELETE, None);
        self.client.mutation(params)
    }

    pub fn subscribe(self, callbacks: SubscriptionCallbacks) -> Result<SubscriptionHandle, ChainError> {
        let params = self.params(Method::GET, None);
        self.client.subscription(params, callbacks)
    }

    fn params(&self, method: Method, body: Option<Payload>) -> OperationParams {
        let mut params = OperationParams::new(method, self.path());
        params.body = body;
        params.query = self.query.clone();
        for (name, value) in &self.headers {
            params.headers.insert(name, value.clone());
        }
        params
    }
}
