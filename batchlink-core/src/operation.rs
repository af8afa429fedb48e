use crate::codec::{append_query, Headers, Payload, QueryParams, ResponseData};
use http::Method;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Per-client operation identifier. Used as the correlation key inside a
/// batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(u64);

impl OperationId {
    pub fn new(id: u64) -> Self {
        OperationId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Op#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    /// Safe methods are queries, everything else mutates.
    pub fn for_method(method: &Method) -> Self {
        if matches!(*method, Method::GET | Method::HEAD) {
            OperationKind::Query
        } else {
            OperationKind::Mutation
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        };
        write!(f, "{}", s)
    }
}

/// Request description carried by an operation. Links may rewrite it by
/// producing a new operation.
#[derive(Debug, Clone)]
pub struct OperationParams {
    /// Endpoint path relative to the router root, e.g. `/users/42`.
    pub path: String,
    pub method: Method,
    pub headers: Headers,
    pub body: Option<Payload>,
    pub query: Option<QueryParams>,
    pub cancel: Option<CancellationToken>,
}

impl OperationParams {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        OperationParams {
            path: path.into(),
            method,
            headers: Headers::new(),
            body: None,
            query: None,
            cancel: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn body(mut self, body: impl Into<Payload>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn query(mut self, query: QueryParams) -> Self {
        self.query = Some(query);
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Link-local metadata. Never sent over the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationContext(IndexMap<String, Value>);

impl OperationContext {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub params: OperationParams,
    pub context: OperationContext,
}

impl Operation {
    pub fn new(id: OperationId, kind: OperationKind, params: OperationParams) -> Self {
        Operation {
            id,
            kind,
            params,
            context: OperationContext::default(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.params.headers.insert(name, value);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key, value);
        self
    }

    pub fn with_params(mut self, f: impl FnOnce(OperationParams) -> OperationParams) -> Self {
        self.params = f(self.params);
        self
    }

    /// Path including the encoded query string.
    pub fn target(&self) -> String {
        append_query(&self.params.path, self.params.query.as_ref())
    }

    pub fn is_cancelled(&self) -> bool {
        self.params
            .cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

/// Decoded response of one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub data: ResponseData,
}

impl Response {
    pub fn ok(data: ResponseData) -> Self {
        Response {
            status: 200,
            headers: Headers::new(),
            data,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Event flowing back through the link chain. One-shot operations emit a
/// single `Data`; subscriptions emit `Started`, any number of `Data`, then
/// `Stopped`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultEnvelope {
    Started,
    Data(Response),
    Stopped,
}

impl ResultEnvelope {
    pub fn into_data(self) -> Option<Response> {
        match self {
            ResultEnvelope::Data(response) => Some(response),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_for_method() {
        assert_eq!(OperationKind::for_method(&Method::GET), OperationKind::Query);
        assert_eq!(OperationKind::for_method(&Method::HEAD), OperationKind::Query);
        assert_eq!(OperationKind::for_method(&Method::DELETE), OperationKind::Mutation);
        assert_eq!(OperationKind::Subscription.to_string(), "subscription");
    }

    #[test]
    fn test_target_includes_query() {
        let op = Operation::new(
            OperationId::new(1),
            OperationKind::Query,
            OperationParams::get("/users").query(QueryParams::new().with("page", 2)),
        );
        assert_eq!(op.target(), "/users?page=2");
    }

    #[test]
    fn test_rewrites_produce_new_operation() {
        let op = Operation::new(OperationId::new(7), OperationKind::Mutation, OperationParams::post("/a"));
        let rewritten = op
            .clone()
            .with_header("X-Request-Id", "abc")
            .with_context("attempt", json!(1));
        assert!(op.params.headers.is_empty());
        assert_eq!(rewritten.params.headers.get("x-request-id"), Some("abc"));
        assert_eq!(rewritten.context.get("attempt"), Some(&json!(1)));
        assert_eq!(rewritten.id, op.id);
    }

    #[test]
    fn test_cancellation_flag() {
        let token = CancellationToken::new();
        let op = Operation::new(
            OperationId::new(1),
            OperationKind::Query,
            OperationParams::get("/a").cancel_token(token.clone()),
        );
        assert!(!op.is_cancelled());
        token.cancel();
        assert!(op.is_cancelled());
    }
}
