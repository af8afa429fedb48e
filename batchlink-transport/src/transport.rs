use async_trait::async_trait;
use batchlink_core::codec::Headers;
use batchlink_core::LinkError;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use http::Method;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;

use crate::event_codec::EventStreamCodec;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Body error: {0}")]
    Body(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<TransportError> for LinkError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::InvalidRequest(message) => LinkError::Protocol(message),
            other => LinkError::network(other.to_string()),
        }
    }
}

/// Request descriptor handed to a [`Fetch`] implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    /// Absolute URL. In-process transports only look at path and query.
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        HttpRequest {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

pub type BodyStream = BoxStream<'static, Result<Bytes, io::Error>>;

/// Response descriptor. The body is a stream so subscriptions can consume it
/// incrementally; one-shot callers use [`HttpResponse::bytes`].
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    body: BodyStream,
}

impl HttpResponse {
    pub fn new(status: u16, headers: Headers, body: BodyStream) -> Self {
        HttpResponse { status, headers, body }
    }

    pub fn from_bytes(status: u16, headers: Headers, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let stream = if body.is_empty() {
            stream::empty().boxed()
        } else {
            stream::once(async move { Ok(body) }).boxed()
        };
        Self::new(status, headers, stream)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    /// Collects the whole body.
    pub async fn bytes(self) -> Result<Bytes, TransportError> {
        let mut body = self.body;
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| TransportError::Body(e.to_string()))?;
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    pub fn into_stream(self) -> BodyStream {
        self.body
    }

    /// Reads the body as newline-delimited JSON events.
    pub fn events(self) -> FramedRead<StreamReader<BodyStream, Bytes>, EventStreamCodec> {
        FramedRead::new(StreamReader::new(self.body), EventStreamCodec::new())
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Performs one HTTP exchange. Implemented over the network by
/// [`crate::ReqwestFetch`] and in process by the server crate.
///
/// Dropping the returned future must abort the exchange.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

pub type SharedFetch = Arc<dyn Fetch>;

#[async_trait]
impl<F> Fetch for Arc<F>
where
    F: Fetch + ?Sized,
{
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).fetch(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_bytes_collects_chunks() {
        let chunks: Vec<Result<Bytes, io::Error>> = vec![Ok(Bytes::from_static(b"hel")), Ok(Bytes::from_static(b"lo"))];
        let response = HttpResponse::new(200, Headers::new(), stream::iter(chunks).boxed());
        assert_eq!(response.bytes().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_body_error_surfaces() {
        let chunks: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"x")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let response = HttpResponse::new(200, Headers::new(), stream::iter(chunks).boxed());
        assert!(matches!(response.bytes().await, Err(TransportError::Body(_))));
    }

    #[tokio::test]
    async fn test_events_split_across_chunks() {
        let chunks: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"{\"n\":1}\n{\"n\"")),
            Ok(Bytes::from_static(b":2}\n")),
        ];
        let response = HttpResponse::new(200, Headers::new(), stream::iter(chunks).boxed());
        let events: Vec<_> = response.events().map(|e| e.unwrap()).collect().await;
        assert_eq!(events, vec![json!({"n": 1}), json!({"n": 2})]);
    }

    #[test]
    fn test_error_mapping() {
        let err: LinkError = TransportError::Network("refused".to_string()).into();
        assert!(matches!(err, LinkError::Transport(ref f) if f.status.is_none()));

        let err: LinkError = TransportError::InvalidRequest("bad url".to_string()).into();
        assert_eq!(err, LinkError::Protocol("bad url".to_string()));
    }
}
