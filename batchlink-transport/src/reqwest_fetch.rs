use async_trait::async_trait;
use batchlink_core::codec::Headers;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client as HttpClient;
use std::io;
use std::time::Duration;
use tracing::{debug, trace};

use crate::transport::{Fetch, HttpRequest, HttpResponse, TransportError};

/// Network transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestFetch {
    http_client: HttpClient,
}

impl ReqwestFetch {
    pub fn new() -> Result<Self, TransportError> {
        let http_client = HttpClient::builder()
            .build()
            .map_err(|e| TransportError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http_client })
    }

    /// Applies a connect timeout. No total timeout is set because
    /// subscription bodies stay open; callers bound one-shot calls with a
    /// cancellation token instead.
    pub fn with_connect_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let http_client = HttpClient::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http_client })
    }

    pub fn from_client(http_client: HttpClient) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl Fetch for ReqwestFetch {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| TransportError::InvalidRequest(format!("{}: {}", request.url, e)))?;
        debug!(method = %request.method, url = %url, "sending request");

        let mut builder = self
            .http_client
            .request(request.method, url)
            .headers(request.headers.to_header_map());
        if let Some(body) = request.body {
            trace!(len = body.len(), "request body");
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = Headers::from(response.headers());
        debug!(status, "received response");

        let body = response
            .bytes_stream()
            .map_err(io::Error::other)
            .boxed();
        Ok(HttpResponse::new(status, headers, body))
    }
}
