//! Fetch executor
//!
//! Performs the single outbound HTTP request a provider script asks for on
//! each iteration. One round trip, redirects up to `max_redirects`, no retries.
//! The status code is not checked: whatever body the server returns is
//! handed to the script.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use tracing::{debug, instrument, warn};

use crate::config::ResolverConfig;
use crate::error::{ResolveError, Result};

/// A fully shaped request, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcreteRequest {
    pub method: Method,
    pub url: String,
    /// Header name/value pairs, in insertion order.
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl ConcreteRequest {
    /// Plain `GET` with no headers or body.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// First value of a header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ResolveError::Fetch(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ResolveError::Fetch(format!("invalid value for header {name}: {e}")))?;
            map.append(name, value);
        }
        Ok(map)
    }
}

/// Something that can perform one fetch.
///
/// [`HttpFetcher`] is the production implementation; tests substitute
/// their own to observe what the negotiation loop sends.
#[async_trait]
pub trait FetchExecutor: Send + Sync {
    /// Perform exactly one round trip and return the raw body.
    async fn fetch(&self, request: ConcreteRequest) -> Result<Bytes>;
}

/// reqwest-backed fetcher, shared by every run of a resolver.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Create a fetcher from the resolver configuration.
    pub fn new(config: &ResolverConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            // Keep connections alive for reuse across runs
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .use_rustls_tls()
            // Compression (auto-negotiated via Accept-Encoding)
            .brotli(true)
            .gzip(true)
            .deflate(true)
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            timeout: config.fetch_timeout(),
        })
    }

    /// Wrap an existing client.
    pub fn with_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn map_error(&self, err: &reqwest::Error) -> ResolveError {
        if err.is_timeout() {
            ResolveError::FetchTimeout(self.timeout)
        } else {
            ResolveError::Fetch(err.to_string())
        }
    }
}

#[async_trait]
impl FetchExecutor for HttpFetcher {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn fetch(&self, request: ConcreteRequest) -> Result<Bytes> {
        let headers = request.header_map()?;
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(headers)
            .timeout(self.timeout);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        debug!("Sending fetch");
        let response = builder.send().await.map_err(|e| self.map_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "Fetch returned non-success status, passing body to script");
        }

        let body = response.bytes().await.map_err(|e| self.map_error(&e))?;
        debug!(%status, bytes = body.len(), "Fetch complete");
        Ok(body)
    }
}
