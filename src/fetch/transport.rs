//! Transport Module
//!
//! Interchangeable upstream transports. The caching, dedup and pacing wrapper
//! is the same whichever one is active.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use crate::cache::Params;
use crate::error::{FetchError, Result};

// == Upstream Response ==
/// Raw status and body, before any envelope handling.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// == Transport Trait ==
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Issues one call. Only transport-level failures are errors; any HTTP
    /// status comes back as a response.
    async fn call(&self, endpoint: &str, params: &Params) -> Result<UpstreamResponse>;
}

// == Transport Kind ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Direct REST API
    Api,
    /// Backend-as-a-service relay exposing equivalent endpoints
    Backend,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "api" | "direct" => Ok(TransportKind::Api),
            "backend" | "baas" => Ok(TransportKind::Backend),
            other => Err(format!("Unknown transport '{}'", other)),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Api => f.write_str("api"),
            TransportKind::Backend => f.write_str("backend"),
        }
    }
}

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| FetchError::Internal(format!("failed to build HTTP client: {}", e)))
}

async fn read_response(response: reqwest::Response) -> Result<UpstreamResponse> {
    let status = response.status().as_u16();
    let body = response
        .bytes()
        .await
        .map_err(|e| FetchError::NetworkError(e.to_string()))?;
    Ok(UpstreamResponse {
        status,
        body: body.to_vec(),
    })
}

// == HTTP API Transport ==
/// `GET {base}/{endpoint}?{params}` with a static credential header.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    key_header: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        key_header: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_header: key_header.into(),
            api_key: api_key.into(),
        })
    }

    pub fn url_for(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn call(&self, endpoint: &str, params: &Params) -> Result<UpstreamResponse> {
        let url = self.url_for(endpoint);
        debug!(url = %url, "Calling upstream API");

        let response = self
            .client
            .get(&url)
            .header(self.key_header.as_str(), self.api_key.as_str())
            .query(params)
            .send()
            .await
            .map_err(|e| FetchError::NetworkError(e.to_string()))?;
        read_response(response).await
    }
}

// == Backend Transport ==
/// `POST {base}/{function}` with `{endpoint, parameters}` as JSON.
#[derive(Debug, Clone)]
pub struct BackendTransport {
    client: Client,
    function_url: String,
    api_key: String,
}

impl BackendTransport {
    pub fn new(
        function_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            function_url: function_url.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl Transport for BackendTransport {
    fn name(&self) -> &'static str {
        "backend"
    }

    async fn call(&self, endpoint: &str, params: &Params) -> Result<UpstreamResponse> {
        debug!(url = %self.function_url, endpoint, "Calling backend relay");

        let response = self
            .client
            .post(&self.function_url)
            .bearer_auth(&self.api_key)
            .header("apikey", self.api_key.as_str())
            .json(&json!({ "endpoint": endpoint, "parameters": params }))
            .send()
            .await
            .map_err(|e| FetchError::NetworkError(e.to_string()))?;
        read_response(response).await
    }
}
