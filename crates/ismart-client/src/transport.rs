//! Transport layer for API requests
//!
//! The [`Transport`] trait abstracts how a prepared request reaches the
//! vendor gateway. [`HttpTransport`] is the reqwest-backed implementation;
//! tests use [`crate::testing::ScriptedTransport`].

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::{Client, Method};
use tracing::debug;
use url::Url;

use crate::config::ApiConfig;
use crate::error::{IsmartClientError, Result};

/// Response header carrying the server's correlation token
pub const EVENT_ID_HEADER: &str = "event-id";

/// Request body variants understood by the transport
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// No body is sent
    Empty,
    /// `application/json` body
    Json(serde_json::Value),
    /// `application/x-www-form-urlencoded` body, fields sent in order
    Form(Vec<(String, String)>),
}

/// A fully prepared request
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    /// Bearer token for authenticated calls; `None` for the login request
    pub bearer_token: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            query: Vec::new(),
            body: RequestBody::Empty,
            bearer_token: None,
        }
    }

    /// Look up a request header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Form field value, for form-encoded bodies
    pub fn form_field(&self, name: &str) -> Option<&str> {
        match &self.body {
            RequestBody::Form(fields) => fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }
}

/// Raw response returned by a transport
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Attach a response header
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| IsmartClientError::InvalidHeader(format!("{}: {}", name, e)))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| IsmartClientError::InvalidHeader(format!("{}: {}", name, e)))?;
        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    /// Value of the `event-id` header, if present
    pub fn event_id(&self) -> Option<String> {
        self.headers
            .get(EVENT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

/// Sends prepared requests to the API gateway.
///
/// Implementations may sign or encrypt requests transparently; the caller
/// only sees the decrypted response text.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport using the configured timeouts
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timing.request_timeout())
            .connect_timeout(config.timing.connect_timeout())
            .build()?;

        Ok(Self { client })
    }

    /// Get a reference to the underlying HTTP client
    pub fn http_client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        debug!("{} {}", request.method, request.url);

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| IsmartClientError::InvalidHeader(format!("{}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| IsmartClientError::InvalidHeader(format!("{}: {}", name, e)))?;
            headers.insert(name, value);
        }

        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(headers);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &request.bearer_token {
            builder = builder.bearer_auth(token);
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Form(fields) => builder.form(&fields),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await?;

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
