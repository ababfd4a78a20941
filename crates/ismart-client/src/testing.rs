//! Test utilities for ismart-client
//!
//! - [`ScriptedTransport`]: replays queued responses and records requests
//! - [`ManualClock`]: virtual time that only moves when slept on
//! - [`RecordingListener`]: keeps a log of observed exchanges
//! - [`TestServer`]: serves an axum router on an ephemeral port

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::net::TcpListener;

use crate::clock::{Clock, SystemClock};
use crate::config::ApiConfig;
use crate::error::{IsmartClientError, Result};
use crate::listener::ApiListener;
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, Transport, EVENT_ID_HEADER};
use crate::IsmartClient;

type RequestObserver = Box<dyn Fn(&ApiRequest) + Send + Sync>;

/// Transport that answers from a queue of canned responses.
///
/// Once the queue is drained the fallback response (if any) is returned for
/// every further request.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<ApiResponse>>,
    fallback: Mutex<Option<ApiResponse>>,
    requests: Mutex<Vec<ApiRequest>>,
    observer: Mutex<Option<RequestObserver>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response
    pub fn push(&self, response: ApiResponse) {
        self.responses.lock().push_back(response);
    }

    /// Queue a 200 response with the given JSON body
    pub fn push_json(&self, body: &str) {
        self.push(ApiResponse::new(200, body));
    }

    /// Queue a 200 response with the given JSON body and `event-id` header.
    ///
    /// Panics if `event_id` is not a valid header value.
    pub fn push_json_with_event_id(&self, body: &str, event_id: &str) {
        let response = ApiResponse::new(200, body)
            .with_header(EVENT_ID_HEADER, event_id)
            .expect("event-id must be a valid header value");
        self.push(response);
    }

    /// Response returned once the queue is empty
    pub fn set_fallback(&self, response: ApiResponse) {
        *self.fallback.lock() = Some(response);
    }

    /// Run `observer` on every request before it is answered
    pub fn set_observer(&self, observer: impl Fn(&ApiRequest) + Send + Sync + 'static) {
        *self.observer.lock() = Some(Box::new(observer));
    }

    /// All requests received so far
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    /// `event-id` header of every request received so far
    pub fn sent_event_ids(&self) -> Vec<Option<String>> {
        self.requests
            .lock()
            .iter()
            .map(|r| r.header(EVENT_ID_HEADER).map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        if let Some(observer) = self.observer.lock().as_ref() {
            observer(&request);
        }
        self.requests.lock().push(request);

        let next = self.responses.lock().pop_front();
        next.or_else(|| self.fallback.lock().clone()).ok_or_else(|| {
            IsmartClientError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "no scripted response left",
            ))
        })
    }
}

/// Virtual clock: `sleep` returns immediately and advances time
pub struct ManualClock {
    origin: Instant,
    origin_utc: DateTime<Utc>,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            origin_utc: Utc::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Move time forward without recording a sleep
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Virtual time elapsed since creation
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }

    /// Every duration passed to `sleep`, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.origin_utc + elapsed
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Listener that logs each exchange as `request METHOD PATH` and
/// `response METHOD PATH BODY`
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event seen so far, in order
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl ApiListener for RecordingListener {
    async fn on_request(&self, request: &ApiRequest) {
        self.events
            .lock()
            .push(format!("request {} {}", request.method, request.url.path()));
    }

    async fn on_response(&self, request: &ApiRequest, response: &ApiResponse) {
        self.events.lock().push(format!(
            "response {} {} {}",
            request.method,
            request.url.path(),
            response.body
        ));
    }
}

/// A test server that automatically shuts down when dropped
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: IsmartClient,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    /// Serve `router` and build a client pointed at it.
    ///
    /// The client uses `test@example.com` / `secret` and the default timing.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use ismart_client::testing::TestServer;
    ///
    /// let server = TestServer::start(mock_gateway()).await?;
    /// server.client.login().await?;
    /// ```
    pub async fn start(router: axum::Router) -> Result<Self> {
        Self::start_with_config(router, ApiConfig::builder("test@example.com", "secret").build())
            .await
    }

    /// Serve `router` with a custom client configuration.
    ///
    /// The configured base URI is replaced by the server address.
    pub async fn start_with_config(router: axum::Router, config: ApiConfig) -> Result<Self> {
        Self::start_with_clock(router, config, Arc::new(SystemClock)).await
    }

    /// Serve `router` with a custom configuration and clock
    pub async fn start_with_clock(
        router: axum::Router,
        mut config: ApiConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        // Bind to any available port
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        config.connection.base_uri = format!("http://{}/api.app/v1/", addr);
        let transport = HttpTransport::new(&config)?;
        let client = IsmartClient::with_parts(config, Arc::new(transport), clock);

        Ok(Self {
            addr,
            client,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Get the base URL of the test server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
