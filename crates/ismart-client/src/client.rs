//! iSmart API client: authenticated calls and event-id polling

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::ApiConfig;
use crate::envelope::{classify_response, Verdict};
use crate::error::{IsmartClientError, Result};
use crate::listener::{ApiListener, ListeningTransport};
use crate::retry::{poll_with_event_id, Attempt, PollPolicy};
use crate::session::{Session, SessionManager};
use crate::transport::{ApiRequest, HttpTransport, RequestBody, Transport, EVENT_ID_HEADER};
use crate::types::LoginResponse;

/// One authenticated API call
///
/// # Example
///
/// ```rust,ignore
/// let call = ApiCall::post("/vehicle/control")
///     .json(&command)?
///     .query("vin", vin_hash);
/// ```
#[derive(Debug, Clone)]
pub struct ApiCall {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl ApiCall {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            query: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body. The body must serialize to a JSON object.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| IsmartClientError::InvalidBody(e.to_string()))?;
        if !value.is_object() {
            return Err(IsmartClientError::InvalidBody(
                "request body must be a JSON object".into(),
            ));
        }
        self.body = Some(value);
        Ok(self)
    }

    /// Add a query parameter
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a request header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Copy of this call carrying `event_id`, replacing any previous value
    fn with_event_id(&self, event_id: &str) -> Self {
        let mut call = self.clone();
        call.headers
            .retain(|(name, _)| !name.eq_ignore_ascii_case(EVENT_ID_HEADER));
        call.headers
            .push((EVENT_ID_HEADER.to_string(), event_id.to_string()));
        call
    }
}

/// iSmart REST API client
///
/// Cheap to clone; clones share one session. Call [`IsmartClient::login`]
/// before any other call.
#[derive(Clone)]
pub struct IsmartClient {
    config: Arc<ApiConfig>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    sessions: Arc<SessionManager>,
}

impl IsmartClient {
    /// Create a client talking HTTP to the configured gateway
    pub fn new(config: ApiConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_parts(
            config,
            Arc::new(transport),
            Arc::new(SystemClock),
        ))
    }

    /// Create a client from explicit collaborators
    pub fn with_parts(
        config: ApiConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::from_shared(Arc::new(config), transport, clock)
    }

    /// Report every request and response, login included, to `listener`.
    ///
    /// Returns a client with a fresh session; attach the listener before
    /// calling [`IsmartClient::login`].
    pub fn with_listener(self, listener: Arc<dyn ApiListener>) -> Self {
        let transport = Arc::new(ListeningTransport::new(self.transport, listener));
        Self::from_shared(self.config, transport, self.clock)
    }

    fn from_shared(
        config: Arc<ApiConfig>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(
            config.clone(),
            transport.clone(),
            clock.clone(),
        ));

        Self {
            config,
            transport,
            clock,
            sessions,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Get the session manager
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Sign in with the configured credentials
    pub async fn login(&self) -> Result<LoginResponse> {
        self.sessions.login().await
    }

    /// Forget the current session
    pub fn logout(&self) {
        self.sessions.logout()
    }

    pub fn is_authenticated(&self) -> bool {
        self.sessions.is_authenticated()
    }

    pub fn token_expiration(&self) -> Option<DateTime<Utc>> {
        self.sessions.token_expiration()
    }

    pub fn session(&self) -> Session {
        self.sessions.session()
    }

    // =========================================================================
    // Single calls
    // =========================================================================

    /// Run a call and decode its `data` payload as `T`.
    ///
    /// A server request to poll again is reported as
    /// [`IsmartClientError::ApplicationError`]; use
    /// [`IsmartClient::execute_with_event_id`] for polling endpoints.
    #[instrument(skip(self, call), fields(method = %call.method, path = %call.path))]
    pub async fn execute<T: DeserializeOwned>(&self, call: ApiCall) -> Result<T> {
        self.execute_once::<T>(&call, true)
            .await?
            .ok_or_else(|| IsmartClientError::deserialization("missing 'data' field", ""))
    }

    /// Run a call whose response carries no payload
    #[instrument(skip(self, call), fields(method = %call.method, path = %call.path))]
    pub async fn execute_no_content(&self, call: ApiCall) -> Result<()> {
        self.execute_once::<serde_json::Value>(&call, false)
            .await
            .map(|_| ())
    }

    // =========================================================================
    // Event-id polling
    // =========================================================================

    /// Run a polling call until the server returns a payload.
    ///
    /// Uses the configured poll interval and budget.
    pub async fn execute_with_event_id<T: DeserializeOwned>(&self, call: ApiCall) -> Result<T> {
        self.execute_with_event_id_cancellable(call, &CancellationToken::new())
            .await
    }

    /// Like [`IsmartClient::execute_with_event_id`], stopping with
    /// [`IsmartClientError::Cancelled`] once `cancel` fires.
    #[instrument(skip(self, call, cancel), fields(method = %call.method, path = %call.path))]
    pub async fn execute_with_event_id_cancellable<T: DeserializeOwned>(
        &self,
        call: ApiCall,
        cancel: &CancellationToken,
    ) -> Result<T> {
        self.poll::<T>(&call, true, cancel)
            .await?
            .ok_or_else(|| IsmartClientError::deserialization("missing 'data' field", ""))
    }

    /// Run a polling call whose final response carries no payload
    #[instrument(skip(self, call, cancel), fields(method = %call.method, path = %call.path))]
    pub async fn execute_with_event_id_no_content(
        &self,
        call: ApiCall,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.poll::<serde_json::Value>(&call, false, cancel)
            .await
            .map(|_| ())
    }

    // =========================================================================
    // Helper Methods
    // =========================================================================

    async fn execute_once<T: DeserializeOwned>(
        &self,
        call: &ApiCall,
        expect_data: bool,
    ) -> Result<Option<T>> {
        match self.attempt::<T>(call, expect_data).await? {
            Attempt::Done(payload) => Ok(payload),
            Attempt::Retry { code, message, .. } => {
                warn!("Server asked to retry a call that does not poll: {}", code);
                Err(IsmartClientError::application(code, message))
            }
        }
    }

    async fn poll<T: DeserializeOwned>(
        &self,
        call: &ApiCall,
        expect_data: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<T>> {
        let policy = PollPolicy::from_timing(&self.config.timing);

        poll_with_event_id(policy, self.clock.as_ref(), cancel, move |event_id| {
            let call = call.with_event_id(&event_id);
            async move { self.attempt::<T>(&call, expect_data).await }
        })
        .await
    }

    /// Send one request and classify the response.
    ///
    /// On a 401 the session is renewed before `SessionExpired` is returned;
    /// the call itself is not resubmitted.
    async fn attempt<T: DeserializeOwned>(
        &self,
        call: &ApiCall,
        expect_data: bool,
    ) -> Result<Attempt<Option<T>>> {
        let token = self
            .sessions
            .bearer_token()
            .ok_or(IsmartClientError::AuthenticationRequired)?;

        let url = self.config.endpoint_url(&call.path)?;
        let mut request = ApiRequest::new(call.method.clone(), url);
        request.headers = call.headers.clone();
        request.query = call.query.clone();
        request.body = match &call.body {
            Some(body) => RequestBody::Json(body.clone()),
            None => RequestBody::Empty,
        };
        request.bearer_token = Some(token.clone());

        debug!("Sending {} {}", request.method, request.url);
        let response = self.transport.send(request).await?;

        match classify_response::<T>(&response, expect_data) {
            Verdict::Success(payload) => Ok(Attempt::Done(payload)),
            Verdict::Retryable {
                event_id,
                code,
                message,
            } => Ok(Attempt::Retry {
                event_id,
                code,
                message,
            }),
            Verdict::ReauthRequired { message } => {
                self.sessions.reauthenticate(Some(token.as_str())).await?;
                Err(IsmartClientError::SessionExpired { message })
            }
            Verdict::Fatal(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for IsmartClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsmartClient")
            .field("base_uri", &self.config.connection.base_uri)
            .field("session", &self.sessions.session())
            .finish()
    }
}
