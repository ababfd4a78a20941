//! Session manager: login, logout and bearer-token ownership

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use reqwest::Method;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::config::{ApiConfig, CredentialsConfig};
use crate::crypto::sha1_hex_digest;
use crate::envelope::{classify_response, Verdict};
use crate::error::{IsmartClientError, Result};
use crate::transport::{ApiRequest, RequestBody, Transport};
use crate::types::LoginResponse;

/// Token endpoint, relative to the base URI
pub const LOGIN_PATH: &str = "oauth/token";

/// Push registration id the gateway expects as the device identifier
pub const DEVICE_ID: &str = "cqSHOMG1SmK4k-fzAeK6hr:APA91bGtGihOG5SEQ9hPx3Dtr9o9mQguNiKZrQzboa-1C_UBlRZYdFcMmdfLvh9Q_xA8A0dGFIjkMhZbdIXOYnKfHCeWafAfLXOrxBS3N18T4Slr-x9qpV6FHLMhE9s7I6s89k9lU7DD";

/// Realm tag appended to the device identifier
pub const DEVICE_REALM: &str = "europecar";

/// Bearer token and its expiration.
///
/// Both fields are set together by a login and cleared together on
/// logout.
#[derive(Clone, Default, PartialEq)]
pub struct Session {
    bearer_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_authenticated(&self) -> bool {
        self.bearer_token.is_some()
    }

    fn establish(&mut self, token: String, expires_at: DateTime<Utc>) {
        self.bearer_token = Some(token);
        self.expires_at = Some(expires_at);
    }

    fn clear(&mut self) {
        self.bearer_token = None;
        self.expires_at = None;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Build the form fields of the token request, in wire order
pub fn login_form(credentials: &CredentialsConfig) -> Vec<(String, String)> {
    let is_email = credentials.is_email();
    let country_code = if is_email {
        String::new()
    } else {
        credentials.phone_country_code.clone().unwrap_or_default()
    };

    vec![
        ("grant_type".into(), "password".into()),
        ("username".into(), credentials.username.clone()),
        ("password".into(), sha1_hex_digest(&credentials.password)),
        ("scope".into(), "all".into()),
        ("deviceId".into(), format!("{}###{}", DEVICE_ID, DEVICE_REALM)),
        ("deviceType".into(), "1".into()),
        ("loginType".into(), if is_email { "2" } else { "1" }.into()),
        ("countryCode".into(), country_code),
    ]
}

/// Owns the session and serializes every change to it.
///
/// Reads go through a `RwLock`; logins (including re-logins after a 401)
/// hold an async mutex for their whole duration so concurrent calls never
/// race on a half-renewed session.
pub struct SessionManager {
    config: Arc<ApiConfig>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    session: RwLock<Session>,
    login_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(config: Arc<ApiConfig>, transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            transport,
            clock,
            session: RwLock::new(Session::default()),
            login_lock: Mutex::new(()),
        }
    }

    /// Snapshot of the current session
    pub fn session(&self) -> Session {
        self.session.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.read().is_authenticated()
    }

    pub fn bearer_token(&self) -> Option<String> {
        self.session.read().bearer_token.clone()
    }

    pub fn token_expiration(&self) -> Option<DateTime<Utc>> {
        self.session.read().expires_at
    }

    /// Sign in with the configured credentials and store the new token
    #[instrument(skip(self), fields(username = %self.config.credentials.username))]
    pub async fn login(&self) -> Result<LoginResponse> {
        let _guard = self.login_lock.lock().await;
        self.login_locked().await
    }

    /// Drop the current session. Never fails and is safe to repeat.
    pub fn logout(&self) {
        self.session.write().clear();
        debug!("Session cleared");
    }

    /// Handle a 401 for a call that was sent with `stale_token`.
    ///
    /// Clears the session, waits the relogin delay and logs in again. When
    /// a concurrent call already replaced the stale token the re-login is
    /// skipped.
    #[instrument(skip_all)]
    pub async fn reauthenticate(&self, stale_token: Option<&str>) -> Result<()> {
        let _guard = self.login_lock.lock().await;

        if let Some(current) = self.bearer_token() {
            if Some(current.as_str()) != stale_token {
                info!("Session was already renewed by another call");
                return Ok(());
            }
        }

        self.logout();

        let delay = self.config.timing.relogin_delay();
        if !delay.is_zero() {
            warn!("Waiting {:?} since we got logged out", delay);
            self.clock.sleep(delay).await;
        }

        warn!("Logging in since we got logged out");
        self.login_locked().await.map(|_| ())
    }

    async fn login_locked(&self) -> Result<LoginResponse> {
        let url = self.config.endpoint_url(LOGIN_PATH)?;

        let mut request = ApiRequest::new(Method::POST, url);
        request.headers = vec![
            (
                "Content-Type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            ),
            ("Accept".to_string(), "application/json".to_string()),
        ];
        request.body = RequestBody::Form(login_form(&self.config.credentials));

        let response = self.transport.send(request).await?;

        let login = match classify_response::<LoginResponse>(&response, true) {
            Verdict::Success(Some(login)) => login,
            Verdict::Success(None) => {
                return Err(IsmartClientError::deserialization(
                    "missing 'data' field",
                    response.body,
                ))
            }
            Verdict::ReauthRequired { message } => {
                return Err(IsmartClientError::application(401, message))
            }
            Verdict::Retryable { code, message, .. } => {
                return Err(IsmartClientError::application(code, message))
            }
            Verdict::Fatal(e) => return Err(e),
        };

        let expires_at = ChronoDuration::try_seconds(login.expires_in)
            .and_then(|lifetime| self.clock.utc_now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                IsmartClientError::deserialization(
                    format!("invalid expires_in {}", login.expires_in),
                    response.body.clone(),
                )
            })?;
        self.session
            .write()
            .establish(login.access_token.clone(), expires_at);

        info!("Logged in, token valid until {}", expires_at);
        Ok(login)
    }
}
