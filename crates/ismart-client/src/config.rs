//! API client configuration with YAML / TOML support

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// iSmart API client configuration
///
/// Can be loaded from YAML, TOML, JSON, or constructed programmatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Connection settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Account credentials
    pub credentials: CredentialsConfig,

    /// Delays and timeouts
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Base URI of the API gateway. Endpoint paths are resolved relative to it.
    #[serde(default = "default_base_uri")]
    pub base_uri: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_uri: default_base_uri(),
        }
    }
}

fn default_base_uri() -> String {
    "https://gateway-mg-eu.soimt.com/api.app/v1/".to_string()
}

/// Account credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Account username: an email address or a phone number
    pub username: String,

    /// Plain-text password; only its SHA-1 digest is sent
    pub password: String,

    /// Force email / phone login. Detected from the username when unset.
    #[serde(default)]
    pub username_is_email: Option<bool>,

    /// Phone country code, sent for phone-number logins only
    #[serde(default)]
    pub phone_country_code: Option<String>,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("username_is_email", &self.username_is_email)
            .field("phone_country_code", &self.phone_country_code)
            .finish()
    }
}

impl CredentialsConfig {
    /// Whether the username should be treated as an email address
    pub fn is_email(&self) -> bool {
        self.username_is_email
            .unwrap_or_else(|| self.username.contains('@'))
    }
}

/// Delay and timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Wait before logging in again after the server ended the session (0 = no wait)
    #[serde(default)]
    pub relogin_delay_secs: u64,

    /// Interval between event-id polls (default: 3s)
    #[serde(default = "default_sms_delivery_delay")]
    pub sms_delivery_delay_secs: u64,

    /// Total time budget of an event-id polling loop (default: 30s)
    #[serde(default = "default_max_poll")]
    pub max_poll_secs: u64,

    /// General request timeout in milliseconds (default: 30s)
    #[serde(default = "default_request_timeout")]
    pub request_ms: u64,

    /// Connect timeout in milliseconds (default: 10s)
    #[serde(default = "default_connect_timeout")]
    pub connect_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            relogin_delay_secs: 0,
            sms_delivery_delay_secs: default_sms_delivery_delay(),
            max_poll_secs: default_max_poll(),
            request_ms: default_request_timeout(),
            connect_ms: default_connect_timeout(),
        }
    }
}

fn default_sms_delivery_delay() -> u64 {
    3
}

fn default_max_poll() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_connect_timeout() -> u64 {
    10_000
}

impl TimingConfig {
    pub fn relogin_delay(&self) -> Duration {
        Duration::from_secs(self.relogin_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.sms_delivery_delay_secs)
    }

    pub fn max_poll_duration(&self) -> Duration {
        Duration::from_secs(self.max_poll_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }
}

impl ApiConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Parse configuration from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Serialize configuration to YAML
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Create a builder for programmatic configuration
    pub fn builder(username: impl Into<String>, password: impl Into<String>) -> ApiConfigBuilder {
        ApiConfigBuilder::new(username, password)
    }

    /// Check that the configuration can be used to log in
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credentials.username.trim().is_empty() {
            return Err(ConfigError::Invalid("username must not be empty".into()));
        }
        if self.credentials.password.is_empty() {
            return Err(ConfigError::Invalid("password must not be empty".into()));
        }
        self.base_url()?;
        Ok(())
    }

    /// Base URI as a directory URL (always ends with `/`)
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let raw = &self.connection.base_uri;
        let normalized = if raw.ends_with('/') {
            raw.clone()
        } else {
            format!("{}/", raw)
        };
        Url::parse(&normalized).map_err(|e| ConfigError::Invalid(format!("base_uri: {}", e)))
    }

    /// Append an endpoint path to the base URI.
    ///
    /// A single leading `/` is stripped and the rest is appended verbatim,
    /// so the result always stays under the base directory.
    pub fn endpoint_url(&self, path: &str) -> Result<Url, ConfigError> {
        let base = self.base_url()?;
        let relative = path.strip_prefix('/').unwrap_or(path);
        let url = Url::parse(&format!("{}{}", base, relative))
            .map_err(|e| ConfigError::Invalid(format!("path '{}': {}", path, e)))?;

        // The URL parser still folds `..` segments; reject anything that left the base
        if url.origin() != base.origin() || !url.path().starts_with(base.path()) {
            return Err(ConfigError::Invalid(format!(
                "path '{}' escapes the base URI",
                path
            )));
        }
        Ok(url)
    }
}

/// Builder for ApiConfig
pub struct ApiConfigBuilder {
    config: ApiConfig,
}

impl ApiConfigBuilder {
    /// Create a new builder with the given credentials
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            config: ApiConfig {
                connection: ConnectionConfig::default(),
                credentials: CredentialsConfig {
                    username: username.into(),
                    password: password.into(),
                    username_is_email: None,
                    phone_country_code: None,
                },
                timing: TimingConfig::default(),
            },
        }
    }

    /// Set the base URI
    pub fn base_uri(mut self, uri: impl Into<String>) -> Self {
        self.config.connection.base_uri = uri.into();
        self
    }

    /// Force email (`true`) or phone (`false`) login
    pub fn username_is_email(mut self, is_email: bool) -> Self {
        self.config.credentials.username_is_email = Some(is_email);
        self
    }

    /// Set the phone country code
    pub fn phone_country_code(mut self, code: impl Into<String>) -> Self {
        self.config.credentials.phone_country_code = Some(code.into());
        self
    }

    /// Set the relogin delay in seconds
    pub fn relogin_delay_secs(mut self, secs: u64) -> Self {
        self.config.timing.relogin_delay_secs = secs;
        self
    }

    /// Set the event-id poll interval in seconds
    pub fn sms_delivery_delay_secs(mut self, secs: u64) -> Self {
        self.config.timing.sms_delivery_delay_secs = secs;
        self
    }

    /// Set the event-id polling budget in seconds
    pub fn max_poll_secs(mut self, secs: u64) -> Self {
        self.config.timing.max_poll_secs = secs;
        self
    }

    /// Set request timeout in milliseconds
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.timing.request_ms = ms;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ApiConfig {
        self.config
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
connection:
  base_uri: "http://localhost:8080/api.app/v1/"

credentials:
  username: "driver@example.com"
  password: "secret"

timing:
  relogin_delay_secs: 15
  sms_delivery_delay_secs: 5
"#;

        let config = ApiConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.connection.base_uri,
            "http://localhost:8080/api.app/v1/"
        );
        assert_eq!(config.credentials.username, "driver@example.com");
        assert_eq!(config.timing.relogin_delay(), Duration::from_secs(15));
        assert_eq!(config.timing.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.timing.max_poll_duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_toml_parsing_uses_defaults() {
        let toml = r#"
[credentials]
username = "5551234"
password = "pw"
phone_country_code = "49"
"#;

        let config = ApiConfig::from_toml(toml).unwrap();
        assert_eq!(
            config.connection.base_uri,
            "https://gateway-mg-eu.soimt.com/api.app/v1/"
        );
        assert_eq!(
            config.credentials.phone_country_code.as_deref(),
            Some("49")
        );
        assert!(!config.credentials.is_email());
        assert_eq!(config.timing.relogin_delay(), Duration::ZERO);
    }

    #[test]
    fn test_email_detection() {
        let config = ApiConfig::builder("a@b.com", "pw").build();
        assert!(config.credentials.is_email());

        let forced = ApiConfig::builder("a@b.com", "pw")
            .username_is_email(false)
            .build();
        assert!(!forced.credentials.is_email());
    }

    #[test]
    fn test_endpoint_url_strips_leading_slash() {
        let config = ApiConfig::builder("a@b.com", "pw")
            .base_uri("http://localhost:9080/api.app/v1")
            .build();

        assert_eq!(
            config.endpoint_url("/vehicle/list").unwrap().as_str(),
            "http://localhost:9080/api.app/v1/vehicle/list"
        );
        assert_eq!(
            config.endpoint_url("oauth/token").unwrap().as_str(),
            "http://localhost:9080/api.app/v1/oauth/token"
        );
    }

    #[test]
    fn test_endpoint_url_stays_under_base() {
        let config = ApiConfig::builder("a@b.com", "pw")
            .base_uri("https://gw.example/api.app/v1/")
            .build();

        assert_eq!(
            config.endpoint_url("//vehicle/list").unwrap().as_str(),
            "https://gw.example/api.app/v1//vehicle/list"
        );
        assert_eq!(
            config.endpoint_url("https://attacker.example/steal").unwrap().as_str(),
            "https://gw.example/api.app/v1/https://attacker.example/steal"
        );
        assert_eq!(
            config.endpoint_url("a:b").unwrap().as_str(),
            "https://gw.example/api.app/v1/a:b"
        );
        assert!(config.endpoint_url("../x").is_err());
        assert!(config.endpoint_url("../../x").is_err());
        assert!(config.endpoint_url("vehicle/../../x").is_err());
    }

    #[test]
    fn test_validate() {
        assert!(ApiConfig::builder("a@b.com", "pw").build().validate().is_ok());
        assert!(ApiConfig::builder("", "pw").build().validate().is_err());
        assert!(ApiConfig::builder("a@b.com", "").build().validate().is_err());
        assert!(ApiConfig::builder("a@b.com", "pw")
            .base_uri("not a url")
            .build()
            .validate()
            .is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ApiConfig::builder("a@b.com", "hunter2").build();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_to_yaml() {
        let config = ApiConfig::builder("a@b.com", "pw")
            .base_uri("http://localhost:8080/")
            .build();

        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("base_uri"));
        assert!(yaml.contains("http://localhost:8080/"));
    }
}
