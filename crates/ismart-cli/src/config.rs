//! Configuration file handling for ismart-cli

use anyhow::{Context, Result};
use ismart_client::{ApiConfig, TimingConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the CLI tool
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Gateway base URI
    pub base_uri: Option<String>,
    /// Account e-mail or phone number
    pub username: Option<String>,
    /// Account password
    pub password: Option<String>,
    /// Country calling code for phone logins
    pub country_code: Option<String>,
    /// Disable colored output
    pub no_color: Option<bool>,
    /// Delays and timeouts
    #[serde(default)]
    pub timing: Option<TimingConfig>,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("ismart-cli");

        Ok(config_dir.join("config.toml"))
    }

    /// Merge CLI arguments over config file values into a client configuration
    pub fn merge_with_args(&self, args: &CredentialArgs, no_color: bool) -> Result<MergedConfig> {
        let username = args
            .username
            .clone()
            .or_else(|| self.username.clone())
            .context("No username given (use --username or set it in the config file)")?;
        let password = args
            .password
            .clone()
            .or_else(|| self.password.clone())
            .context("No password given (use --password or set it in the config file)")?;

        let mut api = ApiConfig::builder(username, password).build();
        if let Some(base_uri) = args.base_uri.clone().or_else(|| self.base_uri.clone()) {
            api.connection.base_uri = base_uri;
        }
        api.credentials.phone_country_code = args
            .country_code
            .clone()
            .or_else(|| self.country_code.clone());
        if let Some(timing) = &self.timing {
            api.timing = timing.clone();
        }

        Ok(MergedConfig {
            api,
            no_color: no_color || self.no_color.unwrap_or(false),
        })
    }
}

/// Connection and credential flags given on the command line
#[derive(Debug, Clone, Default)]
pub struct CredentialArgs {
    pub base_uri: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub country_code: Option<String>,
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub api: ApiConfig,
    pub no_color: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_args_override_file() {
        let file: Config = toml::from_str(
            r#"
            base_uri = "https://file.example/api.app/v1/"
            username = "file@example.com"
            password = "from-file"
            country_code = "49"

            [timing]
            sms_delivery_delay_secs = 5
            "#,
        )
        .unwrap();

        let args = CredentialArgs {
            username: Some("cli@example.com".to_string()),
            ..Default::default()
        };
        let merged = file.merge_with_args(&args, false).unwrap();

        assert_eq!(merged.api.credentials.username, "cli@example.com");
        assert_eq!(merged.api.credentials.password, "from-file");
        assert_eq!(
            merged.api.credentials.phone_country_code.as_deref(),
            Some("49")
        );
        assert_eq!(
            merged.api.connection.base_uri,
            "https://file.example/api.app/v1/"
        );
        assert_eq!(merged.api.timing.sms_delivery_delay_secs, 5);
        assert_eq!(merged.api.timing.max_poll_secs, 30);
        assert!(!merged.no_color);
    }

    #[test]
    fn test_missing_password() {
        let args = CredentialArgs {
            username: Some("cli@example.com".to_string()),
            ..Default::default()
        };
        assert!(Config::default().merge_with_args(&args, true).is_err());
    }
}
