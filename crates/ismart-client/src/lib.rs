//! iSmart Client Library
//!
//! Typed client for the SAIC iSmart cloud gateway. Every gateway response is
//! wrapped in a `{code, message, data}` envelope; this crate classifies those
//! envelopes, owns the bearer-token session and drives the `event-id`
//! polling used by long-running vehicle commands.
//!
//! # Example
//!
//! ```rust,no_run
//! use ismart_client::{ApiCall, ApiConfig, IsmartClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ApiConfig::builder("user@example.com", "secret").build();
//!     let client = IsmartClient::new(config)?;
//!
//!     client.login().await?;
//!
//!     // Plain call, payload decoded from `data`
//!     let vehicles: serde_json::Value = client
//!         .execute(ApiCall::get("vehicle/list"))
//!         .await?;
//!
//!     // Polling call, resent with the server's event-id until it answers
//!     let status: serde_json::Value = client
//!         .execute_with_event_id(ApiCall::get("vehicle/status").query("vinSha256", "..."))
//!         .await?;
//!
//!     println!("{vehicles} {status}");
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! The `testing` module provides a scripted transport, a virtual clock and
//! an axum-backed mock server:
//!
//! ```rust,ignore
//! use ismart_client::testing::TestServer;
//!
//! let server = TestServer::start(mock_gateway()).await?;
//! server.client.login().await?;
//! ```

mod client;
pub mod clock;
pub mod config;
mod crypto;
pub mod envelope;
mod error;
pub mod listener;
pub mod retry;
pub mod session;
pub mod testing;
pub mod transport;
mod types;

pub use client::{ApiCall, IsmartClient};
pub use clock::{Clock, SystemClock};
pub use config::{ApiConfig, ConfigError, ConnectionConfig, CredentialsConfig, TimingConfig};
pub use crypto::sha1_hex_digest;
pub use error::{IsmartClientError, Result};
pub use listener::{ApiListener, ListeningTransport};
pub use retry::{Attempt, PollPolicy};
pub use session::{Session, SessionManager};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, RequestBody, Transport};
pub use types::*;

// Re-export so callers can build `ApiCall`s without a direct reqwest dependency
pub use reqwest::Method;
