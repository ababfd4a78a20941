//! Request/response observation
//!
//! An [`ApiListener`] sees every exchange with the gateway, login included,
//! after the request is prepared and after the response text is read. It
//! observes only: it cannot change or fail a call.
//!
//! ```rust,ignore
//! struct Recorder;
//!
//! #[async_trait]
//! impl ApiListener for Recorder {
//!     async fn on_response(&self, request: &ApiRequest, response: &ApiResponse) {
//!         println!("{} -> {}", request.url, response.status);
//!     }
//! }
//!
//! let client = IsmartClient::new(config)?.with_listener(Arc::new(Recorder));
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// Observer of gateway traffic
#[async_trait]
pub trait ApiListener: Send + Sync {
    /// Called before a request is sent
    async fn on_request(&self, _request: &ApiRequest) {}

    /// Called once a response has been received
    async fn on_response(&self, _request: &ApiRequest, _response: &ApiResponse) {}
}

/// Transport that reports every exchange of an inner transport to a listener
pub struct ListeningTransport {
    inner: Arc<dyn Transport>,
    listener: Arc<dyn ApiListener>,
}

impl ListeningTransport {
    pub fn new(inner: Arc<dyn Transport>, listener: Arc<dyn ApiListener>) -> Self {
        Self { inner, listener }
    }
}

#[async_trait]
impl Transport for ListeningTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.listener.on_request(&request).await;
        let observed = request.clone();

        let response = self.inner.send(request).await?;
        self.listener.on_response(&observed, &response).await;
        Ok(response)
    }
}
