//! Response envelope decoding and classification
//!
//! Every gateway response is wrapped in `{ code, message, data? }`. The
//! classifier maps an envelope, together with the `event-id` response
//! header, to a single [`Verdict`] that drives the call executor and the
//! polling loop.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::error::IsmartClientError;
use crate::transport::ApiResponse;

/// Return code for a successful call
pub const CODE_OK: i64 = 0;
/// Return code asking the client to poll again from a fresh event-id
pub const CODE_RETRY: i64 = 4;
/// Return code for an expired or revoked session
pub const CODE_UNAUTHORIZED: i64 = 401;
/// Application codes that are never retried
pub const FATAL_CODES: [i64; 3] = [2, 3, 7];

/// Event-id that starts a new polling sequence
pub const INITIAL_EVENT_ID: &str = "0";

/// A decoded gateway response
#[derive(Debug, Clone, PartialEq)]
pub struct ApiEnvelope {
    pub code: i64,
    pub message: String,
    /// `Some` whenever the body has a `data` key, including `"data": null`
    pub data: Option<Value>,
    /// `event-id` response header
    pub event_id: Option<String>,
}

impl ApiEnvelope {
    /// Decode an envelope from response text and the `event-id` header.
    ///
    /// The body must be a JSON object. A missing `code` reads as `-1` and a
    /// missing `message` as `"Unknown error"`.
    pub fn parse(body: &str, event_id: Option<String>) -> Result<Self, IsmartClientError> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| IsmartClientError::deserialization(e.to_string(), body))?;

        let Value::Object(mut map) = value else {
            return Err(IsmartClientError::deserialization(
                "response is not a JSON object",
                body,
            ));
        };

        let code = map.get("code").and_then(Value::as_i64).unwrap_or(-1);
        let message = map
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string();
        let data = map.remove("data");

        Ok(Self {
            code,
            message,
            data,
            event_id,
        })
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}

/// Outcome of classifying one response
#[derive(Debug)]
pub enum Verdict<T> {
    /// Call succeeded; payload present when a typed result was requested
    Success(Option<T>),
    /// Server asked for another attempt with the given event-id
    Retryable {
        event_id: String,
        code: i64,
        message: String,
    },
    /// Session is no longer valid; the caller must log in again
    ReauthRequired { message: String },
    /// Non-recoverable failure
    Fatal(IsmartClientError),
}

impl<T> Verdict<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Classify a raw transport response.
///
/// `expect_data` is true when the caller wants a typed payload decoded
/// from the `data` field.
pub fn classify_response<T: DeserializeOwned>(
    response: &ApiResponse,
    expect_data: bool,
) -> Verdict<T> {
    match ApiEnvelope::parse(&response.body, response.event_id()) {
        Ok(envelope) => classify(&envelope, &response.body, expect_data),
        Err(e) => Verdict::Fatal(e),
    }
}

/// Classify a decoded envelope. `raw` is the original body text, kept for
/// diagnostics.
pub fn classify<T: DeserializeOwned>(
    envelope: &ApiEnvelope,
    raw: &str,
    expect_data: bool,
) -> Verdict<T> {
    let code = envelope.code;
    debug!("Response code: {} {}", code, raw);

    if code == CODE_UNAUTHORIZED {
        error!("API call return code is not acceptable: {}: {}", code, raw);
        return Verdict::ReauthRequired {
            message: envelope.message.clone(),
        };
    }

    if FATAL_CODES.contains(&code) {
        error!("API call return code is not acceptable: {}: {}", code, raw);
        return Verdict::Fatal(IsmartClientError::application(
            code,
            envelope.message.clone(),
        ));
    }

    if let Some(event_id) = envelope.event_id.as_ref().filter(|_| !envelope.has_data()) {
        info!("Retrying since we got event-id in headers: {}, but no data", event_id);
        return Verdict::Retryable {
            event_id: event_id.clone(),
            code,
            message: envelope.message.clone(),
        };
    }

    if code == CODE_RETRY {
        info!("API call asked us to retry: {}: {}", code, raw);
        return Verdict::Retryable {
            event_id: INITIAL_EVENT_ID.to_string(),
            code,
            message: envelope.message.clone(),
        };
    }

    if code != CODE_OK {
        error!(
            "API call return code is not acceptable: {}: {}. event-id: {:?}",
            code, raw, envelope.event_id
        );
        return Verdict::Fatal(IsmartClientError::application(
            code,
            envelope.message.clone(),
        ));
    }

    if !expect_data {
        return Verdict::Success(None);
    }

    match &envelope.data {
        Some(data) => match serde_json::from_value::<T>(data.clone()) {
            Ok(payload) => Verdict::Success(Some(payload)),
            Err(e) => Verdict::Fatal(IsmartClientError::deserialization(e.to_string(), raw)),
        },
        None => Verdict::Fatal(IsmartClientError::deserialization(
            "missing 'data' field",
            raw,
        )),
    }
}
