//! Integration tests for ismart-client
//!
//! These tests serve a mock iSmart gateway over HTTP and drive it through
//! the real reqwest transport, so the wire format (form login, bearer
//! header, event-id header, envelope bodies) is exercised end to end.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Form, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde::Deserialize;
use serde_json::{json, Value};

use ismart_client::testing::{ManualClock, RecordingListener, TestServer};
use ismart_client::{sha1_hex_digest, ApiCall, ApiConfig, IsmartClientError};

// =============================================================================
// Mock Gateway
// =============================================================================

#[derive(Default)]
struct GatewayState {
    logins: u32,
    current_token: Option<String>,
    login_forms: Vec<HashMap<String, String>>,
    status_event_ids: Vec<String>,
    expire_next_call: bool,
}

type SharedState = Arc<Mutex<GatewayState>>;

fn mock_gateway(state: SharedState) -> Router {
    Router::new()
        .route("/api.app/v1/oauth/token", post(login))
        .route("/api.app/v1/vehicle/list", get(vehicle_list))
        .route("/api.app/v1/vehicle/status", get(vehicle_status))
        .route("/api.app/v1/vehicle/pending", get(vehicle_pending))
        .route("/api.app/v1/vehicle/control", post(vehicle_control))
        .with_state(state)
}

fn envelope(code: i64, message: &str) -> Value {
    json!({ "code": code, "message": message })
}

fn envelope_with_data(data: Value) -> Value {
    json!({ "code": 0, "message": "success", "data": data })
}

async fn login(
    State(state): State<SharedState>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    let mut state = state.lock();
    state.login_forms.push(form.clone());

    let password_ok = form.get("password") == Some(&sha1_hex_digest("secret"));
    if form.get("username").map(String::as_str) != Some("test@example.com") || !password_ok {
        return Json(envelope(3, "Wrong username or password"));
    }

    state.logins += 1;
    let token = format!("tok-{}", state.logins);
    state.current_token = Some(token.clone());

    Json(envelope_with_data(json!({
        "access_token": token,
        "token_type": "bearer",
        "expires_in": 3600,
        "account": "test@example.com",
    })))
}

/// Checks the bearer token; `Some` holds the 401 envelope to answer with
fn check_auth(state: &mut GatewayState, headers: &HeaderMap) -> Option<Json<Value>> {
    if state.expire_next_call {
        state.expire_next_call = false;
        state.current_token = None;
        return Some(Json(envelope(401, "Token expired")));
    }

    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match (&state.current_token, presented) {
        (Some(current), Some(presented)) if current == presented => None,
        _ => Some(Json(envelope(401, "Unauthorized"))),
    }
}

async fn vehicle_list(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let mut state = state.lock();
    if let Some(denied) = check_auth(&mut state, &headers) {
        return denied.into_response();
    }

    Json(envelope_with_data(json!({
        "vinList": [{ "vin": "LSJA0000000000001", "modelName": "MG4" }]
    })))
    .into_response()
}

async fn vehicle_status(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let mut state = state.lock();
    if let Some(denied) = check_auth(&mut state, &headers) {
        return denied.into_response();
    }

    let event_id = headers
        .get("event-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.status_event_ids.push(event_id.clone());

    if event_id == "evt-1" {
        Json(envelope_with_data(json!({ "mileage": 12345 }))).into_response()
    } else {
        ([("event-id", "evt-1")], Json(envelope(0, "pending"))).into_response()
    }
}

async fn vehicle_pending(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let mut state = state.lock();
    if let Some(denied) = check_auth(&mut state, &headers) {
        return denied.into_response();
    }

    ([("event-id", "evt-forever")], Json(envelope(0, "pending"))).into_response()
}

async fn vehicle_control(
    State(state): State<SharedState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock();
    if let Some(denied) = check_auth(&mut state, &headers) {
        return denied.into_response();
    }

    if body.get("command").and_then(Value::as_str) == Some("self-destruct") {
        return Json(envelope(7, "Command not supported")).into_response();
    }

    Json(envelope_with_data(json!({
        "vin": query.get("vin"),
        "received": body,
    })))
    .into_response()
}

// =============================================================================
// Helpers
// =============================================================================

#[derive(Debug, Deserialize, PartialEq)]
struct VehicleList {
    #[serde(rename = "vinList")]
    vin_list: Vec<Vehicle>,
}

#[derive(Debug, Deserialize, PartialEq)]
struct Vehicle {
    vin: String,
    #[serde(rename = "modelName")]
    model_name: String,
}

async fn start() -> (TestServer, SharedState) {
    let state = SharedState::default();
    let server = TestServer::start(mock_gateway(state.clone()))
        .await
        .expect("Failed to start test server");
    (server, state)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_login_sends_form_and_stores_token() {
    let (server, state) = start().await;

    let login = tokio_test::assert_ok!(server.client.login().await);

    assert_eq!(login.access_token, "tok-1");
    assert!(server.client.is_authenticated());
    assert!(server.client.token_expiration().is_some());

    let state = state.lock();
    let form = &state.login_forms[0];
    assert_eq!(form["grant_type"], "password");
    assert_eq!(form["loginType"], "2");
    assert_eq!(form["countryCode"], "");
    assert_eq!(form["password"], sha1_hex_digest("secret"));
    assert!(form["deviceId"].ends_with("###europecar"));
}

#[tokio::test]
async fn test_login_with_wrong_password() {
    let state = SharedState::default();
    let server = TestServer::start_with_config(
        mock_gateway(state),
        ApiConfig::builder("test@example.com", "wrong").build(),
    )
    .await
    .unwrap();

    let result = server.client.login().await;

    match result {
        Err(IsmartClientError::ApplicationError { code, message }) => {
            assert_eq!(code, 3);
            assert_eq!(message, "Wrong username or password");
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(!server.client.is_authenticated());
}

#[tokio::test]
async fn test_call_before_login() {
    let (server, _) = start().await;

    let result = server
        .client
        .execute::<VehicleList>(ApiCall::get("vehicle/list"))
        .await;

    assert!(matches!(
        result,
        Err(IsmartClientError::AuthenticationRequired)
    ));
}

#[tokio::test]
async fn test_authenticated_call() {
    let (server, _) = start().await;
    server.client.login().await.unwrap();

    let vehicles: VehicleList = server
        .client
        .execute(ApiCall::get("/vehicle/list"))
        .await
        .unwrap();

    assert_eq!(
        vehicles.vin_list,
        vec![Vehicle {
            vin: "LSJA0000000000001".to_string(),
            model_name: "MG4".to_string(),
        }]
    );
}

#[tokio::test]
async fn test_json_body_and_query() {
    let (server, _) = start().await;
    server.client.login().await.unwrap();

    let call = ApiCall::post("vehicle/control")
        .json(&json!({ "command": "lock" }))
        .unwrap()
        .query("vin", "LSJA0000000000001");
    let response: Value = server.client.execute(call).await.unwrap();

    assert_eq!(
        response,
        json!({ "vin": "LSJA0000000000001", "received": { "command": "lock" } })
    );
}

#[tokio::test]
async fn test_fatal_code_is_reported() {
    let (server, _) = start().await;
    server.client.login().await.unwrap();

    let call = ApiCall::post("vehicle/control")
        .json(&json!({ "command": "self-destruct" }))
        .unwrap();
    let result = server.client.execute::<Value>(call).await;

    assert!(matches!(
        result,
        Err(IsmartClientError::ApplicationError { code: 7, .. })
    ));
    assert!(server.client.is_authenticated());
}

#[tokio::test]
async fn test_polling_follows_event_id() {
    let (server, state) = start().await;
    server.client.login().await.unwrap();

    let status: Value = server
        .client
        .execute_with_event_id(ApiCall::get("vehicle/status"))
        .await
        .unwrap();

    assert_eq!(status, json!({ "mileage": 12345 }));
    assert_eq!(
        state.lock().status_event_ids,
        vec!["0".to_string(), "evt-1".to_string()]
    );
}

#[tokio::test]
async fn test_expired_session_logs_in_again() {
    let (server, state) = start().await;
    server.client.login().await.unwrap();
    state.lock().expire_next_call = true;

    let result = server
        .client
        .execute::<VehicleList>(ApiCall::get("vehicle/list"))
        .await;

    match result {
        Err(err @ IsmartClientError::SessionExpired { .. }) => {
            assert!(err.is_retryable_by_caller());
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(state.lock().logins, 2);
    assert_eq!(
        server.client.session().bearer_token(),
        Some("tok-2")
    );

    // Resubmitting is left to the caller
    let vehicles: VehicleList = server
        .client
        .execute(ApiCall::get("vehicle/list"))
        .await
        .unwrap();
    assert_eq!(vehicles.vin_list.len(), 1);
}

#[tokio::test]
async fn test_polling_times_out() {
    let state = SharedState::default();
    let clock = Arc::new(ManualClock::new());
    let server = TestServer::start_with_clock(
        mock_gateway(state),
        ApiConfig::builder("test@example.com", "secret")
            .sms_delivery_delay_secs(3)
            .max_poll_secs(30)
            .build(),
        clock.clone(),
    )
    .await
    .unwrap();
    server.client.login().await.unwrap();

    let result = server
        .client
        .execute_with_event_id::<Value>(ApiCall::get("vehicle/pending"))
        .await;

    match result {
        Err(IsmartClientError::Timeout { attempts, elapsed }) => {
            assert_eq!(attempts, 10);
            assert_eq!(elapsed, Duration::from_secs(30));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(3); 10]);
}

#[tokio::test]
async fn test_listener_observes_http_exchanges() {
    let (server, _) = start().await;
    let listener = Arc::new(RecordingListener::new());
    let client = server.client.clone().with_listener(listener.clone());

    client.login().await.unwrap();
    let _: VehicleList = client.execute(ApiCall::get("vehicle/list")).await.unwrap();

    let events = listener.events();
    assert_eq!(events.len(), 4);
    assert_eq!(events[0], "request POST /api.app/v1/oauth/token");
    assert!(events[1].starts_with("response POST /api.app/v1/oauth/token"));
    assert!(events[1].contains("tok-1"));
    assert_eq!(events[2], "request GET /api.app/v1/vehicle/list");
    assert!(events[3].contains("LSJA0000000000001"));
}
