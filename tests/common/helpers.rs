use std::sync::{Arc, Once};
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tower::ServiceExt;
use uuid::Uuid;

use ride_planner_backend::ai::RouteModel;
use ride_planner_backend::config::GenerationSettings;
use ride_planner_backend::coordinator::Coordinator;
use ride_planner_backend::middleware::auth::Claims;
use ride_planner_backend::routes;
use ride_planner_backend::store::MemoryStore;
use ride_planner_backend::AppState;

use super::fixtures::{ScriptedCall, ScriptedModel};

pub const TEST_JWT_SECRET: &str = "integration-test-secret";

static JWT_SECRET_INIT: Once = Once::new();

/// Install the JWT secret the auth extractor reads. Tests touching the
/// router must run under `#[serial]` so this never races a live request.
pub fn init_jwt_secret() {
    JWT_SECRET_INIT.call_once(|| std::env::set_var("JWT_SECRET", TEST_JWT_SECRET));
}

/// Everything a test needs to drive the API against in-memory state.
pub struct TestApp {
    pub app: Router,
    pub store: Arc<MemoryStore>,
    pub model: Arc<ScriptedModel>,
    pub coordinator: Arc<Coordinator>,
}

/// Short deadlines and small backoffs so lifecycle tests finish quickly.
pub fn test_settings() -> GenerationSettings {
    GenerationSettings {
        job_deadline: Duration::from_secs(10),
        retry_backoff: Duration::from_millis(10),
        ..GenerationSettings::default()
    }
}

pub fn build_test_app(calls: Vec<ScriptedCall>) -> TestApp {
    build_test_app_with(test_settings(), calls)
}

pub fn build_test_app_with(settings: GenerationSettings, calls: Vec<ScriptedCall>) -> TestApp {
    init_jwt_secret();

    let store = Arc::new(MemoryStore::new());
    let model = Arc::new(ScriptedModel::new(calls));
    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        model.clone() as Arc<dyn RouteModel>,
        settings,
    ));

    // Mirrors the main.rs setup but without CORS for simpler testing
    let app = Router::new()
        .nest("/api", routes::api_routes())
        .with_state(AppState {
            coordinator: coordinator.clone(),
        });

    TestApp {
        app,
        store,
        model,
        coordinator,
    }
}

/// Mint a bearer token the auth extractor accepts.
pub fn auth_token(user_id: Uuid) -> String {
    let now = chrono::Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: user_id.to_string(),
        exp: now + 3600,
        iat: now,
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .expect("failed to sign test token")
}

/// Send an authenticated request; returns status, parsed JSON body (or
/// `Null` for non-JSON bodies) and the raw body bytes.
pub async fn send_authed(
    app: &Router,
    method: &str,
    path: &str,
    token: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value, Vec<u8>) {
    let builder = Request::builder()
        .method(method)
        .uri(path)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json");

    let request = match body {
        Some(json) => builder.body(Body::from(json.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json, bytes)
}

/// Send a request without credentials.
pub async fn send_anonymous(
    app: &Router,
    method: &str,
    path: &str,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::empty())
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

/// Fetch a raw response for header assertions (downloads).
pub async fn send_authed_raw(app: &Router, path: &str, token: &str) -> axum::response::Response {
    let request = Request::builder()
        .method("GET")
        .uri(path)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

/// Poll the status endpoint until the predicate holds or the timeout hits.
/// Returns every observed body, last one matching.
pub async fn poll_status_until(
    app: &Router,
    itinerary_id: Uuid,
    token: &str,
    timeout: Duration,
    predicate: impl Fn(&serde_json::Value) -> bool,
) -> Vec<serde_json::Value> {
    let path = format!("/api/itineraries/{itinerary_id}/status");
    let deadline = tokio::time::Instant::now() + timeout;
    let mut observed = Vec::new();

    loop {
        let (status, body, _) = send_authed(app, "GET", &path, token, None).await;
        assert_eq!(status, StatusCode::OK, "status poll failed: {body}");
        observed.push(body.clone());
        if predicate(&body) {
            return observed;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out polling {path}; last snapshot: {body}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn assert_status(status: StatusCode, expected: StatusCode, body: &serde_json::Value) {
    assert_eq!(status, expected, "unexpected status, body: {body}");
}
