// src/tests/interceptor_tests.rs

use axum::body::{to_bytes, Body};
use axum::extract::Path;
use axum::routing::{get, post};
use axum::Router;
use http::{Method, Request, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use super::limiter;
use crate::config::FailureMode;
use crate::identity::AuthenticatedUser;
use crate::interceptor::{Admission, AdmissionLayer, LIMIT_HEADER, REMAINING_HEADER, RESET_HEADER};
use crate::policy::{IdentifierType, PolicyRegistry, PolicySpec};
use crate::storage::CounterStore;
use crate::test_utils::{memory_store, FailingStore, ManualClock};

const NOW: u64 = 1_700_000_000_000;

fn registry() -> PolicyRegistry {
    PolicyRegistry::builder()
        .register(
            Method::POST,
            "/posts",
            PolicySpec::fixed_window(2, 60).with_deny_message("Posting too fast"),
        )
        .unwrap()
        .register(Method::GET, "/posts/{id}", PolicySpec::sliding_window(3, 60))
        .unwrap()
        .register(
            Method::POST,
            "/likes",
            PolicySpec::token_bucket(1.0, 0.1).identified_by(IdentifierType::UserId),
        )
        .unwrap()
        .build()
}

fn app(store: Arc<dyn CounterStore>, clock: &ManualClock, failure_mode: FailureMode) -> Router {
    let admission = Admission::new(registry(), limiter(store, clock, failure_mode));

    Router::new()
        .route("/posts", post(|| async { "created" }))
        .route("/posts/{id}", get(|Path(id): Path<u64>| async move { format!("post {}", id) }))
        .route("/likes", post(|| async { "liked" }))
        .route("/members", get(|| async { "members" }))
        .route_layer(AdmissionLayer::new(Arc::new(admission)))
}

fn request(method: Method, uri: &str, ip: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("X-Forwarded-For", ip)
        .body(Body::empty())
        .unwrap()
}

fn header(response: &http::Response<Body>, name: &http::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .map(|v| v.to_str().unwrap().to_string())
}

async fn json_body(response: http::Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_route_without_policy_passes_through() {
    let clock = ManualClock::at(NOW);
    let app = app(memory_store(&clock), &clock, FailureMode::FailOpen);

    for _ in 0..10 {
        let response = app
            .clone()
            .oneshot(request(Method::GET, "/members", "10.0.0.1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(header(&response, &LIMIT_HEADER).is_none());
    }
}

#[tokio::test]
async fn test_allowed_then_denied_with_headers() {
    let clock = ManualClock::at(NOW);
    let app = app(memory_store(&clock), &clock, FailureMode::FailOpen);
    let window_end = (NOW / 60_000 + 1) * 60_000;

    for expected_remaining in ["1", "0"] {
        let response = app
            .clone()
            .oneshot(request(Method::POST, "/posts", "203.0.113.7"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, &LIMIT_HEADER).as_deref(), Some("2"));
        assert_eq!(
            header(&response, &REMAINING_HEADER).as_deref(),
            Some(expected_remaining)
        );
        assert_eq!(header(&response, &RESET_HEADER), Some(window_end.to_string()));
    }

    let response = app
        .clone()
        .oneshot(request(Method::POST, "/posts", "203.0.113.7"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&response, &REMAINING_HEADER).as_deref(), Some("0"));
    assert_eq!(header(&response, &RESET_HEADER), Some(window_end.to_string()));

    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["errorCode"], "RATE_LIMIT_EXCEEDED");
    assert_eq!(body["message"], "Posting too fast");
    assert_eq!(body["statusCode"], 429);
    // internal details never reach the caller
    assert!(!body.to_string().contains("rate_limit:"));

    // another caller is unaffected
    let response = app
        .clone()
        .oneshot(request(Method::POST, "/posts", "203.0.113.8"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_policy_is_per_route_template() {
    let clock = ManualClock::at(NOW);
    let app = app(memory_store(&clock), &clock, FailureMode::FailOpen);

    // different ids share the "GET /posts/{id}" quota
    for id in 1..=3 {
        let response = app
            .clone()
            .oneshot(request(Method::GET, &format!("/posts/{}", id), "10.0.0.1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app
        .clone()
        .oneshot(request(Method::GET, "/posts/4", "10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Too many requests. Please try again later.");

    // POST /posts has its own quota
    let response = app
        .clone()
        .oneshot(request(Method::POST, "/posts", "10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_user_identifier_follows_the_user() {
    let clock = ManualClock::at(NOW);
    let app = app(memory_store(&clock), &clock, FailureMode::FailOpen);

    let as_alice = |ip: &str| {
        let mut req = request(Method::POST, "/likes", ip);
        req.extensions_mut()
            .insert(AuthenticatedUser("alice".to_string()));
        req
    };

    let response = app.clone().oneshot(as_alice("10.0.0.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // a new address does not give alice a new bucket
    let response = app.clone().oneshot(as_alice("10.0.0.2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // anonymous callers are keyed by address instead
    let response = app
        .clone()
        .oneshot(request(Method::POST, "/likes", "10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_store_outage_fail_open() {
    let clock = ManualClock::at(NOW);
    let app = app(Arc::new(FailingStore::refusing()), &clock, FailureMode::FailOpen);

    let response = app
        .oneshot(request(Method::POST, "/posts", "10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, &LIMIT_HEADER).as_deref(), Some("2"));
    assert_eq!(header(&response, &REMAINING_HEADER).as_deref(), Some("2"));
    assert_eq!(header(&response, &RESET_HEADER), Some(NOW.to_string()));
}

#[tokio::test]
async fn test_store_outage_fail_closed() {
    let clock = ManualClock::at(NOW);
    let app = app(Arc::new(FailingStore::refusing()), &clock, FailureMode::FailClosed);

    let response = app
        .oneshot(request(Method::POST, "/posts", "10.0.0.1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&response, &LIMIT_HEADER).as_deref(), Some("2"));
    assert_eq!(header(&response, &REMAINING_HEADER).as_deref(), Some("0"));
    assert_eq!(header(&response, &RESET_HEADER), Some(NOW.to_string()));

    let body = json_body(response).await;
    assert_eq!(body["errorCode"], "RATE_LIMIT_EXCEEDED");
    assert!(!body.to_string().contains("connection refused"));
}

#[tokio::test]
async fn test_callers_without_address_share_unknown_bucket() {
    let clock = ManualClock::at(NOW);
    let app = app(memory_store(&clock), &clock, FailureMode::FailOpen);

    let anonymous = || {
        Request::builder()
            .method(Method::POST)
            .uri("/posts")
            .body(Body::empty())
            .unwrap()
    };

    for _ in 0..2 {
        let response = app.clone().oneshot(anonymous()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app.clone().oneshot(anonymous()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}
