use axum::extract::Path;
use axum::routing::{get, post};
use axum::{Json, Router};
use dotenv::dotenv;
use http::Method;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use admission_control::policy::IdentifierType;
use admission_control::{
    init_logging, Admission, AdmissionConfig, AdmissionLayer, PolicyRegistry, PolicySpec,
    RateLimiter,
};

const DEFAULT_ADDR: &str = "0.0.0.0:3000";

/// Policies for the forum routes when no policy file is configured
fn default_registry() -> admission_control::Result<PolicyRegistry> {
    Ok(PolicyRegistry::builder()
        .register(Method::GET, "/members/{id}", PolicySpec::sliding_window(120, 60))?
        .register(
            Method::POST,
            "/images",
            PolicySpec::fixed_window(10, 3600)
                .identified_by(IdentifierType::UserId)
                .with_deny_message("Upload limit reached. Please try again later."),
        )?
        .register(Method::GET, "/posts", PolicySpec::sliding_window(60, 60))?
        .register(
            Method::POST,
            "/posts",
            PolicySpec::sliding_window(5, 60)
                .identified_by(IdentifierType::UserId)
                .with_deny_message("You are posting too fast."),
        )?
        .register(
            Method::POST,
            "/posts/{id}/comments",
            PolicySpec::fixed_window(20, 60).identified_by(IdentifierType::UserId),
        )?
        .register(
            Method::POST,
            "/posts/{id}/likes",
            PolicySpec::token_bucket(10.0, 0.5).identified_by(IdentifierType::UserId),
        )?
        .build())
}

async fn member(Path(id): Path<u64>) -> Json<Value> {
    Json(json!({ "id": id }))
}

async fn upload_image() -> Json<Value> {
    Json(json!({ "uploaded": true }))
}

async fn list_posts() -> Json<Value> {
    Json(json!({ "posts": [] }))
}

async fn create_post() -> Json<Value> {
    Json(json!({ "created": true }))
}

async fn comment(Path(id): Path<u64>) -> Json<Value> {
    Json(json!({ "post": id, "commented": true }))
}

async fn like(Path(id): Path<u64>) -> Json<Value> {
    Json(json!({ "post": id, "liked": true }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_logging();

    let config = AdmissionConfig::from_env()?;
    let registry = match &config.policy_file {
        Some(path) => PolicyRegistry::load(path)?,
        None => {
            warn!("ADMISSION_POLICY_FILE not set, using built-in forum policies");
            default_registry()?
        }
    };
    info!(
        routes = registry.len(),
        failure_mode = ?config.failure_mode,
        "Admission policies loaded"
    );

    let limiter = RateLimiter::connect(&config).await?;
    let admission = Arc::new(Admission::new(registry, limiter));

    let app = Router::new()
        .route("/members/{id}", get(member))
        .route("/images", post(upload_image))
        .route("/posts", get(list_posts).post(create_post))
        .route("/posts/{id}/comments", post(comment))
        .route("/posts/{id}/likes", post(like))
        .route_layer(AdmissionLayer::new(admission))
        .route("/health", get(|| async { "ok" }));

    let addr = std::env::var("ADMISSION_LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Admission server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
