//! Admission interceptor for axum routers.
//!
//! Apply with `Router::route_layer` so the matched route template is known:
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/posts", post(create_post))
//!     .route_layer(AdmissionLayer::new(Arc::new(admission)));
//! ```

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use futures::future::BoxFuture;
use http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::info;

use crate::admission_event;
use crate::identity::{resolve_identifier, ExtensionIdentity, IdentityAccessor, RequestMeta};
use crate::key::RateLimitKey;
use crate::limiter::{Evaluation, RateLimiter};
use crate::policy::{PolicyRegistry, RouteId};

pub const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";

/// Terminal state of a request once it has been evaluated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionState {
    /// Forward the request. `None` when the route carries no policy.
    Allowed(Option<Evaluation>),
    /// Short-circuit with the structured deny body
    Denied {
        evaluation: Evaluation,
        message: String,
    },
}

/// Structured body of a 429 response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DenyBody {
    pub success: bool,
    pub error_code: &'static str,
    pub message: String,
    pub timestamp: String,
    pub status_code: u16,
}

impl DenyBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: RATE_LIMIT_EXCEEDED,
            message: message.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            status_code: StatusCode::TOO_MANY_REQUESTS.as_u16(),
        }
    }
}

/// Everything the interceptor needs, shared by every clone of the service
pub struct Admission {
    registry: PolicyRegistry,
    limiter: RateLimiter,
    identity: Arc<dyn IdentityAccessor>,
}

impl Admission {
    pub fn new(registry: PolicyRegistry, limiter: RateLimiter) -> Self {
        Self {
            registry,
            limiter,
            identity: Arc::new(ExtensionIdentity),
        }
    }

    /// Replace how the authenticated user id is looked up
    pub fn with_identity(mut self, identity: impl IdentityAccessor + 'static) -> Self {
        self.identity = Arc::new(identity);
        self
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Policy lookup, identifier, key, then one limiter call.
    pub async fn evaluate(&self, route: &RouteId, meta: &RequestMeta) -> AdmissionState {
        let Some(policy) = self.registry.resolve(route) else {
            return AdmissionState::Allowed(None);
        };

        let identifier = resolve_identifier(meta, policy.identifier_type());
        let key = RateLimitKey::build(&policy, route, &identifier);
        let evaluation = self.limiter.check(&policy, &key).await;

        let remaining = match evaluation {
            Evaluation::Decided(status) => Some(status.remaining),
            Evaluation::Degraded { .. } => None,
        };
        admission_event!(
            route.as_str(),
            key.as_str(),
            evaluation.allowed(),
            evaluation.limit(),
            remaining
        );

        if evaluation.allowed() {
            AdmissionState::Allowed(Some(evaluation))
        } else {
            info!(route = %route, identifier = %identifier, "Request rate limited");
            AdmissionState::Denied {
                evaluation,
                message: policy.deny_message().to_string(),
            }
        }
    }
}

/// Handler identity for a request: the matched route template if the
/// router has one, the literal path otherwise.
pub fn route_id<B>(req: &Request<B>) -> RouteId {
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str())
        .unwrap_or_else(|| req.uri().path());
    RouteId::new(req.method(), path)
}

/// Write the quota headers for `evaluation`.
///
/// A degraded decision has no counter behind it: it reports the whole quota
/// as remaining when it admits, none when it denies, and resets at the time
/// it was made.
pub fn apply_headers(headers: &mut HeaderMap, evaluation: &Evaluation) {
    let (remaining, reset_at_ms) = match *evaluation {
        Evaluation::Decided(status) => (status.remaining, status.reset_at_ms),
        Evaluation::Degraded {
            allowed,
            limit,
            at_ms,
        } => (if allowed { limit } else { 0 }, at_ms),
    };
    headers.insert(LIMIT_HEADER, HeaderValue::from(evaluation.limit()));
    headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(reset_at_ms));
}

/// 429 response with quota headers and the structured body
pub fn deny_response(evaluation: &Evaluation, message: &str) -> Response {
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(DenyBody::new(message))).into_response();
    apply_headers(response.headers_mut(), evaluation);
    response
}

#[derive(Clone)]
pub struct AdmissionLayer(Arc<Admission>);

impl AdmissionLayer {
    pub fn new(admission: Arc<Admission>) -> Self {
        Self(admission)
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, next: S) -> Self::Service {
        AdmissionService {
            next,
            admission: Arc::clone(&self.0),
        }
    }
}

#[derive(Clone)]
pub struct AdmissionService<S> {
    next: S,
    admission: Arc<Admission>,
}

impl<S> Service<Request<Body>> for AdmissionService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // the clone we were polled ready on handles this request
        let clone = self.next.clone();
        let mut next = std::mem::replace(&mut self.next, clone);
        let admission = Arc::clone(&self.admission);

        // read everything from the request up front, the body is not Sync
        let route = route_id(&req);
        let meta = RequestMeta::from_request(&req, admission.identity.as_ref());

        Box::pin(async move {
            match admission.evaluate(&route, &meta).await {
                AdmissionState::Allowed(None) => next.call(req).await,
                AdmissionState::Allowed(Some(evaluation)) => {
                    let mut response = next.call(req).await?;
                    apply_headers(response.headers_mut(), &evaluation);
                    Ok(response)
                }
                AdmissionState::Denied {
                    evaluation,
                    message,
                } => Ok(deny_response(&evaluation, &message)),
            }
        })
    }
}
