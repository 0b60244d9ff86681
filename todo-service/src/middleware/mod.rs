use axum::{
    extract::{ConnectInfo, Request, State},
    http::{
        header::{ACCEPT, CONTENT_TYPE, ORIGIN, RETRY_AFTER, USER_AGENT},
        HeaderValue, Method, StatusCode,
    },
    middleware::Next,
    response::Response,
    Json,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::models::{ErrorResponse, RATE_LIMITED};
use crate::rate_limit::{resolve_key, Decision, RateLimiter};

const CORS_MAX_AGE: Duration = Duration::from_secs(12 * 60 * 60);

type Rejection = (StatusCode, [(axum::http::HeaderName, String); 1], Json<ErrorResponse>);

fn peer_addr(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Admits or rejects the request against the caller's token bucket.
/// Rejected requests never reach the handlers.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, Rejection> {
    let key = resolve_key(request.headers(), peer_addr(&request));

    match limiter.admit(&key) {
        Decision::Allowed => Ok(next.run(request).await),
        Decision::Limited { retry_after_secs } => {
            tracing::debug!(ip = %key, retry_after_secs, "Rate limit exceeded");
            Err((
                StatusCode::TOO_MANY_REQUESTS,
                [(RETRY_AFTER, retry_after_secs.to_string())],
                Json(ErrorResponse::new(RATE_LIMITED)),
            ))
        }
    }
}

/// Emits one structured event per request once the response is ready.
pub async fn request_log_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let ip = resolve_key(request.headers(), peer_addr(&request));
    let ua = request
        .headers()
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        ip = %ip,
        ua = %ua,
        "request"
    );
    response
}

/// Credentialed CORS for an explicit origin list. Entries that are not valid
/// header values, and the `*` wildcard, are skipped.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            if origin == "*" {
                tracing::warn!("Ignoring wildcard CORS origin; credentials require explicit origins");
                return None;
            }
            match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                    None
                }
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([ORIGIN, CONTENT_TYPE, ACCEPT])
        .allow_credentials(true)
        .max_age(CORS_MAX_AGE)
}
