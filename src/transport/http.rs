//! HTTP adapter (spec §6 "HTTP surface"): per-route auth, a per-IP
//! governor rate limiter, security headers, and request tracing, layered
//! onto a plain `axum::Router` over the core `Pipeline`.

use crate::orchestrator::Pipeline;
use crate::types::{ExecuteRequest, HealthStatus};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::sse::{Event, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use dashmap::DashMap;
use futures::stream::Stream;
use governor::{Quota, RateLimiter};
use serde_json::json;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use subtle::ConstantTimeEq;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

type Governor = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

static RATE_LIMITERS: OnceLock<DashMap<IpAddr, Arc<Governor>>> = OnceLock::new();

fn rate_limiter_for(ip: IpAddr) -> Arc<Governor> {
    let map = RATE_LIMITERS.get_or_init(DashMap::new);
    map.entry(ip)
        .or_insert_with(|| {
            Arc::new(RateLimiter::direct(Quota::per_minute(
                NonZeroU32::new(100).unwrap(),
            )))
        })
        .clone()
}

fn client_ip(req: &Request<Body>) -> IpAddr {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next_back())
        .and_then(|s| s.trim().parse().ok())
        .or_else(|| {
            req.headers()
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse().ok())
        })
        .unwrap_or_else(|| IpAddr::from([127, 0, 0, 1]))
}

async fn rate_limit_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let ip = client_ip(&req);
    match rate_limiter_for(ip).check() {
        Ok(_) => Ok(next.run(req).await),
        Err(_) => {
            tracing::warn!(%ip, "rate limit exceeded");
            Err(StatusCode::TOO_MANY_REQUESTS)
        }
    }
}

async fn auth_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let Ok(expected) = std::env::var("TOOL_API_TOKEN") else {
        // No token configured: auth is disabled, matching the teacher's
        // documented-but-optional `SYMBIONT_API_TOKEN` fallback behavior.
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match provided {
        Some(token) if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) => {
            Ok(next.run(req).await)
        }
        _ => {
            tracing::warn!("rejected request with missing or invalid bearer token");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

async fn security_headers_middleware(req: Request<Body>, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert(
        "x-content-type-options",
        axum::http::HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", axum::http::HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        axum::http::HeaderValue::from_static("default-src 'self'; frame-ancestors 'none'"),
    );
    resp
}

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    let cors = match std::env::var("CORS_ORIGINS") {
        Ok(origins) => {
            let list: Vec<_> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(list))
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        }
        Err(_) => CorsLayer::new(),
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/tools", get(list_tools_handler))
        .route("/tools/:name/execute", post(execute_handler))
        .route("/tools/:name/enable", post(enable_handler))
        .route("/tools/:name/disable", post(disable_handler))
        .route("/events", get(events_handler))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(middleware::from_fn(rate_limit_middleware))
        .layer(middleware::from_fn(auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(pipeline)
}

async fn health_handler(State(pipeline): State<Arc<Pipeline>>) -> impl IntoResponse {
    let report = pipeline.get_health();
    let status_code = match report.overall {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::from_u16(207).unwrap(),
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    let body = json!({
        "status": report.overall,
        "timestamp": chrono::Utc::now(),
        "transport": "http",
        "checks": report.checks,
    });
    (status_code, Json(body))
}

async fn list_tools_handler(State(pipeline): State<Arc<Pipeline>>) -> impl IntoResponse {
    Json(json!({ "tools": pipeline.list_tools() }))
}

async fn execute_handler(
    State(pipeline): State<Arc<Pipeline>>,
    Path(name): Path<String>,
    Json(req): Json<ExecuteRequest>,
) -> impl IntoResponse {
    if !pipeline.registry().contains(&name) {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "unknown tool"}))).into_response();
    }
    if !pipeline.registry().is_enabled(&name) {
        return (StatusCode::FORBIDDEN, Json(json!({"error": "tool disabled"}))).into_response();
    }
    let result = pipeline.execute(&name, req).await;
    let status = match result.error_type {
        Some(crate::error::ErrorType::ValidationError) => StatusCode::BAD_REQUEST,
        Some(crate::error::ErrorType::ExecutionError) | Some(crate::error::ErrorType::Unknown) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::OK,
    };
    (status, Json(result)).into_response()
}

async fn enable_handler(
    State(pipeline): State<Arc<Pipeline>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    if pipeline.enable(&name) {
        (StatusCode::OK, Json(json!({"message": format!("{name} enabled")})))
    } else {
        (StatusCode::NOT_FOUND, Json(json!({"message": "unknown tool"})))
    }
}

async fn disable_handler(
    State(pipeline): State<Arc<Pipeline>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    if pipeline.disable(&name) {
        (StatusCode::OK, Json(json!({"message": format!("{name} disabled")})))
    } else {
        (StatusCode::NOT_FOUND, Json(json!({"message": "unknown tool"})))
    }
}

async fn events_handler(
    State(pipeline): State<Arc<Pipeline>>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    use tokio_stream::wrappers::IntervalStream;
    use tokio_stream::StreamExt as _;

    let interval = tokio::time::interval(Duration::from_secs(5));
    let stream = IntervalStream::new(interval).map(move |_| {
        let report = pipeline.get_health();
        let payload = json!({
            "type": "health",
            "data": { "status": report.overall, "timestamp": chrono::Utc::now() }
        });
        Ok(Event::default().data(payload.to_string()))
    });
    Sse::new(stream)
}

async fn metrics_handler(State(pipeline): State<Arc<Pipeline>>) -> impl IntoResponse {
    // Prometheus text exposition is an external-collaborator concern
    // (out of scope); the JSON snapshot is always available.
    Json(pipeline.get_metrics_snapshot())
}
