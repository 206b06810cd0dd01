//! # Hookwarden HTTP Service
//!
//! HTTP surface for receiving provider webhooks and operating the event
//! ledger.
//!
//! This crate provides:
//! - One webhook endpoint per provider (`POST /webhooks/{source}`)
//! - Liveness, deep health and readiness endpoints
//! - Prometheus metrics at `GET /metrics`
//! - Admin routes for failed/pending events, retries and circuit resets
//!
//! Each webhook request passes, in order: content-type check (415), body cap
//! (413), rate limit (429), signature verification (401), payload parsing
//! (400), then the [`EventDispatcher`]. Rejected requests never reach the
//! ledger. Response bodies carry only `OK` or a fixed reason phrase.

pub mod config;
pub mod errors;
pub mod metrics;
pub mod responses;

pub use config::{
    ForwardingRule, LedgerBackend, LedgerConfig, LoggingConfig, ProviderConfig, ProvidersConfig,
    ServerConfig, ServiceConfig,
};
pub use errors::{AdminError, ConfigError, ServiceError, WebhookHandlerError};
pub use metrics::ServiceMetrics;

use axum::{
    extract::{DefaultBodyLimit, MatchedPath, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use hookwarden_core::{
    parse_event,
    signature::{verify_with_secrets, SignatureFailure, VerifyOptions, WebhookSecret},
    DispatchOutcome, EventDispatcher, EventId, MetricsCollector, RateLimiter, Timestamp,
    WebhookSource,
};
use responses::{
    CircuitListResponse, CircuitResetResponse, DeepHealthResponse, EventListParams,
    EventListResponse, HealthResponse, ReadinessResponse, RetryResponse,
};
use std::{
    collections::HashMap,
    future::{Future, IntoFuture},
    sync::Arc,
    time::Duration,
};
use tokio::time::Instant;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, instrument, warn};

/// Header used to correlate a request across log lines.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Characters of the signature header used in the rate-limit key.
const RATE_LIMIT_SIGNATURE_PREFIX: usize = 16;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the service
    pub config: Arc<ServiceConfig>,

    /// Routes recorded events to handlers
    pub dispatcher: Arc<EventDispatcher>,

    /// Per-key request limiter for the webhook endpoints
    pub rate_limiter: Arc<RateLimiter>,

    /// Metrics collector for observability
    pub metrics: Arc<ServiceMetrics>,

    secrets: Arc<HashMap<WebhookSource, Vec<WebhookSecret>>>,
    started_at: Instant,
}

impl AppState {
    /// Create new application state
    pub fn new(
        config: ServiceConfig,
        dispatcher: Arc<EventDispatcher>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        let secrets = WebhookSource::ALL
            .iter()
            .map(|source| (*source, config.providers.get(*source).secrets()))
            .collect();

        Self {
            config: Arc::new(config),
            dispatcher,
            rate_limiter: Arc::new(RateLimiter::new()),
            metrics,
            secrets: Arc::new(secrets),
            started_at: Instant::now(),
        }
    }

    /// Share an existing limiter instead of the one created by [`AppState::new`].
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    fn secrets_for(&self, source: WebhookSource) -> Vec<&WebhookSecret> {
        self.secrets
            .get(&source)
            .map(|secrets| secrets.iter().collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let webhook_routes = Router::new().route("/webhooks/{source}", post(handle_webhook));

    let health_routes = Router::new()
        .route("/health", get(handle_health_check))
        .route("/health/deep", get(handle_deep_health_check))
        .route("/ready", get(handle_readiness_check));

    let observability_routes = Router::new().route("/metrics", get(metrics_endpoint));

    let admin_routes = Router::new()
        .route("/admin/events/failed", get(list_failed_events))
        .route("/admin/events/pending", get(list_pending_events))
        .route("/admin/events/{event_id}", get(get_event))
        .route("/admin/events/{event_id}/retry", post(retry_event))
        .route("/admin/circuits", get(list_circuits))
        .route("/admin/circuits/{name}/reset", post(reset_circuit));

    let server = &state.config.server;

    let mut router = Router::new()
        .merge(webhook_routes)
        .merge(health_routes)
        .merge(observability_routes);
    if server.enable_admin {
        router = router.merge(admin_routes);
    }

    router = router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            metrics_middleware,
        ))
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes()));

    if server.enable_compression {
        router = router.layer(CompressionLayer::new());
    }
    if server.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Start HTTP server and run until `shutdown` resolves.
///
/// In-flight requests get `server.shutdown_timeout_seconds` to finish once
/// shutdown begins.
pub async fn start_server(
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServiceError> {
    let server = state.config.server.clone();
    let address = format!("{}:{}", server.host, server.port);

    let listener =
        tokio::net::TcpListener::bind(&address)
            .await
            .map_err(|e| ServiceError::BindFailed {
                address: address.clone(),
                message: e.to_string(),
            })?;

    info!(address = %address, "Starting HTTP server");

    let app = create_router(state);
    let shutdown_timeout = Duration::from_secs(server.shutdown_timeout_seconds);
    let (draining_tx, draining_rx) = tokio::sync::oneshot::channel::<()>();

    let serve = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            let _ = draining_tx.send(());
        })
        .into_future();

    // axum stops accepting connections on shutdown and waits for in-flight
    // requests; the drain deadline bounds that wait.
    tokio::select! {
        result = serve => {
            result.map_err(|e| ServiceError::ServerFailed {
                message: e.to_string(),
            })?;
        }
        _ = async {
            if draining_rx.await.is_ok() {
                tokio::time::sleep(shutdown_timeout).await;
            } else {
                std::future::pending::<()>().await;
            }
        } => {
            warn!(
                timeout_seconds = shutdown_timeout.as_secs(),
                "Graceful shutdown timed out, dropping in-flight requests"
            );
        }
    }

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

// ============================================================================
// Webhook Handlers
// ============================================================================

/// Handle a webhook delivery from one provider.
///
/// Returns `200 OK` for processed, duplicate and unrecognised events;
/// see [`WebhookHandlerError`] for the rejection statuses.
#[instrument(skip_all, fields(provider = %provider))]
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();

    let source = match errors::parse_provider(&provider) {
        Ok(source) => source,
        Err(e) => return e.into_response(),
    };

    let response = match process_webhook(&state, source, &headers, body).await {
        Ok(outcome) => {
            info!(
                event_id = %outcome.event_id(),
                outcome = ?outcome,
                "Webhook accepted"
            );
            (StatusCode::OK, "OK").into_response()
        }
        Err(e) => e.into_response(),
    };

    state
        .metrics
        .record_webhook_request(source, response.status().as_u16(), started.elapsed());
    response
}

async fn process_webhook(
    state: &AppState,
    source: WebhookSource,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<DispatchOutcome, WebhookHandlerError> {
    let provider = state.config.providers.get(source);
    if !provider.enabled {
        return Err(WebhookHandlerError::ProviderNotFound {
            provider: source.to_string(),
        });
    }

    let content_type = header_str(headers, header::CONTENT_TYPE.as_str()).unwrap_or_default();
    if !is_json_content_type(content_type) {
        return Err(WebhookHandlerError::UnsupportedMediaType {
            content_type: content_type.to_string(),
        });
    }

    let max_size = provider.max_body_bytes_for(source);
    if body.len() > max_size {
        return Err(WebhookHandlerError::PayloadTooLarge {
            size: body.len(),
            max_size,
        });
    }

    let signature = header_str(headers, source.signature_header());

    let key = rate_limit_key(source, signature);
    let limit = &provider.rate_limit;
    if !state
        .rate_limiter
        .allow(&key, limit.max_requests, limit.window())
    {
        state.metrics.record_rate_limited(source);
        let retry_after_seconds = state
            .rate_limiter
            .retry_after(&key)
            .map(ceil_seconds)
            .unwrap_or(1)
            .max(1);
        return Err(WebhookHandlerError::RateLimitExceeded {
            retry_after_seconds,
        });
    }

    let verification = verify_with_secrets(
        source,
        &body,
        signature,
        &state.secrets_for(source),
        &VerifyOptions::with_tolerance(provider.timestamp_tolerance()),
    );
    if !verification.is_valid() {
        let reason = verification.reason.unwrap_or(SignatureFailure::Mismatch);
        state
            .metrics
            .record_signature_failure(source, &reason.to_string());
        return Err(WebhookHandlerError::InvalidSignature(reason));
    }

    let lowercase_headers: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect();
    let parsed = parse_event(source, &lowercase_headers, &body)?;

    let outcome = state
        .dispatcher
        .dispatch(source, parsed.identity, parsed.payload)
        .await?;

    match outcome {
        DispatchOutcome::Failed { event_id, kind, .. } => {
            Err(WebhookHandlerError::ProcessingFailed { event_id, kind })
        }
        other => Ok(other),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `application/json`, with or without parameters such as `charset`.
fn is_json_content_type(value: &str) -> bool {
    value
        .split(';')
        .next()
        .map(|media_type| media_type.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

/// Rate-limit key: provider plus the start of the signature header, so one
/// noisy sender does not starve others.
fn rate_limit_key(source: WebhookSource, signature: Option<&str>) -> String {
    let prefix: String = signature
        .unwrap_or_default()
        .chars()
        .take(RATE_LIMIT_SIGNATURE_PREFIX)
        .collect();
    format!("{}:{}", source, prefix)
}

fn ceil_seconds(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

// ============================================================================
// Health Check Handlers
// ============================================================================

/// Basic liveness check
#[instrument(skip_all)]
async fn handle_health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Timestamp::now(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

/// Deep health check: breakers, recent errors and ledger reachability
#[instrument(skip_all)]
async fn handle_deep_health_check(State(state): State<AppState>) -> Response {
    let breakers = state.dispatcher.breakers();
    let aggregator = state.dispatcher.aggregator();

    let ledger = match state.dispatcher.ledger().stats().await {
        Ok(stats) => Some(stats),
        Err(e) => {
            warn!(error = %e, "Ledger unavailable during health check");
            None
        }
    };

    let degraded = ledger.is_none()
        || breakers.any_open()
        || aggregator.is_degraded(state.config.server.degraded_error_threshold);

    let response = DeepHealthResponse {
        status: if degraded { "degraded" } else { "healthy" }.to_string(),
        timestamp: Timestamp::now(),
        circuits: breakers.snapshot(),
        errors: aggregator.summary(),
        ledger,
    };

    let status = if degraded {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(response)).into_response()
}

/// Readiness check for load balancers
#[instrument(skip_all)]
async fn handle_readiness_check(State(state): State<AppState>) -> Response {
    let ledger_ready = state.dispatcher.ledger().stats().await.is_ok();
    let ready = ledger_ready
        && !state
            .dispatcher
            .aggregator()
            .is_degraded(state.config.server.degraded_error_threshold);

    let response = ReadinessResponse {
        ready,
        timestamp: Timestamp::now(),
    };

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response)).into_response()
}

// ============================================================================
// Observability Handlers
// ============================================================================

/// Prometheus metrics endpoint
#[instrument(skip_all)]
async fn metrics_endpoint(State(state): State<AppState>) -> Result<Response, StatusCode> {
    let body = state.metrics.encode().map_err(|e| {
        error!(error = %e, "Failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

// ============================================================================
// Admin Handlers
// ============================================================================

async fn list_failed_events(
    State(state): State<AppState>,
    Query(params): Query<EventListParams>,
) -> Result<Json<EventListResponse>, AdminError> {
    let events = state
        .dispatcher
        .ledger()
        .list_failed(params.source, params.effective_limit())
        .await?;
    Ok(Json(events.into()))
}

async fn list_pending_events(
    State(state): State<AppState>,
    Query(params): Query<EventListParams>,
) -> Result<Json<EventListResponse>, AdminError> {
    let events = state
        .dispatcher
        .ledger()
        .list_unprocessed(params.source, params.effective_limit())
        .await?;
    Ok(Json(events.into()))
}

async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Response, AdminError> {
    let event_id = parse_event_id(&event_id)?;
    let event = state
        .dispatcher
        .ledger()
        .get(event_id)
        .await?
        .ok_or(AdminError::EventNotFound { event_id })?;
    Ok(Json(event).into_response())
}

#[instrument(skip_all, fields(event_id = %event_id))]
async fn retry_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<RetryResponse>, AdminError> {
    let event_id = parse_event_id(&event_id)?;
    let outcome = state.dispatcher.reprocess(event_id).await?;
    info!(outcome = ?outcome, "Operator retry completed");
    Ok(Json(RetryResponse {
        outcome,
        timestamp: Timestamp::now(),
    }))
}

async fn list_circuits(State(state): State<AppState>) -> Json<CircuitListResponse> {
    Json(CircuitListResponse {
        circuits: state.dispatcher.breakers().snapshot(),
    })
}

#[instrument(skip_all, fields(circuit = %name))]
async fn reset_circuit(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<CircuitResetResponse>, AdminError> {
    let breakers = state.dispatcher.breakers();
    if !breakers.reset(&name) {
        return Err(AdminError::CircuitNotFound { name });
    }
    let circuit_state = breakers
        .get(&name)
        .map(|breaker| breaker.state())
        .unwrap_or_default();
    info!("Circuit breaker reset by operator");
    Ok(Json(CircuitResetResponse {
        name,
        state: circuit_state,
        timestamp: Timestamp::now(),
    }))
}

fn parse_event_id(value: &str) -> Result<EventId, AdminError> {
    value.parse().map_err(|_| AdminError::InvalidEventId {
        value: value.to_string(),
    })
}

// ============================================================================
// Middleware
// ============================================================================

/// Request logging middleware with correlation ID tracking
///
/// Reuses the caller's `x-correlation-id` or generates one, echoes it on the
/// response and logs completion at a level matching the status class.
#[instrument(skip(request, next), fields(
    method = %request.method(),
    uri = %request.uri(),
    correlation_id
))]
async fn request_logging_middleware(
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let correlation_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::Span::current().record("correlation_id", correlation_id.as_str());
    request.extensions_mut().insert(correlation_id.clone());

    let mut response = next.run(request).await;
    let duration = start.elapsed();

    if let Ok(header_value) = correlation_id.parse() {
        response
            .headers_mut()
            .insert(CORRELATION_ID_HEADER, header_value);
    }

    let status = response.status();

    if status.is_server_error() {
        error!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        info!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed successfully"
        );
    }

    response
}

/// Record request count and latency per route template.
///
/// Uses the matched route (`/admin/events/{event_id}`) rather than the raw
/// path to keep label cardinality bounded.
async fn metrics_middleware(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    state.metrics.record_http_request(
        method.as_str(),
        &path,
        response.status().as_u16(),
        start.elapsed(),
    );

    response
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
