use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Json, Path, Query, State,
    },
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use log::{Level, LevelFilter, Log, Metadata, Record};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{
    env,
    fs::OpenOptions,
    io::Write,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroU32,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use subtle::ConstantTimeEq;
use tokio::signal;
use tokio::sync::broadcast;
use tower_cookies::{Cookie, CookieManagerLayer, Cookies};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crossview_server::models::{
    HtmlData, HtmlSourceRef, IngestSource, IngestSourceRef, MediaData, MediaSourceRef,
    MultiviewLayoutTemplate, MultiviewSettings, PipelineSettings, PipelineSource,
    PipelineSourceSettings, Production, SourceReference, StepReport, WorkflowStep,
};
use crossview_server::services::{
    add_setup_item, first_empty_slot, prune_logs, read_recent_logs, remove_setup_item,
    update_setup_item, validate_multiviews, EventSink, LayoutStore, LiveApiClient, MutationGuard,
    ProductionStore, ProductionWorkflow, SettingsManager, StreamLifecycleManager,
};

// ============================================================================
// Constants
// ============================================================================

const AUTH_COOKIE_NAME: &str = "crossview_session";
const COOKIE_MAX_AGE_SECS: i64 = 7 * 24 * 60 * 60; // 7 days
const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 300;
const STREAM_RESTART_DELAY_MS: u64 = 1500;

// ============================================================================
// Event System
// ============================================================================

#[derive(Clone, Serialize)]
struct ServerEvent {
    event: String,
    payload: Value,
}

#[derive(Clone)]
struct EventBus {
    sender: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: &str, payload: Value) {
        let _ = self.sender.send(ServerEvent {
            event: event.to_string(),
            payload,
        });
    }
}

// ============================================================================
// Application State
// ============================================================================

#[derive(Clone)]
struct AppState {
    production_store: Arc<ProductionStore>,
    layout_store: Arc<LayoutStore>,
    settings_manager: Arc<SettingsManager>,
    live_client: Arc<LiveApiClient>,
    stream_manager: Arc<StreamLifecycleManager>,
    workflow: Arc<ProductionWorkflow>,
    mutation_guard: Arc<MutationGuard>,
    event_bus: EventBus,
    log_dir: PathBuf,
    auth_token: Option<String>,
    rate_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

#[derive(Serialize)]
struct ApiResponse {
    ok: bool,
    data: Option<Value>,
    error: Option<String>,
}

// ============================================================================
// Logging
// ============================================================================

struct ServerLogger {
    file: Mutex<std::fs::File>,
    event_bus: EventBus,
    level: LevelFilter,
}

impl ServerLogger {
    fn new(log_dir: &std::path::Path, event_bus: EventBus) -> Result<Self, Box<dyn std::error::Error>> {
        let log_path = log_dir.join("crossview-server.log");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        Ok(Self {
            file: Mutex::new(file),
            event_bus,
            level: LevelFilter::Info,
        })
    }
}

impl Log for ServerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp = Local::now();
        let date = timestamp.format("%Y-%m-%d");
        let time = timestamp.format("%H:%M:%S");
        let target = record.target();
        let level = record.level();
        let message = format!("{}", record.args());
        let line = format!("[{date}][{time}][{target}][{level}] {message}");

        if let Ok(mut file) = self.file.try_lock() {
            let _ = writeln!(file, "{line}");
        }

        let level_number = match level {
            Level::Error => 1,
            Level::Warn => 2,
            Level::Info => 3,
            Level::Debug => 4,
            Level::Trace => 5,
        };

        self.event_bus.emit(
            "log://log",
            json!({ "level": level_number, "message": message, "target": target }),
        );
    }

    fn flush(&self) {}
}

// ============================================================================
// Security Utilities
// ============================================================================

/// Constant-time token comparison to prevent timing attacks
fn verify_token(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

/// Extract bearer token from Authorization header
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ============================================================================
// Response Helpers
// ============================================================================

fn ok_json<T: Serialize>(data: T) -> Response {
    let response = ApiResponse {
        ok: true,
        data: serde_json::to_value(data).ok(),
        error: None,
    };
    (StatusCode::OK, Json(response)).into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    let response = ApiResponse {
        ok: false,
        data: None,
        error: Some(message.to_string()),
    };
    (status, Json(response)).into_response()
}

/// Map a store error message to a status: unknown documents are 404,
/// everything else is the store's fault
fn store_error(message: &str) -> Response {
    let status = if message.contains("not found") {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    error_response(status, message)
}

fn busy_response(message: &str) -> Response {
    error_response(StatusCode::CONFLICT, message)
}

/// Envelope for multi-stage workflows: the step list always rides along
/// so the caller can tell exactly which phase failed
fn step_response(report: StepReport) -> Response {
    let status = if report.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    let body = json!({ "ok": report.success, "value": report });
    (status, Json(body)).into_response()
}

// ============================================================================
// CORS Configuration
// ============================================================================

fn build_cors_layer() -> CorsLayer {
    let cors_origins = env::var("CROSSVIEW_CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:*,http://127.0.0.1:*".to_string());

    let allowed_origins: Vec<String> = cors_origins
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let origin_str = match origin.to_str() {
                Ok(s) => s,
                Err(_) => return false,
            };

            allowed_origins.iter().any(|allowed| {
                if allowed.ends_with(":*") {
                    // Wildcard port matching
                    let prefix = allowed.trim_end_matches(":*");
                    origin_str.starts_with(prefix) && origin_str[prefix.len()..].starts_with(':')
                } else {
                    origin_str == allowed
                }
            })
        }))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::COOKIE, header::AUTHORIZATION])
        .allow_credentials(true)
}

// ============================================================================
// Authentication Endpoints
// ============================================================================

#[derive(Deserialize)]
struct LoginRequest {
    token: String,
}

/// Set a session cookie
fn set_session_cookie(cookies: &Cookies) {
    let session_id = uuid::Uuid::new_v4().to_string();
    let cookie = Cookie::build((AUTH_COOKIE_NAME, session_id))
        .http_only(true)
        .secure(false) // Set to true when using HTTPS
        .same_site(tower_cookies::cookie::SameSite::Strict)
        .path("/")
        .max_age(tower_cookies::cookie::time::Duration::seconds(COOKIE_MAX_AGE_SECS))
        .build();
    cookies.add(cookie);
}

/// POST /auth/login - Validate token and set HttpOnly cookie
async fn auth_login(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(payload): Json<LoginRequest>,
) -> impl IntoResponse {
    let expected_token = state.auth_token.as_deref();

    match expected_token {
        None => {
            // No token configured - open access, set session cookie anyway
            set_session_cookie(&cookies);
            Json(json!({ "ok": true }))
        }
        Some(expected) if verify_token(expected, &payload.token) => {
            set_session_cookie(&cookies);
            Json(json!({ "ok": true }))
        }
        _ => {
            // Invalid token - add a small delay to prevent brute force
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            Json(json!({ "ok": false, "error": "Invalid token" }))
        }
    }
}

/// POST /auth/logout - Clear session cookie
async fn auth_logout(cookies: Cookies) -> impl IntoResponse {
    let cookie = Cookie::build((AUTH_COOKIE_NAME, ""))
        .path("/")
        .max_age(tower_cookies::cookie::time::Duration::ZERO)
        .build();
    cookies.remove(cookie);
    Json(json!({ "ok": true }))
}

/// GET /auth/check - Check if session is valid
async fn auth_check(State(state): State<AppState>, cookies: Cookies) -> impl IntoResponse {
    // If no token configured, always authenticated
    if state.auth_token.is_none() {
        return Json(json!({ "authenticated": true, "required": false }));
    }

    let is_authenticated = cookies.get(AUTH_COOKIE_NAME).is_some();
    Json(json!({ "authenticated": is_authenticated, "required": true }))
}

// ============================================================================
// Middleware
// ============================================================================

/// Authentication middleware - check for valid session cookie
async fn auth_middleware(
    State(state): State<AppState>,
    cookies: Cookies,
    headers: HeaderMap,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    // If no token configured, allow all requests
    if state.auth_token.is_none() {
        return next.run(request).await;
    }

    // Check for valid session cookie
    if cookies.get(AUTH_COOKIE_NAME).is_some() {
        return next.run(request).await;
    }

    // Also accept Bearer token for programmatic access
    if let Some(token) = bearer_token(&headers) {
        if let Some(expected) = state.auth_token.as_deref() {
            if verify_token(expected, token) {
                return next.run(request).await;
            }
        }
    }

    error_response(StatusCode::UNAUTHORIZED, "Authentication required")
}

/// Rate limiting middleware
async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match state.rate_limiter.check() {
        Ok(_) => next.run(request).await,
        Err(_) => error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded. Please try again later.",
        ),
    }
}

// ============================================================================
// Health Endpoints
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

/// Readiness check - verifies critical services are functional
async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks: Vec<(&str, bool)> = Vec::new();

    let productions_ok = state.production_store.get_all_ids().is_ok();
    checks.push(("productions", productions_ok));

    let layouts_ok = state.layout_store.list_all().is_ok();
    checks.push(("layouts", layouts_ok));

    let settings_ok = state.settings_manager.load().is_ok();
    checks.push(("settings", settings_ok));

    let all_ok = checks.iter().all(|(_, ok)| *ok);
    let failed: Vec<&str> = checks
        .iter()
        .filter(|(_, ok)| !ok)
        .map(|(name, _)| *name)
        .collect();

    if all_ok {
        Json(json!({ "ready": true })).into_response()
    } else {
        log::warn!("Readiness check failed: {failed:?}");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false, "failed": failed })),
        )
            .into_response()
    }
}

/// GET /api/live/health - Probe the live-production backend
async fn live_health(State(state): State<AppState>) -> impl IntoResponse {
    let available = state.live_client.health_check().await;
    Json(json!({ "available": available, "url": state.live_client.base_url() }))
}

// ============================================================================
// Production Handlers
// ============================================================================

async fn list_productions(State(state): State<AppState>) -> Response {
    match state.production_store.get_all_summaries() {
        Ok(summaries) => ok_json(summaries),
        Err(e) => store_error(&e),
    }
}

#[derive(Deserialize)]
struct CreateProductionRequest {
    name: String,
    #[serde(default)]
    pipelines: Vec<PipelineSettings>,
    #[serde(default)]
    multiviews: Vec<MultiviewSettings>,
}

async fn create_production(
    State(state): State<AppState>,
    Json(request): Json<CreateProductionRequest>,
) -> Response {
    if request.name.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Production name missing");
    }

    let production = Production {
        id: uuid::Uuid::new_v4().to_string(),
        name: request.name,
        is_active: false,
        sources: Vec::new(),
        pipelines: request.pipelines,
        outputs: Vec::new(),
        multiviews: request.multiviews,
        control_connection: Default::default(),
    };

    match state.production_store.save(&production) {
        Ok(()) => {
            state.event_bus.emit(
                "production_changed",
                json!({ "action": "created", "id": production.id }),
            );
            ok_json(production)
        }
        Err(e) => store_error(&e),
    }
}

async fn get_production(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.production_store.load(&id) {
        Ok(production) => ok_json(production),
        Err(e) => store_error(&e),
    }
}

/// PUT /api/productions/{id} - Whole-document replace. Sources added by
/// the client without an id get one assigned before the write.
async fn put_production(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut production): Json<Production>,
) -> Response {
    if production.id != id {
        return error_response(StatusCode::BAD_REQUEST, "Document id does not match path");
    }

    for source in &mut production.sources {
        if source.id().is_empty() {
            let fresh = uuid::Uuid::new_v4().to_string();
            match source {
                SourceReference::IngestSource(s) => s.id = fresh,
                SourceReference::Html(s) => s.id = fresh,
                SourceReference::Mediaplayer(s) => s.id = fresh,
            }
        }
    }

    match state.production_store.save(&production) {
        Ok(()) => {
            state.event_bus.emit(
                "production_changed",
                json!({ "action": "saved", "id": production.id }),
            );
            ok_json(production)
        }
        Err(e) => store_error(&e),
    }
}

async fn delete_production(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.production_store.load(&id) {
        Ok(production) if production.is_active => {
            error_response(StatusCode::BAD_REQUEST, "Stop the production before deleting it")
        }
        Ok(_) => match state.production_store.delete(&id) {
            Ok(()) => {
                state
                    .event_bus
                    .emit("production_changed", json!({ "action": "deleted", "id": id }));
                ok_json(json!({ "deleted": id }))
            }
            Err(e) => store_error(&e),
        },
        Err(e) => store_error(&e),
    }
}

// ============================================================================
// Production Start/Stop Handlers
// ============================================================================

async fn start_production(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let _lock = match state.mutation_guard.begin(&id) {
        Ok(lock) => lock,
        Err(e) => return busy_response(&e),
    };

    let mut production = match state.production_store.load(&id) {
        Ok(production) => production,
        Err(e) => return store_error(&e),
    };
    if production.is_active {
        return error_response(StatusCode::BAD_REQUEST, "Production is already active");
    }

    let report = state.workflow.start(&mut production).await;

    if production.is_active {
        if let Err(e) = state.production_store.save(&production) {
            return store_error(&e);
        }
        state
            .event_bus
            .emit("production_changed", json!({ "action": "started", "id": id }));
    }

    step_response(report)
}

async fn stop_production(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let _lock = match state.mutation_guard.begin(&id) {
        Ok(lock) => lock,
        Err(e) => return busy_response(&e),
    };

    let mut production = match state.production_store.load(&id) {
        Ok(production) => production,
        Err(e) => return store_error(&e),
    };
    if !production.is_active {
        return error_response(StatusCode::BAD_REQUEST, "Production is not active");
    }

    let report = state.workflow.stop(&mut production).await;

    if !production.is_active {
        if let Err(e) = state.production_store.save(&production) {
            return store_error(&e);
        }
        state
            .event_bus
            .emit("production_changed", json!({ "action": "stopped", "id": id }));
    }

    step_response(report)
}

// ============================================================================
// Source Handlers
// ============================================================================

/// Body of POST /api/productions/{id}/sources, discriminated like the
/// stored source references
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AddSourceRequest {
    IngestSource {
        source: IngestSource,
        /// Backend numeric ingest source id, when the inventory knows it
        source_id: Option<u32>,
    },
    Html {
        label: Option<String>,
        html_data: HtmlData,
    },
    Mediaplayer {
        label: Option<String>,
        media_data: MediaData,
    },
}

/// Append a per-pipeline settings placeholder for a newly added ingest
/// source, seeded from each pipeline's defaults
fn add_pipeline_placeholders(pipelines: &mut [PipelineSettings], source_id: u32) {
    for pipeline in pipelines {
        let exists = pipeline.sources.iter().any(|s| s.source_id == source_id);
        if !exists {
            pipeline.sources.push(PipelineSource {
                source_id,
                settings: PipelineSourceSettings {
                    alignment_ms: pipeline.alignment_ms,
                    max_network_latency_ms: pipeline.max_network_latency_ms,
                },
            });
        }
    }
}

async fn add_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AddSourceRequest>,
) -> Response {
    let _lock = match state.mutation_guard.begin(&id) {
        Ok(lock) => lock,
        Err(e) => return busy_response(&e),
    };

    let mut production = match state.production_store.load(&id) {
        Ok(production) => production,
        Err(e) => return store_error(&e),
    };

    let input_slot = first_empty_slot(&production.sources);

    match request {
        AddSourceRequest::IngestSource { source, source_id } => {
            if production.source(&source.id).is_some() {
                return error_response(StatusCode::BAD_REQUEST, "Source is already in production");
            }

            if !production.is_active {
                let reference = SourceReference::IngestSource(IngestSourceRef {
                    id: source.id.clone(),
                    label: if source.name.is_empty() {
                        source.ingest_source_name.clone()
                    } else {
                        source.name.clone()
                    },
                    input_slot,
                    stream_uuids: None,
                });
                add_setup_item(&mut production.sources, reference);
                if let Some(source_id) = source_id {
                    add_pipeline_placeholders(&mut production.pipelines, source_id);
                }
                if let Err(e) = state.production_store.save(&production) {
                    return store_error(&e);
                }
                state
                    .event_bus
                    .emit("production_changed", json!({ "action": "saved", "id": id }));
                return ok_json(production);
            }

            // Active: provision one stream per pipeline, all-or-nothing
            let result = state
                .stream_manager
                .create_stream(&source, &production.pipelines, input_slot)
                .await;

            if !result.success {
                return step_response(StepReport {
                    success: false,
                    steps: result.steps,
                });
            }

            let reference = SourceReference::IngestSource(IngestSourceRef {
                id: result.streams[0].source_id.clone(),
                label: source.name.clone(),
                input_slot,
                stream_uuids: Some(
                    result.streams.iter().map(|s| s.stream_uuid.clone()).collect(),
                ),
            });
            add_setup_item(&mut production.sources, reference);
            if let Some(source_id) = source_id {
                add_pipeline_placeholders(&mut production.pipelines, source_id);
            }
            if let Err(e) = state.production_store.save(&production) {
                return store_error(&e);
            }
            state
                .event_bus
                .emit("production_changed", json!({ "action": "saved", "id": id }));

            step_response(StepReport {
                success: true,
                steps: result.steps,
            })
        }
        AddSourceRequest::Html { label, html_data } => {
            let reference = SourceReference::Html(HtmlSourceRef {
                id: uuid::Uuid::new_v4().to_string(),
                label: label.unwrap_or_else(|| format!("HTML {input_slot}")),
                input_slot,
                html_data: html_data.clone(),
            });
            add_setup_item(&mut production.sources, reference.clone());

            let report = if production.is_active {
                state
                    .stream_manager
                    .create_html_source(
                        &production.pipelines,
                        input_slot,
                        &html_data,
                        &reference,
                        &production.multiviews,
                        &production.sources,
                    )
                    .await
            } else {
                StepReport {
                    success: true,
                    steps: Vec::new(),
                }
            };

            if let Err(e) = state.production_store.save(&production) {
                return store_error(&e);
            }
            state
                .event_bus
                .emit("production_changed", json!({ "action": "saved", "id": id }));
            step_response(report)
        }
        AddSourceRequest::Mediaplayer { label, media_data } => {
            let reference = SourceReference::Mediaplayer(MediaSourceRef {
                id: uuid::Uuid::new_v4().to_string(),
                label: label.unwrap_or_else(|| format!("Media Player {input_slot}")),
                input_slot,
                media_data: media_data.clone(),
            });
            add_setup_item(&mut production.sources, reference.clone());

            let report = if production.is_active {
                state
                    .stream_manager
                    .create_media_source(
                        &production.pipelines,
                        input_slot,
                        &media_data,
                        &reference,
                        &production.multiviews,
                        &production.sources,
                    )
                    .await
            } else {
                StepReport {
                    success: true,
                    steps: Vec::new(),
                }
            };

            if let Err(e) = state.production_store.save(&production) {
                return store_error(&e);
            }
            state
                .event_bus
                .emit("production_changed", json!({ "action": "saved", "id": id }));
            step_response(report)
        }
    }
}

#[derive(Deserialize)]
struct UpdateSourceRequest {
    label: Option<String>,
    html_data: Option<HtmlData>,
    media_data: Option<MediaData>,
}

/// PUT /api/productions/{id}/sources/{source_id} - Relabel or update a
/// source's payload. On an active production every multiview showing the
/// source's slot gets its view array re-pushed.
async fn update_source(
    State(state): State<AppState>,
    Path((id, source_id)): Path<(String, String)>,
    Json(request): Json<UpdateSourceRequest>,
) -> Response {
    let _lock = match state.mutation_guard.begin(&id) {
        Ok(lock) => lock,
        Err(e) => return busy_response(&e),
    };

    let mut production = match state.production_store.load(&id) {
        Ok(production) => production,
        Err(e) => return store_error(&e),
    };

    let mut updated = match production.source(&source_id) {
        Some(source) => source.clone(),
        None => return error_response(StatusCode::NOT_FOUND, "Source not found in production"),
    };

    if let Some(label) = &request.label {
        updated.set_label(label);
    }
    if let (SourceReference::Html(source), Some(html_data)) = (&mut updated, &request.html_data) {
        source.html_data = html_data.clone();
    }
    if let (SourceReference::Mediaplayer(source), Some(media_data)) =
        (&mut updated, &request.media_data)
    {
        source.media_data = media_data.clone();
    }

    update_setup_item(&mut production.sources, &updated);
    if let Err(e) = state.production_store.save(&production) {
        return store_error(&e);
    }
    state
        .event_bus
        .emit("production_changed", json!({ "action": "saved", "id": id }));

    if !production.is_active {
        return ok_json(production);
    }

    let pipeline_id = match production.multiview_pipeline().and_then(|p| p.pipeline_id.clone()) {
        Some(pipeline_id) => pipeline_id,
        None => return ok_json(production),
    };

    // The label change is stored either way; the sync outcome is its own
    // step so the caller can tell the two apart.
    match state
        .stream_manager
        .synchronizer()
        .push_source_update_all(
            &pipeline_id,
            &production.sources,
            &updated,
            &production.multiviews,
        )
        .await
    {
        Ok(()) => step_response(StepReport {
            success: true,
            steps: vec![WorkflowStep::ok("update_multiview")],
        }),
        Err(step) => step_response(StepReport {
            success: false,
            steps: vec![step],
        }),
    }
}

#[derive(Deserialize)]
struct RemoveSourceQuery {
    /// Backend numeric ingest source id; when present the pipeline
    /// settings placeholders are dropped together with the reference
    ingest_source_id: Option<u32>,
}

/// DELETE /api/productions/{id}/sources/{source_id}
///
/// On an active production the backend teardown runs first, and the
/// local reference is only dropped once the streams are confirmed gone -
/// an unacknowledged delete must not lose track of a stream still
/// allocated on the backend.
async fn remove_source(
    State(state): State<AppState>,
    Path((id, source_id)): Path<(String, String)>,
    Query(query): Query<RemoveSourceQuery>,
) -> Response {
    let _lock = match state.mutation_guard.begin(&id) {
        Ok(lock) => lock,
        Err(e) => return busy_response(&e),
    };

    let mut production = match state.production_store.load(&id) {
        Ok(production) => production,
        Err(e) => return store_error(&e),
    };

    let reference = match production.source(&source_id) {
        Some(source) => source.clone(),
        None => return error_response(StatusCode::NOT_FOUND, "Source not found in production"),
    };

    let mut steps: Vec<WorkflowStep> = Vec::new();
    let mut degraded = false;

    if production.is_active {
        match &reference {
            SourceReference::IngestSource(source) => {
                if let Some(stream_uuids) = &source.stream_uuids {
                    if !stream_uuids.is_empty() {
                        let outcome = state
                            .stream_manager
                            .delete_stream(
                                stream_uuids,
                                &production.pipelines,
                                &production.multiviews,
                                &production.sources,
                                source.input_slot,
                            )
                            .await;

                        if !outcome.stream_released() {
                            return step_response(StepReport {
                                success: false,
                                steps: outcome.into_steps(),
                            });
                        }
                        degraded = outcome.steps().iter().any(|s| !s.success);
                        steps.extend(outcome.into_steps());
                    }
                }
            }
            SourceReference::Html(source) => {
                let report = state
                    .stream_manager
                    .delete_html_source(
                        &production.pipelines,
                        source.input_slot,
                        &production.multiviews,
                        &production.sources,
                    )
                    .await;
                degraded = !report.success;
                steps.extend(report.steps);
            }
            SourceReference::Mediaplayer(source) => {
                let report = state
                    .stream_manager
                    .delete_media_source(
                        &production.pipelines,
                        source.input_slot,
                        &production.multiviews,
                        &production.sources,
                    )
                    .await;
                degraded = !report.success;
                steps.extend(report.steps);
            }
        }
    }

    remove_setup_item(&mut production.sources, &source_id);
    if let Some(ingest_source_id) = query.ingest_source_id {
        for pipeline in &mut production.pipelines {
            pipeline.sources.retain(|s| s.source_id != ingest_source_id);
        }
    }

    if let Err(e) = state.production_store.save(&production) {
        return store_error(&e);
    }
    state
        .event_bus
        .emit("production_changed", json!({ "action": "saved", "id": id }));

    if steps.is_empty() {
        steps.push(WorkflowStep::ok("remove_source"));
    }
    step_response(StepReport {
        success: !degraded,
        steps,
    })
}

#[derive(Deserialize)]
struct RestartSourceRequest {
    source: IngestSource,
}

/// POST /api/productions/{id}/sources/{source_id}/restart
///
/// Tear down the source's streams and provision them again under fresh
/// identities, keeping the reference and its slot. Used when settings
/// changes require the backend to re-ingest.
async fn restart_source(
    State(state): State<AppState>,
    Path((id, source_id)): Path<(String, String)>,
    Json(request): Json<RestartSourceRequest>,
) -> Response {
    let _lock = match state.mutation_guard.begin(&id) {
        Ok(lock) => lock,
        Err(e) => return busy_response(&e),
    };

    let mut production = match state.production_store.load(&id) {
        Ok(production) => production,
        Err(e) => return store_error(&e),
    };
    if !production.is_active {
        return error_response(StatusCode::BAD_REQUEST, "Production is not active");
    }

    let (input_slot, stream_uuids) = match production.source(&source_id) {
        Some(SourceReference::IngestSource(source)) => (
            source.input_slot,
            source.stream_uuids.clone().unwrap_or_default(),
        ),
        Some(_) => {
            return error_response(StatusCode::BAD_REQUEST, "Only ingest sources can be restarted")
        }
        None => return error_response(StatusCode::NOT_FOUND, "Source not found in production"),
    };
    if stream_uuids.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Source has no streams to restart");
    }

    let outcome = state
        .stream_manager
        .delete_stream(
            &stream_uuids,
            &production.pipelines,
            &production.multiviews,
            &production.sources,
            input_slot,
        )
        .await;
    if !outcome.stream_released() {
        return step_response(StepReport {
            success: false,
            steps: outcome.into_steps(),
        });
    }
    let mut steps = outcome.into_steps();

    // Give the backend a moment to release the ingest before re-binding it
    tokio::time::sleep(std::time::Duration::from_millis(STREAM_RESTART_DELAY_MS)).await;

    let result = state
        .stream_manager
        .create_stream(&request.source, &production.pipelines, input_slot)
        .await;
    steps.extend(result.steps);

    if !result.success {
        return step_response(StepReport {
            success: false,
            steps,
        });
    }

    let new_uuids: Vec<String> = result.streams.iter().map(|s| s.stream_uuid.clone()).collect();
    if let Some(SourceReference::IngestSource(source)) = production
        .sources
        .iter_mut()
        .find(|s| s.id() == source_id)
    {
        source.stream_uuids = Some(new_uuids);
    }

    if let Err(e) = state.production_store.save(&production) {
        return store_error(&e);
    }
    state
        .event_bus
        .emit("production_changed", json!({ "action": "saved", "id": id }));

    step_response(StepReport::from_steps(steps))
}

#[derive(Deserialize)]
struct SourceSettingsRequest {
    alignment_ms: u32,
    max_network_latency_ms: u32,
    /// Stream to patch on the running backend, when the production is
    /// active
    stream_uuid: Option<String>,
}

/// PUT /api/productions/{id}/pipelines/{pipeline_id}/sources/{source_id}/settings
async fn put_source_settings(
    State(state): State<AppState>,
    Path((id, pipeline_id, source_id)): Path<(String, String, u32)>,
    Json(request): Json<SourceSettingsRequest>,
) -> Response {
    if let Err(e) = state.production_store.set_pipeline_source_alignment(
        &id,
        &pipeline_id,
        source_id,
        request.alignment_ms,
    ) {
        return store_error(&e);
    }
    if let Err(e) = state.production_store.set_pipeline_source_latency(
        &id,
        &pipeline_id,
        source_id,
        request.max_network_latency_ms,
    ) {
        return store_error(&e);
    }

    let production = match state.production_store.load(&id) {
        Ok(production) => production,
        Err(e) => return store_error(&e),
    };

    if production.is_active {
        if let Some(stream_uuid) = &request.stream_uuid {
            if let Err(e) = state
                .live_client
                .patch_stream(stream_uuid, request.alignment_ms)
                .await
            {
                return step_response(StepReport {
                    success: false,
                    steps: vec![WorkflowStep::failed("update_stream", e.to_string())],
                });
            }
        }
    }

    state
        .event_bus
        .emit("production_changed", json!({ "action": "saved", "id": id }));
    ok_json(production)
}

// ============================================================================
// Multiview Handlers
// ============================================================================

#[derive(Deserialize)]
struct PutMultiviewsRequest {
    multiviews: Vec<MultiviewSettings>,
}

/// PUT /api/productions/{id}/multiviews - Replace the multiview set.
/// Duplicate local ip/port pairs and SRT stream ids are rejected before
/// any backend call; on an active production the diff is applied
/// incrementally so the running video is never torn down.
async fn put_multiviews(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<PutMultiviewsRequest>,
) -> Response {
    if let Err(e) = validate_multiviews(&request.multiviews) {
        return error_response(StatusCode::BAD_REQUEST, &e);
    }

    let _lock = match state.mutation_guard.begin(&id) {
        Ok(lock) => lock,
        Err(e) => return busy_response(&e),
    };

    let mut production = match state.production_store.load(&id) {
        Ok(production) => production,
        Err(e) => return store_error(&e),
    };

    match state
        .workflow
        .apply_multiview_update(&production, request.multiviews)
        .await
    {
        Ok(multiviews) => {
            production.multiviews = multiviews;
            if let Err(e) = state.production_store.save(&production) {
                return store_error(&e);
            }
            state
                .event_bus
                .emit("production_changed", json!({ "action": "saved", "id": id }));
            ok_json(production)
        }
        // The stored document keeps its last-known-good multiview set
        Err(report) => step_response(report),
    }
}

// ============================================================================
// Layout Template Handlers
// ============================================================================

async fn list_layouts(State(state): State<AppState>) -> Response {
    match state.layout_store.list_all() {
        Ok(layouts) => ok_json(layouts),
        Err(e) => store_error(&e),
    }
}

async fn list_production_layouts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.layout_store.list_for_production(&id) {
        Ok(layouts) => ok_json(layouts),
        Err(e) => store_error(&e),
    }
}

async fn create_layout(
    State(state): State<AppState>,
    Json(mut layout): Json<MultiviewLayoutTemplate>,
) -> Response {
    if layout.id.is_empty() {
        layout.id = uuid::Uuid::new_v4().to_string();
    }

    match state.layout_store.save(&layout) {
        Ok(()) => {
            state
                .event_bus
                .emit("layout_changed", json!({ "action": "saved", "id": layout.id }));
            ok_json(layout)
        }
        Err(e) => {
            if e.contains("name missing") {
                error_response(StatusCode::BAD_REQUEST, &e)
            } else {
                store_error(&e)
            }
        }
    }
}

/// DELETE /api/productions/{id}/layouts/{layout_id} - Only the owning
/// production may delete a scoped layout, and only while no saved
/// multiview references it.
async fn delete_layout(
    State(state): State<AppState>,
    Path((id, layout_id)): Path<(String, String)>,
) -> Response {
    let production = match state.production_store.load(&id) {
        Ok(production) => production,
        Err(e) => return store_error(&e),
    };

    let saved_multiviews: Vec<String> = production
        .multiviews
        .iter()
        .filter_map(|m| m.id.clone())
        .collect();

    match state.layout_store.delete(&layout_id, &id, &saved_multiviews) {
        Ok(()) => {
            state
                .event_bus
                .emit("layout_changed", json!({ "action": "deleted", "id": layout_id }));
            ok_json(json!({ "deleted": layout_id }))
        }
        Err(e) => {
            if e.contains("not found") {
                store_error(&e)
            } else {
                error_response(StatusCode::BAD_REQUEST, &e)
            }
        }
    }
}

// ============================================================================
// Log Handlers
// ============================================================================

#[derive(Deserialize)]
struct RecentLogsQuery {
    max_lines: Option<usize>,
}

async fn recent_logs(
    State(state): State<AppState>,
    Query(query): Query<RecentLogsQuery>,
) -> Response {
    match read_recent_logs(&state.log_dir, query.max_lines.unwrap_or(500)) {
        Ok(lines) => ok_json(lines),
        Err(e) => store_error(&e),
    }
}

// ============================================================================
// WebSocket Event Stream
// ============================================================================

#[derive(Deserialize)]
struct AuthQuery {
    token: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<AuthQuery>,
    cookies: Cookies,
) -> impl IntoResponse {
    // Check authentication: no token required, valid cookie, or valid query param
    let authenticated = state.auth_token.is_none()
        || cookies.get(AUTH_COOKIE_NAME).is_some()
        || query.token.as_deref().is_some_and(|token| {
            state
                .auth_token
                .as_deref()
                .is_some_and(|expected| verify_token(expected, token))
        });

    if !authenticated {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state.event_bus.subscribe()))
}

async fn handle_socket(mut socket: WebSocket, mut receiver: broadcast::Receiver<ServerEvent>) {
    while let Ok(event) = receiver.recv().await {
        if let Ok(payload) = serde_json::to_string(&event) {
            if socket.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    }
}

// ============================================================================
// Server Setup
// ============================================================================

fn parse_host(host: &str) -> IpAddr {
    host.parse().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn init_logger(
    log_dir: &std::path::Path,
    event_bus: EventBus,
) -> Result<(), Box<dyn std::error::Error>> {
    let logger = ServerLogger::new(log_dir, event_bus)?;
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(LevelFilter::Info);
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::info!("Shutdown signal received, server shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration from environment
    let data_dir = env::var("CROSSVIEW_DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let log_dir = env::var("CROSSVIEW_LOG_DIR").unwrap_or_else(|_| format!("{data_dir}/logs"));

    let env_host = env::var("CROSSVIEW_HOST").ok();
    let env_port: Option<u16> = env::var("CROSSVIEW_PORT")
        .ok()
        .and_then(|value| value.parse().ok());
    let env_auth_token = env::var("CROSSVIEW_API_TOKEN").ok().and_then(|value| {
        let trimmed = value.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    });

    let app_data_dir = PathBuf::from(&data_dir);
    let log_dir_path = PathBuf::from(&log_dir);
    std::fs::create_dir_all(&app_data_dir)?;
    std::fs::create_dir_all(&log_dir_path)?;

    let settings_manager = Arc::new(SettingsManager::new(app_data_dir.clone()));
    let settings = settings_manager.load().ok();

    let settings_auth_token = settings.as_ref().and_then(|settings| {
        let trimmed = settings.backend_token.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    });
    let auth_token = env_auth_token.or(settings_auth_token);

    // Determine host/port: env vars take precedence, then settings, then
    // defaults. If remote access is disabled, force localhost.
    let (host, port) = {
        let remote_enabled = settings
            .as_ref()
            .map(|s| s.backend_remote_enabled)
            .unwrap_or(false);
        let settings_host = settings
            .as_ref()
            .map(|s| s.backend_host.clone())
            .unwrap_or_else(|| "127.0.0.1".to_string());
        let settings_port = settings.as_ref().map(|s| s.backend_port).unwrap_or(8008);

        let env_host_was_set = env_host.is_some();
        let configured_host = env_host.unwrap_or(settings_host);
        let configured_port = env_port.unwrap_or(settings_port);

        let env_remote = env::var("CROSSVIEW_REMOTE_ENABLED")
            .ok()
            .and_then(|value| parse_bool(&value));
        let remote_enabled = env_remote.unwrap_or(remote_enabled);

        let final_host = if !remote_enabled && !env_host_was_set {
            "127.0.0.1".to_string()
        } else {
            configured_host
        };

        (final_host, configured_port)
    };

    let live_url = env::var("CROSSVIEW_LIVE_URL").ok().unwrap_or_else(|| {
        settings
            .as_ref()
            .map(|s| s.live_api_url.clone())
            .unwrap_or_else(|| "http://127.0.0.1:8089".to_string())
    });
    let live_token = env::var("CROSSVIEW_LIVE_TOKEN").ok().unwrap_or_else(|| {
        settings
            .as_ref()
            .map(|s| s.live_api_token.clone())
            .unwrap_or_default()
    });

    let event_bus = EventBus::new();
    init_logger(&log_dir_path, event_bus.clone())?;

    log::info!("Server will bind to {host}:{port}");
    log::info!("Live backend: {live_url}");

    if let Some(settings) = settings.as_ref() {
        let _ = prune_logs(&log_dir_path, settings.log_retention_days);
    }

    let production_store = Arc::new(ProductionStore::new(app_data_dir.clone()));
    let layout_store = Arc::new(LayoutStore::new(app_data_dir.clone()));

    // The manager cannot have outlived its backend session; whatever was
    // active when we last ran is not active now.
    match production_store.mark_all_inactive() {
        Ok(0) => {}
        Ok(count) => log::info!("Marked {count} productions inactive after restart"),
        Err(e) => log::warn!("Failed to reset production active flags: {e}"),
    }

    let live_client = Arc::new(LiveApiClient::new(live_url, live_token));
    let stream_manager = Arc::new(StreamLifecycleManager::new(live_client.clone()));
    let workflow = Arc::new(ProductionWorkflow::new(live_client.clone()));
    let mutation_guard = Arc::new(MutationGuard::new());

    let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(
        NonZeroU32::new(DEFAULT_RATE_LIMIT_PER_MINUTE).unwrap(),
    )));

    let state = AppState {
        production_store,
        layout_store,
        settings_manager,
        live_client,
        stream_manager,
        workflow,
        mutation_guard,
        event_bus,
        log_dir: log_dir_path,
        auth_token,
        rate_limiter,
    };

    let cors = build_cors_layer();

    // Protected routes (require authentication)
    let protected_routes = Router::new()
        .route("/ws", get(ws_handler))
        // Productions
        .route("/api/productions", get(list_productions).post(create_production))
        .route(
            "/api/productions/:id",
            get(get_production).put(put_production).delete(delete_production),
        )
        .route("/api/productions/:id/start", post(start_production))
        .route("/api/productions/:id/stop", post(stop_production))
        // Sources
        .route("/api/productions/:id/sources", post(add_source))
        .route(
            "/api/productions/:id/sources/:source_id",
            put(update_source).delete(remove_source),
        )
        .route(
            "/api/productions/:id/sources/:source_id/restart",
            post(restart_source),
        )
        .route(
            "/api/productions/:id/pipelines/:pipeline_id/sources/:source_id/settings",
            put(put_source_settings),
        )
        // Multiviews
        .route("/api/productions/:id/multiviews", put(put_multiviews))
        // Layout templates
        .route("/api/layouts", get(list_layouts).post(create_layout))
        .route("/api/productions/:id/layouts", get(list_production_layouts))
        .route(
            "/api/productions/:id/layouts/:layout_id",
            delete(delete_layout),
        )
        // Diagnostics
        .route("/api/live/health", get(live_health))
        .route("/api/logs/recent", get(recent_logs))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/auth/login", post(auth_login))
        .route("/auth/logout", post(auth_logout))
        .route("/auth/check", get(auth_check));

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(CookieManagerLayer::new())
        .layer(cors);

    let address = SocketAddr::new(parse_host(&host), port);
    log::info!("Crossview backend listening on http://{address}");
    if state.auth_token.is_some() {
        log::info!("  Authentication: enabled");
    } else {
        log::info!("  Authentication: disabled (no token configured)");
    }

    let listener = tokio::net::TcpListener::bind(address).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
