use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use narration_core::{Narrator, PlaybackHandle, RenderOutcome, RenderSnapshot};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::validation::validate_render_request;

/// Request bodies are card snapshots; anything bigger than this is junk.
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub narrator: Arc<Narrator>,
    pub current: Arc<Mutex<Option<PlaybackHandle>>>,
    pub request_count: Arc<AtomicU64>,
    pub started_at: DateTime<Utc>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(narrator: Arc<Narrator>, config: ServerConfig) -> Self {
        Self {
            narrator,
            current: Arc::new(Mutex::new(None)),
            request_count: Arc::new(AtomicU64::new(0)),
            started_at: Utc::now(),
            config,
        }
    }

    fn current_handle(&self) -> Option<PlaybackHandle> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_current(&self, handle: PlaybackHandle) {
        *self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }
}

#[derive(Serialize)]
pub struct RenderResponse {
    transition: Option<&'static str>,
    outcome: &'static str,
    autoplayed: bool,
    cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

#[derive(Serialize)]
pub struct PlaybackResponse {
    status: &'static str,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
pub struct StatusResponse {
    uptime_seconds: u64,
    renders_handled: u64,
    cache_entries: usize,
    active_side: Option<&'static str>,
    audio_active: bool,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn status_endpoint(State(state): State<AppState>) -> Json<StatusResponse> {
    let uptime_seconds = (Utc::now() - state.started_at).num_seconds().max(0) as u64;
    Json(StatusResponse {
        uptime_seconds,
        renders_handled: state.request_count.load(Ordering::Relaxed),
        cache_entries: state.narrator.cache_entries(),
        active_side: state.narrator.active_side().map(|side| side.as_str()),
        audio_active: state.narrator.has_active_audio(),
    })
}

pub async fn render_endpoint(
    State(state): State<AppState>,
    Json(req): Json<RenderSnapshot>,
) -> Result<Json<RenderResponse>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    validate_render_request(&req, state.config.max_text_length)?;

    let outcome = state.narrator.handle_render(&req).await;
    debug!("render outcome: {:?}", outcome);

    let response = match outcome {
        RenderOutcome::NoSpeech => RenderResponse {
            transition: None,
            outcome: "skipped",
            autoplayed: false,
            cached: false,
            detail: Some("card has no speakable text".to_string()),
        },
        RenderOutcome::Unchanged => RenderResponse {
            transition: Some("unchanged"),
            outcome: "skipped",
            autoplayed: false,
            cached: false,
            detail: None,
        },
        RenderOutcome::Ready {
            handle,
            transition,
            autoplayed,
            cached,
        } => {
            state.set_current(handle);
            RenderResponse {
                transition: Some(transition.as_str()),
                outcome: "ready",
                autoplayed,
                cached,
                detail: None,
            }
        }
        RenderOutcome::Superseded { transition } => RenderResponse {
            transition: Some(transition.as_str()),
            outcome: "superseded",
            autoplayed: false,
            cached: false,
            detail: None,
        },
        RenderOutcome::Failed { transition, error } => RenderResponse {
            transition: Some(transition.as_str()),
            outcome: "failed",
            autoplayed: false,
            cached: false,
            detail: Some(error.to_string()),
        },
    };

    Ok(Json(response))
}

pub async fn play_endpoint(
    State(state): State<AppState>,
) -> Result<Json<PlaybackResponse>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);

    let handle = state.current_handle().ok_or(ApiError::NoActiveNarration)?;
    match state.narrator.play(&handle) {
        Ok(()) => Ok(Json(PlaybackResponse { status: "playing" })),
        Err(e) if e.is_cancelled() => Err(ApiError::StaleNarration),
        Err(e) => Err(ApiError::Narration(e)),
    }
}

pub async fn stop_endpoint(
    State(state): State<AppState>,
) -> Result<Json<PlaybackResponse>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);

    match state.current_handle() {
        Some(handle) => {
            state.narrator.stop(&handle);
            Ok(Json(PlaybackResponse { status: "stopped" }))
        }
        None => Ok(Json(PlaybackResponse { status: "idle" })),
    }
}

pub fn build_router(state: AppState) -> Router {
    // CORS configuration - environment-aware
    let cors = if let Some(ref allowed_origins) = state.config.cors_allowed_origins {
        // Production: Use specific origins from environment
        let origins: Vec<axum::http::HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin: &String| origin.parse::<axum::http::HeaderValue>().ok())
            .collect();

        if origins.is_empty() {
            warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(tower_http::cors::Any)
                .allow_credentials(false)
        } else {
            info!("CORS configured for {} origin(s)", origins.len());
            CorsLayer::new()
                .allow_origin(tower_http::cors::AllowOrigin::list(origins))
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(tower_http::cors::Any)
                .allow_credentials(false)
        }
    } else {
        // Development: Allow all origins (with warning)
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers(tower_http::cors::Any)
            .allow_credentials(false)
    };

    // Request ID middleware for tracing
    async fn add_request_id(mut request: Request, next: Next) -> Response {
        let request_id = uuid::Uuid::new_v4().to_string();
        request.headers_mut().insert(
            "x-request-id",
            axum::http::HeaderValue::from_str(&request_id).unwrap(),
        );
        let mut response = next.run(request).await;
        response.headers_mut().insert(
            "x-request-id",
            axum::http::HeaderValue::from_str(&request_id).unwrap(),
        );
        response
    }

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
        .into_inner();

    let api = Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/status", get(status_endpoint))
        .route("/render", post(render_endpoint))
        .route("/play", post(play_endpoint))
        .route("/stop", post(stop_endpoint));

    Router::new()
        .merge(api.clone()) // root paths
        .nest("/api", api) // /api prefix
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack)
        .with_state(state)
}
