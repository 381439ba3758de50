//! `ak_web` - HTTP surface for anketa
//!
//! This crate provides:
//! - axum-based HTTP server
//! - Submission endpoint writing to the local store and the Sheets mirror
//! - Results, health and diagnostic endpoints
//! - Static file serving for the questionnaire front end

use axum::{
    Router,
    extract::{DefaultBodyLimit, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderValue, Method};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use ak_config::{AkConfig, WebConfig};
use ak_sheets::{AnswerLabels, Mirror, SheetsSession};
use ak_store::{AkStore, AnswerRecord, NewAnswer, batch_timestamp};

pub mod assets;
pub mod submit;

#[cfg(test)]
mod test_support;

pub use assets::StaticAssets;
pub use submit::{Submission, SubmitResponse, ValidationError};

/// How long browsers may cache a CORS preflight answer
const CORS_MAX_AGE_SECS: u64 = 3600;

/// Web server errors
#[derive(Error, Debug)]
pub enum WebError {
    #[error("Invalid submission: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Request too large: {0}")]
    PayloadTooLarge(String),

    #[error("Store error: {0}")]
    StoreError(#[from] ak_store::StoreError),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Server error: {0}")]
    ServerError(String),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            WebError::ValidationError(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            WebError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            WebError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            WebError::MethodNotAllowed(msg) => (StatusCode::METHOD_NOT_ALLOWED, msg.clone()),
            WebError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg.clone()),
            WebError::StoreError(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to save answers, please retry: {e}"),
            ),
            WebError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            WebError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16()
        });

        (status, Json(body)).into_response()
    }
}

/// Shared application state
pub struct AppState {
    /// Authoritative answer store
    pub store: AkStore,
    /// Sheets session, for identity and health reporting
    pub sheets: Arc<SheetsSession>,
    /// Where submissions are mirrored; the session itself outside tests
    pub mirror: Arc<dyn Mirror>,
    /// Answer display labels applied to mirrored rows
    pub labels: AnswerLabels,
    /// Bearer token guarding `/submit` and `/results`
    pub api_token: Option<String>,
    /// Front-end bundle, if one was found
    pub assets: Option<StaticAssets>,
    pub max_upload_bytes: usize,
    /// Server start time for uptime calculation
    pub start_time: Instant,
}

impl AppState {
    pub fn new(store: AkStore, config: &AkConfig, sheets: Arc<SheetsSession>) -> Self {
        let mirror: Arc<dyn Mirror> = sheets.clone();
        Self {
            store,
            sheets,
            mirror,
            labels: AnswerLabels::new(config.sheets.answer_labels.clone()),
            api_token: config.web.api_token.clone(),
            assets: StaticAssets::discover(&config.web),
            max_upload_bytes: config.web.max_upload_bytes,
            start_time: Instant::now(),
        }
    }

    /// Open the configured store and build the Sheets session.
    ///
    /// # Errors
    /// Returns [`WebError`] if the store cannot be opened or the HTTP client cannot be built.
    pub fn from_config(config: &AkConfig) -> Result<Self, WebError> {
        let store = AkStore::open(&config.global.db_path)?;
        let sheets = SheetsSession::google(&config.sheets)
            .map_err(|e| WebError::ServerError(e.to_string()))?;
        Ok(Self::new(store, config, Arc::new(sheets)))
    }

    #[must_use]
    pub fn with_mirror(mut self, mirror: Arc<dyn Mirror>) -> Self {
        self.mirror = mirror;
        self
    }

    #[must_use]
    pub fn with_assets(mut self, assets: Option<StaticAssets>) -> Self {
        self.assets = assets;
        self
    }
}

pub struct WebServer {
    state: Arc<AppState>,
    config: WebConfig,
}

impl WebServer {
    pub fn new(state: AppState, config: WebConfig) -> Self {
        Self {
            state: Arc::new(state),
            config,
        }
    }

    pub fn router(&self) -> Router {
        let mut router = create_router(self.state.clone());
        if let Some(cors) = build_cors_layer(&self.config) {
            router = router.layer(cors);
        }
        router
    }

    pub async fn run(&self) -> Result<(), WebError> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|err| WebError::ServerError(err.to_string()))?;
        tracing::info!(
            %addr,
            db_path = %self.state.store.db_path(),
            static_dir = ?self.state.assets.as_ref().map(StaticAssets::root),
            "Starting anketa server"
        );
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|err| WebError::ServerError(err.to_string()))?;
        Ok(())
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Shutdown signal received");
    }
}

/// A stored answer as returned to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerView {
    pub username: String,
    pub question: String,
    pub answer: String,
    pub created_at: String,
}

impl From<NewAnswer> for AnswerView {
    fn from(answer: NewAnswer) -> Self {
        Self {
            username: answer.username,
            question: answer.question,
            answer: answer.answer,
            created_at: answer.created_at,
        }
    }
}

impl From<AnswerRecord> for AnswerView {
    fn from(record: AnswerRecord) -> Self {
        Self {
            username: record.username,
            question: record.question,
            answer: record.answer,
            created_at: record.created_at,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub db_path: String,
    pub sheet_id: String,
    pub sheet_tab: String,
    pub sheets_state: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResultsResponse {
    pub results: Vec<AnswerView>,
}

/// Outcome of a diagnostic append
#[derive(Debug, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub ok: bool,
    pub worksheet: Option<String>,
    pub rows_appended: usize,
    pub error: Option<String>,
}

/// Cross-origin access for a front end hosted apart from this server.
///
/// Only the verbs and headers the questionnaire client sends are allowed. When
/// every configured origin is invalid, cross-origin access stays off.
fn build_cors_layer(config: &WebConfig) -> Option<CorsLayer> {
    if !config.cors_enabled {
        return None;
    }

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .max_age(Duration::from_secs(CORS_MAX_AGE_SECS));

    if config.cors_origins.iter().any(|origin| origin.trim() == "*") {
        return Some(layer.allow_origin(Any));
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| {
            HeaderValue::from_str(origin.trim())
                .inspect_err(|_| warn!(origin = %origin, "Invalid CORS origin; skipping"))
                .ok()
        })
        .collect();

    if origins.is_empty() {
        warn!("No usable CORS origins; cross-origin requests will be refused");
        return None;
    }
    Some(layer.allow_origin(AllowOrigin::list(origins)))
}

/// Reject requests whose bearer token differs from the configured one
async fn require_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, WebError> {
    let Some(expected) = state.api_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == expected => Ok(next.run(request).await),
        Some(_) => Err(WebError::Unauthorized("invalid bearer token".to_string())),
        None => Err(WebError::Unauthorized("missing bearer token".to_string())),
    }
}

/// Create the router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/submit", post(submit::submit_handler))
        .route("/results", get(results_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/healthz", get(health_handler))
        .route("/whoami", get(whoami_handler))
        .route("/debug/google", post(debug_google_handler))
        .merge(protected)
        .fallback(assets::static_handler)
        // Middleware
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let healthy = match state.store.ping() {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "Health check: store unreachable");
            false
        }
    };

    let body = HealthResponse {
        status: if healthy { "ok" } else { "fail" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        db_path: state.store.db_path().to_string(),
        sheet_id: state.sheets.spreadsheet_id().to_string(),
        sheet_tab: state.sheets.tab().to_string(),
        sheets_state: state.sheets.state_name().to_string(),
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

/// All stored answers, newest batch first
async fn results_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ResultsResponse>, WebError> {
    let results = state
        .store
        .list_all()?
        .into_iter()
        .map(AnswerView::from)
        .collect();
    Ok(Json(ResultsResponse { results }))
}

/// Service-account identity to share the spreadsheet with
async fn whoami_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, WebError> {
    let principal = state
        .sheets
        .principal()
        .map_err(|e| WebError::Unavailable(e.to_string()))?;
    Ok(Json(serde_json::json!({ "principal": principal })))
}

/// Append a diagnostic row to the mirror and report what happened
async fn debug_google_handler(State(state): State<Arc<AppState>>) -> Json<ProbeResponse> {
    let response = match ak_sheets::probe(state.mirror.as_ref(), &batch_timestamp()).await {
        Ok(outcome) => ProbeResponse {
            ok: true,
            worksheet: Some(outcome.worksheet),
            rows_appended: outcome.rows_appended,
            error: None,
        },
        Err(err) => {
            warn!(error = %err, "Sheets probe failed");
            ProbeResponse {
                ok: false,
                worksheet: None,
                rows_appended: 0,
                error: Some(err.to_string()),
            }
        }
    };
    Json(response)
}
