//! HTTP gateway for index builds and index reads.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version, never requires auth) |
//! | `GET`  | `/rag/index` | The stored index payload as `application/json` |
//! | `POST` | `/rag/index-seed` | Rebuild the index from the seed area |
//! | `POST` | `/rag/upload` | Rebuild the index from uploaded `files` parts |
//! | `OPTIONS` | any | `204 No Content` with CORS headers |
//!
//! # Error Contract
//!
//! Errors render as `{"error": "<code>"}`; 5xx responses add a `"message"`.
//!
//! Codes: `unauthorized` (401), `no_files` (400), `invalid_multipart` (400),
//! `not_found` (404), `index_not_found` (404), `index_failed` (500),
//! `storage_error` (500).
//!
//! # Auth
//!
//! When a bearer token is configured, every request except `GET /health`
//! must carry `Authorization: Bearer <token>`. The check runs before routing,
//! so unknown routes and `OPTIONS` requests are rejected with 401 as well.
//!
//! # CORS
//!
//! Every response carries permissive CORS headers, including errors.

use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::indexer::{IndexError, Indexer};
use crate::models::{IndexReport, SourceDocument};
use crate::store::{open_backend, StoreError};

/// Multipart field name carrying uploaded documents.
const FILES_FIELD: &str = "files";

#[derive(Clone)]
struct AppState {
    indexer: Arc<Indexer>,
    auth_token: Option<Arc<str>>,
}

/// Starts the gateway on `[server].bind` and serves until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let backend = open_backend(config).await?;
    let indexer = Arc::new(Indexer::new(config, backend));
    let app = router(config, indexer);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(
        bind = %config.server.bind,
        auth = config.auth_token().is_some(),
        "gateway listening"
    );
    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the gateway router around an indexer.
pub fn router(config: &Config, indexer: Arc<Indexer>) -> Router {
    let state = AppState {
        indexer,
        auth_token: config.auth_token().map(Arc::from),
    };

    Router::new()
        .route("/health", get(handle_health))
        .route("/rag/index", get(handle_get_index))
        .route("/rag/index-seed", post(handle_seed))
        .route(
            "/rag/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(config.server.max_upload_bytes)),
        )
        .fallback(handle_not_found)
        .method_not_allowed_fallback(handle_not_found)
        .layer(middleware::from_fn(answer_preflight))
        .layer(middleware::from_fn_with_state(state.clone(), require_bearer))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, OPTIONS"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("authorization, content-type"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============ Middleware ============

async fn require_bearer(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(token) = state.auth_token.as_deref() else {
        return next.run(req).await;
    };
    if req.method() == Method::GET && req.uri().path() == "/health" {
        return next.run(req).await;
    }

    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|presented| presented == token);

    if authorized {
        next.run(req).await
    } else {
        ApiError::Unauthorized.into_response()
    }
}

async fn answer_preflight(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    next.run(req).await
}

// ============ Error response ============

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    NoFiles,
    InvalidMultipart(String),
    NotFound,
    IndexNotFound,
    IndexFailed(String),
    Storage(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NoFiles | ApiError::InvalidMultipart(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound | ApiError::IndexNotFound => StatusCode::NOT_FOUND,
            ApiError::IndexFailed(_) | ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::NoFiles => "no_files",
            ApiError::InvalidMultipart(_) => "invalid_multipart",
            ApiError::NotFound => "not_found",
            ApiError::IndexNotFound => "index_not_found",
            ApiError::IndexFailed(_) => "index_failed",
            ApiError::Storage(_) => "storage_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = match self {
            ApiError::IndexFailed(message) | ApiError::Storage(message) => {
                tracing::error!(code, %message, "request failed");
                Some(message)
            }
            ApiError::InvalidMultipart(message) => {
                tracing::debug!(%message, "rejected multipart body");
                None
            }
            _ => None,
        };
        (
            status,
            Json(ErrorBody {
                error: code,
                message,
            }),
        )
            .into_response()
    }
}

impl From<IndexError> for ApiError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::NoFiles => ApiError::NoFiles,
            IndexError::Extract { .. } | IndexError::Task(_) => {
                ApiError::IndexFailed(err.to_string())
            }
            IndexError::Store(e) => e.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Storage(err.to_string())
    }
}

async fn handle_not_found() -> ApiError {
    ApiError::NotFound
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ GET /rag/index ============

/// Serves the stored payload verbatim; it is not re-parsed.
async fn handle_get_index(State(state): State<AppState>) -> Result<Response, ApiError> {
    let payload = state
        .indexer
        .read_index()
        .await?
        .ok_or(ApiError::IndexNotFound)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], payload).into_response())
}

// ============ POST /rag/index-seed ============

async fn handle_seed(State(state): State<AppState>) -> Result<Json<IndexReport>, ApiError> {
    Ok(Json(state.indexer.seed().await?))
}

// ============ POST /rag/upload ============

/// Collects every `files` part with a non-empty file name, then rebuilds
/// the index from them. Other parts are ignored.
async fn handle_upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<IndexReport>, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::InvalidMultipart(e.body_text()))?;

    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidMultipart(e.body_text()))?
    {
        if field.name() != Some(FILES_FIELD) {
            continue;
        }
        let name = match field.file_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => continue,
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::InvalidMultipart(e.body_text()))?;
        files.push(SourceDocument::new(name, bytes.to_vec()));
    }

    if files.is_empty() {
        return Err(ApiError::NoFiles);
    }
    tracing::info!(files = files.len(), "upload received");
    Ok(Json(state.indexer.upload(files).await?))
}
