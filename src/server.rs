use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{any, post};
use axum::{Json, Router};
use redis::aio::MultiplexedConnection;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::catalog::{self, CatalogConfig, KeyPage, PageRequest, MATCH_ALL};
use crate::connection::ConnectionDescriptor;
use crate::error::LensError;
use crate::inspect::{self, BulkDeleteReport, KeyDetails};

/// Shared, read-only state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub catalog: CatalogConfig,
    pub static_dir: PathBuf,
}

// -- Request bodies --
// The UI sends the connection fields inline with each request's own fields.

#[derive(Debug, Deserialize)]
pub struct KeysRequest {
    #[serde(flatten)]
    pub connection: ConnectionDescriptor,

    #[serde(default = "default_pattern")]
    pub pattern: String,

    #[serde(flatten)]
    pub page: PageRequest,
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    #[serde(flatten)]
    pub connection: ConnectionDescriptor,

    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    #[serde(flatten)]
    pub connection: ConnectionDescriptor,

    #[serde(default)]
    pub keys: Vec<String>,
}

fn default_pattern() -> String {
    MATCH_ALL.to_string()
}

type ApiResult<T> = Result<Json<T>, LensError>;

impl AppState {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<MultiplexedConnection, LensError> {
        descriptor.open(self.catalog.connect_timeout).await
    }
}

// -- Handlers --

async fn ping(
    State(state): State<Arc<AppState>>,
    Json(descriptor): Json<ConnectionDescriptor>,
) -> ApiResult<serde_json::Value> {
    state.connect(&descriptor).await?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "message": "Connected to Redis server",
    })))
}

async fn info(
    State(state): State<Arc<AppState>>,
    Json(descriptor): Json<ConnectionDescriptor>,
) -> ApiResult<serde_json::Value> {
    let mut conn = state.connect(&descriptor).await?;
    let info = inspect::server_info(&mut conn).await.map_err(|e| {
        tracing::error!(error = %e, "Error fetching Redis info");
        e
    })?;
    Ok(Json(serde_json::json!({ "info": info })))
}

async fn stats(
    State(state): State<Arc<AppState>>,
    Json(descriptor): Json<ConnectionDescriptor>,
) -> ApiResult<serde_json::Value> {
    let mut conn = state.connect(&descriptor).await?;
    Ok(Json(inspect::server_stats(&mut conn).await?))
}

async fn keys(
    State(state): State<Arc<AppState>>,
    Json(req): Json<KeysRequest>,
) -> ApiResult<KeyPage> {
    let pattern = if req.pattern.is_empty() { MATCH_ALL } else { req.pattern.as_str() };
    if pattern.contains('\0') {
        return Err(LensError::InvalidRequest(
            "Pattern must not contain null bytes".to_string(),
        ));
    }

    let page = catalog::get_keys_page(&req.connection, pattern, req.page, &state.catalog).await?;
    tracing::debug!(pattern, total = page.total, page = page.page, "Listed keys");
    Ok(Json(page))
}

async fn key_details(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(descriptor): Json<ConnectionDescriptor>,
) -> ApiResult<KeyDetails> {
    let mut conn = state.connect(&descriptor).await?;
    Ok(Json(inspect::key_details(&mut conn, &key).await?))
}

async fn delete_key(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(descriptor): Json<ConnectionDescriptor>,
) -> ApiResult<serde_json::Value> {
    let mut conn = state.connect(&descriptor).await?;
    inspect::delete_key(&mut conn, &key).await?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "message": format!("Successfully deleted key: {}", key),
    })))
}

async fn delete_keys(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BulkDeleteRequest>,
) -> ApiResult<BulkDeleteReport> {
    if req.keys.is_empty() {
        return Err(LensError::InvalidRequest("No keys provided".to_string()));
    }
    let mut conn = state.connect(&req.connection).await?;
    Ok(Json(inspect::delete_keys(&mut conn, &req.keys).await?))
}

async fn execute(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CommandRequest>,
) -> ApiResult<serde_json::Value> {
    if req.command.trim().is_empty() {
        return Err(LensError::InvalidRequest("Empty command".to_string()));
    }
    let mut conn = state.connect(&req.connection).await?;
    let result = inspect::execute(&mut conn, &req.command, &req.args).await?;
    Ok(Json(serde_json::json!({ "result": result })))
}

async fn unknown_api() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "detail": "API endpoint not found" })),
    )
}

/// Build the full application: JSON API under `/api`, and the UI bundle for
/// every other path, with unknown paths falling back to `index.html` so the
/// client-side router can take over. Any `/api` request that matches no
/// handler, by path or by method, gets the JSON 404.
pub fn router(state: AppState) -> Router {
    let index = state.static_dir.join("index.html");
    let assets = ServeDir::new(&state.static_dir).fallback(ServeFile::new(index));

    Router::new()
        .route("/api/ping", post(ping).fallback(unknown_api))
        .route("/api/info", post(info).fallback(unknown_api))
        .route("/api/stats", post(stats).fallback(unknown_api))
        .route("/api/keys", post(keys).fallback(unknown_api))
        .route("/api/keys/delete", post(delete_keys).fallback(unknown_api))
        .route(
            "/api/key/{key}",
            post(key_details).delete(delete_key).fallback(unknown_api),
        )
        .route("/api/execute", post(execute).fallback(unknown_api))
        .route("/api/{*rest}", any(unknown_api))
        .fallback_service(assets)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}
