//! HTTP front end for the pull cache
//!
//! `/health` reports counters; every other path is a cache request.

use crate::error::AppError;
use crate::types::HealthResponse;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use origin_pull_cache::{PullCache, RequestDescriptor, ResponseBody, ServedResponse};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

/// Shared state for the HTTP server
pub struct ServerState {
    pub cache: PullCache,
    pub path_prefix: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(cache: PullCache, path_prefix: Option<String>) -> Self {
        Self {
            cache,
            path_prefix,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health).layer(CorsLayer::permissive()))
        .fallback(serve_cached)
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds() as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache: state.cache.stats(),
    })
}

/// Serve any other path through the cache, regardless of method
async fn serve_cached(State(state): State<SharedState>, uri: Uri, headers: HeaderMap) -> Response {
    let raw_uri = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let if_modified_since = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let request = match RequestDescriptor::parse(raw_uri, state.path_prefix.as_deref()) {
        Ok(request) => request.with_if_modified_since(if_modified_since),
        Err(e) => return AppError(e).into_response(),
    };

    match state.cache.serve(&request).await {
        Ok(served) => {
            debug!(
                uri = %request.request_uri,
                status = served.status,
                cache = served.cache_status.as_str(),
                "Served"
            );
            into_http_response(served)
        }
        Err(e) => AppError(e).into_response(),
    }
}

fn into_http_response(served: ServedResponse) -> Response {
    let mut builder = Response::builder().status(served.status);
    for (name, value) in &served.headers {
        builder = builder.header(*name, value.as_str());
    }

    let body = match served.body {
        ResponseBody::Empty => Body::empty(),
        ResponseBody::File { file, .. } => Body::from_stream(ReaderStream::new(file)),
    };

    builder.body(body).unwrap_or_else(|e| {
        error!(error = %e, "Failed to build response");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}
