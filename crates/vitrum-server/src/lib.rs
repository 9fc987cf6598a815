//! Vitrum Server library
//!
//! Re-exports the HTTP surface modules for use by the binary and
//! integration tests.

use std::sync::Arc;
use std::time::Instant;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use parking_lot::RwLock;
use tower_http::cors::{Any, CorsLayer};

use vitrum::federation::PeerClient;
use vitrum::{Config, DocumentIndex, LiveReloadBus, PeerRegistry, SyncService};

pub mod api;
pub mod federation;
pub mod projects;
pub mod ws;

/// Shared application state
pub struct AppState {
    /// Engine configuration
    pub config: Config,
    /// The document index; the watcher task is the only writer
    pub index: Arc<RwLock<DocumentIndex>>,
    /// Live-reload event bus
    pub bus: LiveReloadBus,
    /// Peer liveness registry
    pub registry: Arc<PeerRegistry>,
    /// Sync service for adopted documents
    pub sync: Arc<SyncService>,
    /// Outbound peer client for fan-out queries
    pub client: PeerClient,
    /// Process start, for uptime reporting
    pub start_time: Instant,
    /// When the index was last (re)built
    pub last_indexed: RwLock<chrono::DateTime<chrono::Utc>>,
}

impl AppState {
    /// Seconds since the server started
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Build the full application router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(api::health))
        .route("/api/status", get(api::status))
        .route("/api/status/reindex", post(api::reindex))
        .route("/api/files", get(api::list_files))
        .route("/api/files/{*path}", get(api::get_file).put(api::put_file))
        .route("/api/search", get(api::search))
        .route("/api/graph", get(api::graph))
        .route("/api/graph/neighbors/{*path}", get(api::neighbors))
        .route("/api/projects", get(projects::list_projects))
        .route("/api/projects/{name}/tree", get(projects::get_tree))
        .route(
            "/api/projects/{name}/file/{*path}",
            get(projects::get_file).put(projects::put_file),
        )
        .route("/ws", get(ws::ws_handler))
        .nest("/api/federation", federation::router())
        .layer(cors)
        .with_state(state)
}

/// Map an engine error to an HTTP response pair.
///
/// Follows the engine's error taxonomy: peer-offline shares 404 with
/// not-found, exceeded budgets answer 504, upstream peer errors pass their
/// status through, everything unexpected is an opaque 500.
#[must_use]
pub fn error_response(err: &vitrum::Error) -> (StatusCode, String) {
    use vitrum::Error;
    match err {
        Error::BadRequest(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        Error::NotFound(_) | Error::PeerOffline(_) => (StatusCode::NOT_FOUND, err.to_string()),
        Error::Forbidden(_) => (StatusCode::FORBIDDEN, err.to_string()),
        Error::PeerTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, err.to_string()),
        Error::PeerUpstream { status, .. } => (
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
            err.to_string(),
        ),
        Error::Parse(_) | Error::Storage(_) | Error::Config(_) | Error::Internal(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
        }
    }
}
