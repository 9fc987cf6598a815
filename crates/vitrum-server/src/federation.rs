//! Federation routes.
//!
//! Two families share this router: *peer-facing* endpoints answered from the
//! local index and restricted to shared subtrees (`hello`, `search`, `files`,
//! `receive`, `shared/respond`), and *client-facing* endpoints that fan out
//! to or proxy through other peers (`cross-search`, `cross-files`,
//! `cross-file`, `adopt`, `send`) plus the shared-document management
//! surface (`shared`, `shared/diff`, `shared/resolve`).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

use vitrum::federation::{
    self, CrossSearchResponse, ChecksumResponse, PeerDocumentResponse, ReceivePayload,
    RespondPayload, SearchFilters, SearchItem,
};
use vitrum::frontmatter;
use vitrum::peers::{PeerHelloResponse, PeerHelloStats, PeerLiveStatus};
use vitrum::sync::{AdoptionRequest, ResolveAction, SharedDocument};

use crate::{error_response, AppState};

/// Default result limit for search endpoints
const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Build the federation sub-router
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/hello", get(hello))
        .route("/peers", get(peers))
        .route("/search", get(search))
        .route("/files", get(list_files))
        .route("/files/{*path}", get(get_file))
        .route("/cross-search", get(cross_search))
        .route("/cross-files", get(cross_files))
        .route("/cross-file/{*path}", get(cross_file))
        .route("/adopt", post(adopt))
        .route("/send", post(send))
        .route("/receive", post(receive))
        .route("/shared", get(shared))
        .route("/shared/diff", get(shared_diff))
        .route("/shared/resolve", post(shared_resolve))
        .route("/shared/respond", post(shared_respond))
}

// --- Peer-facing handlers ---

/// Identity probe answered by every live instance
pub async fn hello(State(state): State<Arc<AppState>>) -> Json<PeerHelloResponse> {
    let self_config = state.registry.self_config();
    let (document_count, knowledge_count, task_count) = {
        let index = state.index.read();
        let mut knowledge = 0;
        let mut tasks = 0;
        for doc in index.documents() {
            match doc.doc_type.as_str() {
                "knowledge" => knowledge += 1,
                "task" => tasks += 1,
                _ => {}
            }
        }
        (index.len(), knowledge, tasks)
    };

    Json(PeerHelloResponse {
        instance_id: self_config.instance_id,
        display_name: self_config.display_name,
        api_version: "1".to_string(),
        shared_folders: self_config.shared_folders,
        shared_tags: self_config.shared_tags,
        stats: PeerHelloStats {
            document_count,
            knowledge_count,
            task_count,
        },
        online: true,
        uptime: state.uptime_secs(),
    })
}

#[derive(Serialize)]
pub struct PeersResponse {
    #[serde(rename = "self")]
    self_info: PeersSelfInfo,
    peers: Vec<PeerLiveStatus>,
}

#[derive(Serialize)]
pub struct PeersSelfInfo {
    #[serde(rename = "instanceId")]
    instance_id: String,
    #[serde(rename = "displayName")]
    display_name: String,
    host: String,
    port: u16,
}

/// This instance's identity plus the live peer table
pub async fn peers(State(state): State<Arc<AppState>>) -> Json<PeersResponse> {
    let self_config = state.registry.self_config();
    Json(PeersResponse {
        self_info: PeersSelfInfo {
            instance_id: self_config.instance_id,
            display_name: self_config.display_name,
            host: state.config.host.clone(),
            port: state.config.port,
        },
        peers: state.registry.peer_status(),
    })
}

#[derive(Deserialize)]
pub struct SearchParams {
    q: Option<String>,
    #[serde(rename = "type")]
    doc_type: Option<String>,
    tag: Option<String>,
    limit: Option<usize>,
}

#[derive(Serialize)]
pub struct PeerSearchAnswer {
    #[serde(rename = "instanceId")]
    instance_id: String,
    #[serde(rename = "displayName")]
    display_name: String,
    query: String,
    count: usize,
    items: Vec<SearchItem>,
}

/// Peer-facing search, restricted to shared subtrees
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<PeerSearchAnswer>, (StatusCode, String)> {
    let q = params.q.as_deref().unwrap_or("").trim().to_string();
    if q.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "missing query parameter q".to_string()));
    }
    let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    let self_config = state.registry.self_config();

    let items: Vec<SearchItem> = {
        let index = state.index.read();
        index
            .search(&q, params.doc_type.as_deref(), params.tag.as_deref(), usize::MAX)
            .into_iter()
            .filter(|hit| self_config.is_shared(&hit.document.path))
            .take(limit)
            .map(|hit| SearchItem {
                path: hit.document.path.clone(),
                title: hit.document.title.clone(),
                doc_type: hit.document.doc_type.clone(),
                tags: hit.document.tags.clone(),
                score: hit.score,
                snippet: federation::extract_snippet(&hit.document.content, &q, 100),
            })
            .collect()
    };

    Ok(Json(PeerSearchAnswer {
        instance_id: self_config.instance_id,
        display_name: self_config.display_name,
        query: q,
        count: items.len(),
        items,
    }))
}

#[derive(Deserialize)]
pub struct FilesParams {
    folder: Option<String>,
    tag: Option<String>,
}

#[derive(Serialize)]
pub struct FilesAnswer {
    #[serde(rename = "instanceId")]
    instance_id: String,
    #[serde(rename = "displayName")]
    display_name: String,
    count: usize,
    items: Vec<FileListItem>,
}

#[derive(Serialize)]
pub struct FileListItem {
    path: String,
    title: String,
    #[serde(rename = "type")]
    doc_type: String,
    tags: Vec<String>,
    created: Option<String>,
    updated: Option<String>,
}

/// Peer-facing metadata listing, scoped to shared subtrees
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FilesParams>,
) -> Json<FilesAnswer> {
    let self_config = state.registry.self_config();

    let items: Vec<FileListItem> = {
        let index = state.index.read();
        index
            .documents()
            .filter(|d| self_config.is_shared(&d.path))
            .filter(|d| params.folder.as_ref().is_none_or(|f| d.path.starts_with(f.as_str())))
            .filter(|d| params.tag.as_ref().is_none_or(|t| d.tags.contains(t)))
            .map(|d| FileListItem {
                path: d.path.clone(),
                title: d.title.clone(),
                doc_type: d.doc_type.clone(),
                tags: d.tags.clone(),
                created: d.created.clone(),
                updated: d.updated.clone(),
            })
            .collect()
    };

    Json(FilesAnswer {
        instance_id: self_config.instance_id,
        display_name: self_config.display_name,
        count: items.len(),
        items,
    })
}

#[derive(Deserialize)]
pub struct SingleFileParams {
    #[serde(rename = "checksumOnly")]
    checksum_only: Option<String>,
}

/// Peer-facing document fetch: full content or checksum only.
///
/// Answers 403 for any path outside a shared subtree.
pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(params): Query<SingleFileParams>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let self_config = state.registry.self_config();
    if !self_config.is_shared(&path) {
        return Err((StatusCode::FORBIDDEN, format!("not a shared path: {path}")));
    }

    let doc = state
        .index
        .read()
        .get(&path)
        .cloned()
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("not found: {path}")))?;

    let raw = tokio::fs::read_to_string(state.config.resolve(&path))
        .await
        .map_err(|_| (StatusCode::NOT_FOUND, format!("not found: {path}")))?;
    let body = frontmatter::split(&raw).body.to_string();
    let checksum = frontmatter::checksum(&body);

    if params.checksum_only.as_deref() == Some("true") {
        let answer = ChecksumResponse {
            checksum,
            updated: doc.updated,
        };
        return Ok(Json(serde_json::to_value(answer).unwrap_or_default()));
    }

    let answer = PeerDocumentResponse {
        path: doc.path,
        title: doc.title,
        doc_type: doc.doc_type,
        tags: doc.tags,
        content: body,
        frontmatter: doc.frontmatter,
        created: doc.created,
        updated: doc.updated,
        links: doc.links,
        backlinks: doc.backlinks,
        checksum,
    };
    Ok(Json(serde_json::to_value(answer).unwrap_or_default()))
}

/// Accept a document pushed by a peer into the inbox
pub async fn receive(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ReceivePayload>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let inbox_path = state
        .sync
        .write_incoming_document(
            &payload.from,
            &payload.document.title,
            &payload.document.content,
            &payload.document.tags,
            &payload.document.source_path,
            payload.message.as_deref(),
        )
        .map_err(|e| error_response(&e))?;

    Ok(Json(serde_json::json!({
        "accepted": true,
        "inboxPath": inbox_path,
    })))
}

/// Accept an advisory response from a peer we adopted from or sent to.
///
/// A rejection with a comment lands as an inbox note; everything else is
/// acknowledged and dropped.
pub async fn shared_respond(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RespondPayload>,
) -> Json<serde_json::Value> {
    if payload.action == "rejected" {
        if let Some(comment) = payload.comment.as_deref().filter(|c| !c.is_empty()) {
            let title = format!("Federation: {} rejected your update", payload.from.display_name);
            let content = format!(
                "**Document**: {}\n**Action**: {}\n**Comment**: {}",
                payload.original_path, payload.action, comment
            );
            let tags = vec!["federation".to_string(), "resolution".to_string()];
            if let Err(e) = state.sync.write_incoming_document(
                &payload.from,
                &title,
                &content,
                &tags,
                &payload.original_path,
                Some(comment),
            ) {
                warn!(error = %e, "Failed to record federation response");
            }
        }
    }

    Json(serde_json::json!({ "accepted": true }))
}

// --- Client-facing handlers ---

/// Fan out a search to every online peer and merge the answers
pub async fn cross_search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<CrossSearchResponse>, (StatusCode, String)> {
    let q = params.q.as_deref().unwrap_or("").trim();
    if q.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "missing query parameter q".to_string()));
    }

    let response = federation::cross_search(
        &state.registry,
        &state.client,
        q,
        SearchFilters {
            doc_type: params.doc_type.as_deref(),
            tag: params.tag.as_deref(),
        },
        params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
    )
    .await;

    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct CrossFilesParams {
    peer: Option<String>,
    folder: Option<String>,
    tag: Option<String>,
}

/// Proxy a file listing request to one peer
pub async fn cross_files(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CrossFilesParams>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let peer = resolve_peer(&state, params.peer.as_deref())?;
    state
        .client
        .list_files(&peer, params.folder.as_deref(), params.tag.as_deref())
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

#[derive(Deserialize)]
pub struct CrossFileParams {
    peer: Option<String>,
    #[serde(rename = "checksumOnly")]
    checksum_only: Option<String>,
}

/// Proxy a document fetch to one peer
pub async fn cross_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(params): Query<CrossFileParams>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let peer = resolve_peer(&state, params.peer.as_deref())?;
    state
        .client
        .fetch_file_raw(&peer, &path, params.checksum_only.as_deref() == Some("true"))
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

#[derive(Deserialize)]
pub struct AdoptBody {
    #[serde(rename = "peerId")]
    peer_id: String,
    #[serde(rename = "peerHost")]
    peer_host: String,
    #[serde(rename = "sourcePath")]
    source_path: String,
    #[serde(rename = "targetPath")]
    target_path: Option<String>,
}

/// Adopt a peer's document into the local workspace
pub async fn adopt(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AdoptBody>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let peer = resolve_peer(&state, Some(&body.peer_host))?;

    let request = AdoptionRequest {
        peer_id: body.peer_id,
        peer_host: peer.host.clone(),
        peer_port: peer.port,
        peer_protocol: peer.protocol.clone(),
        peer_name: peer.effective_name().to_string(),
        source_path: body.source_path,
        target_path: body.target_path,
    };

    let outcome = state
        .sync
        .adopt_document(&request)
        .await
        .map_err(|e| error_response(&e))?;

    Ok(Json(serde_json::json!({
        "success": true,
        "localPath": outcome.local_path,
        "checksum": outcome.checksum,
    })))
}

#[derive(Deserialize)]
pub struct SendBody {
    #[serde(rename = "peerHost")]
    peer_host: String,
    #[serde(rename = "sourcePath")]
    source_path: String,
    message: Option<String>,
}

/// Push a local document to a peer
pub async fn send(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SendBody>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let sent_to = state
        .sync
        .send_document(&body.peer_host, &body.source_path, body.message.as_deref())
        .await
        .map_err(|e| error_response(&e))?;

    Ok(Json(serde_json::json!({
        "success": true,
        "sentTo": sent_to,
    })))
}

#[derive(Serialize)]
pub struct SharedResponse {
    count: usize,
    items: Vec<SharedDocument>,
}

/// List every adopted document with its federation block
pub async fn shared(State(state): State<Arc<AppState>>) -> Json<SharedResponse> {
    let items = state.sync.shared_documents();
    Json(SharedResponse {
        count: items.len(),
        items,
    })
}

#[derive(Deserialize)]
pub struct DiffParams {
    path: Option<String>,
}

/// Both sides of a conflict for a merge UI
pub async fn shared_diff(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DiffParams>,
) -> Result<Json<vitrum::sync::ConflictDiff>, (StatusCode, String)> {
    let path = params
        .path
        .as_deref()
        .ok_or((StatusCode::BAD_REQUEST, "missing query parameter path".to_string()))?;

    state
        .sync
        .conflict_diff(path)
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

#[derive(Deserialize)]
pub struct ResolveBody {
    path: Option<String>,
    action: Option<String>,
    #[serde(rename = "mergedContent")]
    merged_content: Option<String>,
    comment: Option<String>,
}

/// Resolve a sync conflict
pub async fn shared_resolve(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ResolveBody>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let path = body
        .path
        .as_deref()
        .ok_or((StatusCode::BAD_REQUEST, "missing field path".to_string()))?;
    let action_str = body
        .action
        .as_deref()
        .ok_or((StatusCode::BAD_REQUEST, "missing field action".to_string()))?;
    let action: ResolveAction =
        serde_json::from_value(serde_json::Value::String(action_str.to_string()))
            .map_err(|_| (StatusCode::BAD_REQUEST, format!("invalid action: {action_str}")))?;

    if action == ResolveAction::Merge && body.merged_content.is_none() {
        return Err((StatusCode::BAD_REQUEST, "merge requires mergedContent".to_string()));
    }

    state
        .sync
        .resolve(path, action, body.merged_content.as_deref(), body.comment.as_deref())
        .await
        .map_err(|e| error_response(&e))?;

    Ok(Json(serde_json::json!({
        "success": true,
        "path": path,
        "action": action_str,
    })))
}

/// Resolve a `host:port` query parameter to an online peer.
fn resolve_peer(
    state: &AppState,
    peer_host: Option<&str>,
) -> Result<PeerLiveStatus, (StatusCode, String)> {
    let peer_host = peer_host
        .ok_or((StatusCode::BAD_REQUEST, "missing peer parameter".to_string()))?;
    let (host, port) = match peer_host.split_once(':') {
        Some((h, p)) => (h, p.parse().unwrap_or(vitrum::DEFAULT_PORT)),
        None => (peer_host, vitrum::DEFAULT_PORT),
    };
    state
        .registry
        .find_online(host, port)
        .map_err(|e| error_response(&e))
}
