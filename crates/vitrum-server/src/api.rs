//! Local client surface: files, search, graph, and status endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use vitrum::{frontmatter, BusEvent, Document};

use crate::{error_response, AppState};

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    timestamp: String,
}

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
pub struct StatusResponse {
    server: ServerStats,
    documents: vitrum::index::IndexStats,
    tags: TagStats,
    recent: Vec<RecentDoc>,
}

#[derive(Serialize)]
pub struct ServerStats {
    uptime: u64,
    #[serde(rename = "connectedClients")]
    connected_clients: usize,
    #[serde(rename = "lastIndexed")]
    last_indexed: String,
}

#[derive(Serialize)]
pub struct TagStats {
    total: usize,
    top: Vec<TagCount>,
}

#[derive(Serialize)]
pub struct TagCount {
    tag: String,
    count: usize,
}

#[derive(Serialize)]
pub struct RecentDoc {
    path: String,
    title: String,
    #[serde(rename = "type")]
    doc_type: String,
    updated: String,
}

/// Aggregate workspace status: counts, top tags, recently updated documents
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let index = state.index.read();
    let stats = index.stats();

    let mut tag_counts: HashMap<String, usize> = HashMap::new();
    for doc in index.documents() {
        for tag in &doc.tags {
            *tag_counts.entry(tag.clone()).or_insert(0) += 1;
        }
    }
    let total_tags = tag_counts.len();
    let mut top: Vec<TagCount> = tag_counts
        .into_iter()
        .map(|(tag, count)| TagCount { tag, count })
        .collect();
    top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
    top.truncate(10);

    let mut recent: Vec<RecentDoc> = index
        .documents()
        .filter_map(|d| {
            d.updated.as_ref().map(|updated| RecentDoc {
                path: d.path.clone(),
                title: d.title.clone(),
                doc_type: d.doc_type.clone(),
                updated: updated.clone(),
            })
        })
        .collect();
    recent.sort_by(|a, b| b.updated.cmp(&a.updated));
    recent.truncate(5);

    Json(StatusResponse {
        server: ServerStats {
            uptime: state.uptime_secs(),
            connected_clients: state.bus.subscriber_count(),
            last_indexed: state.last_indexed.read().to_rfc3339(),
        },
        documents: stats,
        tags: TagStats {
            total: total_tags,
            top,
        },
        recent,
    })
}

#[derive(Serialize)]
pub struct ReindexResponse {
    success: bool,
    indexed: usize,
    failed: usize,
}

/// Rebuild the index from scratch and tell clients to re-fetch everything
pub async fn reindex(State(state): State<Arc<AppState>>) -> Json<ReindexResponse> {
    info!("Reindex requested");
    let stats = state.index.write().build();
    *state.last_indexed.write() = chrono::Utc::now();
    state.bus.emit(BusEvent::Reload);

    Json(ReindexResponse {
        success: true,
        indexed: stats.indexed,
        failed: stats.failed,
    })
}

#[derive(Deserialize)]
pub struct ListFilesQuery {
    #[serde(rename = "type")]
    doc_type: Option<String>,
    tag: Option<String>,
    folder: Option<String>,
}

#[derive(Serialize)]
pub struct ListFilesResponse {
    count: usize,
    items: Vec<serde_json::Value>,
}

/// List indexed documents, optionally filtered by type, tag, or folder
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListFilesQuery>,
) -> Json<ListFilesResponse> {
    let index = state.index.read();
    let items: Vec<serde_json::Value> = index
        .documents()
        .filter(|d| query.doc_type.as_ref().is_none_or(|t| &d.doc_type == t))
        .filter(|d| query.tag.as_ref().is_none_or(|t| d.tags.contains(t)))
        .filter(|d| query.folder.as_ref().is_none_or(|f| d.path.starts_with(f.as_str())))
        .map(document_summary)
        .collect();

    Json(ListFilesResponse {
        count: items.len(),
        items,
    })
}

/// Fetch one document with content and resolved backlinks
pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Json<Document>, (StatusCode, String)> {
    let index = state.index.read();
    index
        .get(&path)
        .cloned()
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("not found: {path}")))
}

#[derive(Deserialize)]
pub struct PutFileBody {
    frontmatter: Option<serde_json::Value>,
    content: String,
}

#[derive(Serialize)]
pub struct PutFileResponse {
    success: bool,
    path: String,
}

/// Replace a document's front-matter and content.
///
/// Only replaces documents the index already knows; unknown paths answer
/// 404 rather than creating files.
pub async fn put_file(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Json(body): Json<PutFileBody>,
) -> Result<Json<PutFileResponse>, (StatusCode, String)> {
    if !state.index.read().contains(&path) {
        return Err((StatusCode::NOT_FOUND, format!("not found: {path}")));
    }

    let matter = match body.frontmatter {
        Some(value) => match serde_yaml::to_value(&value) {
            Ok(serde_yaml::Value::Mapping(map)) => map,
            Ok(_) => {
                return Err((
                    StatusCode::BAD_REQUEST,
                    "frontmatter must be an object".to_string(),
                ))
            }
            Err(e) => return Err((StatusCode::BAD_REQUEST, e.to_string())),
        },
        None => serde_yaml::Mapping::new(),
    };

    let rendered = frontmatter::render(&matter).map_err(|e| error_response(&e))?;
    let file = format!("{rendered}{}", body.content);

    let full = state.config.resolve(&path);
    if let Err(e) = std::fs::write(&full, file) {
        warn!(path = %path, error = %e, "Failed to write document");
        return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
    }

    // The watcher will observe the write and refresh the index.
    Ok(Json(PutFileResponse {
        success: true,
        path,
    }))
}

#[derive(Deserialize)]
pub struct SearchQuery {
    q: Option<String>,
    #[serde(rename = "type")]
    doc_type: Option<String>,
    tag: Option<String>,
    limit: Option<usize>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    query: String,
    count: usize,
    items: Vec<SearchResponseItem>,
}

#[derive(Serialize)]
pub struct SearchResponseItem {
    #[serde(flatten)]
    document: serde_json::Value,
    score: f64,
}

/// Fuzzy search over the local index
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let q = query.q.as_deref().unwrap_or("").trim();
    if q.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "missing query parameter q".to_string()));
    }
    let limit = query.limit.unwrap_or(50);

    let index = state.index.read();
    let items: Vec<SearchResponseItem> = index
        .search(q, query.doc_type.as_deref(), query.tag.as_deref(), limit)
        .into_iter()
        .map(|hit| SearchResponseItem {
            document: document_summary(hit.document),
            score: hit.score,
        })
        .collect();

    Ok(Json(SearchResponse {
        query: q.to_string(),
        count: items.len(),
        items,
    }))
}

#[derive(Deserialize)]
pub struct GraphQuery {
    folder: Option<String>,
}

/// The link graph, optionally restricted to a folder
pub async fn graph(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GraphQuery>,
) -> Json<vitrum::index::Graph> {
    Json(state.index.read().graph(query.folder.as_deref()))
}

/// The neighborhood subgraph around one document
pub async fn neighbors(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<Json<vitrum::index::Graph>, (StatusCode, String)> {
    state
        .index
        .read()
        .neighbors(&path)
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("not found: {path}")))
}

/// A document without its body, for listings and search results.
fn document_summary(doc: &Document) -> serde_json::Value {
    let mut value = serde_json::to_value(doc).unwrap_or_default();
    if let Some(obj) = value.as_object_mut() {
        obj.remove("content");
    }
    value
}
