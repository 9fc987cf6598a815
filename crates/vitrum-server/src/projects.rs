//! Project browse and edit endpoints.
//!
//! The `projects/` subtree is special: the index only ingests each project's
//! `CLAUDE.md` and `README.md`, but these endpoints expose the full tree for
//! browsing and editing project files directly.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;
use walkdir::WalkDir;

use crate::AppState;

#[derive(Serialize)]
pub struct ProjectsResponse {
    count: usize,
    items: Vec<ProjectItem>,
}

#[derive(Serialize)]
pub struct ProjectItem {
    name: String,
}

/// List the immediate subdirectories of `projects/`
pub async fn list_projects(State(state): State<Arc<AppState>>) -> Json<ProjectsResponse> {
    let projects_dir = state.config.resolve("projects");
    let mut items = Vec::new();

    if let Ok(entries) = std::fs::read_dir(&projects_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() && !name.starts_with('.') {
                items.push(ProjectItem { name });
            }
        }
    }
    items.sort_by(|a, b| a.name.cmp(&b.name));

    Json(ProjectsResponse {
        count: items.len(),
        items,
    })
}

#[derive(Serialize)]
pub struct TreeResponse {
    name: String,
    files: Vec<String>,
}

/// List every file under one project, recursively
pub async fn get_tree(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<TreeResponse>, (StatusCode, String)> {
    let project_dir = project_root(&state, &name)?;

    let mut files: Vec<String> = WalkDir::new(&project_dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            let entry_name = e.file_name().to_string_lossy();
            !entry_name.starts_with('.') && entry_name != "node_modules" && entry_name != "target"
        })
        .filter_map(std::result::Result::ok)
        .filter(|e| e.path().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(&project_dir)
                .unwrap_or(e.path())
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    files.sort();

    Ok(Json(TreeResponse { name, files }))
}

#[derive(Serialize)]
pub struct ProjectFileResponse {
    path: String,
    content: String,
}

/// Read one file inside a project
pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Path((name, path)): Path<(String, String)>,
) -> Result<Json<ProjectFileResponse>, (StatusCode, String)> {
    let full = project_file(&state, &name, &path)?;
    let content = std::fs::read_to_string(&full)
        .map_err(|_| (StatusCode::NOT_FOUND, format!("not found: {name}/{path}")))?;

    Ok(Json(ProjectFileResponse { path, content }))
}

#[derive(Deserialize)]
pub struct PutProjectFileBody {
    content: String,
}

#[derive(Serialize)]
pub struct PutProjectFileResponse {
    success: bool,
    path: String,
}

/// Write one file inside a project, creating parent directories
pub async fn put_file(
    State(state): State<Arc<AppState>>,
    Path((name, path)): Path<(String, String)>,
    Json(body): Json<PutProjectFileBody>,
) -> Result<Json<PutProjectFileResponse>, (StatusCode, String)> {
    let full = project_file(&state, &name, &path)?;

    if let Some(dir) = full.parent() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    }
    if let Err(e) = std::fs::write(&full, body.content) {
        warn!(project = %name, path = %path, error = %e, "Failed to write project file");
        return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
    }

    Ok(Json(PutProjectFileResponse {
        success: true,
        path,
    }))
}

/// Resolve a project directory, rejecting names that escape `projects/`.
fn project_root(state: &AppState, name: &str) -> Result<PathBuf, (StatusCode, String)> {
    if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
        return Err((StatusCode::BAD_REQUEST, format!("invalid project name: {name}")));
    }
    let dir = state.config.resolve("projects").join(name);
    if !dir.is_dir() {
        return Err((StatusCode::NOT_FOUND, format!("no such project: {name}")));
    }
    Ok(dir)
}

/// Resolve a file path inside a project, rejecting traversal.
fn project_file(state: &AppState, name: &str, path: &str) -> Result<PathBuf, (StatusCode, String)> {
    let root = project_root(state, name)?;
    if path.split('/').any(|seg| seg == "..") {
        return Err((StatusCode::BAD_REQUEST, format!("invalid path: {path}")));
    }
    Ok(root.join(path))
}
