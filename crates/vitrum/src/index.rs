//! The document index.
//!
//! [`DocumentIndex`] owns the authoritative `path → Document` mapping plus
//! everything derived from it: backlinks, fuzzy search, and the link graph.
//! Derived structures are rebuilt from primary data after every mutation;
//! at personal-notes scale a full backlink recompute is cheap and keeps the
//! invariants trivial.
//!
//! The index itself is not synchronized. The engine wraps it in a
//! `parking_lot::RwLock`; the watcher task is the only writer.
//!
//! # Link resolution
//!
//! Given a raw wiki-link target `L`:
//!
//! 1. `L` is an exact path key → that document
//! 2. `L + ".md"` is a key → that document
//! 3. first document whose filename stem equals `L` case-insensitively,
//!    else first whose title equals `L` case-insensitively
//! 4. otherwise unresolved
//!
//! Documents are kept in a `BTreeMap`, so "first" is path order and stable
//! for a given build.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::document::{self, parse_document, Document, FileTimes};

/// Directory names excluded from indexing at the workspace root
const EXCLUDED_DIRS: &[&str] = &["node_modules", "scratchpad", "dist", "build", ".git"];

/// Files ingested from immediate project subdirectories
const PROJECT_FILES: &[&str] = &["CLAUDE.md", "README.md"];

/// Search field weights: title outranks tags outranks content
const TITLE_WEIGHT: f64 = 2.0;
const TAG_WEIGHT: f64 = 1.5;
const CONTENT_WEIGHT: f64 = 1.0;

/// Counters from a full index build.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildStats {
    /// Documents successfully parsed and indexed
    pub indexed: usize,
    /// Files skipped because parsing failed
    pub failed: usize,
}

/// A ranked search hit borrowing from the index.
#[derive(Debug, Clone, Copy)]
pub struct SearchHit<'a> {
    /// The matched document
    pub document: &'a Document,
    /// Normalized distance in (0, 1]; lower is better
    pub score: f64,
}

/// Aggregate counts for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    /// Total indexed documents
    pub total: usize,
    /// Document counts keyed by type
    #[serde(rename = "byType")]
    pub by_type: HashMap<String, usize>,
    /// Document counts keyed by status
    #[serde(rename = "byStatus")]
    pub by_status: HashMap<String, usize>,
}

/// A node in the link graph.
#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    /// Document path
    pub id: String,
    /// Document title
    pub label: String,
    /// Document type
    #[serde(rename = "type")]
    pub node_type: String,
    /// Document status, if any
    pub status: Option<String>,
    /// Outgoing plus incoming link count
    #[serde(rename = "linkCount")]
    pub link_count: usize,
}

/// A directed edge in the link graph.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GraphEdge {
    /// Path of the linking document
    pub source: String,
    /// Path of the resolved target
    pub target: String,
}

/// The link graph: nodes plus resolved edges.
#[derive(Debug, Clone, Serialize)]
pub struct Graph {
    /// All nodes in scope
    pub nodes: Vec<GraphNode>,
    /// Edges whose target resolved to a known document
    pub links: Vec<GraphEdge>,
}

/// Owns all documents and serves search and graph queries.
pub struct DocumentIndex {
    workspace_root: PathBuf,
    documents: BTreeMap<String, Document>,
}

impl DocumentIndex {
    /// Create an empty index rooted at the given workspace directory
    #[must_use]
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            documents: BTreeMap::new(),
        }
    }

    /// The workspace root this index scans
    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Full build: clear everything, scan the workspace, rebuild backlinks.
    ///
    /// Parse failures never fail the build; they are logged and the file is
    /// absent from the index.
    pub fn build(&mut self) -> BuildStats {
        self.documents.clear();
        let mut stats = BuildStats::default();

        let root = self.workspace_root.clone();
        for entry in WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !should_exclude(e.path(), &root))
            .filter_map(std::result::Result::ok)
        {
            let path = entry.path();
            if !path.is_file() || path.extension().is_none_or(|e| e != "md") {
                continue;
            }

            let relative = relative_path(path, &root);
            match std::fs::read_to_string(path) {
                Ok(raw) => match parse_document(&relative, &raw, FileTimes::for_path(path)) {
                    Ok(doc) => {
                        self.documents.insert(relative, doc);
                        stats.indexed += 1;
                    }
                    Err(e) => {
                        warn!(path = %relative, error = %e, "Skipping unparseable document");
                        stats.failed += 1;
                    }
                },
                Err(e) => {
                    warn!(path = %relative, error = %e, "Skipping unreadable document");
                    stats.failed += 1;
                }
            }
        }

        self.rebuild_backlinks();
        info!(
            indexed = stats.indexed,
            failed = stats.failed,
            "Index build complete"
        );
        stats
    }

    /// Reparse one file's content and recompute derived structures
    pub fn update_document(
        &mut self,
        relative: &str,
        raw: &str,
        times: FileTimes,
    ) -> crate::Result<()> {
        let doc = parse_document(relative, raw, times)?;
        self.documents.insert(relative.to_string(), doc);
        self.rebuild_backlinks();
        debug!(path = %relative, "Document updated");
        Ok(())
    }

    /// Remove a document and recompute derived structures
    pub fn remove_document(&mut self, relative: &str) -> bool {
        let removed = self.documents.remove(relative).is_some();
        if removed {
            self.rebuild_backlinks();
            debug!(path = %relative, "Document removed");
        }
        removed
    }

    /// Look up a document by its exact path
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Document> {
        self.documents.get(path)
    }

    /// Whether a path is indexed
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.documents.contains_key(path)
    }

    /// All documents in stable path order
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    /// Number of indexed documents
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the index holds no documents
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Resolve a raw wiki-link target to a document path
    #[must_use]
    pub fn resolve_link(&self, link: &str) -> Option<String> {
        if self.documents.contains_key(link) {
            return Some(link.to_string());
        }
        let with_ext = format!("{link}.md");
        if self.documents.contains_key(&with_ext) {
            return Some(with_ext);
        }

        let needle = link.to_lowercase();
        for path in self.documents.keys() {
            if document::file_stem(path).to_lowercase() == needle {
                return Some(path.clone());
            }
        }
        for (path, doc) in &self.documents {
            if doc.title.to_lowercase() == needle {
                return Some(path.clone());
            }
        }
        None
    }

    /// Rebuild every document's backlinks from the raw link lists.
    fn rebuild_backlinks(&mut self) {
        // Resolve all outgoing links first; resolution borrows the map.
        let mut inbound: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (path, doc) in &self.documents {
            for link in &doc.links {
                let Some(target) = self.resolve_link(link) else {
                    continue;
                };
                if target == *path {
                    continue;
                }
                let entry = inbound.entry(target).or_default();
                if !entry.contains(path) {
                    entry.push(path.clone());
                }
            }
        }

        for (path, doc) in &mut self.documents {
            doc.backlinks = inbound.remove(path).unwrap_or_default();
        }
    }

    /// Fuzzy search over title, tags, and content.
    ///
    /// Scores are normalized distances in (0, 1], lower is better. The
    /// optional `type` and `tag` filters apply after ranking; ties keep the
    /// index's stable iteration order.
    pub fn search<'a>(
        &'a self,
        query: &str,
        type_filter: Option<&str>,
        tag_filter: Option<&str>,
        limit: usize,
    ) -> Vec<SearchHit<'a>> {
        let matcher = SkimMatcherV2::default().ignore_case();
        let mut hits: Vec<SearchHit<'a>> = self
            .documents
            .values()
            .filter_map(|doc| {
                score(&matcher, doc, query).map(|score| SearchHit { document: doc, score })
            })
            .collect();

        hits.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));

        hits.into_iter()
            .filter(|hit| type_filter.is_none_or(|t| hit.document.doc_type == t))
            .filter(|hit| tag_filter.is_none_or(|t| hit.document.tags.iter().any(|x| x == t)))
            .take(limit)
            .collect()
    }

    /// The full link graph, optionally restricted to a folder prefix.
    #[must_use]
    pub fn graph(&self, folder: Option<&str>) -> Graph {
        let in_scope = |path: &str| folder.is_none_or(|f| path.starts_with(f));

        let nodes: Vec<GraphNode> = self
            .documents
            .values()
            .filter(|d| in_scope(&d.path))
            .map(node_for)
            .collect();

        let mut links = Vec::new();
        for doc in self.documents.values().filter(|d| in_scope(&d.path)) {
            for link in &doc.links {
                if let Some(target) = self.resolve_link(link) {
                    if in_scope(&target) {
                        links.push(GraphEdge {
                            source: doc.path.clone(),
                            target,
                        });
                    }
                }
            }
        }

        Graph { nodes, links }
    }

    /// The neighborhood subgraph around one document.
    ///
    /// Returns the center plus the union of resolved outgoing targets and
    /// incoming backlink sources, with the edges induced on that node set.
    #[must_use]
    pub fn neighbors(&self, path: &str) -> Option<Graph> {
        let center = self.documents.get(path)?;

        let mut member_paths = vec![center.path.clone()];
        for link in &center.links {
            if let Some(target) = self.resolve_link(link) {
                if !member_paths.contains(&target) {
                    member_paths.push(target);
                }
            }
        }
        for source in &center.backlinks {
            if !member_paths.contains(source) {
                member_paths.push(source.clone());
            }
        }

        let nodes: Vec<GraphNode> = member_paths
            .iter()
            .filter_map(|p| self.documents.get(p))
            .map(node_for)
            .collect();

        let mut links = Vec::new();
        for member in &member_paths {
            let Some(doc) = self.documents.get(member) else {
                continue;
            };
            for link in &doc.links {
                if let Some(target) = self.resolve_link(link) {
                    if member_paths.contains(&target) {
                        links.push(GraphEdge {
                            source: doc.path.clone(),
                            target,
                        });
                    }
                }
            }
        }

        Some(Graph { nodes, links })
    }

    /// Aggregate counts for the status endpoint
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        let mut by_type: HashMap<String, usize> = HashMap::new();
        let mut by_status: HashMap<String, usize> = HashMap::new();

        for doc in self.documents.values() {
            *by_type.entry(doc.doc_type.clone()).or_insert(0) += 1;
            if let Some(status) = &doc.status {
                *by_status.entry(status.clone()).or_insert(0) += 1;
            }
        }

        IndexStats {
            total: self.documents.len(),
            by_type,
            by_status,
        }
    }
}

/// Score one document against a query, `None` when nothing matches.
///
/// The best weighted per-field match maps monotonically to a distance in
/// (0, 1], lower is better.
fn score(matcher: &SkimMatcherV2, doc: &Document, query: &str) -> Option<f64> {
    let title = matcher.fuzzy_match(&doc.title, query);
    let tag = doc
        .tags
        .iter()
        .filter_map(|t| matcher.fuzzy_match(t, query))
        .max();
    let content = matcher.fuzzy_match(&doc.content, query);

    let weighted = [
        title.map(|s| s as f64 * TITLE_WEIGHT),
        tag.map(|s| s as f64 * TAG_WEIGHT),
        content.map(|s| s as f64 * CONTENT_WEIGHT),
    ]
    .into_iter()
    .flatten()
    .fold(None::<f64>, |acc, s| Some(acc.map_or(s, |a| a.max(s))));

    weighted.map(|w| 1.0 / (1.0 + w / 64.0))
}

fn node_for(doc: &Document) -> GraphNode {
    GraphNode {
        id: doc.path.clone(),
        label: doc.title.clone(),
        node_type: doc.doc_type.clone(),
        status: doc.status.clone(),
        link_count: doc.links.len() + doc.backlinks.len(),
    }
}

/// Normalize an absolute path to its workspace-relative, forward-slash form.
#[must_use]
pub fn relative_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Whether a path is excluded from indexing.
///
/// Hidden entries and the configured directory names are skipped anywhere;
/// the `projects` subtree only contributes `CLAUDE.md` and `README.md` from
/// immediate project directories.
#[must_use]
pub fn should_exclude(path: &Path, root: &Path) -> bool {
    let relative = match path.strip_prefix(root) {
        Ok(r) => r,
        Err(_) => return false,
    };
    let components: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    if components.is_empty() {
        return false;
    }

    if components
        .iter()
        .any(|name| name.starts_with('.') || EXCLUDED_DIRS.contains(&name.as_str()))
    {
        return true;
    }

    if components[0] == "projects" {
        if path.is_dir() {
            // projects/ and projects/<name>/ are walked; nothing deeper.
            return components.len() > 2;
        }
        // Files: only projects/<name>/{CLAUDE.md,README.md}.
        return components.len() != 3
            || !PROJECT_FILES.contains(&components[2].as_str());
    }

    false
}

/// Whether a workspace-relative file path belongs in the index.
///
/// Pure string check shared with the watcher, which sees paths for files
/// that may no longer exist on disk.
#[must_use]
pub fn is_indexable_path(relative: &str) -> bool {
    if !relative.ends_with(".md") {
        return false;
    }
    let components: Vec<&str> = relative.split('/').filter(|c| !c.is_empty()).collect();
    if components.is_empty() {
        return false;
    }
    if components
        .iter()
        .any(|name| name.starts_with('.') || EXCLUDED_DIRS.contains(name))
    {
        return false;
    }
    if components[0] == "projects" {
        return components.len() == 3 && PROJECT_FILES.contains(&components[2]);
    }
    true
}
