//! Document parsing.
//!
//! This module turns one file's bytes into a [`Document`] record: title
//! resolution, type inference, wiki-link extraction, and the derived excerpt.
//! Backlinks are left empty here; the index owns them.
//!
//! # Title resolution
//!
//! Ordered: front-matter `title`, first `# heading` in the body, filename
//! stem with hyphens turned into spaces and title-cased.
//!
//! # Type inference
//!
//! Front-matter `type` wins when it names a known type (`tag-index` aliases
//! to `tag`); otherwise the first path segment decides; otherwise `other`.

use std::path::Path;
use std::sync::LazyLock;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::frontmatter;

/// Maximum excerpt length in characters
pub const EXCERPT_MAX_CHARS: usize = 200;

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#\s+(.+)$").expect("valid heading regex"));
static WIKILINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\]|]+)(?:\|[^\]]+)?\]\]").expect("valid wikilink regex"));
static MD_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid md link regex"));
static CODE_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("valid code fence regex"));
static HEADING_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#+\s+.*$").expect("valid heading line regex"));

/// The canonical record for one file under the workspace root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Workspace-relative path, forward-slash normalized, ends in `.md`
    pub path: String,
    /// Resolved title
    pub title: String,
    /// Document type: task, knowledge, inbox, reminder, project, tag, other
    #[serde(rename = "type")]
    pub doc_type: String,
    /// Optional free-form status (e.g. active, blocked, complete)
    pub status: Option<String>,
    /// Tags from front-matter, order preserved
    pub tags: Vec<String>,
    /// Creation timestamp: front-matter `created`, else file birth time
    pub created: Option<String>,
    /// Last modification timestamp (file mtime)
    pub updated: Option<String>,
    /// Up to 200 characters of cleaned content
    pub excerpt: String,
    /// Full front-matter as a JSON value tree
    pub frontmatter: serde_json::Value,
    /// Body after the front-matter fence
    pub content: String,
    /// Deduplicated outgoing wiki-link targets, raw and unresolved
    pub links: Vec<String>,
    /// Inbound references; computed by the index after every mutation
    pub backlinks: Vec<String>,
}

/// Filesystem timestamps fed into the parser alongside the raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTimes {
    /// File modification time
    pub modified: Option<SystemTime>,
    /// File birth time, where the filesystem reports one
    pub created: Option<SystemTime>,
}

impl FileTimes {
    /// Read timestamps for a file, tolerating filesystems without birth time
    #[must_use]
    pub fn for_path(path: &Path) -> Self {
        match std::fs::metadata(path) {
            Ok(meta) => Self {
                modified: meta.modified().ok(),
                created: meta.created().ok(),
            },
            Err(_) => Self::default(),
        }
    }
}

/// Parse one file's raw content into a [`Document`].
///
/// `relative_path` must already be workspace-relative and forward-slash
/// normalized. Fails only on malformed front-matter; a file without
/// front-matter is a document with an empty mapping and full-body content.
pub fn parse_document(relative_path: &str, raw: &str, times: FileTimes) -> Result<Document> {
    let parts = frontmatter::split(raw);
    let matter = match parts.front_matter {
        Some(block) => frontmatter::parse_mapping(block)?,
        None => serde_yaml::Mapping::new(),
    };
    let body = parts.body;

    let fm_str = |key: &str| -> Option<String> {
        matter
            .get(serde_yaml::Value::from(key))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };

    let title = fm_str("title")
        .or_else(|| first_heading(body))
        .unwrap_or_else(|| title_from_filename(relative_path));

    let doc_type = infer_type(fm_str("type").as_deref(), relative_path);

    let tags = matter
        .get(serde_yaml::Value::from("tags"))
        .and_then(|v| v.as_sequence())
        .map(|seq| {
            seq.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let created = fm_str("created").or_else(|| times.created.map(iso8601));
    let updated = times.modified.map(iso8601);

    Ok(Document {
        path: relative_path.to_string(),
        title,
        doc_type,
        status: fm_str("status"),
        tags,
        created,
        updated,
        excerpt: derive_excerpt(body),
        frontmatter: frontmatter::yaml_to_json(&serde_yaml::Value::Mapping(matter)),
        content: body.to_string(),
        links: extract_wikilinks(body),
        backlinks: Vec::new(),
    })
}

/// Extract deduplicated wiki-link targets in first-seen order.
///
/// Recognizes `[[target]]` and `[[target|alias]]`; alias text is discarded
/// and targets are trimmed.
#[must_use]
pub fn extract_wikilinks(body: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for cap in WIKILINK_RE.captures_iter(body) {
        let target = cap[1].trim().to_string();
        if !target.is_empty() && !seen.contains(&target) {
            seen.push(target);
        }
    }
    seen
}

/// The filename stem of a workspace-relative path.
#[must_use]
pub fn file_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.strip_suffix(".md").unwrap_or(name)
}

fn first_heading(body: &str) -> Option<String> {
    HEADING_RE
        .captures(body)
        .map(|caps| caps[1].trim().to_string())
}

/// Filename stem with hyphens turned into spaces and each word title-cased.
fn title_from_filename(path: &str) -> String {
    file_stem(path)
        .split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn infer_type(fm_type: Option<&str>, path: &str) -> String {
    if let Some(t) = fm_type {
        match t.to_lowercase().as_str() {
            "task" => return "task".to_string(),
            "knowledge" => return "knowledge".to_string(),
            "inbox" => return "inbox".to_string(),
            "reminder" => return "reminder".to_string(),
            "project" => return "project".to_string(),
            "tag" | "tag-index" => return "tag".to_string(),
            _ => {}
        }
    }

    match path.split('/').next().unwrap_or("") {
        "tasks" => "task",
        "knowledge" => "knowledge",
        "inbox" => "inbox",
        "reminders" => "reminder",
        "projects" => "project",
        "tags" => "tag",
        _ => "other",
    }
    .to_string()
}

/// Derive the excerpt from a document body.
///
/// Strips fenced code blocks, headings, and link/emphasis syntax, collapses
/// whitespace, and truncates on a word boundary at 200 characters with a
/// trailing ellipsis when truncated.
#[must_use]
pub fn derive_excerpt(body: &str) -> String {
    let text = CODE_FENCE_RE.replace_all(body, " ");
    let text = HEADING_LINE_RE.replace_all(&text, " ");
    let text = MD_LINK_RE.replace_all(&text, "$1");
    let text = text.replace("[[", "").replace("]]", "");
    let text = text.replace(['*', '_', '`'], "");

    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= EXCERPT_MAX_CHARS {
        return collapsed;
    }

    let mut excerpt = String::new();
    for word in collapsed.split(' ') {
        let next_len = if excerpt.is_empty() {
            word.chars().count()
        } else {
            excerpt.chars().count() + 1 + word.chars().count()
        };
        if next_len > EXCERPT_MAX_CHARS {
            break;
        }
        if !excerpt.is_empty() {
            excerpt.push(' ');
        }
        excerpt.push_str(word);
    }
    excerpt.push('…');
    excerpt
}

fn iso8601(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(path: &str, raw: &str) -> Document {
        parse_document(path, raw, FileTimes::default()).unwrap()
    }

    #[test]
    fn test_title_from_front_matter() {
        let doc = parse("knowledge/a.md", "---\ntitle: Fancy Title\n---\n# Heading\n");
        assert_eq!(doc.title, "Fancy Title");
    }

    #[test]
    fn test_title_from_heading() {
        let doc = parse("knowledge/a.md", "intro text\n# First Heading\n## Second\n");
        assert_eq!(doc.title, "First Heading");
    }

    #[test]
    fn test_title_from_filename() {
        let doc = parse("knowledge/rust-async-notes.md", "no heading here\n");
        assert_eq!(doc.title, "Rust Async Notes");
    }

    #[test]
    fn test_type_inference() {
        let doc = parse("notes/a.md", "---\ntype: tag-index\n---\n");
        assert_eq!(doc.doc_type, "tag");

        let doc = parse("tasks/a.md", "");
        assert_eq!(doc.doc_type, "task");

        let doc = parse("reminders/a.md", "");
        assert_eq!(doc.doc_type, "reminder");

        // Unknown front-matter type falls through to the path
        let doc = parse("knowledge/a.md", "---\ntype: weird\n---\n");
        assert_eq!(doc.doc_type, "knowledge");

        let doc = parse("misc/a.md", "");
        assert_eq!(doc.doc_type, "other");
    }

    #[test]
    fn test_wikilink_extraction() {
        let body = "see [[alpha]] and [[beta|the alias]] and [[alpha]] again, plus [[ gamma ]]";
        assert_eq!(extract_wikilinks(body), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_tags_and_status() {
        let doc = parse(
            "tasks/t.md",
            "---\ntags: [rust, sync]\nstatus: active\n---\nbody",
        );
        assert_eq!(doc.tags, vec!["rust", "sync"]);
        assert_eq!(doc.status.as_deref(), Some("active"));
    }

    #[test]
    fn test_malformed_front_matter_is_error() {
        let raw = "---\ntitle: [unclosed\n---\nbody";
        assert!(parse_document("a.md", raw, FileTimes::default()).is_err());
    }

    #[test]
    fn test_missing_front_matter_is_full_content() {
        let doc = parse("a.md", "just a body");
        assert_eq!(doc.content, "just a body");
        assert_eq!(doc.frontmatter, serde_json::json!({}));
    }

    #[test]
    fn test_excerpt_strips_syntax() {
        let body = "# Heading\n\nSome *bold* text with [a link](http://x) and `code`.\n```\nfenced\n```\ntail";
        let excerpt = derive_excerpt(body);
        assert_eq!(excerpt, "Some bold text with a link and code. tail");
    }

    #[test]
    fn test_excerpt_truncates_on_word_boundary() {
        let body = "word ".repeat(100);
        let excerpt = derive_excerpt(&body);
        assert!(excerpt.chars().count() <= EXCERPT_MAX_CHARS + 1);
        assert!(excerpt.ends_with('…'));
        assert!(!excerpt.contains("word wor…"));
    }

    #[test]
    fn test_nested_front_matter_survives_as_tree() {
        let doc = parse(
            "knowledge/x.md",
            "---\nfederation:\n  origin-peer: 'abc'\n  sync-status: 'synced'\n---\nbody",
        );
        assert_eq!(
            doc.frontmatter["federation"]["origin-peer"],
            serde_json::json!("abc")
        );
    }
}
