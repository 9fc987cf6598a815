//! The federation query surface.
//!
//! Two halves live here: [`PeerClient`], the typed HTTP client every
//! outbound peer call goes through (each call family carries its own hard
//! budget), and the client-facing fan-out that issues a search to every
//! online peer concurrently and merges the answers.
//!
//! Fan-out never fails as a whole: a peer that errors or exceeds its budget
//! contributes zero results and shows up in the per-peer stats, matching the
//! other peers' answers that did arrive.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::peers::{PeerLiveStatus, PeerRegistry};
use crate::{ADOPT_TIMEOUT_SECS, CHECKSUM_TIMEOUT_SECS, CROSS_QUERY_TIMEOUT_SECS};

/// A ranked item in a peer-facing search answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchItem {
    /// Workspace-relative path on the answering peer
    pub path: String,
    /// Document title
    pub title: String,
    /// Document type
    #[serde(rename = "type")]
    pub doc_type: String,
    /// Document tags
    pub tags: Vec<String>,
    /// Normalized distance; lower is better
    pub score: f64,
    /// Text snippet around the first query occurrence
    pub snippet: String,
}

/// A peer's answer to a `search` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSearchResponse {
    /// Answering instance id
    #[serde(rename = "instanceId")]
    pub instance_id: String,
    /// Answering display name
    #[serde(rename = "displayName")]
    pub display_name: String,
    /// The query as the peer saw it
    pub query: String,
    /// Number of items
    pub count: usize,
    /// Ranked items, best first
    pub items: Vec<SearchItem>,
}

/// A peer's full answer for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerDocumentResponse {
    /// Workspace-relative path on the peer
    pub path: String,
    /// Document title
    pub title: String,
    /// Document type
    #[serde(rename = "type")]
    pub doc_type: String,
    /// Document tags
    pub tags: Vec<String>,
    /// Body after the front-matter fence
    pub content: String,
    /// Full front-matter tree
    pub frontmatter: serde_json::Value,
    /// Creation timestamp
    pub created: Option<String>,
    /// Modification timestamp
    pub updated: Option<String>,
    /// Outgoing wiki-link targets
    pub links: Vec<String>,
    /// Inbound references
    pub backlinks: Vec<String>,
    /// Body checksum, `sha256:<hex>`
    pub checksum: String,
}

/// A peer's checksum-only answer for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumResponse {
    /// Body checksum, `sha256:<hex>`
    pub checksum: String,
    /// Modification timestamp
    pub updated: Option<String>,
}

/// Sender identity attached to pushed documents and advisory notes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderInfo {
    /// Sending instance id
    #[serde(rename = "instanceId")]
    pub instance_id: String,
    /// Sending display name
    #[serde(rename = "displayName")]
    pub display_name: String,
    /// Sender `host:port`
    pub host: String,
}

/// A document pushed to a peer's `receive` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushedDocument {
    /// Document title
    pub title: String,
    /// Body content
    pub content: String,
    /// Document tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Path of the document on the sender
    #[serde(rename = "sourcePath")]
    pub source_path: String,
}

/// Wire payload of a `receive` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivePayload {
    /// Sender identity
    pub from: SenderInfo,
    /// The pushed document
    pub document: PushedDocument,
    /// Optional message from the sender
    pub message: Option<String>,
}

/// Wire payload of a `shared/respond` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespondPayload {
    /// Responder identity
    pub from: SenderInfo,
    /// What the responder did, e.g. `rejected`
    pub action: String,
    /// Path of the document on the origin
    #[serde(rename = "originalPath")]
    pub original_path: String,
    /// Optional comment for the origin's inbox
    pub comment: Option<String>,
}

/// One merged result of a cross-peer search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossSearchResult {
    /// Display name of the answering peer
    pub peer: String,
    /// Instance id of the answering peer
    #[serde(rename = "peerId")]
    pub peer_id: String,
    /// `host:port` of the answering peer
    #[serde(rename = "peerHost")]
    pub peer_host: String,
    /// Path on the answering peer
    pub path: String,
    /// Document title
    pub title: String,
    /// Document type
    #[serde(rename = "type")]
    pub doc_type: String,
    /// Document tags
    pub tags: Vec<String>,
    /// Normalized distance; lower is better
    pub score: f64,
    /// Text snippet
    pub snippet: String,
}

/// Per-peer statistics of a fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSearchStats {
    /// Results this peer contributed
    pub count: usize,
    /// Round-trip time in milliseconds
    pub took: u64,
}

/// The merged answer of a cross-peer search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossSearchResponse {
    /// The query
    pub query: String,
    /// Merged results, best (lowest score) first, truncated to the limit
    pub results: Vec<CrossSearchResult>,
    /// Online peers the fan-out reached for
    #[serde(rename = "totalPeersQueried")]
    pub total_peers_queried: usize,
    /// Peers that answered within budget
    #[serde(rename = "totalPeersResponded")]
    pub total_peers_responded: usize,
    /// Per-peer stats keyed by display name; failed peers report count 0
    #[serde(rename = "peerResults")]
    pub peer_results: HashMap<String, PeerSearchStats>,
}

/// Optional filters forwarded with search calls.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters<'a> {
    /// Restrict to one document type
    pub doc_type: Option<&'a str>,
    /// Restrict to documents carrying a tag
    pub tag: Option<&'a str>,
}

/// Typed HTTP client for all outbound peer calls.
///
/// Every call family carries its own hard timeout; an exceeded budget is a
/// peer failure and leaves no partial state.
#[derive(Debug, Clone)]
pub struct PeerClient {
    client: reqwest::Client,
}

impl PeerClient {
    /// Build the client. Certificates are not verified: peers are trusted by
    /// the overlay network's device identity, not a CA.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Issue a `search` to one peer with the cross-query budget.
    pub async fn search(
        &self,
        peer: &PeerLiveStatus,
        query: &str,
        filters: SearchFilters<'_>,
        limit: usize,
    ) -> Result<PeerSearchResponse> {
        let mut params = vec![("q", query.to_string()), ("limit", limit.to_string())];
        if let Some(t) = filters.doc_type {
            params.push(("type", t.to_string()));
        }
        if let Some(t) = filters.tag {
            params.push(("tag", t.to_string()));
        }

        let resp = self
            .client
            .get(format!("{}/search", base_url(peer)))
            .query(&params)
            .timeout(Duration::from_secs(CROSS_QUERY_TIMEOUT_SECS))
            .send()
            .await
            .map_err(Error::from_peer_request)?;
        decode(resp).await
    }

    /// Fetch a peer's file listing, passed through verbatim for proxying.
    pub async fn list_files(
        &self,
        peer: &PeerLiveStatus,
        folder: Option<&str>,
        tag: Option<&str>,
    ) -> Result<serde_json::Value> {
        let mut params = Vec::new();
        if let Some(f) = folder {
            params.push(("folder", f));
        }
        if let Some(t) = tag {
            params.push(("tag", t));
        }

        let resp = self
            .client
            .get(format!("{}/files", base_url(peer)))
            .query(&params)
            .timeout(Duration::from_secs(CROSS_QUERY_TIMEOUT_SECS))
            .send()
            .await
            .map_err(Error::from_peer_request)?;
        decode(resp).await
    }

    /// Fetch one document from a peer, passed through verbatim for proxying.
    pub async fn fetch_file_raw(
        &self,
        peer: &PeerLiveStatus,
        path: &str,
        checksum_only: bool,
    ) -> Result<serde_json::Value> {
        let mut params = Vec::new();
        if checksum_only {
            params.push(("checksumOnly", "true"));
        }

        let resp = self
            .client
            .get(format!("{}/files/{path}", base_url(peer)))
            .query(&params)
            .timeout(Duration::from_secs(CROSS_QUERY_TIMEOUT_SECS))
            .send()
            .await
            .map_err(Error::from_peer_request)?;
        decode(resp).await
    }

    /// Fetch one full document with the adoption/diff budget.
    pub async fn fetch_document(
        &self,
        protocol: &str,
        host: &str,
        port: u16,
        path: &str,
    ) -> Result<PeerDocumentResponse> {
        let resp = self
            .client
            .get(format!("{protocol}://{host}:{port}/api/federation/files/{path}"))
            .timeout(Duration::from_secs(ADOPT_TIMEOUT_SECS))
            .send()
            .await
            .map_err(Error::from_peer_request)?;
        decode(resp).await
    }

    /// Fetch one document's checksum with the origin-poll budget.
    pub async fn fetch_checksum(
        &self,
        peer: &PeerLiveStatus,
        path: &str,
    ) -> Result<ChecksumResponse> {
        let resp = self
            .client
            .get(format!("{}/files/{path}", base_url(peer)))
            .query(&[("checksumOnly", "true")])
            .timeout(Duration::from_secs(CHECKSUM_TIMEOUT_SECS))
            .send()
            .await
            .map_err(Error::from_peer_request)?;
        decode(resp).await
    }

    /// Push a document to a peer's `receive` endpoint.
    pub async fn send_document(
        &self,
        peer: &PeerLiveStatus,
        payload: &ReceivePayload,
    ) -> Result<serde_json::Value> {
        let resp = self
            .client
            .post(format!("{}/receive", base_url(peer)))
            .json(payload)
            .timeout(Duration::from_secs(CROSS_QUERY_TIMEOUT_SECS))
            .send()
            .await
            .map_err(Error::from_peer_request)?;
        decode(resp).await
    }

    /// Deliver an advisory note to a peer's `shared/respond` endpoint.
    pub async fn respond(
        &self,
        protocol: &str,
        host: &str,
        port: u16,
        payload: &RespondPayload,
    ) -> Result<()> {
        let resp = self
            .client
            .post(format!("{protocol}://{host}:{port}/api/federation/shared/respond"))
            .json(payload)
            .timeout(Duration::from_secs(CHECKSUM_TIMEOUT_SECS))
            .send()
            .await
            .map_err(Error::from_peer_request)?;
        if !resp.status().is_success() {
            return Err(Error::peer_upstream(
                resp.status().as_u16(),
                "respond rejected",
            ));
        }
        Ok(())
    }
}

/// Search every online peer concurrently and merge the answers.
///
/// Each peer gets its own budget; failures and timeouts contribute zero
/// results and a stats entry, never an overall failure. Merged results are
/// sorted best-first (ascending distance) and truncated to `limit`.
pub async fn cross_search(
    registry: &PeerRegistry,
    client: &PeerClient,
    query: &str,
    filters: SearchFilters<'_>,
    limit: usize,
) -> CrossSearchResponse {
    let online = registry.online_peers();
    let queried = online.len();

    let probes = online.into_iter().map(|peer| {
        let client = client.clone();
        let filters = SearchFilters {
            doc_type: filters.doc_type,
            tag: filters.tag,
        };
        async move {
            let started = Instant::now();
            let outcome = client.search(&peer, query, filters, limit).await;
            let took = started.elapsed().as_millis() as u64;
            (peer, outcome, took)
        }
    });

    let settled = futures::future::join_all(probes).await;

    let mut results = Vec::new();
    let mut peer_results = HashMap::new();
    let mut responded = 0;

    for (peer, outcome, took) in settled {
        let host = format!("{}:{}", peer.host, peer.port);
        match outcome {
            Ok(answer) => {
                responded += 1;
                let display = answer.display_name.clone();
                peer_results.insert(
                    display.clone(),
                    PeerSearchStats {
                        count: answer.items.len(),
                        took,
                    },
                );
                results.extend(answer.items.into_iter().map(|item| CrossSearchResult {
                    peer: display.clone(),
                    peer_id: answer.instance_id.clone(),
                    peer_host: host.clone(),
                    path: item.path,
                    title: item.title,
                    doc_type: item.doc_type,
                    tags: item.tags,
                    score: item.score,
                    snippet: item.snippet,
                }));
            }
            Err(e) => {
                debug!(peer = %host, error = %e, "Peer search failed");
                peer_results.insert(
                    peer.effective_name().to_string(),
                    PeerSearchStats { count: 0, took },
                );
            }
        }
    }

    results.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(limit);

    CrossSearchResponse {
        query: query.to_string(),
        results,
        total_peers_queried: queried,
        total_peers_responded: responded,
        peer_results,
    }
}

/// Extract a snippet around the first query occurrence.
///
/// Case-insensitive; falls back to the content head when the query does not
/// occur literally (fuzzy matches need not be substrings).
#[must_use]
pub fn extract_snippet(content: &str, query: &str, context: usize) -> String {
    let haystack = content.to_lowercase();
    let needle = query.to_lowercase();

    match haystack.find(&needle) {
        Some(idx) => {
            let start = floor_char_boundary(content, idx.saturating_sub(context));
            let end = ceil_char_boundary(content, (idx + needle.len() + context).min(content.len()));
            let mut snippet = content[start..end].to_string();
            if start > 0 {
                snippet = format!("...{snippet}");
            }
            if end < content.len() {
                snippet.push_str("...");
            }
            snippet
        }
        None => {
            let end = ceil_char_boundary(content, (context * 2).min(content.len()));
            let mut snippet = content[..end].to_string();
            if end < content.len() {
                snippet.push_str("...");
            }
            snippet
        }
    }
}

fn base_url(peer: &PeerLiveStatus) -> String {
    format!("{}://{}:{}/api/federation", peer.protocol, peer.host, peer.port)
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

async fn decode<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        warn!(status = %status, "Peer answered with an error");
        return Err(Error::peer_upstream(status.as_u16(), message));
    }
    resp.json::<T>()
        .await
        .map_err(|e| Error::peer_upstream(502, format!("invalid peer response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_around_match() {
        let content = "a long preamble before the needle sits here and a long tail after it";
        let snippet = extract_snippet(content, "NEEDLE", 10);
        assert!(snippet.contains("needle"));
        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn test_snippet_fallback_to_head() {
        let content = "just some ordinary text without the term";
        let snippet = extract_snippet(content, "zzz", 8);
        assert_eq!(snippet, "just some ordina...");
    }

    #[test]
    fn test_snippet_short_content() {
        assert_eq!(extract_snippet("tiny", "tiny", 100), "tiny");
        assert_eq!(extract_snippet("", "q", 100), "");
    }

    #[test]
    fn test_snippet_multibyte_boundaries() {
        let content = "héllo wörld héllo wörld";
        // Context windows landing mid-codepoint must not panic
        let snippet = extract_snippet(content, "wörld", 3);
        assert!(snippet.contains("wörld"));
    }

    #[test]
    fn test_cross_search_response_wire_shape() {
        let resp = CrossSearchResponse {
            query: "rust".into(),
            results: vec![],
            total_peers_queried: 2,
            total_peers_responded: 1,
            peer_results: HashMap::from([(
                "Atlas".to_string(),
                PeerSearchStats { count: 0, took: 12 },
            )]),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["totalPeersQueried"], 2);
        assert_eq!(json["totalPeersResponded"], 1);
        assert_eq!(json["peerResults"]["Atlas"]["took"], 12);
    }
}
