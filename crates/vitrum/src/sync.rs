//! The sync service.
//!
//! Owns everything about adopted documents: adoption itself, delivery of
//! documents pushed by peers, classification of local edits, periodic origin
//! checksum polling, conflict diffs, and resolution.
//!
//! # Sync states
//!
//! Each adopted document carries a [`SyncStatus`] in its `federation`
//! front-matter block. The admissible transitions:
//!
//! ```text
//! synced ──local edit──▶ local-modified ──origin change──▶ conflict
//! synced ──origin change──▶ origin-modified ──local edit──▶ conflict
//! conflict ──resolve──▶ synced        any ──resolve(reject)──▶ rejected
//! ```
//!
//! `rejected` is terminal: no further polling, no further local-change
//! classification. Every other combination is a no-op.
//!
//! All front-matter writes go through the field-level updater in
//! [`crate::frontmatter`], which preserves sibling keys and the body.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, LiveReloadBus};
use crate::error::{Error, Result};
use crate::federation::{PeerClient, ReceivePayload, RespondPayload, SenderInfo};
use crate::frontmatter;
use crate::index::DocumentIndex;
use crate::peers::{PeerRegistry, PeerState};
use crate::{Config, DEFAULT_PORT, SYNC_POLL_INTERVAL_SECS};

/// The state machine label carried in each adopted document's front-matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    /// Local and origin bodies match the recorded checksums
    Synced,
    /// The local body diverged from the recorded checksum
    LocalModified,
    /// The origin body diverged from the recorded checksum
    OriginModified,
    /// Both sides diverged; awaiting user resolution
    Conflict,
    /// The user rejected the origin; terminal
    Rejected,
}

impl SyncStatus {
    /// Status after a local edit is detected
    #[must_use]
    pub fn on_local_edit(self) -> Self {
        match self {
            Self::Synced => Self::LocalModified,
            Self::OriginModified => Self::Conflict,
            other => other,
        }
    }

    /// Status after an origin change is detected
    #[must_use]
    pub fn on_origin_change(self) -> Self {
        match self {
            Self::Synced => Self::OriginModified,
            Self::LocalModified => Self::Conflict,
            other => other,
        }
    }

    /// The wire string, e.g. `local-modified`
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::LocalModified => "local-modified",
            Self::OriginModified => "origin-modified",
            Self::Conflict => "conflict",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "synced" => Ok(Self::Synced),
            "local-modified" => Ok(Self::LocalModified),
            "origin-modified" => Ok(Self::OriginModified),
            "conflict" => Ok(Self::Conflict),
            "rejected" => Ok(Self::Rejected),
            other => Err(Error::parse(format!("unknown sync status: {other}"))),
        }
    }
}

/// The `federation` front-matter block of an adopted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationMeta {
    /// Instance id of the origin peer
    #[serde(rename = "origin-peer")]
    pub origin_peer: String,
    /// Display name of the origin peer at adoption time
    #[serde(rename = "origin-name")]
    pub origin_name: String,
    /// Origin `host:port`
    #[serde(rename = "origin-host")]
    pub origin_host: String,
    /// Path of the document on the origin
    #[serde(rename = "origin-path")]
    pub origin_path: String,
    /// When the document was adopted, RFC 3339
    #[serde(rename = "adopted-at")]
    pub adopted_at: String,
    /// Last known checksum of the origin body
    #[serde(rename = "origin-checksum")]
    pub origin_checksum: String,
    /// Checksum of the local body at the last classification
    #[serde(rename = "local-checksum")]
    pub local_checksum: String,
    /// Current sync state
    #[serde(rename = "sync-status")]
    pub sync_status: SyncStatus,
    /// When the origin was last polled, RFC 3339
    #[serde(rename = "last-sync-check")]
    pub last_sync_check: String,
}

impl FederationMeta {
    /// Split `origin-host` into host and port, defaulting the engine port
    #[must_use]
    pub fn origin_host_port(&self) -> (&str, u16) {
        split_host_port(&self.origin_host)
    }
}

/// An adopted document as listed by `GET /api/federation/shared`.
#[derive(Debug, Clone, Serialize)]
pub struct SharedDocument {
    /// Local workspace-relative path
    #[serde(rename = "localPath")]
    pub local_path: String,
    /// Document title
    pub title: String,
    /// Document type
    #[serde(rename = "type")]
    pub doc_type: String,
    /// Document tags
    pub tags: Vec<String>,
    /// The federation block
    pub federation: FederationMeta,
}

/// Everything a merge UI needs to resolve a conflict.
///
/// The engine does not retain the adoption-time base; `base_content` is
/// empty and consumers operate as two-way with the checksum hints.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictDiff {
    /// Current local body
    #[serde(rename = "localContent")]
    pub local_content: String,
    /// Current origin body
    #[serde(rename = "originContent")]
    pub origin_content: String,
    /// Adoption-time base; always empty in this revision
    #[serde(rename = "baseContent")]
    pub base_content: String,
    /// Checksum of the local body
    #[serde(rename = "localChecksum")]
    pub local_checksum: String,
    /// Checksum of the origin body
    #[serde(rename = "originChecksum")]
    pub origin_checksum: String,
}

/// Parameters of an adoption.
#[derive(Debug, Clone)]
pub struct AdoptionRequest {
    /// Instance id of the origin peer
    pub peer_id: String,
    /// Origin hostname
    pub peer_host: String,
    /// Origin port
    pub peer_port: u16,
    /// `http` or `https`
    pub peer_protocol: String,
    /// Origin display name
    pub peer_name: String,
    /// Path of the document on the origin
    pub source_path: String,
    /// Local path to write; defaults to `source_path`
    pub target_path: Option<String>,
}

/// Outcome of a successful adoption.
#[derive(Debug, Clone, Serialize)]
pub struct AdoptionOutcome {
    /// Where the document landed locally
    #[serde(rename = "localPath")]
    pub local_path: String,
    /// The recorded checksum
    pub checksum: String,
}

/// A conflict resolution action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolveAction {
    /// Overwrite the local body with the current origin body
    AcceptOrigin,
    /// Keep the local body and fast-forward the sync state
    KeepLocal,
    /// Write user-merged content
    Merge,
    /// Stop tracking the origin; terminal
    Reject,
}

/// Tracks adopted documents and their relationship to their origins.
pub struct SyncService {
    config: Config,
    index: Arc<RwLock<DocumentIndex>>,
    registry: Arc<PeerRegistry>,
    bus: LiveReloadBus,
    client: PeerClient,
}

impl SyncService {
    /// Wire up the sync service
    pub fn new(
        config: Config,
        index: Arc<RwLock<DocumentIndex>>,
        registry: Arc<PeerRegistry>,
        bus: LiveReloadBus,
    ) -> Result<Self> {
        Ok(Self {
            config,
            index,
            registry,
            bus,
            client: PeerClient::new()?,
        })
    }

    /// Adopt a document from a peer.
    ///
    /// Fetches the document with the adoption budget, writes it locally with
    /// the peer's front-matter merged with a fresh `federation` block, and
    /// returns the local path and checksum. The watcher picks up the write
    /// and the index absorbs it.
    pub async fn adopt_document(&self, req: &AdoptionRequest) -> Result<AdoptionOutcome> {
        let origin = self
            .client
            .fetch_document(&req.peer_protocol, &req.peer_host, req.peer_port, &req.source_path)
            .await?;

        let local_path = req.target_path.as_deref().unwrap_or(&req.source_path);
        let full_path = self.config.resolve(local_path);
        if let Some(dir) = full_path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| Error::storage(format!("failed to create directory: {e}")))?;
        }

        let now = chrono::Utc::now().to_rfc3339();
        let checksum = if origin.checksum.is_empty() {
            frontmatter::checksum(&origin.content)
        } else {
            origin.checksum.clone()
        };

        let meta = FederationMeta {
            origin_peer: req.peer_id.clone(),
            origin_name: req.peer_name.clone(),
            origin_host: format!("{}:{}", req.peer_host, req.peer_port),
            origin_path: req.source_path.clone(),
            adopted_at: now.clone(),
            origin_checksum: checksum.clone(),
            local_checksum: checksum.clone(),
            sync_status: SyncStatus::Synced,
            last_sync_check: now,
        };

        let matter = merged_front_matter(&origin.frontmatter, &meta)?;
        let rendered = frontmatter::render(&matter)?;
        let file = format!("{rendered}{}", origin.content);

        std::fs::write(&full_path, file)
            .map_err(|e| Error::storage(format!("failed to write adopted document: {e}")))?;

        info!(
            source = %req.source_path,
            local = %local_path,
            peer = %req.peer_name,
            "Adopted document"
        );

        Ok(AdoptionOutcome {
            local_path: local_path.to_string(),
            checksum,
        })
    }

    /// Write a document pushed by a peer into the inbox.
    ///
    /// Returns the inbox-relative path and emits `peer-document-received`.
    pub fn write_incoming_document(
        &self,
        from: &SenderInfo,
        title: &str,
        content: &str,
        tags: &[String],
        source_path: &str,
        message: Option<&str>,
    ) -> Result<String> {
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S");
        let filename = format!(
            "{timestamp}-from-{}-{}.md",
            slug(&from.display_name, 30),
            slug(title, 50)
        );
        let inbox_dir = self.config.inbox_path();
        std::fs::create_dir_all(&inbox_dir)
            .map_err(|e| Error::storage(format!("failed to create inbox: {e}")))?;

        let mut matter = serde_yaml::Mapping::new();
        let mut put = |k: &str, v: serde_yaml::Value| {
            matter.insert(serde_yaml::Value::from(k), v);
        };
        put("type", "inbox".into());
        put("created", chrono::Utc::now().format("%Y-%m-%d").to_string().into());
        put("source", "peer".into());
        put("from-name", from.display_name.clone().into());
        put("from-instance", from.instance_id.clone().into());
        put("from-host", from.host.clone().into());
        put("original-path", source_path.to_string().into());
        put(
            "tags",
            serde_yaml::Value::Sequence(tags.iter().map(|t| t.clone().into()).collect()),
        );

        let mut body = format!("# {title}\n\n");
        if let Some(msg) = message {
            body.push_str(&format!("> **Message from {}**: {msg}\n\n", from.display_name));
        }
        body.push_str(&format!(
            "*Shared from {} ({source_path})*\n\n---\n\n{content}",
            from.display_name
        ));

        let file = format!("{}{body}", frontmatter::render(&matter)?);
        std::fs::write(inbox_dir.join(&filename), file)
            .map_err(|e| Error::storage(format!("failed to write inbox document: {e}")))?;

        let inbox_path = format!("inbox/{filename}");
        info!(from = %from.display_name, path = %inbox_path, "Received document");
        self.bus.emit(BusEvent::PeerDocumentReceived {
            path: inbox_path.clone(),
        });

        Ok(inbox_path)
    }

    /// All adopted documents, read from disk so the federation block is
    /// always current.
    pub fn shared_documents(&self) -> Vec<SharedDocument> {
        let candidates: Vec<(String, String, String, Vec<String>)> = {
            let index = self.index.read();
            index
                .documents()
                .map(|d| (d.path.clone(), d.title.clone(), d.doc_type.clone(), d.tags.clone()))
                .collect()
        };

        let mut shared = Vec::new();
        for (path, title, doc_type, tags) in candidates {
            let full = self.config.resolve(&path);
            let Ok(content) = std::fs::read_to_string(&full) else {
                continue;
            };
            if let Some(federation) = extract_federation(&content) {
                shared.push(SharedDocument {
                    local_path: path,
                    title,
                    doc_type,
                    tags,
                    federation,
                });
            }
        }
        shared
    }

    /// Classify a local file change reported by the watcher.
    ///
    /// Non-adopted and rejected documents are ignored. A body checksum that
    /// diverged from the recorded `local-checksum` updates the checksum on
    /// disk and drives the local-edit transition; the bus hears about it only
    /// when the status actually changed.
    pub async fn handle_local_change(&self, path: &str) {
        let full = self.config.resolve(path);
        let Ok(content) = std::fs::read_to_string(&full) else {
            return;
        };
        let Some(meta) = extract_federation(&content) else {
            return;
        };
        if meta.sync_status == SyncStatus::Rejected {
            return;
        }

        let body = frontmatter::split(&content).body;
        let current = frontmatter::checksum(body);
        if current == meta.local_checksum {
            return;
        }

        let old = meta.sync_status;
        let new = old.on_local_edit();

        let mut updates = vec![("local-checksum", current.as_str())];
        let new_str = new.as_str();
        if new != old {
            updates.push(("sync-status", new_str));
        }
        self.write_federation_fields(path, &content, &updates);

        if new != old {
            debug!(path, old = %old, new = %new, "Local edit classified");
            self.bus.emit(BusEvent::SyncStatusChanged {
                path: path.to_string(),
                old_status: old.to_string(),
                new_status: new.to_string(),
                peer: Some(meta.origin_name.clone()),
            });
        }
    }

    /// Start the periodic origin-checksum polling loop
    pub fn start_polling(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                interval_secs = SYNC_POLL_INTERVAL_SECS,
                "Origin polling started"
            );
            let mut interval = tokio::time::interval(Duration::from_secs(SYNC_POLL_INTERVAL_SECS));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("Origin polling received shutdown signal");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        service.check_all_origins().await;
                    }
                }
            }
        })
    }

    /// Poll the origin of every adopted, non-rejected document once.
    pub async fn check_all_origins(&self) {
        for doc in self.shared_documents() {
            if doc.federation.sync_status == SyncStatus::Rejected {
                continue;
            }
            self.check_origin(&doc.local_path, &doc.federation).await;
        }
    }

    /// Compare one document's origin checksum against the recorded one.
    async fn check_origin(&self, local_path: &str, meta: &FederationMeta) {
        let (host, port) = meta.origin_host_port();
        let Some(peer) = self.registry.find(host, port) else {
            return;
        };
        if peer.status != PeerState::Online {
            return;
        }

        let answer = match self.client.fetch_checksum(&peer, &meta.origin_path).await {
            Ok(a) => a,
            Err(e) => {
                // Origin unreachable mid-poll: skip, the next tick retries.
                debug!(path = %local_path, error = %e, "Origin checksum poll failed");
                return;
            }
        };

        let Ok(content) = std::fs::read_to_string(self.config.resolve(local_path)) else {
            return;
        };
        let now = chrono::Utc::now().to_rfc3339();

        if answer.checksum == meta.origin_checksum {
            self.write_federation_fields(local_path, &content, &[("last-sync-check", &now)]);
            return;
        }

        let old = meta.sync_status;
        let new = old.on_origin_change();

        let mut updates = vec![
            ("origin-checksum", answer.checksum.as_str()),
            ("last-sync-check", now.as_str()),
        ];
        let new_str = new.as_str();
        if new != old {
            updates.push(("sync-status", new_str));
        }
        self.write_federation_fields(local_path, &content, &updates);

        if new != old {
            info!(path = %local_path, old = %old, new = %new, "Origin changed");
            self.bus.emit(BusEvent::SyncStatusChanged {
                path: local_path.to_string(),
                old_status: old.to_string(),
                new_status: new.to_string(),
                peer: Some(meta.origin_name.clone()),
            });
        }
    }

    /// Fetch both sides of a conflict for a merge UI.
    pub async fn conflict_diff(&self, local_path: &str) -> Result<ConflictDiff> {
        let full = self.config.resolve(local_path);
        let content = std::fs::read_to_string(&full)
            .map_err(|_| Error::not_found(format!("no such document: {local_path}")))?;
        let meta = extract_federation(&content)
            .ok_or_else(|| Error::not_found(format!("{local_path} is not an adopted document")))?;

        let (host, port) = meta.origin_host_port();
        let peer = self.registry.find_online(host, port)?;
        let origin = self
            .client
            .fetch_document(&peer.protocol, &peer.host, peer.port, &meta.origin_path)
            .await?;

        let body = frontmatter::split(&content).body.to_string();
        let local_checksum = frontmatter::checksum(&body);

        Ok(ConflictDiff {
            local_content: body,
            origin_content: origin.content,
            base_content: String::new(),
            local_checksum,
            origin_checksum: origin.checksum,
        })
    }

    /// Resolve a conflict (or reject tracking altogether).
    pub async fn resolve(
        &self,
        local_path: &str,
        action: ResolveAction,
        merged_content: Option<&str>,
        comment: Option<&str>,
    ) -> Result<()> {
        let full = self.config.resolve(local_path);
        let content = std::fs::read_to_string(&full)
            .map_err(|_| Error::not_found(format!("no such document: {local_path}")))?;
        let meta = extract_federation(&content)
            .ok_or_else(|| Error::not_found(format!("{local_path} is not an adopted document")))?;

        let now = chrono::Utc::now().to_rfc3339();
        let old = meta.sync_status;

        let new = match action {
            ResolveAction::AcceptOrigin => {
                let diff = self.conflict_diff(local_path).await?;
                let with_body = replace_body(&content, &diff.origin_content);
                let updated = frontmatter::update_federation_fields(
                    &with_body,
                    &[
                        ("local-checksum", &diff.origin_checksum),
                        ("origin-checksum", &diff.origin_checksum),
                        ("sync-status", SyncStatus::Synced.as_str()),
                        ("last-sync-check", &now),
                    ],
                )
                .unwrap_or(with_body);
                std::fs::write(&full, updated)
                    .map_err(|e| Error::storage(format!("failed to write resolution: {e}")))?;
                SyncStatus::Synced
            }
            ResolveAction::KeepLocal => {
                self.write_federation_fields(
                    local_path,
                    &content,
                    &[
                        ("sync-status", SyncStatus::Synced.as_str()),
                        ("last-sync-check", &now),
                    ],
                );
                SyncStatus::Synced
            }
            ResolveAction::Merge => {
                let merged = merged_content
                    .ok_or_else(|| Error::bad_request("merge requires mergedContent"))?;
                let merged_checksum = frontmatter::checksum(merged);
                let with_body = replace_body(&content, merged);
                let updated = frontmatter::update_federation_fields(
                    &with_body,
                    &[
                        ("local-checksum", &merged_checksum),
                        ("sync-status", SyncStatus::Synced.as_str()),
                        ("last-sync-check", &now),
                    ],
                )
                .unwrap_or(with_body);
                std::fs::write(&full, updated)
                    .map_err(|e| Error::storage(format!("failed to write resolution: {e}")))?;
                SyncStatus::Synced
            }
            ResolveAction::Reject => {
                self.write_federation_fields(
                    local_path,
                    &content,
                    &[("sync-status", SyncStatus::Rejected.as_str())],
                );
                if let Some(comment) = comment.filter(|c| !c.is_empty()) {
                    self.notify_origin_of_rejection(&meta, comment).await;
                }
                SyncStatus::Rejected
            }
        };

        info!(path = %local_path, action = ?action, "Conflict resolved");
        if new != old {
            self.bus.emit(BusEvent::SyncStatusChanged {
                path: local_path.to_string(),
                old_status: old.to_string(),
                new_status: new.to_string(),
                peer: Some(meta.origin_name.clone()),
            });
        }
        Ok(())
    }

    /// Best-effort rejection notice to the origin; failures are swallowed.
    async fn notify_origin_of_rejection(&self, meta: &FederationMeta, comment: &str) {
        let (host, port) = meta.origin_host_port();
        let Some(peer) = self.registry.find(host, port) else {
            return;
        };
        if peer.status != PeerState::Online {
            return;
        }

        let self_config = self.registry.self_config();
        let payload = RespondPayload {
            from: SenderInfo {
                instance_id: self_config.instance_id,
                display_name: self_config.display_name,
                host: self.config.local_host(),
            },
            action: "rejected".to_string(),
            original_path: meta.origin_path.clone(),
            comment: Some(comment.to_string()),
        };

        if let Err(e) = self
            .client
            .respond(&peer.protocol, &peer.host, peer.port, &payload)
            .await
        {
            debug!(peer = %meta.origin_host, error = %e, "Rejection notice not delivered");
        }
    }

    /// Push one local document to a peer's `receive` endpoint.
    pub async fn send_document(
        &self,
        peer_host: &str,
        source_path: &str,
        message: Option<&str>,
    ) -> Result<String> {
        let (host, port) = split_host_port(peer_host);
        let peer = self.registry.find_online(host, port)?;

        let (title, tags) = {
            let index = self.index.read();
            let doc = index
                .get(source_path)
                .ok_or_else(|| Error::not_found(format!("no such document: {source_path}")))?;
            (doc.title.clone(), doc.tags.clone())
        };

        let content = std::fs::read_to_string(self.config.resolve(source_path))
            .map_err(|e| Error::storage(format!("failed to read document: {e}")))?;
        let body = frontmatter::split(&content).body.to_string();

        let self_config = self.registry.self_config();
        let payload = ReceivePayload {
            from: SenderInfo {
                instance_id: self_config.instance_id,
                display_name: self_config.display_name,
                host: self.config.local_host(),
            },
            document: crate::federation::PushedDocument {
                title,
                content: body,
                tags,
                source_path: source_path.to_string(),
            },
            message: message.map(str::to_string),
        };

        self.client.send_document(&peer, &payload).await?;
        Ok(peer.effective_name().to_string())
    }

    /// Rewrite federation fields, logging instead of failing: polling and
    /// classification are background work with nobody to answer to.
    fn write_federation_fields(&self, local_path: &str, content: &str, updates: &[(&str, &str)]) {
        let Some(updated) = frontmatter::update_federation_fields(content, updates) else {
            warn!(path = %local_path, "Document lost its federation block");
            return;
        };
        if let Err(e) = std::fs::write(self.config.resolve(local_path), updated) {
            warn!(path = %local_path, error = %e, "Failed to update federation fields");
        }
    }
}

/// Extract the typed federation block from raw file content.
///
/// Returns `None` for documents that are not adopted or whose block is
/// incomplete; such files are simply not sync-tracked.
#[must_use]
pub fn extract_federation(content: &str) -> Option<FederationMeta> {
    let block = frontmatter::split(content).front_matter?;
    let matter = frontmatter::parse_mapping(block).ok()?;
    let federation = matter.get(serde_yaml::Value::from("federation"))?;
    let meta: FederationMeta = serde_yaml::from_value(federation.clone()).ok()?;
    if meta.origin_peer.is_empty() {
        return None;
    }
    Some(meta)
}

/// Replace a document's body, keeping the front-matter block untouched.
#[must_use]
pub fn replace_body(content: &str, new_body: &str) -> String {
    match frontmatter::split(content).front_matter {
        Some(fm) => format!("---\n{fm}---\n{new_body}"),
        None => new_body.to_string(),
    }
}

/// Merge a peer's front-matter with a fresh federation block.
///
/// Every key the peer sent passes through verbatim except a stale
/// `federation` block, which is replaced by ours.
fn merged_front_matter(
    peer_frontmatter: &serde_json::Value,
    meta: &FederationMeta,
) -> Result<serde_yaml::Mapping> {
    let mut matter = match serde_yaml::to_value(peer_frontmatter) {
        Ok(serde_yaml::Value::Mapping(map)) => map,
        Ok(_) => serde_yaml::Mapping::new(),
        Err(e) => return Err(Error::internal(format!("front-matter conversion failed: {e}"))),
    };
    matter.remove(serde_yaml::Value::from("federation"));

    let federation = serde_yaml::to_value(meta)
        .map_err(|e| Error::internal(format!("federation block serialization failed: {e}")))?;
    matter.insert(serde_yaml::Value::from("federation"), federation);
    Ok(matter)
}

fn split_host_port(host_port: &str) -> (&str, u16) {
    match host_port.split_once(':') {
        Some((host, port)) => (host, port.parse().unwrap_or(DEFAULT_PORT)),
        None => (host_port, DEFAULT_PORT),
    }
}

fn slug(text: &str, max_len: usize) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .take(max_len)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_local_edit() {
        assert_eq!(SyncStatus::Synced.on_local_edit(), SyncStatus::LocalModified);
        assert_eq!(SyncStatus::OriginModified.on_local_edit(), SyncStatus::Conflict);
        // No-ops
        assert_eq!(SyncStatus::LocalModified.on_local_edit(), SyncStatus::LocalModified);
        assert_eq!(SyncStatus::Conflict.on_local_edit(), SyncStatus::Conflict);
        assert_eq!(SyncStatus::Rejected.on_local_edit(), SyncStatus::Rejected);
    }

    #[test]
    fn test_state_machine_origin_change() {
        assert_eq!(SyncStatus::Synced.on_origin_change(), SyncStatus::OriginModified);
        assert_eq!(SyncStatus::LocalModified.on_origin_change(), SyncStatus::Conflict);
        // No-ops
        assert_eq!(SyncStatus::OriginModified.on_origin_change(), SyncStatus::OriginModified);
        assert_eq!(SyncStatus::Conflict.on_origin_change(), SyncStatus::Conflict);
        assert_eq!(SyncStatus::Rejected.on_origin_change(), SyncStatus::Rejected);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            SyncStatus::Synced,
            SyncStatus::LocalModified,
            SyncStatus::OriginModified,
            SyncStatus::Conflict,
            SyncStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("half-synced".parse::<SyncStatus>().is_err());
    }

    const ADOPTED: &str = "---\ntitle: Adopted\nfederation:\n  origin-peer: 'peer-1'\n  origin-name: 'Atlas'\n  origin-host: 'atlas:3847'\n  origin-path: 'knowledge/x.md'\n  adopted-at: '2026-01-01T00:00:00Z'\n  origin-checksum: 'sha256:aaa'\n  local-checksum: 'sha256:aaa'\n  sync-status: 'synced'\n  last-sync-check: '2026-01-01T00:00:00Z'\n---\nhello\n";

    #[test]
    fn test_extract_federation() {
        let meta = extract_federation(ADOPTED).unwrap();
        assert_eq!(meta.origin_peer, "peer-1");
        assert_eq!(meta.origin_host_port(), ("atlas", 3847));
        assert_eq!(meta.sync_status, SyncStatus::Synced);

        assert!(extract_federation("---\ntitle: Plain\n---\nbody").is_none());
        assert!(extract_federation("no front-matter at all").is_none());
    }

    #[test]
    fn test_extract_federation_requires_origin_peer() {
        let content = "---\nfederation:\n  origin-peer: ''\n  origin-name: 'x'\n  origin-host: 'h:1'\n  origin-path: 'p'\n  adopted-at: 'now'\n  origin-checksum: 'c'\n  local-checksum: 'c'\n  sync-status: 'synced'\n  last-sync-check: 'now'\n---\nbody";
        assert!(extract_federation(content).is_none());
    }

    #[test]
    fn test_replace_body_keeps_front_matter() {
        let replaced = replace_body(ADOPTED, "hello there\n");
        assert!(replaced.contains("origin-peer: 'peer-1'"));
        assert!(replaced.ends_with("---\nhello there\n"));
        assert_eq!(frontmatter::split(&replaced).body, "hello there\n");

        assert_eq!(replace_body("plain body", "new"), "new");
    }

    #[test]
    fn test_merged_front_matter_passthrough() {
        let peer_fm = serde_json::json!({
            "title": "Doc",
            "tags": ["a", "b"],
            "custom": {"nested": true},
            "federation": {"origin-peer": "stale"},
        });
        let meta = extract_federation(ADOPTED).unwrap();
        let merged = merged_front_matter(&peer_fm, &meta).unwrap();

        assert_eq!(
            merged.get(serde_yaml::Value::from("title")),
            Some(&serde_yaml::Value::from("Doc"))
        );
        assert!(merged.contains_key(serde_yaml::Value::from("custom")));

        // The stale federation block was replaced by ours
        let federation = merged.get(serde_yaml::Value::from("federation")).unwrap();
        let parsed: FederationMeta = serde_yaml::from_value(federation.clone()).unwrap();
        assert_eq!(parsed.origin_peer, "peer-1");

        // And the whole thing survives a render/parse cycle
        let rendered = frontmatter::render(&merged).unwrap();
        let reparsed = extract_federation(&format!("{rendered}body")).unwrap();
        assert_eq!(reparsed.origin_peer, "peer-1");
        assert_eq!(reparsed.sync_status, SyncStatus::Synced);
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("atlas:4000"), ("atlas", 4000));
        assert_eq!(split_host_port("atlas"), ("atlas", DEFAULT_PORT));
        assert_eq!(split_host_port("atlas:bad"), ("atlas", DEFAULT_PORT));
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Hello, World!", 50), "hello--world-");
        assert_eq!(slug("Weekly Sync Notes", 6), "weekly");
    }

    #[test]
    fn test_sync_status_serde_kebab() {
        assert_eq!(
            serde_json::to_value(SyncStatus::LocalModified).unwrap(),
            serde_json::json!("local-modified")
        );
        let status: SyncStatus = serde_json::from_value(serde_json::json!("origin-modified")).unwrap();
        assert_eq!(status, SyncStatus::OriginModified);
    }
}
