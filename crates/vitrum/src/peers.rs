//! The peer registry.
//!
//! Loads peer configuration from `.vitrum-peers.json` at the workspace root,
//! synthesizing one with a fresh instance id on first run, and hot-reloads
//! it when the file's mtime advances. A background loop probes every
//! configured peer with a `hello` request on a fixed interval and tracks
//! per-peer liveness.
//!
//! # Backoff
//!
//! A probe failure flips the peer offline and increments its consecutive
//! failure count. Once the count reaches [`crate::PEER_FAILURE_THRESHOLD`],
//! the peer is only re-probed after [`crate::PEER_BACKOFF_SECS`] have
//! elapsed since it was last touched; a single success flips it back online
//! immediately. Every transition into or out of `online` fires a bus event.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{BusEvent, LiveReloadBus};
use crate::error::{Error, Result};
use crate::{Config, HELLO_TIMEOUT_SECS, PEER_BACKOFF_SECS, PEER_FAILURE_THRESHOLD, PEER_POLL_INTERVAL_SECS};

/// Process-wide peer configuration, stored at the workspace root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// This instance's identity and sharing policy
    #[serde(rename = "self")]
    pub self_info: SelfConfig,
    /// Configured remote peers
    pub peers: Vec<PeerEntry>,
}

/// This instance's identity and sharing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfConfig {
    /// Opaque instance id, generated once on first run and persisted
    #[serde(rename = "instanceId")]
    pub instance_id: String,
    /// Human-readable name shown to peers
    #[serde(rename = "displayName")]
    pub display_name: String,
    /// Path prefixes peers may search, browse, and fetch
    #[serde(rename = "sharedFolders")]
    pub shared_folders: Vec<String>,
    /// Tags peers may filter on
    #[serde(rename = "sharedTags")]
    pub shared_tags: Vec<String>,
}

impl SelfConfig {
    /// Whether a workspace-relative path falls inside a shared subtree
    #[must_use]
    pub fn is_shared(&self, path: &str) -> bool {
        self.shared_folders.iter().any(|f| path.starts_with(f.as_str()))
    }
}

/// One configured remote peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEntry {
    /// Configured display name
    pub name: String,
    /// Hostname on the trusted overlay network
    pub host: String,
    /// Port of the peer's HTTP surface
    pub port: u16,
    /// `http` or `https`
    pub protocol: String,
}

impl PeerEntry {
    /// The `host:port` key identifying this peer in the status table
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL of the peer's federation API
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}/api/federation", self.protocol, self.host, self.port)
    }
}

/// Liveness state of a configured peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    /// Last probe succeeded
    Online,
    /// Last probe failed
    Offline,
    /// Not probed yet
    Unknown,
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Runtime liveness record, one per configured peer.
#[derive(Debug, Clone, Serialize)]
pub struct PeerLiveStatus {
    /// Configured display name
    pub name: String,
    /// Hostname
    pub host: String,
    /// Port
    pub port: u16,
    /// `http` or `https`
    pub protocol: String,
    /// Current liveness
    pub status: PeerState,
    /// Instance id reported by the peer's last successful hello
    #[serde(rename = "instanceId", skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Display name reported by the peer
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Folders the peer shares
    #[serde(rename = "sharedFolders", skip_serializing_if = "Option::is_none")]
    pub shared_folders: Option<Vec<String>>,
    /// Tags the peer shares
    #[serde(rename = "sharedTags", skip_serializing_if = "Option::is_none")]
    pub shared_tags: Option<Vec<String>>,
    /// Document count reported by the peer
    #[serde(rename = "documentCount", skip_serializing_if = "Option::is_none")]
    pub document_count: Option<usize>,
    /// When the peer was last probed (success or failure), RFC 3339
    #[serde(rename = "lastSeen", skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
    /// Round-trip latency of the last successful hello
    #[serde(rename = "latencyMs", skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Probe failures since the last success
    #[serde(rename = "consecutiveFailures")]
    pub consecutive_failures: u32,
}

impl PeerLiveStatus {
    fn unknown(entry: &PeerEntry) -> Self {
        Self {
            name: entry.name.clone(),
            host: entry.host.clone(),
            port: entry.port,
            protocol: entry.protocol.clone(),
            status: PeerState::Unknown,
            instance_id: None,
            display_name: None,
            shared_folders: None,
            shared_tags: None,
            document_count: None,
            last_seen: None,
            latency_ms: None,
            consecutive_failures: 0,
        }
    }

    /// The name to show users: the hello-reported one when available
    #[must_use]
    pub fn effective_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

/// Wire shape of a peer's `hello` answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerHelloResponse {
    /// Peer instance id
    #[serde(rename = "instanceId")]
    pub instance_id: String,
    /// Peer display name
    #[serde(rename = "displayName")]
    pub display_name: String,
    /// Protocol version
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    /// Folders the peer shares
    #[serde(rename = "sharedFolders")]
    pub shared_folders: Vec<String>,
    /// Tags the peer shares
    #[serde(rename = "sharedTags")]
    pub shared_tags: Vec<String>,
    /// Index counters
    pub stats: PeerHelloStats,
    /// Always true on a live answer
    pub online: bool,
    /// Peer uptime in seconds
    pub uptime: u64,
}

/// Index counters inside a hello answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerHelloStats {
    /// Total indexed documents
    #[serde(rename = "documentCount")]
    pub document_count: usize,
    /// Documents of type `knowledge`
    #[serde(rename = "knowledgeCount")]
    pub knowledge_count: usize,
    /// Documents of type `task`
    #[serde(rename = "taskCount")]
    pub task_count: usize,
}

/// Tracks configured peers and their liveness.
pub struct PeerRegistry {
    config_path: PathBuf,
    config: RwLock<PeerConfig>,
    status: RwLock<BTreeMap<String, PeerLiveStatus>>,
    last_config_mtime: RwLock<u64>,
    bus: LiveReloadBus,
    client: reqwest::Client,
}

impl PeerRegistry {
    /// Load (or synthesize) the peer config and build the status table
    pub fn new(config: &Config, bus: LiveReloadBus) -> Result<Self> {
        let config_path = config.peers_file_path();
        let peer_config = load_or_create(&config_path, &config.display_name)?;
        let status = init_status(&peer_config);
        let mtime = file_mtime(&config_path).unwrap_or(0);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HELLO_TIMEOUT_SECS))
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config_path,
            config: RwLock::new(peer_config),
            status: RwLock::new(status),
            last_config_mtime: RwLock::new(mtime),
            bus,
            client,
        })
    }

    /// This instance's identity and sharing policy
    #[must_use]
    pub fn self_config(&self) -> SelfConfig {
        self.config.read().self_info.clone()
    }

    /// All configured peers
    #[must_use]
    pub fn peers(&self) -> Vec<PeerEntry> {
        self.config.read().peers.clone()
    }

    /// Live status of every configured peer
    #[must_use]
    pub fn peer_status(&self) -> Vec<PeerLiveStatus> {
        self.status.read().values().cloned().collect()
    }

    /// Peers currently online
    #[must_use]
    pub fn online_peers(&self) -> Vec<PeerLiveStatus> {
        self.status
            .read()
            .values()
            .filter(|p| p.status == PeerState::Online)
            .cloned()
            .collect()
    }

    /// Look up a peer by `host:port`
    #[must_use]
    pub fn find(&self, host: &str, port: u16) -> Option<PeerLiveStatus> {
        self.status.read().get(&format!("{host}:{port}")).cloned()
    }

    /// Look up a peer by `host:port`, requiring it to be online.
    ///
    /// Distinguishes unknown peers from configured-but-offline ones so the
    /// HTTP layer can answer 404 for both with a precise message.
    pub fn find_online(&self, host: &str, port: u16) -> Result<PeerLiveStatus> {
        let peer = self
            .find(host, port)
            .ok_or_else(|| Error::not_found(format!("peer {host}:{port} is not configured")))?;
        if peer.status != PeerState::Online {
            return Err(Error::peer_offline(format!("peer {host}:{port} is {}", peer.status)));
        }
        Ok(peer)
    }

    /// Start the background probe loop
    pub fn start_polling(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                interval_secs = PEER_POLL_INTERVAL_SECS,
                "Peer polling started"
            );
            registry.poll_all_peers().await;

            let mut interval =
                tokio::time::interval(Duration::from_secs(PEER_POLL_INTERVAL_SECS));
            interval.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("Peer polling received shutdown signal");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        registry.poll_all_peers().await;
                    }
                }
            }
        })
    }

    /// Probe every configured peer that is not in backoff.
    pub async fn poll_all_peers(&self) {
        self.check_config_reload();

        let peers = self.peers();
        let mut probes = Vec::new();
        for peer in peers {
            if self.in_backoff(&peer.key()) {
                debug!(peer = %peer.key(), "Skipping probe (backoff)");
                continue;
            }
            probes.push(self.poll_peer(peer));
        }

        futures::future::join_all(probes).await;
    }

    /// Whether a peer is past the failure threshold and inside its backoff
    /// window.
    fn in_backoff(&self, key: &str) -> bool {
        let status = self.status.read();
        let Some(s) = status.get(key) else {
            return true; // not in the table: nothing to probe
        };
        if s.consecutive_failures < PEER_FAILURE_THRESHOLD {
            return false;
        }
        let Some(last_seen) = s
            .last_seen
            .as_deref()
            .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
        else {
            return false;
        };
        let elapsed = chrono::Utc::now()
            .signed_duration_since(last_seen)
            .num_seconds();
        elapsed < PEER_BACKOFF_SECS as i64
    }

    async fn poll_peer(&self, peer: PeerEntry) {
        let url = format!("{}/hello", peer.base_url());
        let started = Instant::now();

        let outcome = match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                resp.json::<PeerHelloResponse>().await.ok()
            }
            _ => None,
        };

        match outcome {
            Some(hello) => {
                let latency = started.elapsed().as_millis() as u64;
                self.record_success(&peer, hello, latency);
            }
            None => self.record_failure(&peer),
        }
    }

    /// Apply a successful hello to the status table.
    fn record_success(&self, peer: &PeerEntry, hello: PeerHelloResponse, latency_ms: u64) {
        let key = peer.key();
        let event = {
            let mut status = self.status.write();
            let Some(s) = status.get_mut(&key) else {
                return;
            };
            let was_online = s.status == PeerState::Online;
            s.status = PeerState::Online;
            s.instance_id = Some(hello.instance_id);
            s.display_name = Some(hello.display_name);
            s.shared_folders = Some(hello.shared_folders);
            s.shared_tags = Some(hello.shared_tags);
            s.document_count = Some(hello.stats.document_count);
            s.last_seen = Some(chrono::Utc::now().to_rfc3339());
            s.latency_ms = Some(latency_ms);
            s.consecutive_failures = 0;

            (!was_online).then(|| BusEvent::PeerOnline {
                peer: s.effective_name().to_string(),
                host: key.clone(),
            })
        };

        if let Some(event) = event {
            info!(peer = %key, latency_ms, "Peer online");
            self.bus.emit(event);
        }
    }

    /// Apply a probe failure to the status table.
    fn record_failure(&self, peer: &PeerEntry) {
        let key = peer.key();
        let event = {
            let mut status = self.status.write();
            let Some(s) = status.get_mut(&key) else {
                return;
            };
            let was_online = s.status == PeerState::Online;
            s.status = PeerState::Offline;
            s.consecutive_failures += 1;
            // Failures stamp last_seen too: the backoff window measures from
            // the most recent probe, not the last success.
            s.last_seen = Some(chrono::Utc::now().to_rfc3339());

            was_online.then(|| BusEvent::PeerOffline {
                peer: s.effective_name().to_string(),
                host: key.clone(),
            })
        };

        if let Some(event) = event {
            warn!(peer = %key, "Peer offline");
            self.bus.emit(event);
        }
    }

    /// Reload the config file when its mtime advances and reconcile the
    /// status table: new peers start `unknown`, removed peers are dropped,
    /// existing peers keep their state.
    fn check_config_reload(&self) {
        let Some(mtime) = file_mtime(&self.config_path) else {
            return;
        };

        {
            let last = self.last_config_mtime.read();
            if mtime <= *last {
                return;
            }
        }

        let new_config = match load_or_create(&self.config_path, "") {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to reload peer config, keeping previous");
                return;
            }
        };

        let old_count;
        let new_count = new_config.peers.len();
        {
            let mut status = self.status.write();
            let new_keys: std::collections::HashSet<String> =
                new_config.peers.iter().map(PeerEntry::key).collect();

            for peer in &new_config.peers {
                status
                    .entry(peer.key())
                    .or_insert_with(|| PeerLiveStatus::unknown(peer));
            }
            status.retain(|k, _| new_keys.contains(k));
        }
        {
            let mut config = self.config.write();
            old_count = config.peers.len();
            *config = new_config;
        }
        *self.last_config_mtime.write() = mtime;

        if old_count != new_count {
            info!(old_count, new_count, "Peer config hot-reloaded");
        }
    }
}

fn init_status(config: &PeerConfig) -> BTreeMap<String, PeerLiveStatus> {
    config
        .peers
        .iter()
        .map(|p| (p.key(), PeerLiveStatus::unknown(p)))
        .collect()
}

fn load_or_create(path: &Path, display_name: &str) -> Result<PeerConfig> {
    if path.exists() {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::storage(format!("failed to read peer config: {e}")))?;
        return serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("invalid peer config: {e}")));
    }

    let config = PeerConfig {
        self_info: SelfConfig {
            instance_id: Uuid::new_v4().to_string(),
            display_name: if display_name.is_empty() {
                "My Workspace".to_string()
            } else {
                display_name.to_string()
            },
            shared_folders: vec!["knowledge/".to_string()],
            shared_tags: vec![],
        },
        peers: vec![],
    };

    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| Error::internal(format!("failed to serialize peer config: {e}")))?;
    std::fs::write(path, json)
        .map_err(|e| Error::storage(format!("failed to write peer config: {e}")))?;
    info!(
        path = %path.display(),
        instance_id = %config.self_info.instance_id,
        "Created peer config"
    );

    Ok(config)
}

fn file_mtime(path: &Path) -> Option<u64> {
    std::fs::metadata(path)
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
}
