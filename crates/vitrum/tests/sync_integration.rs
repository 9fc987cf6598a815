//! Integration tests for adoption, divergence tracking, and resolution.
//!
//! These tests run a stub origin peer on an ephemeral localhost port and
//! drive the full flow: adopt → local edit → origin change → conflict →
//! resolve, plus the cross-peer search fan-out.
//!
//! Run: `cargo test -p vitrum --test sync_integration`

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::RwLock;
use serde::Deserialize;
use tempfile::TempDir;

use vitrum::federation::{self, PeerClient, SearchFilters};
use vitrum::frontmatter;
use vitrum::sync::{extract_federation, AdoptionRequest, ResolveAction, SyncStatus};
use vitrum::{Config, DocumentIndex, LiveReloadBus, PeerRegistry, SyncService};

/// Mutable state of a stub origin peer
struct StubState {
    instance_id: String,
    display_name: String,
    /// Body served for every document fetch
    body: RwLock<String>,
    /// Items served for every search call
    search_items: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct StubFileQuery {
    #[serde(rename = "checksumOnly")]
    checksum_only: Option<String>,
}

async fn stub_hello(State(state): State<Arc<StubState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "instanceId": state.instance_id,
        "displayName": state.display_name,
        "apiVersion": "1",
        "sharedFolders": ["knowledge/"],
        "sharedTags": [],
        "stats": {"documentCount": 1, "knowledgeCount": 1, "taskCount": 0},
        "online": true,
        "uptime": 1,
    }))
}

async fn stub_file(
    State(state): State<Arc<StubState>>,
    AxumPath(path): AxumPath<String>,
    Query(query): Query<StubFileQuery>,
) -> Json<serde_json::Value> {
    let body = state.body.read().clone();
    let checksum = frontmatter::checksum(&body);

    if query.checksum_only.as_deref() == Some("true") {
        return Json(serde_json::json!({"checksum": checksum, "updated": null}));
    }

    Json(serde_json::json!({
        "path": path,
        "title": "X",
        "type": "knowledge",
        "tags": ["shared"],
        "content": body,
        "frontmatter": {"title": "X", "tags": ["shared"]},
        "created": null,
        "updated": null,
        "links": [],
        "backlinks": [],
        "checksum": checksum,
    }))
}

async fn stub_search(
    State(state): State<Arc<StubState>>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "instanceId": state.instance_id,
        "displayName": state.display_name,
        "query": "q",
        "count": state.search_items.len(),
        "items": state.search_items,
    }))
}

/// Spawn a stub peer, returning its address and shared state
async fn spawn_stub(state: Arc<StubState>) -> SocketAddr {
    let app = Router::new()
        .route("/api/federation/hello", get(stub_hello))
        .route("/api/federation/files/{*path}", get(stub_file))
        .route("/api/federation/search", get(stub_search))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

fn stub_state(instance_id: &str, display_name: &str, body: &str) -> Arc<StubState> {
    Arc::new(StubState {
        instance_id: instance_id.to_string(),
        display_name: display_name.to_string(),
        body: RwLock::new(body.to_string()),
        search_items: Vec::new(),
    })
}

fn search_item(path: &str, score: f64) -> serde_json::Value {
    serde_json::json!({
        "path": path,
        "title": path,
        "type": "knowledge",
        "tags": [],
        "score": score,
        "snippet": "...",
    })
}

/// Engine wired against the given configured peers.
///
/// No watcher runs here; tests that need the index to see a freshly written
/// file call [`TestEngine::reindex`], which is the watcher's job in
/// production.
struct TestEngine {
    _dir: TempDir,
    config: Config,
    index: Arc<RwLock<DocumentIndex>>,
    registry: Arc<PeerRegistry>,
    sync: Arc<SyncService>,
    bus: LiveReloadBus,
}

impl TestEngine {
    fn reindex(&self) {
        self.index.write().build();
    }
}

fn engine_with_peers(peers: Vec<(&str, SocketAddr)>) -> TestEngine {
    let dir = TempDir::new().unwrap();
    let config = Config::new(dir.path()).with_display_name("Local");

    let peer_entries: Vec<serde_json::Value> = peers
        .iter()
        .map(|(name, addr)| {
            serde_json::json!({
                "name": name,
                "host": addr.ip().to_string(),
                "port": addr.port(),
                "protocol": "http",
            })
        })
        .collect();
    let peer_config = serde_json::json!({
        "self": {
            "instanceId": "local-instance",
            "displayName": "Local",
            "sharedFolders": ["knowledge/"],
            "sharedTags": [],
        },
        "peers": peer_entries,
    });
    std::fs::write(
        config.peers_file_path(),
        serde_json::to_string_pretty(&peer_config).unwrap(),
    )
    .unwrap();

    let mut index = DocumentIndex::new(dir.path());
    index.build();
    let index = Arc::new(RwLock::new(index));

    let bus = LiveReloadBus::new();
    let registry = Arc::new(PeerRegistry::new(&config, bus.clone()).unwrap());
    let sync = Arc::new(
        SyncService::new(config.clone(), Arc::clone(&index), Arc::clone(&registry), bus.clone())
            .unwrap(),
    );

    TestEngine {
        _dir: dir,
        config,
        index,
        registry,
        sync,
        bus,
    }
}

fn adoption_request(addr: SocketAddr, source_path: &str) -> AdoptionRequest {
    AdoptionRequest {
        peer_id: "origin-instance".to_string(),
        peer_host: addr.ip().to_string(),
        peer_port: addr.port(),
        peer_protocol: "http".to_string(),
        peer_name: "Origin".to_string(),
        source_path: source_path.to_string(),
        target_path: None,
    }
}

#[tokio::test]
async fn test_adoption_writes_synced_document() {
    let stub = stub_state("origin-instance", "Origin", "hello");
    let addr = spawn_stub(Arc::clone(&stub)).await;
    let engine = engine_with_peers(vec![("origin", addr)]);

    let outcome = engine
        .sync
        .adopt_document(&adoption_request(addr, "knowledge/x.md"))
        .await
        .unwrap();

    assert_eq!(outcome.local_path, "knowledge/x.md");
    assert_eq!(outcome.checksum, frontmatter::checksum("hello"));

    let content = std::fs::read_to_string(engine.config.resolve("knowledge/x.md")).unwrap();
    assert_eq!(frontmatter::split(&content).body, "hello");

    let meta = extract_federation(&content).unwrap();
    assert_eq!(meta.sync_status, SyncStatus::Synced);
    assert_eq!(meta.origin_peer, "origin-instance");
    assert_eq!(meta.origin_path, "knowledge/x.md");
    assert_eq!(meta.origin_host, format!("{}:{}", addr.ip(), addr.port()));
    assert_eq!(meta.local_checksum, meta.origin_checksum);
    assert_eq!(meta.local_checksum, frontmatter::checksum("hello"));

    // The peer's own front-matter keys passed through
    let matter =
        frontmatter::parse_mapping(frontmatter::split(&content).front_matter.unwrap()).unwrap();
    assert_eq!(
        matter.get(serde_yaml::Value::from("title")),
        Some(&serde_yaml::Value::from("X"))
    );
}

#[tokio::test]
async fn test_divergence_to_conflict_and_accept_origin() {
    let stub = stub_state("origin-instance", "Origin", "hello");
    let addr = spawn_stub(Arc::clone(&stub)).await;
    let engine = engine_with_peers(vec![("origin", addr)]);

    // Peer must be online for origin polling and resolution
    engine.registry.poll_all_peers().await;
    assert_eq!(engine.registry.online_peers().len(), 1);

    engine
        .sync
        .adopt_document(&adoption_request(addr, "knowledge/x.md"))
        .await
        .unwrap();
    engine.reindex();

    let mut rx = engine.bus.subscribe();

    // Local edit: synced → local-modified
    let local_path = engine.config.resolve("knowledge/x.md");
    let content = std::fs::read_to_string(&local_path).unwrap();
    std::fs::write(&local_path, vitrum::sync::replace_body(&content, "hello world")).unwrap();
    engine.sync.handle_local_change("knowledge/x.md").await;

    let content = std::fs::read_to_string(&local_path).unwrap();
    let meta = extract_federation(&content).unwrap();
    assert_eq!(meta.sync_status, SyncStatus::LocalModified);
    assert_eq!(meta.local_checksum, frontmatter::checksum("hello world"));

    let event: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(event["type"], "sync-status-changed");
    assert_eq!(event["oldStatus"], "synced");
    assert_eq!(event["newStatus"], "local-modified");

    // Origin change: local-modified → conflict
    *stub.body.write() = "hello there".to_string();
    engine.sync.check_all_origins().await;

    let content = std::fs::read_to_string(&local_path).unwrap();
    let meta = extract_federation(&content).unwrap();
    assert_eq!(meta.sync_status, SyncStatus::Conflict);
    assert_eq!(meta.origin_checksum, frontmatter::checksum("hello there"));

    let event: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(event["oldStatus"], "local-modified");
    assert_eq!(event["newStatus"], "conflict");

    // The diff carries both sides; the base is empty in this revision
    let diff = engine.sync.conflict_diff("knowledge/x.md").await.unwrap();
    assert_eq!(diff.local_content, "hello world");
    assert_eq!(diff.origin_content, "hello there");
    assert_eq!(diff.base_content, "");

    // Resolve: accept-origin rewrites the body and re-syncs the checksums
    engine
        .sync
        .resolve("knowledge/x.md", ResolveAction::AcceptOrigin, None, None)
        .await
        .unwrap();

    let content = std::fs::read_to_string(&local_path).unwrap();
    assert_eq!(frontmatter::split(&content).body, "hello there");
    let meta = extract_federation(&content).unwrap();
    assert_eq!(meta.sync_status, SyncStatus::Synced);
    assert_eq!(meta.local_checksum, frontmatter::checksum("hello there"));
    assert_eq!(meta.origin_checksum, frontmatter::checksum("hello there"));
}

#[tokio::test]
async fn test_resolve_merge_writes_merged_content() {
    let stub = stub_state("origin-instance", "Origin", "hello");
    let addr = spawn_stub(Arc::clone(&stub)).await;
    let engine = engine_with_peers(vec![("origin", addr)]);
    engine.registry.poll_all_peers().await;

    engine
        .sync
        .adopt_document(&adoption_request(addr, "knowledge/x.md"))
        .await
        .unwrap();

    let merged = "hello, merged world";
    engine
        .sync
        .resolve("knowledge/x.md", ResolveAction::Merge, Some(merged), None)
        .await
        .unwrap();

    let content =
        std::fs::read_to_string(engine.config.resolve("knowledge/x.md")).unwrap();
    assert_eq!(frontmatter::split(&content).body, merged);
    let meta = extract_federation(&content).unwrap();
    assert_eq!(meta.sync_status, SyncStatus::Synced);
    assert_eq!(meta.local_checksum, frontmatter::checksum(merged));

    // merge without content is a bad request
    let err = engine
        .sync
        .resolve("knowledge/x.md", ResolveAction::Merge, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, vitrum::Error::BadRequest(_)));
}

#[tokio::test]
async fn test_rejected_is_terminal() {
    let stub = stub_state("origin-instance", "Origin", "hello");
    let addr = spawn_stub(Arc::clone(&stub)).await;
    let engine = engine_with_peers(vec![("origin", addr)]);
    engine.registry.poll_all_peers().await;

    engine
        .sync
        .adopt_document(&adoption_request(addr, "knowledge/x.md"))
        .await
        .unwrap();
    engine.reindex();

    engine
        .sync
        .resolve("knowledge/x.md", ResolveAction::Reject, None, None)
        .await
        .unwrap();

    let local_path = engine.config.resolve("knowledge/x.md");
    let meta = extract_federation(&std::fs::read_to_string(&local_path).unwrap()).unwrap();
    assert_eq!(meta.sync_status, SyncStatus::Rejected);

    // Neither local edits nor origin changes move a rejected document
    let content = std::fs::read_to_string(&local_path).unwrap();
    std::fs::write(&local_path, vitrum::sync::replace_body(&content, "edited anyway")).unwrap();
    engine.sync.handle_local_change("knowledge/x.md").await;

    *stub.body.write() = "origin moved on".to_string();
    engine.sync.check_all_origins().await;

    let meta = extract_federation(&std::fs::read_to_string(&local_path).unwrap()).unwrap();
    assert_eq!(meta.sync_status, SyncStatus::Rejected);
}

#[tokio::test]
async fn test_incoming_document_lands_in_inbox() {
    let engine = engine_with_peers(vec![]);
    let mut rx = engine.bus.subscribe();

    let from = federation::SenderInfo {
        instance_id: "sender-1".to_string(),
        display_name: "Atlas Workspace".to_string(),
        host: "atlas:3847".to_string(),
    };
    let inbox_path = engine
        .sync
        .write_incoming_document(
            &from,
            "Weekly Notes",
            "the content",
            &["shared".to_string()],
            "knowledge/weekly.md",
            Some("thought of you"),
        )
        .unwrap();

    assert!(inbox_path.starts_with("inbox/"));
    assert!(inbox_path.contains("-from-atlas-workspace-weekly-notes"));

    let content = std::fs::read_to_string(engine.config.resolve(&inbox_path)).unwrap();
    let matter =
        frontmatter::parse_mapping(frontmatter::split(&content).front_matter.unwrap()).unwrap();
    assert_eq!(
        matter.get(serde_yaml::Value::from("type")),
        Some(&serde_yaml::Value::from("inbox"))
    );
    assert_eq!(
        matter.get(serde_yaml::Value::from("source")),
        Some(&serde_yaml::Value::from("peer"))
    );
    let body = frontmatter::split(&content).body;
    assert!(body.starts_with("# Weekly Notes"));
    assert!(body.contains("> **Message from Atlas Workspace**: thought of you"));
    assert!(body.contains("the content"));

    let event: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(event["type"], "peer-document-received");
    assert_eq!(event["path"], inbox_path);
}

#[tokio::test]
async fn test_cross_search_fan_out_merges_and_ranks() {
    // P1 answers two results, P2 one, P3 is configured but never started
    let p1 = Arc::new(StubState {
        instance_id: "p1".to_string(),
        display_name: "P1".to_string(),
        body: RwLock::new(String::new()),
        search_items: vec![search_item("knowledge/a.md", 0.1), search_item("knowledge/b.md", 0.3)],
    });
    let p2 = Arc::new(StubState {
        instance_id: "p2".to_string(),
        display_name: "P2".to_string(),
        body: RwLock::new(String::new()),
        search_items: vec![search_item("knowledge/c.md", 0.2)],
    });
    let addr1 = spawn_stub(p1).await;
    let addr2 = spawn_stub(p2).await;
    let dead: SocketAddr = "127.0.0.1:1".parse().unwrap();

    let engine = engine_with_peers(vec![("p1", addr1), ("p2", addr2), ("p3", dead)]);
    engine.registry.poll_all_peers().await;
    assert_eq!(engine.registry.online_peers().len(), 2);

    let client = PeerClient::new().unwrap();
    let response = federation::cross_search(
        &engine.registry,
        &client,
        "q",
        SearchFilters::default(),
        20,
    )
    .await;

    assert_eq!(response.total_peers_queried, 2);
    assert_eq!(response.total_peers_responded, 2);

    // Merged and sorted best-first by ascending distance
    let ranked: Vec<(f64, &str)> = response
        .results
        .iter()
        .map(|r| (r.score, r.peer.as_str()))
        .collect();
    assert_eq!(ranked, vec![(0.1, "P1"), (0.2, "P2"), (0.3, "P1")]);

    assert_eq!(response.peer_results["P1"].count, 2);
    assert_eq!(response.peer_results["P2"].count, 1);

    // The limit truncates after the merge
    let limited = federation::cross_search(
        &engine.registry,
        &client,
        "q",
        SearchFilters::default(),
        2,
    )
    .await;
    assert_eq!(limited.results.len(), 2);
    assert_eq!(limited.results[1].score, 0.2);
}
