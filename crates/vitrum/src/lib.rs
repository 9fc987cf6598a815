//! # Vitrum - Local-first document workspace engine
//!
//! Vitrum indexes a folder of plain-text notes with YAML front-matter,
//! watches it for changes, pushes live updates to connected UI clients, and
//! federates with peer instances over a trusted private network: users can
//! search across peers, browse a peer's shared subtree, adopt a peer's
//! document into their own workspace, and track divergence between the
//! adopted copy and its origin with user-resolvable conflicts.
//!
//! ## Architecture
//!
//! Five services cooperate around one in-memory index:
//!
//! - **Document Index**: parse, backlinks, fuzzy search, link graph
//! - **File Watcher**: debounced filesystem observation keeping the index live
//! - **Live-Reload Bus**: typed event fan-out to subscribed client sessions
//! - **Peer Registry**: liveness probing of configured peers with backoff
//! - **Sync Service**: adoption, checksum polling, conflict resolution
//!
//! Dataflow: Watcher → Index → (Bus, Sync Service). The peer registry drives
//! sync polling; the sync service drives bus emissions. The engine is
//! eventually consistent across the federation and makes conflicts a
//! first-class user-resolvable state rather than merging silently.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use parking_lot::RwLock;
//! use vitrum::{Config, DocumentIndex, LiveReloadBus, PeerRegistry, SyncService};
//!
//! # fn main() -> vitrum::Result<()> {
//! let config = Config::new("/home/me/notes").with_display_name("Laptop");
//!
//! let mut index = DocumentIndex::new(config.root());
//! index.build();
//! let index = Arc::new(RwLock::new(index));
//!
//! let bus = LiveReloadBus::new();
//! let registry = Arc::new(PeerRegistry::new(&config, bus.clone())?);
//! let sync = Arc::new(SyncService::new(
//!     config.clone(),
//!     Arc::clone(&index),
//!     Arc::clone(&registry),
//!     bus.clone(),
//! )?);
//!
//! // Hand index/bus/registry/sync to the HTTP surface and spawn the
//! // watcher and polling loops; see the vitrum-server crate.
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`config`]: Engine configuration
//! - [`document`]: Parsing one file into a [`Document`]
//! - [`error`]: Error types and Result alias
//! - [`index`]: The document index, search, and graph queries
//! - [`bus`]: Live-reload event fan-out
//! - [`watcher`]: Debounced filesystem observation
//! - [`peers`]: Peer configuration and liveness registry
//! - [`sync`]: Adoption and divergence tracking
//! - [`federation`]: Outbound peer client and cross-peer fan-out
//!
//! ## Internal Modules
//!
//! - [`frontmatter`]: Raw YAML front-matter machinery shared by the parser
//!   and the sync service

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::all)]

// =============================================================================
// Public modules - stable API
// =============================================================================

pub mod bus;
pub mod config;
pub mod document;
pub mod error;
pub mod federation;
pub mod index;
pub mod peers;
pub mod sync;
pub mod watcher;

// =============================================================================
// Internal modules - not part of the stable API
// =============================================================================

#[doc(hidden)]
pub mod frontmatter;

// =============================================================================
// Public re-exports - the primary public API
// =============================================================================

pub use bus::{BusEvent, LiveReloadBus};
pub use config::Config;
pub use document::Document;
pub use error::{Error, Result};
pub use federation::{CrossSearchResponse, PeerClient};
pub use index::DocumentIndex;
pub use peers::{PeerConfig, PeerLiveStatus, PeerRegistry, PeerState};
pub use sync::{FederationMeta, SyncService, SyncStatus};
pub use watcher::WatcherHandle;

// =============================================================================
// Constants
// =============================================================================

/// Default port of the HTTP surface.
pub const DEFAULT_PORT: u16 = 3847;

/// Filename of the peer configuration at the workspace root.
pub const PEER_CONFIG_FILE: &str = ".vitrum-peers.json";

/// Per-path debounce window for filesystem events, in milliseconds.
///
/// Rapid change bursts on one file coalesce into a single dispatch.
pub const DEBOUNCE_MS: u64 = 100;

/// Interval between peer liveness probes, in seconds.
pub const PEER_POLL_INTERVAL_SECS: u64 = 30;

/// Budget for one `hello` probe, in seconds.
pub const HELLO_TIMEOUT_SECS: u64 = 3;

/// Consecutive failures after which a peer enters backoff.
pub const PEER_FAILURE_THRESHOLD: u32 = 3;

/// Minimum seconds between probes of a peer in backoff.
pub const PEER_BACKOFF_SECS: u64 = 120;

/// Interval between origin checksum polls, in seconds.
pub const SYNC_POLL_INTERVAL_SECS: u64 = 60;

/// Budget for one origin checksum poll, in seconds.
pub const CHECKSUM_TIMEOUT_SECS: u64 = 5;

/// Budget for cross-peer search and browse calls, per peer, in seconds.
pub const CROSS_QUERY_TIMEOUT_SECS: u64 = 5;

/// Budget for adoption and conflict-diff document fetches, in seconds.
pub const ADOPT_TIMEOUT_SECS: u64 = 10;
