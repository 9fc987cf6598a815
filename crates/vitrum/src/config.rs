//! Configuration for the Vitrum engine.
//!
//! This module provides the [`Config`] struct configuring a workspace engine
//! instance: the workspace root, the advertised host/port, and the display
//! name used when the peer config file is synthesized on first run.
//!
//! # Example
//!
//! ```rust
//! use vitrum::Config;
//!
//! // Simple configuration with just a workspace root
//! let config = Config::new("/home/me/notes");
//!
//! // Full configuration with builder pattern
//! let config = Config::new("/home/me/notes")
//!     .with_port(4000)
//!     .with_display_name("Laptop");
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_PORT, PEER_CONFIG_FILE};

/// Configuration for a Vitrum engine instance.
///
/// # Workspace Layout
///
/// The engine treats `workspace_root` as the single authoritative file store:
///
/// ```text
/// {workspace_root}/
/// ├── .vitrum-peers.json   # peer config (synthesized on first run)
/// ├── inbox/               # destination for documents pushed by peers
/// ├── knowledge/           # ... any nesting of *.md notes
/// └── projects/<name>/     # only CLAUDE.md / README.md are indexed here
/// ```
///
/// # Defaults
///
/// - `port`: 3847
/// - `host`: `"localhost"` (what this instance reports as its own address)
/// - `display_name`: `"My Workspace"` (used only when synthesizing the peer
///   config file)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory of the note workspace.
    ///
    /// All document paths are relative to this directory.
    pub workspace_root: PathBuf,

    /// Port the local HTTP surface listens on.
    pub port: u16,

    /// Hostname this instance advertises to peers (e.g. in reject notices).
    pub host: String,

    /// Display name used when synthesizing `.vitrum-peers.json`.
    pub display_name: String,
}

impl Config {
    /// Create a new configuration with the given workspace root
    #[must_use]
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            port: DEFAULT_PORT,
            host: "localhost".to_string(),
            display_name: "My Workspace".to_string(),
        }
    }

    /// Set the listen port
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the advertised hostname
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the display name
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// The `host:port` pair this instance advertises
    #[must_use]
    pub fn local_host(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Path to the peer configuration file
    #[must_use]
    pub fn peers_file_path(&self) -> PathBuf {
        self.workspace_root.join(PEER_CONFIG_FILE)
    }

    /// Path to the inbox directory for received documents
    #[must_use]
    pub fn inbox_path(&self) -> PathBuf {
        self.workspace_root.join("inbox")
    }

    /// Resolve a workspace-relative document path to an absolute path
    #[must_use]
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.workspace_root.join(relative)
    }

    /// Borrow the workspace root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.workspace_root
    }
}
