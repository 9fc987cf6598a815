//! Error types for Vitrum.
//!
//! This module defines the [`enum@Error`] enum and [`Result`] type alias used
//! throughout the engine.
//!
//! # Error Categories
//!
//! Errors are categorized by the operation that failed:
//!
//! - [`Error::Parse`] - A document could not be parsed
//! - [`Error::Storage`] - Filesystem reads/writes under the workspace root
//! - [`Error::Config`] - Peer or engine configuration issues
//! - [`Error::BadRequest`] - Missing or invalid request parameters
//! - [`Error::NotFound`] - No such document, path, or peer
//! - [`Error::Forbidden`] - Path outside a shared subtree
//! - [`Error::PeerOffline`] - The selected peer is not currently online
//! - [`Error::PeerTimeout`] - A per-call peer budget was exceeded
//! - [`Error::PeerUpstream`] - A peer answered with a non-2xx status
//! - [`Error::Internal`] - Unexpected failures
//!
//! The HTTP layer maps these to response statuses; see `vitrum-server`.

use std::sync::Arc;
use thiserror::Error;

/// Result type alias for Vitrum operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Vitrum operations
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A document could not be parsed
    #[error("parse error: {0}")]
    Parse(Arc<str>),

    /// Filesystem operation failed
    #[error("storage error: {0}")]
    Storage(Arc<str>),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(Arc<str>),

    /// Missing or invalid request parameters
    #[error("bad request: {0}")]
    BadRequest(Arc<str>),

    /// No such document, path, or peer
    #[error("not found: {0}")]
    NotFound(Arc<str>),

    /// Requested path is outside a shared subtree
    #[error("forbidden: {0}")]
    Forbidden(Arc<str>),

    /// The selected peer is not currently online
    #[error("peer offline: {0}")]
    PeerOffline(Arc<str>),

    /// A per-call peer budget was exceeded
    #[error("peer timed out: {0}")]
    PeerTimeout(Arc<str>),

    /// A peer answered with a non-2xx status
    #[error("peer returned {status}: {message}")]
    PeerUpstream {
        /// The HTTP status the peer answered with
        status: u16,
        /// Upstream error detail
        message: Arc<str>,
    },

    /// Unexpected failure
    #[error("internal error: {0}")]
    Internal(Arc<str>),
}

impl Error {
    /// Create a parse error
    #[inline]
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(Arc::from(msg.into()))
    }

    /// Create a storage error
    #[inline]
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(Arc::from(msg.into()))
    }

    /// Create a configuration error
    #[inline]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(Arc::from(msg.into()))
    }

    /// Create a bad-request error
    #[inline]
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(Arc::from(msg.into()))
    }

    /// Create a not-found error
    #[inline]
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(Arc::from(msg.into()))
    }

    /// Create a forbidden error
    #[inline]
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(Arc::from(msg.into()))
    }

    /// Create a peer-offline error
    #[inline]
    pub fn peer_offline(msg: impl Into<String>) -> Self {
        Self::PeerOffline(Arc::from(msg.into()))
    }

    /// Create a peer-timeout error
    #[inline]
    pub fn peer_timeout(msg: impl Into<String>) -> Self {
        Self::PeerTimeout(Arc::from(msg.into()))
    }

    /// Create a peer-upstream error
    #[inline]
    pub fn peer_upstream(status: u16, msg: impl Into<String>) -> Self {
        Self::PeerUpstream {
            status,
            message: Arc::from(msg.into()),
        }
    }

    /// Create an internal error
    #[inline]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(Arc::from(msg.into()))
    }

    /// Classify a [`reqwest::Error`] as timeout or upstream failure.
    ///
    /// Exceeded budgets are peer failures with their own error kind so the
    /// HTTP layer can answer 504 instead of 502.
    pub fn from_peer_request(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::peer_timeout(err.to_string())
        } else if let Some(status) = err.status() {
            Self::peer_upstream(status.as_u16(), err.to_string())
        } else {
            Self::peer_upstream(502, err.to_string())
        }
    }
}
