//! The live-reload bus.
//!
//! A fan-out channel carrying typed engine events to subscribed client
//! sessions. Emissions are small JSON values stamped with a wall-clock
//! millisecond timestamp. Delivery is best-effort: the bus never blocks on a
//! slow subscriber, and the WebSocket layer drops subscribers whose sends
//! fail. Within one subscriber, emissions arrive in enqueue order; no order
//! is promised across subscribers.

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Buffered emissions per subscriber before a laggard starts losing events
const CHANNEL_CAPACITY: usize = 64;

/// A typed bus emission.
///
/// Serializes as `{"type": "<kebab-case-kind>", ...fields}`; the timestamp
/// is stamped at emit time by the bus.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BusEvent {
    /// Force clients to re-fetch everything
    Reload,
    /// A document was added or changed
    Update {
        /// Workspace-relative path
        path: String,
    },
    /// A document was removed
    Remove {
        /// Workspace-relative path
        path: String,
    },
    /// A configured peer came online
    PeerOnline {
        /// Peer display name
        peer: String,
        /// Peer `host:port`
        host: String,
    },
    /// A configured peer went offline
    PeerOffline {
        /// Peer display name
        peer: String,
        /// Peer `host:port`
        host: String,
    },
    /// A pushed document landed in the inbox
    PeerDocumentReceived {
        /// Inbox-relative path of the delivered file
        path: String,
    },
    /// An adopted document's sync status changed
    SyncStatusChanged {
        /// Workspace-relative path
        path: String,
        /// Status before the transition
        #[serde(rename = "oldStatus")]
        old_status: String,
        /// Status after the transition
        #[serde(rename = "newStatus")]
        new_status: String,
        /// Origin peer display name, when known
        #[serde(skip_serializing_if = "Option::is_none")]
        peer: Option<String>,
    },
}

/// Fan-out notification channel for subscribed client sessions.
#[derive(Debug, Clone)]
pub struct LiveReloadBus {
    tx: broadcast::Sender<String>,
}

impl LiveReloadBus {
    /// Create a new bus with no subscribers
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe a new session.
    ///
    /// The receiver yields serialized emissions in enqueue order. A receiver
    /// that falls more than the channel capacity behind observes a lag error
    /// and misses the overwritten events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Number of currently subscribed sessions
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Emit an event to every subscriber, stamped with the current time.
    pub fn emit(&self, event: BusEvent) {
        let message = match serialize_with_timestamp(&event, Utc::now().timestamp_millis()) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "Failed to serialize bus event");
                return;
            }
        };

        // Send only fails when nobody is subscribed, which is fine.
        if self.tx.send(message).is_err() {
            debug!("Bus emission with no subscribers");
        }
    }
}

impl Default for LiveReloadBus {
    fn default() -> Self {
        Self::new()
    }
}

fn serialize_with_timestamp(event: &BusEvent, timestamp_ms: i64) -> serde_json::Result<String> {
    let mut value = serde_json::to_value(event)?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("timestamp".to_string(), serde_json::Value::from(timestamp_ms));
    }
    serde_json::to_string(&value)
}
