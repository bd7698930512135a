//! Types shared between the cache worker and the page-side hook

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Unique identifier for a page (window client)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl ClientId {
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Control message posted from a page to its controlling worker.
///
/// Serialized as `{"type": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub kind: String,
}

impl ControlMessage {
    /// The only message type the worker acts on.
    pub const SKIP_WAITING: &'static str = "SKIP_WAITING";

    /// Message asking the worker to activate immediately.
    pub fn skip_waiting() -> Self {
        Self {
            kind: Self::SKIP_WAITING.to_string(),
        }
    }

    /// Interpret an arbitrary structured payload. Anything without a string
    /// `type` field yields `None`.
    pub fn from_value(value: &JsonValue) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    pub fn is_skip_waiting(&self) -> bool {
        self.kind == Self::SKIP_WAITING
    }

    pub fn to_value(&self) -> JsonValue {
        serde_json::json!({ "type": self.kind })
    }
}

/// Push message payload as delivered by the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl PushPayload {
    /// Parse raw push data. Missing or malformed data gives an empty payload.
    pub fn parse(data: Option<&[u8]>) -> Self {
        match data {
            Some(bytes) if !bytes.is_empty() => match serde_json::from_slice(bytes) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::debug!(error = %e, "Ignoring malformed push payload");
                    Self::default()
                }
            },
            _ => Self::default(),
        }
    }
}

/// Notification action identifiers.
pub mod actions {
    pub const OPEN: &str = "open";
    pub const DISMISS: &str = "dismiss";
}
