//! # Rollcall Service Worker
//!
//! Offline cache worker for the school attendance app.
//!
//! ## Features
//!
//! - **Lifecycle**: install (seed precache), activate (old generation
//!   cleanup, client claim), skip-waiting
//! - **Cache Storage**: named cache generations with an optional byte quota
//!   and JSON snapshot persistence
//! - **Fetch Interception**: stale-while-revalidate for same-origin GETs,
//!   network-only for API paths, passthrough for everything else
//! - **Push**: notification display with open/dismiss actions
//! - **Clients**: controlled pages, claim, open/focus windows
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerRegistration (scope = app origin)
//!     ├── installing (CacheWorker, generation N+1)
//!     ├── waiting    (CacheWorker)
//!     ├── active     (CacheWorker, generation N)
//!     └── WorkerContext (shared)
//!             ├── CacheStorage ── Cache (generation) ── url → CacheEntry
//!             ├── Clients ─────── Client (controller = active worker)
//!             ├── NotificationTray
//!             ├── Fetch (network)
//!             └── events (broadcast ServiceWorkerEvent)
//! ```

use rollcall_common::RollcallError;
use rollcall_net::NetError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod context;
pub mod push;
pub mod registration;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{Cache, CacheEntry, CacheStorage};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients};
pub use context::{ServiceWorkerEvent, WorkerContext};
pub use push::{Notification, NotificationAction, NotificationId, NotificationTray};
pub use registration::ServiceWorkerRegistration;
pub use worker::{CacheWorker, FetchOutcome, WorkerConfig};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone)]
pub enum ServiceWorkerError {
    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Cache quota exceeded: {requested} bytes requested, quota is {quota} bytes")]
    QuotaExceeded { requested: usize, quota: usize },

    #[error("Snapshot error: {0}")]
    SnapshotError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<NetError> for ServiceWorkerError {
    fn from(err: NetError) -> Self {
        Self::NetworkError(err.to_string())
    }
}

impl From<ServiceWorkerError> for RollcallError {
    fn from(err: ServiceWorkerError) -> Self {
        match err {
            ServiceWorkerError::NetworkError(_) => RollcallError::network_with_source("fetch", err),
            ServiceWorkerError::CacheError(_)
            | ServiceWorkerError::QuotaExceeded { .. }
            | ServiceWorkerError::SnapshotError(_) => {
                RollcallError::cache_with_source("cache storage", err)
            }
            ServiceWorkerError::NotFound(what) => RollcallError::NotFound(what),
            ServiceWorkerError::InstallFailed(_) | ServiceWorkerError::StateError(_) => {
                RollcallError::worker_with_source("lifecycle", err)
            }
        }
    }
}

// ==================== Types ====================

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// A fresh id not bound to any worker, for page-side tests.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn detached() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceWorkerState {
    /// Constructed, install not started.
    #[default]
    Parsed,
    /// Install running (seed precache).
    Installing,
    /// Installed and waiting to take over.
    Installed,
    /// Activate running (old generation cleanup, claim).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

impl ServiceWorkerState {
    /// Only an activated worker receives fetch events.
    pub fn can_intercept_fetch(&self) -> bool {
        matches!(self, ServiceWorkerState::Activated)
    }
}

impl fmt::Display for ServiceWorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceWorkerState::Parsed => "parsed",
            ServiceWorkerState::Installing => "installing",
            ServiceWorkerState::Installed => "installed",
            ServiceWorkerState::Activating => "activating",
            ServiceWorkerState::Activated => "activated",
            ServiceWorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
