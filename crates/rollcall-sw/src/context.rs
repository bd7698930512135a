//! State shared by every worker generation of one registration.

use rollcall_core::ClientId;
use rollcall_net::Fetch;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::cache::CacheStorage;
use crate::clients::Clients;
use crate::push::{NotificationId, NotificationTray};
use crate::{ServiceWorkerId, ServiceWorkerState};

const EVENT_CAPACITY: usize = 64;

/// Service worker events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// A worker changed lifecycle state.
    StateChange {
        worker_id: ServiceWorkerId,
        generation: String,
        new_state: ServiceWorkerState,
    },
    /// A new generation started installing.
    UpdateFound { generation: String },
    /// A client's controller changed.
    ControllerChange {
        client_id: ClientId,
        worker_id: ServiceWorkerId,
        generation: String,
    },
    /// A push notification was displayed.
    NotificationShown { notification_id: NotificationId },
}

/// Cache storage, clients, notifications and network access, shared by
/// all generations.
#[derive(Clone)]
pub struct WorkerContext {
    /// Cache storage.
    pub caches: Arc<RwLock<CacheStorage>>,

    /// Controlled pages.
    pub clients: Arc<RwLock<Clients>>,

    /// Displayed notifications.
    pub notifications: Arc<RwLock<NotificationTray>>,

    fetcher: Arc<dyn Fetch>,

    events: broadcast::Sender<ServiceWorkerEvent>,
}

impl WorkerContext {
    /// Create a context with empty storage.
    pub fn new(fetcher: Arc<dyn Fetch>) -> Self {
        Self::with_storage(fetcher, CacheStorage::new())
    }

    /// Create a context over existing (e.g. snapshot-loaded) storage.
    pub fn with_storage(fetcher: Arc<dyn Fetch>, storage: CacheStorage) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            caches: Arc::new(RwLock::new(storage)),
            clients: Arc::new(RwLock::new(Clients::new())),
            notifications: Arc::new(RwLock::new(NotificationTray::new())),
            fetcher,
            events,
        }
    }

    /// Network access.
    pub fn fetcher(&self) -> &Arc<dyn Fetch> {
        &self.fetcher
    }

    /// Subscribe to worker events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceWorkerEvent> {
        self.events.subscribe()
    }

    /// Broadcast an event. Having no subscribers is fine.
    pub(crate) fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.events.send(event);
    }
}
