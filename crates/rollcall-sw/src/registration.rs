//! Service worker registration: the generations serving one scope.

use rollcall_core::ClientId;
use rollcall_net::{Request, Response};
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::clients::Client;
use crate::context::{ServiceWorkerEvent, WorkerContext};
use crate::push::{Notification, NotificationId};
use crate::worker::{CacheWorker, FetchOutcome, WorkerConfig};
use crate::{ServiceWorkerError, ServiceWorkerId, ServiceWorkerState};

#[derive(Default)]
struct Slots {
    installing: Option<Arc<CacheWorker>>,
    waiting: Option<Arc<CacheWorker>>,
    active: Option<Arc<CacheWorker>>,
}

impl Slots {
    fn workers(&self) -> impl Iterator<Item = &Arc<CacheWorker>> {
        self.installing
            .iter()
            .chain(self.waiting.iter())
            .chain(self.active.iter())
    }
}

/// Owns the installing, waiting and active generations for a scope.
pub struct ServiceWorkerRegistration {
    scope: Url,
    context: WorkerContext,
    slots: RwLock<Slots>,
}

impl ServiceWorkerRegistration {
    pub fn new(scope: Url, context: WorkerContext) -> Self {
        Self {
            scope,
            context,
            slots: RwLock::new(Slots::default()),
        }
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn context(&self) -> &WorkerContext {
        &self.context
    }

    pub async fn installing(&self) -> Option<Arc<CacheWorker>> {
        self.slots.read().await.installing.clone()
    }

    pub async fn waiting(&self) -> Option<Arc<CacheWorker>> {
        self.slots.read().await.waiting.clone()
    }

    pub async fn active(&self) -> Option<Arc<CacheWorker>> {
        self.slots.read().await.active.clone()
    }

    /// Look up a live worker by ID.
    pub async fn worker(&self, id: ServiceWorkerId) -> Option<Arc<CacheWorker>> {
        self.slots
            .read()
            .await
            .workers()
            .find(|w| w.id() == id)
            .cloned()
    }

    /// Install a new generation. It activates right away when it asked to
    /// skip waiting or nothing is active yet; otherwise it waits.
    pub async fn install_generation(
        &self,
        config: WorkerConfig,
    ) -> Result<Arc<CacheWorker>, ServiceWorkerError> {
        let worker = Arc::new(CacheWorker::new(config, self.context.clone()));
        self.slots.write().await.installing = Some(worker.clone());
        self.context.emit(ServiceWorkerEvent::UpdateFound {
            generation: worker.generation().to_string(),
        });
        info!(scope = %self.scope, generation = %worker.generation(), "Update found");

        let installed = worker.install().await;

        let mut slots = self.slots.write().await;
        if slots.installing.as_ref().map(|w| w.id()) == Some(worker.id()) {
            slots.installing = None;
        }
        installed?;

        if let Some(previous) = slots.waiting.replace(worker.clone()) {
            previous.mark_redundant();
        }
        let promote = worker.skip_waiting_requested() || slots.active.is_none();
        drop(slots);

        if promote {
            self.activate_waiting().await?;
        } else {
            debug!(generation = %worker.generation(), "Generation waiting");
        }
        Ok(worker)
    }

    /// Bring a generation up after a restart: reuse its cache when a
    /// snapshot restored it, otherwise install from the network.
    pub async fn start(&self, config: WorkerConfig) -> Result<Arc<CacheWorker>, ServiceWorkerError> {
        if self.slots.read().await.active.is_some() {
            return Err(ServiceWorkerError::StateError(
                "registration already has an active worker".to_string(),
            ));
        }

        if !self.context.caches.read().await.has(&config.generation) {
            return self.install_generation(config).await;
        }

        info!(generation = %config.generation, "Resuming generation from restored cache");
        let worker = Arc::new(CacheWorker::new(config, self.context.clone()));
        worker.set_state(ServiceWorkerState::Installed);
        self.slots.write().await.waiting = Some(worker.clone());
        self.activate_waiting().await?;
        Ok(worker)
    }

    async fn activate_waiting(&self) -> Result<(), ServiceWorkerError> {
        let mut slots = self.slots.write().await;
        let Some(next) = slots.waiting.take() else {
            return Ok(());
        };

        if let Err(e) = next.activate().await {
            next.mark_redundant();
            return Err(e);
        }

        if let Some(previous) = slots.active.replace(next.clone()) {
            previous.mark_redundant();
        }
        info!(scope = %self.scope, generation = %next.generation(), "Generation active");
        Ok(())
    }

    /// Register an open page, controlled by the active worker if any.
    pub async fn add_client(&self, url: Url) -> ClientId {
        let controller = self.active().await.map(|w| w.id());
        self.context.clients.write().await.add(url, controller)
    }

    /// Deliver a control message to the active worker. A skip-waiting
    /// request is forwarded to the waiting worker, which then activates.
    /// Returns whether any worker acted on it.
    pub async fn post_message(&self, data: &JsonValue) -> Result<bool, ServiceWorkerError> {
        let (active, waiting) = {
            let slots = self.slots.read().await;
            (slots.active.clone(), slots.waiting.clone())
        };

        let mut handled = active.map(|w| w.handle_message(data)).unwrap_or(false);

        if let Some(waiting) = waiting {
            if waiting.handle_message(data) {
                handled = true;
                self.activate_waiting().await?;
            }
        }
        Ok(handled)
    }

    /// Fetch on behalf of a page, through its controller when it has one.
    pub async fn fetch(&self, client: ClientId, request: Request) -> Result<Response, ServiceWorkerError> {
        let controller = self.context.clients.read().await.controller_of(client);
        let worker = match controller {
            Some(id) => self.worker(id).await,
            None => None,
        };

        let outcome = match worker {
            Some(worker) => worker.handle_fetch(request).await?,
            None => FetchOutcome::Passthrough(request),
        };

        match outcome {
            FetchOutcome::Passthrough(request) => Ok(self.context.fetcher().fetch(request).await?),
            FetchOutcome::Network(response) | FetchOutcome::Cache(response) => Ok(response),
        }
    }

    /// Dispatch a push message to the active worker.
    pub async fn push(&self, data: Option<&[u8]>) -> Result<Notification, ServiceWorkerError> {
        let active = self.require_active().await?;
        Ok(active.handle_push(data).await)
    }

    /// Dispatch a notification click to the active worker.
    pub async fn notification_click(
        &self,
        id: NotificationId,
        action: Option<&str>,
    ) -> Result<Option<Client>, ServiceWorkerError> {
        let active = self.require_active().await?;
        active.handle_notification_click(id, action).await
    }

    /// Wait for background work of every live worker.
    pub async fn wait_until_idle(&self) {
        let workers: Vec<Arc<CacheWorker>> = self.slots.read().await.workers().cloned().collect();
        for worker in workers {
            worker.wait_until_idle().await;
        }
    }

    /// Persist cache storage.
    pub async fn save_snapshot(&self, path: &Path) -> Result<(), ServiceWorkerError> {
        self.context.caches.read().await.save_snapshot(path).await
    }

    async fn require_active(&self) -> Result<Arc<CacheWorker>, ServiceWorkerError> {
        self.active()
            .await
            .ok_or_else(|| ServiceWorkerError::StateError("no active worker".to_string()))
    }
}
