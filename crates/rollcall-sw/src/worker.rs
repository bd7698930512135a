//! The cache worker: one generation's lifecycle and event handlers.

use http::Method;
use rollcall_common::RollcallError;
use rollcall_core::config::PushConfig;
use rollcall_core::types::actions;
use rollcall_core::{ControlMessage, OfflineConfig, PushPayload};
use rollcall_net::{Request, Response};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::cache::CacheEntry;
use crate::clients::Client;
use crate::context::{ServiceWorkerEvent, WorkerContext};
use crate::push::{Notification, NotificationId};
use crate::{ServiceWorkerError, ServiceWorkerId, ServiceWorkerState};

// ==================== Config ====================

/// Resolved settings for one worker generation.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Origin the worker intercepts for.
    pub origin: Url,

    /// Cache generation name.
    pub generation: String,

    /// Absolute URLs precached at install.
    pub seed: Vec<Url>,

    /// Path marker for requests that bypass the cache.
    pub api_prefix: String,

    /// App root, opened from notifications.
    pub start_url: Url,

    /// Notification defaults.
    pub push: PushConfig,

    /// Request skip-waiting as soon as install succeeds.
    pub skip_waiting_on_install: bool,
}

impl WorkerConfig {
    /// Resolve from the offline configuration.
    pub fn from_config(config: &OfflineConfig) -> Result<Self, RollcallError> {
        config.validate()?;
        Ok(Self {
            origin: config.origin()?,
            generation: config.generation_name(),
            seed: config.seed_urls()?,
            api_prefix: config.cache.api_prefix.clone(),
            start_url: config.start_url()?,
            push: config.push.clone(),
            skip_waiting_on_install: true,
        })
    }

    /// Whether a URL is under the API prefix and never cached.
    pub fn is_excluded(&self, url: &Url) -> bool {
        url.path().contains(&self.api_prefix)
    }
}

// ==================== Fetch Outcome ====================

/// Result of offering a request to the worker.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not intercepted; the page fetches it itself.
    Passthrough(Request),
    /// Answered from the network.
    Network(Response),
    /// Answered from the cache; a background refresh may still be running.
    Cache(Response),
}

impl FetchOutcome {
    pub fn is_intercepted(&self) -> bool {
        !matches!(self, FetchOutcome::Passthrough(_))
    }

    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Passthrough(_) => None,
            FetchOutcome::Network(r) | FetchOutcome::Cache(r) => Some(r),
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchOutcome::Passthrough(_) => None,
            FetchOutcome::Network(r) | FetchOutcome::Cache(r) => Some(r),
        }
    }
}

// ==================== Cache Worker ====================

/// One generation of the offline cache worker.
pub struct CacheWorker {
    id: ServiceWorkerId,
    config: WorkerConfig,
    context: WorkerContext,
    state: watch::Sender<ServiceWorkerState>,
    skip_waiting: AtomicBool,
    revalidations: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheWorker {
    /// Create a worker in the `parsed` state.
    pub fn new(config: WorkerConfig, context: WorkerContext) -> Self {
        let (state, _) = watch::channel(ServiceWorkerState::Parsed);
        Self {
            id: ServiceWorkerId::new(),
            config,
            context,
            state,
            skip_waiting: AtomicBool::new(false),
            revalidations: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn generation(&self) -> &str {
        &self.config.generation
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn state(&self) -> ServiceWorkerState {
        *self.state.borrow()
    }

    /// Observe state changes.
    pub fn watch_state(&self) -> watch::Receiver<ServiceWorkerState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, new_state: ServiceWorkerState) {
        let old = self.state.send_replace(new_state);
        if old != new_state {
            debug!(worker = %self.id, generation = %self.config.generation, from = %old, to = %new_state, "State change");
            self.context.emit(ServiceWorkerEvent::StateChange {
                worker_id: self.id,
                generation: self.config.generation.clone(),
                new_state,
            });
        }
    }

    /// Ask to skip the waiting phase.
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    // ==================== Install ====================

    /// Precache the seed list into this generation's cache. All seeds are
    /// written or none are; on failure the worker becomes redundant.
    pub async fn install(&self) -> Result<(), ServiceWorkerError> {
        if self.state() != ServiceWorkerState::Parsed {
            return Err(ServiceWorkerError::StateError(format!(
                "cannot install from state {}",
                self.state()
            )));
        }

        self.set_state(ServiceWorkerState::Installing);
        info!(generation = %self.config.generation, seeds = self.config.seed.len(), "Installing cache worker");

        match self.precache().await {
            Ok(()) => {
                if self.config.skip_waiting_on_install {
                    self.skip_waiting();
                }
                self.set_state(ServiceWorkerState::Installed);
                Ok(())
            }
            Err(e) => {
                warn!(generation = %self.config.generation, error = %e, "Install failed");
                self.set_state(ServiceWorkerState::Redundant);
                Err(e)
            }
        }
    }

    async fn precache(&self) -> Result<(), ServiceWorkerError> {
        if let Some(url) = self
            .config
            .seed
            .iter()
            .find(|url| url.origin() != self.config.origin.origin() || self.config.is_excluded(url))
        {
            return Err(ServiceWorkerError::InstallFailed(format!(
                "{} cannot be precached",
                url
            )));
        }
        let requests: Vec<Request> = self.config.seed.iter().cloned().map(Request::get).collect();

        let fetcher = self.context.fetcher();
        let responses =
            futures::future::try_join_all(requests.iter().map(|r| fetcher.fetch(r.clone())))
                .await
                .map_err(|e| ServiceWorkerError::InstallFailed(format!("seed fetch failed: {}", e)))?;

        let mut entries = Vec::with_capacity(responses.len());
        for (request, response) in requests.iter().zip(responses) {
            if !response.ok() {
                return Err(ServiceWorkerError::InstallFailed(format!(
                    "{} returned status {}",
                    request.url,
                    response.status_code()
                )));
            }
            if !response.is_cacheable() {
                return Err(ServiceWorkerError::InstallFailed(format!(
                    "{} returned a {:?} response",
                    request.url, response.response_type
                )));
            }
            entries.push(CacheEntry::from_response(request, &response, &self.config.generation));
        }

        self.context
            .caches
            .write()
            .await
            .put_all(&self.config.generation, entries)
            .map_err(|e| ServiceWorkerError::InstallFailed(e.to_string()))
    }

    // ==================== Activate ====================

    /// Delete every other cache generation, then claim all clients.
    pub async fn activate(&self) -> Result<(), ServiceWorkerError> {
        if self.state() != ServiceWorkerState::Installed {
            return Err(ServiceWorkerError::StateError(format!(
                "cannot activate from state {}",
                self.state()
            )));
        }

        self.set_state(ServiceWorkerState::Activating);

        let removed: Vec<String> = {
            let mut caches = self.context.caches.write().await;
            let stale: Vec<String> = caches
                .keys()
                .into_iter()
                .filter(|name| *name != self.config.generation)
                .collect();
            for name in &stale {
                caches.delete(name);
            }
            stale
        };
        if !removed.is_empty() {
            info!(generation = %self.config.generation, removed = ?removed, "Deleted old cache generations");
        }

        self.set_state(ServiceWorkerState::Activated);

        let claimed = self.context.clients.write().await.claim(self.id);
        for client_id in claimed {
            self.context.emit(ServiceWorkerEvent::ControllerChange {
                client_id,
                worker_id: self.id,
                generation: self.config.generation.clone(),
            });
        }

        Ok(())
    }

    pub(crate) fn mark_redundant(&self) {
        self.set_state(ServiceWorkerState::Redundant);
    }

    // ==================== Fetch ====================

    /// Offer a request to the worker.
    ///
    /// Cross-origin and non-GET requests pass through. API paths go to the
    /// network without touching the cache. Everything else is
    /// stale-while-revalidate: a cached copy is returned immediately while
    /// the network refreshes the cache in the background; without a cached
    /// copy the network response (or its failure) is returned.
    pub async fn handle_fetch(&self, request: Request) -> Result<FetchOutcome, ServiceWorkerError> {
        if !self.state().can_intercept_fetch() {
            trace!(url = %request.url, state = %self.state(), "Worker not active, passing through");
            return Ok(FetchOutcome::Passthrough(request));
        }

        if request.method != Method::GET || !request.is_same_origin(&self.config.origin) {
            trace!(url = %request.url, method = %request.method, "Passing through");
            return Ok(FetchOutcome::Passthrough(request));
        }

        if self.config.is_excluded(&request.url) {
            trace!(url = %request.url, "API request, bypassing cache");
            let response = self.context.fetcher().fetch(request).await?;
            return Ok(FetchOutcome::Network(response));
        }

        let key = request.cache_key();
        let stale = self
            .context
            .caches
            .read()
            .await
            .match_in(&self.config.generation, &key)
            .map(CacheEntry::to_response);

        let refresh = revalidate(
            self.context.clone(),
            self.config.generation.clone(),
            request,
        );

        match stale {
            Some(cached) => {
                debug!(url = %key, "Serving from cache, revalidating");
                let handle = tokio::spawn(async move {
                    if let Err(e) = refresh.await {
                        debug!(url = %key, error = %e, "Revalidation failed, cached copy kept");
                    }
                });
                let mut pending = self.revalidations.lock().await;
                pending.retain(|h| !h.is_finished());
                pending.push(handle);
                Ok(FetchOutcome::Cache(cached))
            }
            None => refresh.await.map(FetchOutcome::Network),
        }
    }

    /// Wait for every background revalidation started so far.
    pub async fn wait_until_idle(&self) {
        loop {
            let pending = std::mem::take(&mut *self.revalidations.lock().await);
            if pending.is_empty() {
                break;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Revalidation task panicked");
                }
            }
        }
    }

    // ==================== Push ====================

    /// Show a notification for a push message.
    pub async fn handle_push(&self, data: Option<&[u8]>) -> Notification {
        let payload = PushPayload::parse(data);
        let notification =
            Notification::from_push(payload, &self.config.push, self.config.start_url.clone());

        self.context
            .notifications
            .write()
            .await
            .show(notification.clone());
        self.context.emit(ServiceWorkerEvent::NotificationShown {
            notification_id: notification.id,
        });

        info!(title = %notification.title, "Push notification shown");
        notification
    }

    /// Close a clicked notification; the `open` action also opens or
    /// focuses the app root.
    pub async fn handle_notification_click(
        &self,
        id: NotificationId,
        action: Option<&str>,
    ) -> Result<Option<Client>, ServiceWorkerError> {
        let notification = self
            .context
            .notifications
            .write()
            .await
            .close(id)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("notification {:?}", id)))?;

        if action != Some(actions::OPEN) {
            debug!(action = ?action, "Notification closed");
            return Ok(None);
        }

        let controller = self.state().can_intercept_fetch().then_some(self.id);
        let client = self
            .context
            .clients
            .write()
            .await
            .open_or_focus(notification.open_url, controller)?;
        Ok(Some(client))
    }

    // ==================== Messages ====================

    /// Handle a control message. Returns whether it was acted on.
    pub fn handle_message(&self, data: &JsonValue) -> bool {
        match ControlMessage::from_value(data) {
            Some(message) if message.is_skip_waiting() => {
                debug!(worker = %self.id, "Skip waiting requested");
                self.skip_waiting();
                true
            }
            _ => {
                trace!(worker = %self.id, "Ignoring message");
                false
            }
        }
    }
}

/// Fetch from the network and, for cacheable responses, write a snapshot
/// into the generation's cache. Write failures are logged, never returned.
async fn revalidate(
    context: WorkerContext,
    generation: String,
    request: Request,
) -> Result<Response, ServiceWorkerError> {
    let response = context.fetcher().fetch(request.clone()).await?;

    if response.is_cacheable() {
        let entry = CacheEntry::from_response(&request, &response, &generation);
        if let Err(e) = context.caches.write().await.put(&generation, entry) {
            warn!(url = %request.url, generation = %generation, error = %e, "Cache write failed");
        }
    } else {
        trace!(url = %request.url, status = response.status_code(), "Response not cacheable");
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{url, worker_config, FakeNetwork, ORIGIN};
    use rollcall_net::ResponseType;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    async fn active_worker(net: &Arc<FakeNetwork>) -> (CacheWorker, WorkerContext) {
        let context = WorkerContext::new(net.clone());
        let worker = CacheWorker::new(worker_config("v1"), context.clone());
        worker.install().await.unwrap();
        worker.activate().await.unwrap();
        (worker, context)
    }

    async fn cached_body(context: &WorkerContext, generation: &str, path: &str) -> Option<Vec<u8>> {
        context
            .caches
            .read()
            .await
            .match_in(generation, url(path).as_str())
            .map(|e| e.body.clone())
    }

    #[test]
    fn test_excluded_paths() {
        let config = worker_config("v1");
        assert!(config.is_excluded(&url("/api/attendance")));
        assert!(config.is_excluded(&url("/v2/api/users")));
        assert!(!config.is_excluded(&url("/apiary.html")));
        assert!(!config.is_excluded(&url("/dashboard")));
    }

    #[tokio::test]
    async fn test_install_seeds_exactly_seed_list() {
        let net = FakeNetwork::with_seeds();
        let context = WorkerContext::new(net.clone());
        let worker = CacheWorker::new(worker_config("v1"), context.clone());

        worker.install().await.unwrap();

        assert_eq!(worker.state(), ServiceWorkerState::Installed);
        assert!(worker.skip_waiting_requested());
        let caches = context.caches.read().await;
        let keys = caches.get("school-attendance-v1").unwrap().keys();
        let expected: Vec<String> = ["/", "/favicon.ico", "/index.html", "/manifest.json"]
            .iter()
            .map(|p| url(p).to_string())
            .collect();
        assert_eq!(keys, expected);
    }

    #[tokio::test]
    async fn test_install_is_all_or_nothing() {
        let net = FakeNetwork::with_seeds();
        net.fail("/manifest.json");
        let context = WorkerContext::new(net.clone());
        let worker = CacheWorker::new(worker_config("v1"), context.clone());

        let result = worker.install().await;

        assert!(matches!(result, Err(ServiceWorkerError::InstallFailed(_))));
        assert_eq!(worker.state(), ServiceWorkerState::Redundant);
        assert!(!context.caches.read().await.has("school-attendance-v1"));
    }

    #[tokio::test]
    async fn test_install_rejects_error_status() {
        let net = FakeNetwork::with_seeds();
        net.respond("/favicon.ico", 404, "");
        let context = WorkerContext::new(net.clone());
        let worker = CacheWorker::new(worker_config("v1"), context.clone());

        let err = worker.install().await.unwrap_err();
        assert!(err.to_string().contains("favicon.ico"));
        assert!(context.caches.read().await.keys().is_empty());
    }

    #[tokio::test]
    async fn test_install_refuses_uncacheable_seeds() {
        let net = FakeNetwork::with_seeds();
        net.respond("/api/bootstrap", 200, "{}");
        net.respond_typed("https://cdn.example/chart.js", 200, "chart", ResponseType::Cors);

        for extra in ["/api/bootstrap", "https://cdn.example/chart.js"] {
            let mut config = worker_config("v1");
            config.seed.push(url(extra));
            let context = WorkerContext::new(net.clone());
            let worker = CacheWorker::new(config, context.clone());

            let err = worker.install().await.unwrap_err();
            assert!(err.to_string().contains(extra), "{}", err);
            assert_eq!(worker.state(), ServiceWorkerState::Redundant);
            assert!(context.caches.read().await.keys().is_empty());
        }
        assert_eq!(net.call_count("/api/bootstrap"), 0);
    }

    #[tokio::test]
    async fn test_install_rejects_cors_typed_seed() {
        let net = FakeNetwork::with_seeds();
        net.respond_typed("/manifest.json", 200, "{}", ResponseType::Cors);
        let context = WorkerContext::new(net.clone());
        let worker = CacheWorker::new(worker_config("v1"), context.clone());

        let err = worker.install().await.unwrap_err();
        assert!(matches!(err, ServiceWorkerError::InstallFailed(_)));
        assert!(err.to_string().contains("manifest.json"));
        assert!(!context.caches.read().await.has("school-attendance-v1"));
    }

    #[tokio::test]
    async fn test_install_twice_is_state_error() {
        let net = FakeNetwork::with_seeds();
        let worker = CacheWorker::new(worker_config("v1"), WorkerContext::new(net));
        worker.install().await.unwrap();
        assert!(matches!(
            worker.install().await,
            Err(ServiceWorkerError::StateError(_))
        ));
    }

    #[tokio::test]
    async fn test_activate_requires_install() {
        let net = FakeNetwork::with_seeds();
        let worker = CacheWorker::new(worker_config("v1"), WorkerContext::new(net));
        assert!(matches!(
            worker.activate().await,
            Err(ServiceWorkerError::StateError(_))
        ));
    }

    #[tokio::test]
    async fn test_activate_leaves_single_generation() {
        let net = FakeNetwork::with_seeds();
        let context = WorkerContext::new(net.clone());
        {
            let mut caches = context.caches.write().await;
            caches.open("school-attendance-v0");
            caches.open("unrelated-cache");
        }

        let worker = CacheWorker::new(worker_config("v1"), context.clone());
        worker.install().await.unwrap();
        worker.activate().await.unwrap();

        assert_eq!(worker.state(), ServiceWorkerState::Activated);
        assert_eq!(
            context.caches.read().await.keys(),
            vec!["school-attendance-v1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_activate_claims_clients() {
        let net = FakeNetwork::with_seeds();
        let context = WorkerContext::new(net.clone());
        let page = context.clients.write().await.add(url("/dashboard"), None);
        let mut events = context.subscribe();

        let worker = CacheWorker::new(worker_config("v1"), context.clone());
        worker.install().await.unwrap();
        worker.activate().await.unwrap();

        assert_eq!(context.clients.read().await.controller_of(page), Some(worker.id()));

        let mut saw_controller_change = false;
        while let Ok(event) = events.try_recv() {
            if let ServiceWorkerEvent::ControllerChange { client_id, .. } = event {
                assert_eq!(client_id, page);
                saw_controller_change = true;
            }
        }
        assert!(saw_controller_change);
    }

    #[tokio::test]
    async fn test_network_response_is_written_through() {
        let net = FakeNetwork::with_seeds();
        net.respond("/reports/weekly.html", 200, "<h1>Week 12</h1>");
        let (worker, context) = active_worker(&net).await;

        let outcome = worker
            .handle_fetch(Request::get(url("/reports/weekly.html")))
            .await
            .unwrap();

        assert!(matches!(outcome, FetchOutcome::Network(_)));
        let body = outcome.into_response().unwrap().bytes();
        assert_eq!(
            cached_body(&context, "school-attendance-v1", "/reports/weekly.html").await,
            Some(body.to_vec())
        );
    }

    #[tokio::test]
    async fn test_cached_copy_returned_without_waiting_for_network() {
        let net = FakeNetwork::with_seeds();
        let (worker, context) = active_worker(&net).await;
        net.respond("/index.html", 200, "<html>index v2</html>");
        let release = net.hold();

        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            worker.handle_fetch(Request::get(url("/index.html"))),
        )
        .await
        .expect("stale response must not wait for the network")
        .unwrap();

        match outcome {
            FetchOutcome::Cache(response) => {
                assert_eq!(response.text().unwrap(), "<html>index</html>")
            }
            other => panic!("expected cached response, got {:?}", other),
        }

        release.send(true).unwrap();
        worker.wait_until_idle().await;
        assert_eq!(
            cached_body(&context, "school-attendance-v1", "/index.html").await,
            Some(b"<html>index v2</html>".to_vec())
        );
    }

    #[tokio::test]
    async fn test_offline_serves_stale_copy() {
        let net = FakeNetwork::with_seeds();
        let (worker, context) = active_worker(&net).await;
        net.set_offline(true);

        let outcome = worker
            .handle_fetch(Request::get(url("/manifest.json")))
            .await
            .unwrap();
        assert_eq!(
            outcome.response().unwrap().text().unwrap(),
            r#"{"name":"School Attendance"}"#
        );

        worker.wait_until_idle().await;
        assert_eq!(
            cached_body(&context, "school-attendance-v1", "/manifest.json").await,
            Some(br#"{"name":"School Attendance"}"#.to_vec())
        );
    }

    #[tokio::test]
    async fn test_offline_without_cached_copy_fails() {
        let net = FakeNetwork::with_seeds();
        let (worker, _context) = active_worker(&net).await;
        net.set_offline(true);

        let result = worker.handle_fetch(Request::get(url("/never-seen.html"))).await;
        assert!(matches!(result, Err(ServiceWorkerError::NetworkError(_))));
    }

    #[tokio::test]
    async fn test_api_requests_never_touch_cache() {
        let net = FakeNetwork::with_seeds();
        net.respond("/api/classes", 200, r#"[{"id":1,"name":"4B"}]"#);
        let (worker, context) = active_worker(&net).await;

        // A planted entry must not be served.
        {
            let planted = Response::new(url("/api/classes"), http::StatusCode::OK, "stale roster");
            let entry = CacheEntry::from_response(
                &Request::get(url("/api/classes")),
                &planted,
                "school-attendance-v1",
            );
            context
                .caches
                .write()
                .await
                .put("school-attendance-v1", entry)
                .unwrap();
        }

        let outcome = worker
            .handle_fetch(Request::get(url("/api/classes")))
            .await
            .unwrap();
        assert!(matches!(outcome, FetchOutcome::Network(_)));
        assert_eq!(
            outcome.response().unwrap().text().unwrap(),
            r#"[{"id":1,"name":"4B"}]"#
        );
        assert_eq!(
            cached_body(&context, "school-attendance-v1", "/api/classes").await,
            Some(b"stale roster".to_vec())
        );

        net.respond("/api/users", 200, "[]");
        worker.handle_fetch(Request::get(url("/api/users"))).await.unwrap();
        worker.wait_until_idle().await;
        assert_eq!(cached_body(&context, "school-attendance-v1", "/api/users").await, None);

        net.set_offline(true);
        let result = worker.handle_fetch(Request::get(url("/api/classes"))).await;
        assert!(matches!(result, Err(ServiceWorkerError::NetworkError(_))));
    }

    #[tokio::test]
    async fn test_cross_origin_and_non_get_pass_through() {
        let net = FakeNetwork::with_seeds();
        let (worker, _context) = active_worker(&net).await;
        let calls_before = net.calls().len();

        let post = Request::post(url("/attendance"), bytes::Bytes::from_static(b"{}"));
        let outcome = worker.handle_fetch(post).await.unwrap();
        assert!(!outcome.is_intercepted());

        let cdn = Request::get(Url::parse("https://cdn.example/chart.js").unwrap());
        let outcome = worker.handle_fetch(cdn).await.unwrap();
        match outcome {
            FetchOutcome::Passthrough(request) => {
                assert_eq!(request.url.as_str(), "https://cdn.example/chart.js")
            }
            other => panic!("expected passthrough, got {:?}", other),
        }

        assert_eq!(net.calls().len(), calls_before);
    }

    #[tokio::test]
    async fn test_non_cacheable_responses_returned_unmodified() {
        let net = FakeNetwork::with_seeds();
        net.respond("/missing.html", 404, "not found");
        net.respond_typed("/fonts/inter.woff2", 200, "", ResponseType::Opaque);
        net.respond("/empty", 204, "");
        let (worker, context) = active_worker(&net).await;

        let outcome = worker
            .handle_fetch(Request::get(url("/missing.html")))
            .await
            .unwrap();
        assert_eq!(outcome.response().unwrap().status, http::StatusCode::NOT_FOUND);

        let outcome = worker
            .handle_fetch(Request::get(url("/fonts/inter.woff2")))
            .await
            .unwrap();
        assert_eq!(outcome.response().unwrap().response_type, ResponseType::Opaque);

        worker.handle_fetch(Request::get(url("/empty"))).await.unwrap();

        for path in ["/missing.html", "/fonts/inter.woff2", "/empty"] {
            assert_eq!(cached_body(&context, "school-attendance-v1", path).await, None);
        }
    }

    #[tokio::test]
    async fn test_cache_write_failure_still_returns_response() {
        let net = FakeNetwork::with_seeds();
        net.respond("/big.html", 200, &"x".repeat(4096));
        let (worker, context) = active_worker(&net).await;
        let usage = context.caches.read().await.usage_bytes();
        context.caches.write().await.set_quota(Some(usage + 16));

        let outcome = worker.handle_fetch(Request::get(url("/big.html"))).await.unwrap();

        assert_eq!(outcome.response().unwrap().body().len(), 4096);
        assert_eq!(cached_body(&context, "school-attendance-v1", "/big.html").await, None);
    }

    #[tokio::test]
    async fn test_inactive_worker_does_not_intercept() {
        let net = FakeNetwork::with_seeds();
        let worker = CacheWorker::new(worker_config("v1"), WorkerContext::new(net.clone()));
        worker.install().await.unwrap();

        let outcome = worker.handle_fetch(Request::get(url("/index.html"))).await.unwrap();
        assert!(!outcome.is_intercepted());
    }

    #[tokio::test]
    async fn test_revalidation_does_not_resurrect_deleted_generation() {
        let net = FakeNetwork::with_seeds();
        let (worker, context) = active_worker(&net).await;
        let release = net.hold();

        let outcome = worker.handle_fetch(Request::get(url("/"))).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::Cache(_)));

        context.caches.write().await.delete("school-attendance-v1");
        release.send(true).unwrap();
        worker.wait_until_idle().await;

        assert!(context.caches.read().await.keys().is_empty());
    }

    #[tokio::test]
    async fn test_push_with_empty_object_uses_default_title() {
        let net = FakeNetwork::with_seeds();
        let (worker, context) = active_worker(&net).await;

        let notification = worker.handle_push(Some(b"{}")).await;

        assert_eq!(notification.title, "New Notification");
        assert_eq!(notification.icon, "/icons/icon-192x192.png");
        assert_eq!(notification.open_url.as_str(), format!("{}/", ORIGIN));
        assert_eq!(context.notifications.read().await.all().len(), 1);
    }

    #[tokio::test]
    async fn test_push_payload_and_malformed_payload() {
        let net = FakeNetwork::with_seeds();
        let (worker, _context) = active_worker(&net).await;

        let n = worker
            .handle_push(Some(br#"{"title":"Late arrival","body":"Sam checked in 08:42"}"#))
            .await;
        assert_eq!(n.title, "Late arrival");
        assert_eq!(n.body, "Sam checked in 08:42");

        let n = worker.handle_push(Some(b"\xff\xfe garbage")).await;
        assert_eq!(n.title, "New Notification");

        let n = worker.handle_push(None).await;
        assert_eq!(n.title, "New Notification");
    }

    #[tokio::test]
    async fn test_notification_open_action_opens_root() {
        let net = FakeNetwork::with_seeds();
        let (worker, context) = active_worker(&net).await;
        let notification = worker.handle_push(None).await;

        let client = worker
            .handle_notification_click(notification.id, Some("open"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(client.url.as_str(), format!("{}/", ORIGIN));
        assert!(client.focused);
        assert_eq!(client.controller, Some(worker.id()));
        assert!(context.notifications.read().await.all().is_empty());

        // A second click on the closed notification is unknown.
        assert!(matches!(
            worker.handle_notification_click(notification.id, Some("open")).await,
            Err(ServiceWorkerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_notification_dismiss_only_closes() {
        let net = FakeNetwork::with_seeds();
        let (worker, context) = active_worker(&net).await;
        let notification = worker.handle_push(None).await;

        let opened = worker
            .handle_notification_click(notification.id, Some("dismiss"))
            .await
            .unwrap();

        assert!(opened.is_none());
        assert!(context.clients.read().await.is_empty());
        assert!(context.notifications.read().await.all().is_empty());
    }

    #[test]
    fn test_handle_message() {
        let net = FakeNetwork::with_seeds();
        let worker = CacheWorker::new(worker_config("v1"), WorkerContext::new(net));

        assert!(!worker.handle_message(&json!({ "type": "PING" })));
        assert!(!worker.handle_message(&json!("SKIP_WAITING")));
        assert!(!worker.skip_waiting_requested());

        assert!(worker.handle_message(&json!({ "type": "SKIP_WAITING" })));
        assert!(worker.skip_waiting_requested());
    }
}
