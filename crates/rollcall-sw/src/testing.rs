//! Deterministic network and config fixtures for worker tests.

use async_trait::async_trait;
use hashbrown::HashMap;
use http::StatusCode;
use rollcall_core::OfflineConfig;
use rollcall_net::{Fetch, NetError, Request, Response, ResponseType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use url::Url;

use crate::worker::WorkerConfig;

pub const ORIGIN: &str = "https://attendance.example";

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn offline_config(version: &str) -> OfflineConfig {
    let mut config = OfflineConfig::default();
    config.app.origin = ORIGIN.to_string();
    config.cache.version = version.to_string();
    config
}

pub fn worker_config(version: &str) -> WorkerConfig {
    WorkerConfig::from_config(&offline_config(version)).unwrap()
}

#[derive(Clone)]
enum Route {
    Respond {
        status: u16,
        body: String,
        response_type: ResponseType,
    },
    Fail,
}

/// Scripted network. Unknown URLs answer 404.
pub struct FakeNetwork {
    routes: Mutex<HashMap<String, Route>>,
    offline: AtomicBool,
    calls: Mutex<Vec<String>>,
    gate: Mutex<Option<watch::Receiver<bool>>>,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        })
    }

    /// Network that serves the default seed list.
    pub fn with_seeds() -> Arc<Self> {
        let net = Self::new();
        net.respond("/", 200, "<html>root</html>");
        net.respond("/index.html", 200, "<html>index</html>");
        net.respond("/manifest.json", 200, r#"{"name":"School Attendance"}"#);
        net.respond("/favicon.ico", 200, "ico");
        net
    }

    pub fn respond(&self, path: &str, status: u16, body: &str) {
        self.respond_typed(path, status, body, ResponseType::Basic);
    }

    pub fn respond_typed(&self, path: &str, status: u16, body: &str, response_type: ResponseType) {
        self.routes.lock().unwrap().insert(
            url(path).to_string(),
            Route::Respond {
                status,
                body: body.to_string(),
                response_type,
            },
        );
    }

    pub fn fail(&self, path: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(url(path).to_string(), Route::Fail);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Hold every subsequent fetch until the returned sender sends `true`.
    pub fn hold(&self) -> watch::Sender<bool> {
        let (tx, rx) = watch::channel(false);
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }

    /// Fetched URLs in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, path: &str) -> usize {
        let target = url(path).to_string();
        self.calls().iter().filter(|c| **c == target).count()
    }
}

#[async_trait]
impl Fetch for FakeNetwork {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        self.calls.lock().unwrap().push(request.url.to_string());

        let gate = self.gate.lock().unwrap().clone();
        if let Some(mut gate) = gate {
            let _ = gate.wait_for(|open| *open).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::RequestFailed("network unreachable".into()));
        }

        let route = self
            .routes
            .lock()
            .unwrap()
            .get(request.url.as_str())
            .cloned();
        match route {
            Some(Route::Respond {
                status,
                body,
                response_type,
            }) => Ok(Response::new(
                request.url,
                StatusCode::from_u16(status).unwrap(),
                body,
            )
            .with_type(response_type)),
            Some(Route::Fail) => Err(NetError::RequestFailed("connection reset".into())),
            None => Ok(Response::new(request.url, StatusCode::NOT_FOUND, "")),
        }
    }
}
