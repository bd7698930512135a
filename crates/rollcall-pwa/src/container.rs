//! The page's view of its service worker.

use async_trait::async_trait;
use rollcall_core::ClientId;
use rollcall_sw::{ServiceWorkerEvent, ServiceWorkerId, ServiceWorkerRegistration};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::platform::{ChannelPlatform, PlatformEvent};
use crate::{HookError, Subscription};

/// Access to the worker controlling the page.
#[async_trait]
pub trait ServiceWorkerContainer: Send + Sync {
    /// The controlling worker, if the page is controlled.
    async fn controller(&self) -> Option<ServiceWorkerId>;

    /// Post a message to the controlling worker.
    async fn post_message(&self, data: JsonValue) -> Result<(), HookError>;
}

/// One page's container over an in-process registration.
pub struct PageContainer {
    registration: Arc<ServiceWorkerRegistration>,
    client: ClientId,
}

impl PageContainer {
    pub fn new(registration: Arc<ServiceWorkerRegistration>, client: ClientId) -> Self {
        Self {
            registration,
            client,
        }
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    /// Raise a `ControllerChange` platform event whenever this page gets a
    /// new controller.
    pub fn forward_to(&self, platform: Arc<ChannelPlatform>) -> Subscription {
        let mut events = self.registration.context().subscribe();
        let client = self.client;

        Subscription::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ServiceWorkerEvent::ControllerChange { client_id, generation, .. })
                        if client_id == client =>
                    {
                        debug!(client = %client, generation = %generation, "Controller changed");
                        platform.emit(PlatformEvent::ControllerChange);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Worker event stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[async_trait]
impl ServiceWorkerContainer for PageContainer {
    async fn controller(&self) -> Option<ServiceWorkerId> {
        self.registration
            .context()
            .clients
            .read()
            .await
            .controller_of(self.client)
    }

    async fn post_message(&self, data: JsonValue) -> Result<(), HookError> {
        self.registration
            .post_message(&data)
            .await
            .map(|_| ())
            .map_err(|e| HookError::Delivery(e.to_string()))
    }
}
