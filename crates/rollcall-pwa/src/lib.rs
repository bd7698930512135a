//! # Rollcall PWA
//!
//! Install and update state for the page side of the offline app.
//!
//! ## Features
//!
//! - **Install**: tracks the deferred install offer and the installed state
//! - **Update**: detects a new worker generation taking over the page and
//!   asks it to skip waiting
//! - **Subscriptions**: platform listeners are explicit and dropped with
//!   their handle
//!
//! ## Architecture
//!
//! ```text
//! Platform ── PlatformEvent ──→ InstallUpdateHook ──→ watch signals
//!                                    │                  ├── installable
//!                                    │                  ├── installed
//!                                    │                  └── update_available
//!                                    └── ServiceWorkerContainer
//!                                            └── post_message(SKIP_WAITING)
//! ```

use rollcall_common::RollcallError;
use rollcall_core::ControlMessage;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod container;
pub mod platform;

pub use container::{PageContainer, ServiceWorkerContainer};
pub use platform::{ChannelPlatform, InstallPrompt, Platform, PlatformEvent, UserChoice};

// ==================== Errors ====================

/// Install/update hook errors.
#[derive(Error, Debug, Clone)]
pub enum HookError {
    #[error("Install prompt failed: {0}")]
    PromptFailed(String),

    #[error("Message delivery failed: {0}")]
    Delivery(String),
}

impl From<HookError> for RollcallError {
    fn from(err: HookError) -> Self {
        RollcallError::worker_with_source("install/update hook", err)
    }
}

// ==================== Subscription ====================

/// A running listener. Dropping it unsubscribes.
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn spawn<F>(listener: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            task: Some(tokio::spawn(listener)),
        }
    }

    /// Stop listening.
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

// ==================== Hook ====================

/// Send only when the value changes.
fn set(signal: &watch::Sender<bool>, value: bool) {
    signal.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    });
}

struct HookState {
    installable: watch::Sender<bool>,
    installed: watch::Sender<bool>,
    update_available: watch::Sender<bool>,
    deferred: Mutex<Option<Arc<dyn InstallPrompt>>>,
    had_controller: AtomicBool,
}

impl HookState {
    async fn handle_event(&self, event: PlatformEvent) {
        match event {
            PlatformEvent::BeforeInstallPrompt(prompt) => {
                debug!("Install offer deferred");
                *self.deferred.lock().await = Some(prompt);
                set(&self.installable, true);
            }
            PlatformEvent::AppInstalled => {
                info!("App installed");
                self.deferred.lock().await.take();
                set(&self.installable, false);
                set(&self.installed, true);
            }
            PlatformEvent::ControllerChange => {
                if self.had_controller.swap(true, Ordering::SeqCst) {
                    info!("New worker generation took control");
                    set(&self.update_available, true);
                } else {
                    debug!("Page is now controlled");
                }
            }
        }
    }
}

/// Reactive install and update state for one page.
pub struct InstallUpdateHook {
    state: Arc<HookState>,
    container: Arc<dyn ServiceWorkerContainer>,
}

impl InstallUpdateHook {
    /// Create the hook, read the initial platform state and start
    /// listening. Events stop when the returned subscription is dropped.
    pub async fn mount(
        platform: &dyn Platform,
        container: Arc<dyn ServiceWorkerContainer>,
    ) -> (Self, Subscription) {
        let mut events = platform.subscribe();
        let hook = Self::new(container).await;
        if platform.is_standalone() {
            set(&hook.state.installed, true);
        }

        let state = hook.state.clone();
        let subscription = Subscription::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => state.handle_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Platform event stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        (hook, subscription)
    }

    /// Create a hook that is driven through `handle_event`.
    pub async fn new(container: Arc<dyn ServiceWorkerContainer>) -> Self {
        let had_controller = container.controller().await.is_some();
        Self {
            state: Arc::new(HookState {
                installable: watch::channel(false).0,
                installed: watch::channel(false).0,
                update_available: watch::channel(false).0,
                deferred: Mutex::new(None),
                had_controller: AtomicBool::new(had_controller),
            }),
            container,
        }
    }

    /// Apply a platform event.
    pub async fn handle_event(&self, event: PlatformEvent) {
        self.state.handle_event(event).await;
    }

    pub fn is_installable(&self) -> bool {
        *self.state.installable.borrow()
    }

    pub fn is_installed(&self) -> bool {
        *self.state.installed.borrow()
    }

    pub fn is_update_available(&self) -> bool {
        *self.state.update_available.borrow()
    }

    pub fn watch_installable(&self) -> watch::Receiver<bool> {
        self.state.installable.subscribe()
    }

    pub fn watch_installed(&self) -> watch::Receiver<bool> {
        self.state.installed.subscribe()
    }

    pub fn watch_update_available(&self) -> watch::Receiver<bool> {
        self.state.update_available.subscribe()
    }

    /// Show the deferred install prompt. Returns whether the user accepted.
    /// The offer is used up whatever the answer.
    pub async fn prompt_install(&self) -> bool {
        let Some(prompt) = self.state.deferred.lock().await.take() else {
            debug!("No install offer pending");
            return false;
        };
        set(&self.state.installable, false);

        let choice = match prompt.prompt().await {
            Ok(()) => prompt.user_choice().await,
            Err(e) => Err(e),
        };

        match choice {
            Ok(UserChoice::Accepted) => {
                info!("Install accepted");
                set(&self.state.installed, true);
                true
            }
            Ok(UserChoice::Dismissed) => {
                debug!("Install dismissed");
                false
            }
            Err(e) => {
                warn!(error = %e, "Install prompt failed");
                false
            }
        }
    }

    /// Ask the controlling worker to skip waiting. The caller reloads.
    pub async fn apply_update(&self) {
        if self.container.controller().await.is_none() {
            debug!("No controller, nothing to update");
            return;
        }

        if let Err(e) = self
            .container
            .post_message(ControlMessage::skip_waiting().to_value())
            .await
        {
            warn!(error = %e, "Failed to deliver skip-waiting");
        }
        set(&self.state.update_available, false);
    }
}
