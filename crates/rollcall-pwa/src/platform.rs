//! Platform capabilities the hook listens to.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::HookError;

const EVENT_CAPACITY: usize = 16;

/// The user's answer to the native install prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserChoice {
    Accepted,
    Dismissed,
}

/// A deferred install offer.
#[async_trait]
pub trait InstallPrompt: Send + Sync {
    /// Show the native prompt.
    async fn prompt(&self) -> Result<(), HookError>;

    /// Resolve once the user has answered.
    async fn user_choice(&self) -> Result<UserChoice, HookError>;
}

/// Lifecycle events raised by the platform.
#[derive(Clone)]
pub enum PlatformEvent {
    /// The app became installable; the offer is deferred until prompted.
    BeforeInstallPrompt(Arc<dyn InstallPrompt>),
    /// The app was installed.
    AppInstalled,
    /// A worker took control of the page.
    ControllerChange,
}

impl fmt::Debug for PlatformEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformEvent::BeforeInstallPrompt(_) => f.write_str("BeforeInstallPrompt"),
            PlatformEvent::AppInstalled => f.write_str("AppInstalled"),
            PlatformEvent::ControllerChange => f.write_str("ControllerChange"),
        }
    }
}

/// Host platform.
pub trait Platform: Send + Sync {
    /// Whether the app is running in standalone display mode.
    fn is_standalone(&self) -> bool;

    /// Subscribe to lifecycle events.
    fn subscribe(&self) -> broadcast::Receiver<PlatformEvent>;
}

/// In-process platform whose events are injected by the caller.
pub struct ChannelPlatform {
    standalone: bool,
    install_prompt: bool,
    events: broadcast::Sender<PlatformEvent>,
}

impl ChannelPlatform {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            standalone: false,
            install_prompt: true,
            events,
        }
    }

    /// Report standalone display mode at mount.
    pub fn standalone(mut self, standalone: bool) -> Self {
        self.standalone = standalone;
        self
    }

    /// A platform that never offers installation.
    pub fn without_install_prompt(mut self) -> Self {
        self.install_prompt = false;
        self
    }

    /// Raise an event. Install offers are dropped when unsupported.
    pub fn emit(&self, event: PlatformEvent) {
        if matches!(event, PlatformEvent::BeforeInstallPrompt(_)) && !self.install_prompt {
            debug!("Install prompt unsupported, offer dropped");
            return;
        }
        let _ = self.events.send(event);
    }
}

impl Default for ChannelPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for ChannelPlatform {
    fn is_standalone(&self) -> bool {
        self.standalone
    }

    fn subscribe(&self) -> broadcast::Receiver<PlatformEvent> {
        self.events.subscribe()
    }
}
