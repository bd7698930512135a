//! Push notifications shown by the worker.

use rollcall_core::config::PushConfig;
use rollcall_core::types::actions;
use rollcall_core::PushPayload;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

/// Unique identifier for a displayed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(u64);

impl NotificationId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// A displayed notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub actions: Vec<NotificationAction>,
    /// URL opened by the `open` action.
    pub open_url: Url,
}

impl Notification {
    /// Build a notification from a push payload, filling gaps from defaults.
    pub fn from_push(payload: PushPayload, defaults: &PushConfig, open_url: Url) -> Self {
        Self {
            id: NotificationId::new(),
            title: payload
                .title
                .unwrap_or_else(|| defaults.default_title.clone()),
            body: payload.body.unwrap_or_else(|| defaults.default_body.clone()),
            icon: defaults.icon.clone(),
            badge: defaults.badge.clone(),
            vibrate: defaults.vibrate.clone(),
            actions: vec![
                NotificationAction {
                    action: actions::OPEN.to_string(),
                    title: "Open".to_string(),
                },
                NotificationAction {
                    action: actions::DISMISS.to_string(),
                    title: "Dismiss".to_string(),
                },
            ],
            open_url,
        }
    }
}

/// Notifications currently on screen.
#[derive(Debug, Default)]
pub struct NotificationTray {
    shown: Vec<Notification>,
}

impl NotificationTray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(&mut self, notification: Notification) {
        self.shown.push(notification);
    }

    /// Close a notification, returning it if it was shown.
    pub fn close(&mut self, id: NotificationId) -> Option<Notification> {
        let index = self.shown.iter().position(|n| n.id == id)?;
        Some(self.shown.remove(index))
    }

    pub fn get(&self, id: NotificationId) -> Option<&Notification> {
        self.shown.iter().find(|n| n.id == id)
    }

    pub fn all(&self) -> &[Notification] {
        &self.shown
    }
}
