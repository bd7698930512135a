//! Rollcall Core Library
//!
//! This crate provides configuration and the wire types shared by the cache
//! worker and the page-side install/update hook.

pub mod config;
pub mod types;

pub use config::OfflineConfig;
pub use types::{ClientId, ControlMessage, PushPayload};
