//! # Rollcall Common
//!
//! Error type and logging setup shared by the Rollcall crates.
//!
//! Each crate keeps its own error enum for its operations and converts
//! into [`RollcallError`] at crate boundaries, so binaries deal with a
//! single type that knows its category.

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LogTarget};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for Rollcall.
#[derive(Error, Debug)]
pub enum RollcallError {
    /// Invalid or unreadable configuration.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Transport failure talking to the origin.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Cache storage or snapshot failure.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Worker lifecycle or page hook failure.
    #[error("Worker error: {message}")]
    Worker {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Not found: {0}")]
    NotFound(String),
}

macro_rules! constructors {
    ($($variant:ident => $plain:ident, $with_source:ident;)*) => {
        $(
            pub fn $plain(message: impl Into<String>) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: None,
                }
            }

            pub fn $with_source<E: std::error::Error + Send + Sync + 'static>(
                message: impl Into<String>,
                source: E,
            ) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: Some(Box::new(source)),
                }
            }
        )*
    };
}

impl RollcallError {
    constructors! {
        Config => config, config_with_source;
        Network => network, network_with_source;
        Cache => cache, cache_with_source;
        Worker => worker, worker_with_source;
    }

    /// Whether trying again later may succeed (the origin may come back).
    pub fn is_retryable(&self) -> bool {
        matches!(self, RollcallError::Network { .. })
    }

    /// Short category name for logs and reports.
    pub fn category(&self) -> &'static str {
        match self {
            RollcallError::Config { .. } => "config",
            RollcallError::Network { .. } => "network",
            RollcallError::Cache { .. } => "cache",
            RollcallError::Worker { .. } => "worker",
            RollcallError::NotFound(_) => "not_found",
        }
    }
}

/// Result type alias for Rollcall operations.
pub type Result<T> = std::result::Result<T, RollcallError>;
