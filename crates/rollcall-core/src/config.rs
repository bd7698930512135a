//! Offline runtime configuration

use rollcall_common::{RollcallError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

/// Environment variable overriding `app.origin`.
pub const ENV_ORIGIN: &str = "ROLLCALL_ORIGIN";
/// Environment variable overriding `cache.version`.
pub const ENV_CACHE_VERSION: &str = "ROLLCALL_CACHE_VERSION";

/// Snapshot file name inside the snapshot directory.
pub const SNAPSHOT_FILE: &str = "cache-storage.json";

/// Offline runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Application identity and origin
    pub app: AppConfig,

    /// Cache generation settings
    pub cache: CacheConfig,

    /// Push notification defaults
    pub push: PushConfig,

    /// HTTP client settings
    pub net: NetConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Display name
    pub name: String,

    /// Origin the worker is registered for
    pub origin: String,

    /// Root URL opened from notifications
    pub start_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache name prefix; the generation name is `<prefix>-<version>`
    pub name_prefix: String,

    /// Deploy version
    pub version: String,

    /// Static resources written into the cache at install
    pub seed: Vec<String>,

    /// Path marker for requests that are never cached
    pub api_prefix: String,

    /// Byte quota across all cache generations
    pub quota_bytes: Option<usize>,

    /// Directory holding the persisted cache snapshot
    pub snapshot_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Title used when the payload has none
    pub default_title: String,

    /// Body used when the payload has none
    pub default_body: String,

    /// Notification icon
    pub icon: String,

    /// Notification badge
    pub badge: String,

    /// Vibration pattern in milliseconds
    pub vibrate: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// User agent string
    pub user_agent: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level name (trace, debug, info, warn, error)
    pub level: String,

    /// Output format (pretty, compact, json)
    pub format: String,

    /// Custom filter directive
    pub filter: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "School Attendance".to_string(),
            origin: "http://localhost:8080".to_string(),
            start_url: "/".to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name_prefix: "school-attendance".to_string(),
            version: "v1".to_string(),
            seed: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
                "/favicon.ico".to_string(),
            ],
            api_prefix: "/api/".to_string(),
            quota_bytes: None,
            snapshot_dir: None,
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            default_title: "New Notification".to_string(),
            default_body: "You have a new update".to_string(),
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/icon-72x72.png".to_string(),
            vibrate: vec![100, 50, 100],
        }
    }
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("Rollcall/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            filter: None,
        }
    }
}

impl OfflineConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RollcallError::config_with_source(format!("reading {}", path.display()), e)
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Self::from_json(&raw)
    }

    /// Parse and validate configuration from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| RollcallError::config_with_source("invalid config JSON", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `ROLLCALL_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(origin) = lookup(ENV_ORIGIN) {
            self.app.origin = origin;
        }
        if let Some(version) = lookup(ENV_CACHE_VERSION) {
            self.cache.version = version;
        }
    }

    /// Check that the origin, seed list and generation name are usable.
    pub fn validate(&self) -> Result<()> {
        self.origin()?;
        if self.cache.name_prefix.is_empty() || self.cache.version.is_empty() {
            return Err(RollcallError::config(
                "cache name_prefix and version must be non-empty",
            ));
        }
        if self.cache.api_prefix.is_empty() {
            return Err(RollcallError::config("cache api_prefix must be non-empty"));
        }
        self.seed_urls()?;
        self.start_url()?;
        Ok(())
    }

    /// Name of the cache generation for this deploy.
    pub fn generation_name(&self) -> String {
        format!("{}-{}", self.cache.name_prefix, self.cache.version)
    }

    /// The configured origin as an absolute http(s) URL.
    pub fn origin(&self) -> Result<Url> {
        let url = Url::parse(&self.app.origin).map_err(|e| {
            RollcallError::config_with_source(format!("invalid origin {:?}", self.app.origin), e)
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(RollcallError::config(format!(
                "origin must be http or https, got {}",
                other
            ))),
        }
    }

    /// Seed entries resolved against the origin. Every seed must stay on the
    /// origin and outside the API prefix.
    pub fn seed_urls(&self) -> Result<Vec<Url>> {
        let origin = self.origin()?;
        self.cache
            .seed
            .iter()
            .map(|entry| {
                let url = origin.join(entry).map_err(|e| {
                    RollcallError::config_with_source(format!("invalid seed entry {:?}", entry), e)
                })?;
                if url.origin() != origin.origin() {
                    return Err(RollcallError::config(format!(
                        "seed entry {:?} is not on {}",
                        entry,
                        origin.origin().ascii_serialization()
                    )));
                }
                if url.path().contains(&self.cache.api_prefix) {
                    return Err(RollcallError::config(format!(
                        "seed entry {:?} is under the api prefix {:?}",
                        entry, self.cache.api_prefix
                    )));
                }
                Ok(url)
            })
            .collect()
    }

    /// The app root URL.
    pub fn start_url(&self) -> Result<Url> {
        self.origin()?.join(&self.app.start_url).map_err(|e| {
            RollcallError::config_with_source(
                format!("invalid start_url {:?}", self.app.start_url),
                e,
            )
        })
    }

    /// Where the cache snapshot is persisted.
    pub fn snapshot_path(&self) -> PathBuf {
        let dir = self.cache.snapshot_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("rollcall")
        });
        dir.join(SNAPSHOT_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = OfflineConfig::from_json("{}").unwrap();
        assert_eq!(config.generation_name(), "school-attendance-v1");
        assert_eq!(config.cache.api_prefix, "/api/");
        assert_eq!(config.push.default_title, "New Notification");
        assert_eq!(config.push.vibrate, vec![100, 50, 100]);
    }

    #[test]
    fn test_seed_urls_resolve_against_origin() {
        let config = OfflineConfig::from_json(
            r#"{ "app": { "origin": "https://attendance.example" } }"#,
        )
        .unwrap();
        let seeds: Vec<String> = config
            .seed_urls()
            .unwrap()
            .into_iter()
            .map(|u| u.to_string())
            .collect();
        assert_eq!(
            seeds,
            vec![
                "https://attendance.example/",
                "https://attendance.example/index.html",
                "https://attendance.example/manifest.json",
                "https://attendance.example/favicon.ico",
            ]
        );
    }

    #[test]
    fn test_seed_must_stay_cacheable() {
        let cross_origin = OfflineConfig::from_json(
            r#"{ "app": { "origin": "https://attendance.example" },
                 "cache": { "seed": ["/", "https://cdn.example/chart.js"] } }"#,
        )
        .unwrap_err();
        assert_eq!(cross_origin.category(), "config");
        assert!(cross_origin.to_string().contains("cdn.example"));

        let api = OfflineConfig::from_json(
            r#"{ "app": { "origin": "https://attendance.example" },
                 "cache": { "seed": ["/", "/api/bootstrap"] } }"#,
        )
        .unwrap_err();
        assert!(api.to_string().contains("api prefix"));

        let absolute_same_origin = OfflineConfig::from_json(
            r#"{ "app": { "origin": "https://attendance.example" },
                 "cache": { "seed": ["https://attendance.example/offline.html"] } }"#,
        )
        .unwrap();
        assert_eq!(absolute_same_origin.seed_urls().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_origin_rejected() {
        let err = OfflineConfig::from_json(r#"{ "app": { "origin": "not a url" } }"#).unwrap_err();
        assert_eq!(err.category(), "config");

        let err =
            OfflineConfig::from_json(r#"{ "app": { "origin": "ftp://files.example" } }"#)
                .unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }

    #[test]
    fn test_empty_version_rejected() {
        let err = OfflineConfig::from_json(r#"{ "cache": { "version": "" } }"#).unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(OfflineConfig::from_json("{ cache: }").is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = OfflineConfig::default();
        let vars: HashMap<&str, &str> = [
            (ENV_ORIGIN, "https://school.example"),
            (ENV_CACHE_VERSION, "v7"),
        ]
        .into_iter()
        .collect();
        config.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.app.origin, "https://school.example");
        assert_eq!(config.generation_name(), "school-attendance-v7");
    }

    #[test]
    fn test_snapshot_path_uses_configured_dir() {
        let mut config = OfflineConfig::default();
        config.cache.snapshot_dir = Some(PathBuf::from("/tmp/rollcall-test"));
        assert_eq!(
            config.snapshot_path(),
            PathBuf::from("/tmp/rollcall-test").join(SNAPSHOT_FILE)
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.json");
        std::fs::write(&path, r#"{ "cache": { "version": "v2" } }"#).unwrap();

        let config = OfflineConfig::load(&path).unwrap();
        assert_eq!(config.generation_name(), "school-attendance-v2");

        let missing = OfflineConfig::load(dir.path().join("missing.json")).unwrap_err();
        assert_eq!(missing.category(), "config");
    }
}
