//! Cache Storage: named cache generations of request → response snapshots.

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use rollcall_net::{Request, Response, ResponseType};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};
use url::Url;

use crate::{now_millis, ServiceWorkerError};

/// One stored response, keyed by its request URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub url: Url,
    pub method: String,
    pub status: u16,
    pub response_type: ResponseType,
    /// Non-UTF-8 header values are not kept.
    pub headers: HashMap<String, String>,
    /// Base64 in snapshots.
    #[serde(with = "base64_body")]
    pub body: Vec<u8>,
    /// Milliseconds since the epoch.
    pub cached_at: u64,
    /// Name of the cache generation that wrote this entry.
    pub generation: String,
}

impl CacheEntry {
    /// Snapshot a response for storage under the request's URL.
    pub fn from_response(request: &Request, response: &Response, generation: &str) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: request.url.clone(),
            method: request.method.as_str().to_string(),
            status: response.status.as_u16(),
            response_type: response.response_type,
            headers,
            body: response.body().to_vec(),
            cached_at: now_millis(),
            generation: generation.to_string(),
        }
    }

    /// Rebuild a response from the stored snapshot.
    pub fn to_response(&self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(n, v);
            }
        }

        let mut response = Response::new(self.url.clone(), status, Bytes::from(self.body.clone()))
            .with_type(self.response_type);
        response.headers = headers;
        response
    }

    /// Approximate stored size in bytes.
    pub fn size_bytes(&self) -> usize {
        let header_bytes: usize = self.headers.iter().map(|(k, v)| k.len() + v.len()).sum();
        self.body.len() + header_bytes + self.url.as_str().len()
    }
}

mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// ==================== Cache ====================

/// A cache instance (one generation).
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Cache {
    pub name: String,
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Look up the entry stored for an absolute URL.
    pub fn match_request(&self, url: &str) -> Option<&CacheEntry> {
        self.entries.get(url)
    }

    /// Add or replace an entry, returning the one it replaced.
    fn put(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(entry.url.to_string(), entry)
    }

    pub fn delete(&mut self, url: &str) -> bool {
        self.entries.remove(url).is_some()
    }

    /// All keys (URLs), sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes held by this cache.
    pub fn size_bytes(&self) -> usize {
        self.entries.values().map(CacheEntry::size_bytes).sum()
    }
}

// ==================== Cache Storage ====================

/// Cache storage (the `caches` global), shared by all worker generations.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,

    /// Byte quota across all caches.
    #[serde(skip)]
    quota_bytes: Option<usize>,
}

impl CacheStorage {
    /// Unlimited, empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage limited to `quota_bytes`.
    pub fn with_quota(quota_bytes: Option<usize>) -> Self {
        Self {
            caches: HashMap::new(),
            quota_bytes,
        }
    }

    /// Change the quota.
    pub fn set_quota(&mut self, quota_bytes: Option<usize>) {
        self.quota_bytes = quota_bytes;
    }

    /// Open the named cache, creating it on first use.
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get a cache by name.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Drop a whole generation. Returns false if it did not exist.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// All cache names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort();
        names
    }

    /// Match a URL in one named cache.
    pub fn match_in(&self, name: &str, url: &str) -> Option<&CacheEntry> {
        self.caches.get(name)?.match_request(url)
    }

    /// Bytes held across all caches.
    pub fn usage_bytes(&self) -> usize {
        self.caches.values().map(Cache::size_bytes).sum()
    }

    /// Store an entry in an existing cache, replacing any entry for the same
    /// URL. Fails if the cache was deleted or the quota would be exceeded.
    pub fn put(&mut self, name: &str, entry: CacheEntry) -> Result<(), ServiceWorkerError> {
        let replaced = self
            .caches
            .get(name)
            .ok_or_else(|| ServiceWorkerError::CacheError(format!("cache {} does not exist", name)))?
            .match_request(entry.url.as_str())
            .map(CacheEntry::size_bytes)
            .unwrap_or(0);

        self.check_quota(entry.size_bytes(), replaced)?;

        if let Some(cache) = self.caches.get_mut(name) {
            cache.put(entry);
        }
        Ok(())
    }

    /// Store a batch of entries in a cache (created if missing). Either all
    /// entries are written or none are.
    pub fn put_all(&mut self, name: &str, entries: Vec<CacheEntry>) -> Result<(), ServiceWorkerError> {
        let (added, replaced) = match self.caches.get(name) {
            Some(cache) => entries.iter().fold((0, 0), |(added, replaced), entry| {
                let old = cache
                    .match_request(entry.url.as_str())
                    .map(CacheEntry::size_bytes)
                    .unwrap_or(0);
                (added + entry.size_bytes(), replaced + old)
            }),
            None => (entries.iter().map(CacheEntry::size_bytes).sum(), 0),
        };

        self.check_quota(added, replaced)?;

        let cache = self.open(name);
        for entry in entries {
            cache.put(entry);
        }
        Ok(())
    }

    fn check_quota(&self, added: usize, replaced: usize) -> Result<(), ServiceWorkerError> {
        if let Some(quota) = self.quota_bytes {
            let requested = self.usage_bytes().saturating_sub(replaced) + added;
            if requested > quota {
                return Err(ServiceWorkerError::QuotaExceeded { requested, quota });
            }
        }
        Ok(())
    }

    /// Persist every cache to a JSON snapshot file.
    pub async fn save_snapshot(&self, path: &Path) -> Result<(), ServiceWorkerError> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| ServiceWorkerError::SnapshotError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ServiceWorkerError::SnapshotError(e.to_string()))?;
        }

        // Write then rename; readers never observe a partial file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| ServiceWorkerError::SnapshotError(e.to_string()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| ServiceWorkerError::SnapshotError(e.to_string()))?;

        info!(path = %path.display(), caches = self.caches.len(), bytes = json.len(), "Cache snapshot saved");
        Ok(())
    }

    /// Load a snapshot. A missing file yields empty storage.
    pub async fn load_snapshot(
        path: &Path,
        quota_bytes: Option<usize>,
    ) -> Result<Self, ServiceWorkerError> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cache snapshot, starting empty");
                return Ok(Self::with_quota(quota_bytes));
            }
            Err(e) => return Err(ServiceWorkerError::SnapshotError(e.to_string())),
        };

        let mut storage: Self = serde_json::from_slice(&raw)
            .map_err(|e| ServiceWorkerError::SnapshotError(e.to_string()))?;
        storage.quota_bytes = quota_bytes;

        info!(path = %path.display(), caches = storage.caches.len(), "Cache snapshot loaded");
        Ok(storage)
    }
}
