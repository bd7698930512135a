//! # Rollcall Net
//!
//! Request/response model and HTTP loading for the Rollcall offline runtime.
//!
//! ## Design Goals
//!
//! 1. **Injectable fetch**: the cache worker only sees the [`Fetch`] trait,
//!    so tests and harnesses can substitute deterministic fakes
//! 2. **Response typing**: every response carries a [`ResponseType`] so the
//!    worker can tell direct same-origin responses from opaque ones
//! 3. **Loaded bodies**: responses hold their whole body, ready to be
//!    cached or replayed

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{ACCEPT_LANGUAGE, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, trace};
use url::Url;

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    /// The origin could not be reached or the exchange broke off.
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Cross-origin request refused: {0}")]
    CrossOrigin(Url),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Unreadable body: {0}")]
    Body(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// What a cross-origin response is allowed to look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Readable (CORS).
    #[default]
    Cors,
    /// Opaque.
    NoCors,
    /// Refused.
    SameOrigin,
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
    /// Overrides the loader's default timeout.
    pub timeout: Option<Duration>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            mode: RequestMode::default(),
            timeout: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            body: Some(body),
            ..Self::new(Method::POST, url)
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Key under which the response is cached: the absolute URL.
    pub fn cache_key(&self) -> String {
        self.url.to_string()
    }

    /// Whether the request targets the given origin (scheme, host, port).
    pub fn is_same_origin(&self, origin: &Url) -> bool {
        self.url.origin() == origin.origin()
    }
}

/// Response type, mirroring what a page can observe about a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Direct same-origin response.
    #[default]
    Basic,
    /// Readable cross-origin response.
    Cors,
    /// Unreadable cross-origin response (status 0, empty body).
    Opaque,
    /// Network error.
    Error,
}

/// A response with its body fully loaded.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    body: Bytes,
}

impl Response {
    /// A basic response.
    pub fn new(url: Url, status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            response_type: ResponseType::Basic,
            body: body.into(),
        }
    }

    /// The placeholder a no-cors cross-origin request gets.
    pub fn opaque(url: Url) -> Self {
        Self::new(url, StatusCode::OK, Bytes::new()).with_type(ResponseType::Opaque)
    }

    pub fn with_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Visible 2xx status.
    pub fn ok(&self) -> bool {
        self.status_code() / 100 == 2
    }

    /// Status as a page sees it; opaque and error responses report 0.
    pub fn status_code(&self) -> u16 {
        match self.response_type {
            ResponseType::Opaque | ResponseType::Error => 0,
            ResponseType::Basic | ResponseType::Cors => self.status.as_u16(),
        }
    }

    /// Only direct same-origin 200 responses are stored and replayed.
    pub fn is_cacheable(&self) -> bool {
        self.response_type == ResponseType::Basic && self.status == StatusCode::OK
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Cheap clone of the body.
    pub fn bytes(&self) -> Bytes {
        self.body.clone()
    }

    /// Body decoded as UTF-8.
    pub fn text(&self) -> Result<String, NetError> {
        std::str::from_utf8(&self.body)
            .map(str::to_owned)
            .map_err(|e| NetError::Body(e.to_string()))
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE)?.to_str().ok()
    }
}

/// Something that can perform a network fetch.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Perform the request. Transport failures are errors; HTTP error
    /// statuses are successful fetches.
    async fn fetch(&self, request: Request) -> Result<Response, NetError>;
}

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub user_agent: String,
    /// Sent with every request.
    pub accept_language: String,
    pub default_timeout: Duration,
    pub max_redirects: usize,
    /// Origin of the page issuing requests; decides basic vs cors typing.
    pub origin: Option<Url>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: "Rollcall/1.0".to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
            origin: None,
        }
    }
}

/// [`Fetch`] over HTTP with reqwest.
pub struct ResourceLoader {
    client: Client,
    config: LoaderConfig,
}

impl ResourceLoader {
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let mut defaults = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&config.accept_language) {
            defaults.insert(ACCEPT_LANGUAGE, value);
        }

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(defaults)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(origin = ?config.origin.as_ref().map(Url::as_str), "ResourceLoader initialized");

        Ok(Self { client, config })
    }

    /// Type a response for `url` as the issuing page would see it. `None`
    /// means the request must not be made.
    fn classify(&self, url: &Url, mode: RequestMode) -> Option<ResponseType> {
        let cross_origin = self
            .config
            .origin
            .as_ref()
            .is_some_and(|origin| url.origin() != origin.origin());

        match (cross_origin, mode) {
            (false, _) => Some(ResponseType::Basic),
            (true, RequestMode::Cors) => Some(ResponseType::Cors),
            (true, RequestMode::NoCors) => Some(ResponseType::Opaque),
            (true, RequestMode::SameOrigin) => None,
        }
    }
}

#[async_trait]
impl Fetch for ResourceLoader {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let response_type = self
            .classify(&request.url, request.mode)
            .ok_or_else(|| NetError::CrossOrigin(request.url.clone()))?;

        let timeout = request.timeout.unwrap_or(self.config.default_timeout);
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .timeout(timeout);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(timeout)
            } else {
                NetError::HttpError(e)
            }
        })?;

        let url = response.url().clone();
        if response_type == ResponseType::Opaque {
            trace!(url = %url, "Opaque cross-origin response");
            return Ok(Response::opaque(url));
        }

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        trace!(url = %url, status = %status, body_len = body.len(), "Response received");

        Ok(Response {
            url,
            status,
            headers,
            response_type,
            body,
        })
    }
}
