//! The crawl request that flows from spiders through the scheduler, the
//! middleware chain and the downloader.
//!
//! Besides the usual HTTP parts a request carries two kinds of execution
//! context: `meta`, a JSON object that spiders and settings may fill freely,
//! and typed `extensions` for state that components attach while the request
//! is in flight (the browser adapters keep their options and stream handle
//! there).

use crate::browser::BrowserOptions;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{Extensions, HeaderMap, Method};
use serde_json::{Map, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use url::Url;

/// Meta key holding a per-request download timeout, in seconds.
pub const DOWNLOAD_TIMEOUT_META: &str = "download_timeout";

#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub meta: Map<String, Value>,
    /// Bypass duplicate suppression in the scheduler.
    pub dont_filter: bool,
    extensions: Extensions,
}

impl Request {
    /// Creates a GET request for `url`.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            meta: Map::new(),
            dont_filter: false,
            extensions: Extensions::new(),
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    pub fn with_dont_filter(mut self, dont_filter: bool) -> Self {
        self.dont_filter = dont_filter;
        self
    }

    pub fn get_meta(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Per-request download timeout taken from `meta["download_timeout"]`.
    pub fn download_timeout(&self) -> Option<Duration> {
        self.meta
            .get(DOWNLOAD_TIMEOUT_META)
            .and_then(Value::as_f64)
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
    }

    /// Identity used by the scheduler for duplicate suppression.
    ///
    /// Browser commands are identified by their canonical command JSON too,
    /// so different scripts for the same page are not collapsed.
    pub fn fingerprint(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.method.as_str().hash(&mut hasher);
        self.url.as_str().hash(&mut hasher);
        if let Some(body) = &self.body {
            body.hash(&mut hasher);
        }
        if let Some(command) = BrowserOptions::of(self).and_then(|o| o.command.to_json().ok()) {
            command.hash(&mut hasher);
        }
        format!("{:016x}", hasher.finish())
    }
}
