//! The page response handed to spiders.

use crate::request::Request;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::borrow::Cow;
use url::Url;

/// More frames remain on the logical stream that produced this response.
pub const STILL_RUNNING: &str = "still_running";
/// The logical stream ended without a frame for this fetch.
pub const NO_MORE_CONTENT: &str = "no_more_content";

#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Unordered tags attached by the downloader.
    pub flags: Vec<String>,
    /// The request as it left the downloader.
    pub request: Request,
}

impl Response {
    pub fn new(url: Url, status: StatusCode, request: Request) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            flags: Vec::new(),
            request,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.add_flag(flag);
        self
    }

    pub fn add_flag(&mut self, flag: impl Into<String>) {
        let flag = flag.into();
        if !self.has_flag(&flag) {
            self.flags.push(flag);
        }
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub fn request_from_response(&self) -> &Request {
        &self.request
    }

    /// Body decoded as UTF-8, lossy.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}
