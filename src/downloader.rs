//! Downloader contract and the plain HTTP downloader.

use crate::error::SpiderError;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use std::time::Duration;
use tracing::trace;

/// Turns one request into one response.
#[async_trait]
pub trait Downloader: Send + Sync + 'static {
    /// Client handed to downloader middlewares.
    type Client: Send + Sync;

    fn client(&self) -> &Self::Client;

    async fn download(&self, request: Request) -> Result<Response, SpiderError>;

    /// Releases connections once the crawl is over.
    async fn close(&self) {}
}

/// Fetches requests directly with a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestClientDownloader {
    client: reqwest::Client,
    timeout: Duration,
}

impl Default for ReqwestClientDownloader {
    fn default() -> Self {
        Self::new(reqwest::Client::new(), Duration::from_secs(30))
    }
}

impl ReqwestClientDownloader {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl Downloader for ReqwestClientDownloader {
    type Client = reqwest::Client;

    fn client(&self) -> &Self::Client {
        &self.client
    }

    async fn download(&self, request: Request) -> Result<Response, SpiderError> {
        let timeout = request.download_timeout().unwrap_or(self.timeout);
        trace!("Downloading {} {} (timeout {:?})", request.method, request.url, timeout);

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .timeout(timeout);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let reply = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                SpiderError::Timeout {
                    url: request.url.to_string(),
                    duration: timeout,
                }
            } else {
                SpiderError::from(e)
            }
        })?;

        let url = reply.url().clone();
        let status = reply.status();
        let headers = reply.headers().clone();
        let body = reply.bytes().await?;

        Ok(Response::new(url, status, request)
            .with_headers(headers)
            .with_body(body))
    }
}
