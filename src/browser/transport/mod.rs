//! Streaming transport to the render service.
//!
//! The first fetch of a browser command opens a logical stream: a task that
//! POSTs the command and decodes the long-lived reply. Every fetch, first or
//! continuation, then waits for exactly one event of that stream under its
//! own deadline. A deadline that expires tears the stream's connection down
//! without touching other streams that share the client.

mod decoder;
mod stream;

pub use decoder::{Continuation, FrameDecoder, RenderEvent, parse_frame};
pub use stream::{StreamHandle, StreamState};

use crate::browser::command::BrowserOptions;
use crate::browser::config::BrowserConfig;
use crate::downloader::{Downloader, ReqwestClientDownloader};
use crate::error::SpiderError;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use stream::{EventResult, LogicalStream, drive_stream};
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};
use url::Url;

/// Sends rewritten browser requests and hands out their render events one
/// fetch at a time.
pub struct BrowserDownloadHandler {
    client: reqwest::Client,
    config: BrowserConfig,
    limiters: DashMap<String, Arc<Semaphore>>,
    streams: Mutex<JoinSet<()>>,
    next_stream_id: AtomicU64,
    closed: AtomicBool,
}

impl BrowserDownloadHandler {
    pub fn new(config: BrowserConfig) -> Result<Self, SpiderError> {
        config.validate()?;

        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_connections_per_host)
            .connect_timeout(config.connect_timeout);
        if let Some(address) = config.bind_address {
            builder = builder.local_address(address);
        }
        let client = config.tls_method.apply(builder).build()?;

        Ok(Self {
            client,
            config,
            limiters: DashMap::new(),
            streams: Mutex::new(JoinSet::new()),
            next_stream_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    /// Fetches the next render event for `request`.
    ///
    /// Without a stream handle a new logical stream is opened and its handle
    /// is stored on the request carried by the returned response. With one,
    /// the fetch waits on that stream.
    pub async fn download_request(&self, mut request: Request) -> Result<Response, SpiderError> {
        let timeout = request
            .download_timeout()
            .unwrap_or(self.config.download_timeout);
        let target = request.url.to_string();

        let existing = BrowserOptions::of(&request).and_then(|o| o.stream()).cloned();
        let (receiver, handle) = match existing {
            Some(handle) => {
                trace!("Awaiting next event of stream {} for {}", handle.id(), target);
                (handle.register()?, handle)
            }
            None => {
                if BrowserOptions::of(&request).is_none() {
                    return Err(SpiderError::GeneralError(format!(
                        "request to {target} carries no browser command"
                    )));
                }
                let (receiver, handle) = self.dispatch(&request)?;
                if let Some(options) = BrowserOptions::of_mut(&mut request) {
                    options.set_stream(handle.clone());
                }
                (receiver, handle)
            }
        };

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(event)) => Ok(event?.into_response(request)),
            Ok(Err(_)) => Err(SpiderError::StreamClosed),
            Err(_) => {
                warn!(
                    "Fetch from stream {} exceeded {:?}, aborting its connection",
                    handle.id(),
                    timeout
                );
                handle.abort();
                Err(SpiderError::Timeout {
                    url: target,
                    duration: timeout,
                })
            }
        }
    }

    /// Opens a logical stream for `request` with its first waiter already queued.
    fn dispatch(
        &self,
        request: &Request,
    ) -> Result<(oneshot::Receiver<EventResult>, StreamHandle), SpiderError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SpiderError::Transport("browser transport is closed".into()));
        }

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        let outbound = builder.build()?;

        let id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let mut stream = LogicalStream::new(id, request.url.clone(), self.config.max_buffered_events);
        let (waiter, receiver) = oneshot::channel();
        stream.register(waiter);

        let (tx, rx) = mpsc::unbounded_channel();
        let limiter = self.limiter(&request.url);

        let mut streams = self.streams.lock();
        while streams.try_join_next().is_some() {}
        let task = streams.spawn(drive_stream(stream, self.client.clone(), outbound, limiter, rx));
        debug!("Opened stream {} to {} ({} running)", id, request.url, streams.len());

        Ok((receiver, StreamHandle::new(id, tx, task)))
    }

    fn limiter(&self, url: &Url) -> Arc<Semaphore> {
        let key = format!(
            "{}:{}",
            url.host_str().unwrap_or_default(),
            url.port_or_known_default().unwrap_or_default()
        );
        self.limiters
            .entry(key)
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.max_connections_per_host)))
            .clone()
    }

    /// Stops accepting new streams, lets running ones finish within the grace
    /// period and aborts whatever is left.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for limiter in self.limiters.iter() {
            limiter.value().close();
        }

        let mut streams = std::mem::take(&mut *self.streams.lock());
        let grace = self.config.shutdown_grace;
        let drained = tokio::time::timeout(grace, async {
            while streams.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                "Aborting {} browser streams still open after {:?}",
                streams.len(),
                grace
            );
            streams.shutdown().await;
        }
        info!("Browser transport closed");
    }
}

/// Downloader that sends browser requests through a [`BrowserDownloadHandler`]
/// and everything else through a plain HTTP downloader on the same client.
pub struct BrowserDownloader {
    handler: BrowserDownloadHandler,
    fallback: ReqwestClientDownloader,
}

impl BrowserDownloader {
    pub fn new(config: BrowserConfig) -> Result<Self, SpiderError> {
        let handler = BrowserDownloadHandler::new(config)?;
        let fallback =
            ReqwestClientDownloader::new(handler.client().clone(), handler.config().download_timeout);
        Ok(Self { handler, fallback })
    }

    pub fn handler(&self) -> &BrowserDownloadHandler {
        &self.handler
    }
}

#[async_trait]
impl Downloader for BrowserDownloader {
    type Client = reqwest::Client;

    fn client(&self) -> &Self::Client {
        self.handler.client()
    }

    async fn download(&self, request: Request) -> Result<Response, SpiderError> {
        if BrowserOptions::of(&request).is_some_and(BrowserOptions::is_processed) {
            self.handler.download_request(request).await
        } else {
            self.fallback.download(request).await
        }
    }

    async fn close(&self) {
        self.handler.close().await;
    }
}
