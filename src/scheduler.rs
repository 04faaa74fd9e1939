//! # Scheduler Module
//!
//! Implements the request scheduler: the crawl frontier plus duplicate
//! suppression.
//!
//! ## Overview
//!
//! The `Scheduler` queues requests in FIFO order and hands them to the
//! downloader task over a bounded channel. It runs as an actor: callers send
//! messages over an internal channel and a single loop owns the dispatching.
//!
//! Duplicates are detected by request fingerprint at enqueue time. Requests
//! marked `dont_filter` bypass the check, which is how continuation fetches of
//! a browser stream get through even though they are byte-identical to the
//! request that opened the stream.
//!
//! ## Example
//!
//! ```rust,ignore
//! let (scheduler, request_receiver) = Scheduler::new();
//! scheduler.enqueue_request(Request::new(Url::parse("https://example.com")?)).await?;
//! let next = request_receiver.recv().await?;
//! ```

use crate::error::SpiderError;
use crate::request::Request;
use crossbeam::queue::SegQueue;
use kanal::{AsyncReceiver, AsyncSender, bounded_async, unbounded_async};
use moka::sync::Cache;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, error, info, trace, warn};

const OUTBOUND_CAPACITY: usize = 100;
const MAX_PENDING_REQUESTS: usize = 10_000;
const MAX_TRACKED_FINGERPRINTS: u64 = 100_000;

enum SchedulerMessage {
    Enqueue(Box<Request>),
    Shutdown,
}

pub struct Scheduler {
    request_queue: SegQueue<Request>,
    seen_fingerprints: Cache<String, ()>,
    tx_internal: AsyncSender<SchedulerMessage>,
    outbound: AsyncSender<Request>,
    // Requests accepted by `enqueue_request` and not yet handed to the downloader.
    pending_requests: AtomicUsize,
    pub(crate) is_shutting_down: AtomicBool,
    max_pending_requests: usize,
}

impl Scheduler {
    /// Creates a new `Scheduler` and returns it with the receiver the
    /// downloader task reads requests from.
    pub fn new() -> (Arc<Self>, AsyncReceiver<Request>) {
        let (tx_internal, rx_internal) = unbounded_async();
        let (outbound, rx_req_out) = bounded_async(OUTBOUND_CAPACITY);

        let scheduler = Arc::new(Scheduler {
            request_queue: SegQueue::new(),
            seen_fingerprints: Cache::builder()
                .max_capacity(MAX_TRACKED_FINGERPRINTS)
                .build(),
            tx_internal,
            outbound,
            pending_requests: AtomicUsize::new(0),
            is_shutting_down: AtomicBool::new(false),
            max_pending_requests: MAX_PENDING_REQUESTS,
        });

        let scheduler_clone = Arc::clone(&scheduler);
        tokio::spawn(async move {
            scheduler_clone.run_loop(rx_internal).await;
        });

        (scheduler, rx_req_out)
    }

    async fn run_loop(&self, rx_internal: AsyncReceiver<SchedulerMessage>) {
        info!(
            "Scheduler run_loop started with max pending requests: {}",
            self.max_pending_requests
        );
        loop {
            while let Ok(Some(msg)) = rx_internal.try_recv() {
                if !self.handle_message(Ok(msg)) {
                    return self.finish();
                }
            }

            if let Some(request) = self.request_queue.pop() {
                trace!("Sending request to crawler: {}", request.url);
                if self.outbound.send(request).await.is_err() {
                    error!("Crawler receiver dropped. Scheduler can no longer send requests.");
                }
                self.pending_requests.fetch_sub(1, Ordering::SeqCst);
                continue;
            }

            trace!("No pending requests, waiting for internal message");
            if !self.handle_message(rx_internal.recv().await) {
                return self.finish();
            }
        }
    }

    fn finish(&self) {
        info!(
            "Scheduler run_loop finished with {} pending requests remaining.",
            self.pending_requests.load(Ordering::SeqCst)
        );
    }

    fn handle_message(&self, msg: Result<SchedulerMessage, kanal::ReceiveError>) -> bool {
        match msg {
            Ok(SchedulerMessage::Enqueue(boxed_request)) => {
                trace!("Queueing request: {}", boxed_request.url);
                self.request_queue.push(*boxed_request);
                true
            }
            Ok(SchedulerMessage::Shutdown) => {
                info!("Scheduler received shutdown signal. Exiting run_loop.");
                self.is_shutting_down.store(true, Ordering::SeqCst);
                false
            }
            Err(_) => {
                warn!("Scheduler internal message channel closed. Exiting run_loop.");
                self.is_shutting_down.store(true, Ordering::SeqCst);
                false
            }
        }
    }

    /// Enqueues a request unless an identical one was already seen.
    ///
    /// Returns `Ok(false)` when the request was suppressed as a duplicate.
    pub async fn enqueue_request(&self, request: Request) -> Result<bool, SpiderError> {
        if !self.should_enqueue_request(&request) {
            trace!("Duplicate request filtered: {}", request.url);
            return Ok(false);
        }

        let current_pending = self.pending_requests.fetch_add(1, Ordering::SeqCst);
        if current_pending >= self.max_pending_requests {
            self.pending_requests.fetch_sub(1, Ordering::SeqCst);
            warn!(
                "Maximum pending requests reached ({}), request dropped due to backpressure: {}",
                self.max_pending_requests, request.url
            );
            return Err(SpiderError::GeneralError(
                "Scheduler at maximum capacity, request dropped due to backpressure.".into(),
            ));
        }

        let url = request.url.clone();
        if self
            .tx_internal
            .send(SchedulerMessage::Enqueue(Box::new(request)))
            .await
            .is_err()
        {
            self.pending_requests.fetch_sub(1, Ordering::SeqCst);
            if !self.is_shutting_down.load(Ordering::SeqCst) {
                error!("Scheduler internal message channel is closed. Dropping request: {url}");
            }
            return Err(SpiderError::GeneralError(
                "Scheduler internal channel closed.".into(),
            ));
        }

        trace!("Successfully enqueued request: {}", url);
        Ok(true)
    }

    /// Sends a shutdown signal to the scheduler.
    pub async fn shutdown(&self) -> Result<(), SpiderError> {
        self.is_shutting_down.store(true, Ordering::SeqCst);

        if self.tx_internal.is_closed() {
            debug!("Scheduler internal channel already closed, skipping shutdown signal");
            return Ok(());
        }
        self.tx_internal
            .send(SchedulerMessage::Shutdown)
            .await
            .map_err(|e| {
                SpiderError::GeneralError(format!(
                    "Scheduler: Failed to send shutdown signal: {}",
                    e
                ))
            })
    }

    /// Records the request's fingerprint and reports whether it is new.
    /// Always true for `dont_filter` requests, which are not recorded.
    pub fn should_enqueue_request(&self, request: &Request) -> bool {
        if request.dont_filter {
            return true;
        }
        self.seen_fingerprints
            .entry(request.fingerprint())
            .or_insert(())
            .is_fresh()
    }

    /// Returns the number of requests not yet handed to the downloader.
    #[inline]
    pub fn len(&self) -> usize {
        self.pending_requests.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nothing is queued and nothing waits in the channel to the downloader.
    pub fn is_idle(&self) -> bool {
        self.is_empty() && self.outbound.is_empty()
    }
}
