//! # Statistics Module
//!
//! Collects counters about a crawl.
//!
//! ## Overview
//!
//! The `StatCollector` is shared by every task of the crawler and updated with
//! atomic operations. Besides the usual request, response and item counters
//! it tracks continuation fetches scheduled while a browser stream was still
//! running and fetches that hit their deadline.
//!
//! ## Example
//!
//! ```rust,ignore
//! let stats = crawler.get_stats();
//! crawler.start_crawl().await?;
//! println!("{}", stats);
//! println!("{}", stats.to_json_string_pretty()?);
//! ```

use crate::error::SpiderError;
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::Instant,
};

fn load(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Collects counters about the crawler's operation.
#[derive(Debug, serde::Serialize)]
pub struct StatCollector {
    #[serde(skip)]
    pub start_time: Instant,

    pub requests_enqueued: AtomicUsize,
    pub requests_sent: AtomicUsize,
    pub requests_succeeded: AtomicUsize,
    pub requests_failed: AtomicUsize,
    /// Subset of `requests_failed` that hit their download deadline.
    pub requests_timed_out: AtomicUsize,
    pub requests_retried: AtomicUsize,
    /// Requests or responses a middleware chose to drop.
    pub requests_dropped: AtomicUsize,
    /// Requests suppressed as duplicates by the scheduler.
    pub requests_filtered: AtomicUsize,
    /// Requests re-injected because their browser stream had more pages.
    pub continuations_scheduled: AtomicUsize,

    pub responses_received: AtomicUsize,
    pub response_status_counts: dashmap::DashMap<u16, usize>,
    pub total_bytes_downloaded: AtomicUsize,

    pub items_scraped: AtomicUsize,
    pub items_processed: AtomicUsize,
    pub items_dropped_by_pipeline: AtomicUsize,
}

impl StatCollector {
    pub(crate) fn new() -> Self {
        StatCollector {
            start_time: Instant::now(),
            requests_enqueued: AtomicUsize::new(0),
            requests_sent: AtomicUsize::new(0),
            requests_succeeded: AtomicUsize::new(0),
            requests_failed: AtomicUsize::new(0),
            requests_timed_out: AtomicUsize::new(0),
            requests_retried: AtomicUsize::new(0),
            requests_dropped: AtomicUsize::new(0),
            requests_filtered: AtomicUsize::new(0),
            continuations_scheduled: AtomicUsize::new(0),
            responses_received: AtomicUsize::new(0),
            response_status_counts: dashmap::DashMap::new(),
            total_bytes_downloaded: AtomicUsize::new(0),
            items_scraped: AtomicUsize::new(0),
            items_processed: AtomicUsize::new(0),
            items_dropped_by_pipeline: AtomicUsize::new(0),
        }
    }

    fn per_second(&self, count: usize) -> f64 {
        let seconds = self.start_time.elapsed().as_secs_f64();
        if seconds > 0.0 { count as f64 / seconds } else { 0.0 }
    }

    fn formatted_bytes(&self) -> String {
        const KB: f64 = 1024.0;
        const MB: f64 = 1024.0 * KB;

        let bytes = load(&self.total_bytes_downloaded);
        match bytes as f64 {
            b if b >= MB => format!("{:.2} MB", b / MB),
            b if b >= KB => format!("{:.2} KB", b / KB),
            _ => format!("{bytes} B"),
        }
    }

    /// Status codes in ascending order, e.g. `200: 3, 204: 1`.
    fn status_summary(&self) -> String {
        let counts: BTreeMap<u16, usize> = self
            .response_status_counts
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        if counts.is_empty() {
            return "none".to_string();
        }
        counts
            .iter()
            .map(|(code, count)| format!("{code}: {count}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub(crate) fn increment_requests_enqueued(&self) {
        self.requests_enqueued.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_succeeded(&self) {
        self.requests_succeeded.fetch_add(1, Ordering::SeqCst);
    }

    /// Counts a failed download; timeouts are also counted separately.
    pub(crate) fn record_download_failure(&self, error: &SpiderError) {
        self.requests_failed.fetch_add(1, Ordering::SeqCst);
        if error.is_timeout() {
            self.requests_timed_out.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn increment_requests_retried(&self) {
        self.requests_retried.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_dropped(&self) {
        self.requests_dropped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_filtered(&self) {
        self.requests_filtered.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_continuations_scheduled(&self) {
        self.continuations_scheduled.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_response(&self, status_code: u16, bytes: usize) {
        self.responses_received.fetch_add(1, Ordering::SeqCst);
        *self.response_status_counts.entry(status_code).or_insert(0) += 1;
        self.total_bytes_downloaded.fetch_add(bytes, Ordering::SeqCst);
    }

    pub(crate) fn add_items_scraped(&self, count: usize) {
        self.items_scraped.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn increment_items_processed(&self) {
        self.items_processed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_items_dropped_by_pipeline(&self) {
        self.items_dropped_by_pipeline.fetch_add(1, Ordering::SeqCst);
    }

    pub fn to_json_string(&self) -> Result<String, SpiderError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_string_pretty(&self) -> Result<String, SpiderError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for StatCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StatCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sent = load(&self.requests_sent);
        let received = load(&self.responses_received);
        let scraped = load(&self.items_scraped);

        writeln!(f, "\nCrawl Statistics")?;
        writeln!(f, "----------------")?;
        writeln!(f, "  duration : {:?}", self.start_time.elapsed())?;
        writeln!(
            f,
            "  speed    : req/s: {:.2}, resp/s: {:.2}, item/s: {:.2}",
            self.per_second(sent),
            self.per_second(received),
            self.per_second(scraped)
        )?;
        writeln!(
            f,
            "  requests : enqueued: {}, sent: {}, ok: {}, fail: {} (timeout: {}), retry: {}, drop: {}, filtered: {}",
            load(&self.requests_enqueued),
            sent,
            load(&self.requests_succeeded),
            load(&self.requests_failed),
            load(&self.requests_timed_out),
            load(&self.requests_retried),
            load(&self.requests_dropped),
            load(&self.requests_filtered)
        )?;
        writeln!(
            f,
            "  browser  : continuations: {}",
            load(&self.continuations_scheduled)
        )?;
        writeln!(
            f,
            "  response : received: {}, downloaded: {}",
            received,
            self.formatted_bytes()
        )?;
        writeln!(
            f,
            "  items    : scraped: {}, processed: {}, dropped: {}",
            scraped,
            load(&self.items_processed),
            load(&self.items_dropped_by_pipeline)
        )?;
        writeln!(f, "  status   : {}\n", self.status_summary())
    }
}
