//! Tracking of the crawler's in-flight work.
//!
//! `CrawlerState` counts what is currently moving through the crawl loop:
//! requests being downloaded, responses being parsed and items inside the
//! pipelines. A browser continuation fetch counts as an in-flight request for
//! as long as it waits on its stream, so a crawl never looks idle while a
//! render stream still has pages to deliver.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct CrawlerState {
    pub in_flight_requests: AtomicUsize,
    pub parsing_responses: AtomicUsize,
    pub processing_items: AtomicUsize,
}

impl CrawlerState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// No download, parse or pipeline work is running.
    pub fn is_idle(&self) -> bool {
        self.in_flight_requests.load(Ordering::SeqCst) == 0
            && self.parsing_responses.load(Ordering::SeqCst) == 0
            && self.processing_items.load(Ordering::SeqCst) == 0
    }
}
