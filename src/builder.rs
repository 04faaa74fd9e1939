//! # Builder Module
//!
//! Provides the `CrawlerBuilder`, a fluent API for assembling a `Crawler`.
//!
//! ## Overview
//!
//! The builder collects the spider, the downloader, both middleware chains and
//! the item pipelines, plus the concurrency settings of the worker tasks. It
//! validates the settings and wires the scheduler and the `StatCollector` in
//! `build`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_browser::prelude::*;
//!
//! async fn setup_crawler() -> Result<(), SpiderError> {
//!     let config = BrowserConfig::default();
//!     let crawler = CrawlerBuilder::with_downloader(MySpider, BrowserDownloader::new(config.clone())?)
//!         .max_concurrent_downloads(10)
//!         .add_middleware(BrowserDownloaderMiddleware::new(&config)?)
//!         .add_spider_middleware(BrowserSpiderMiddleware::new())
//!         .build()
//!         .await?;
//!
//!     crawler.start_crawl().await
//! }
//! ```

use crate::crawler::{BoxedMiddleware, BoxedSpiderMiddleware, Crawler};
use crate::downloader::{Downloader, ReqwestClientDownloader};
use crate::error::SpiderError;
use crate::middleware::{Middleware, SpiderMiddleware};
use crate::pipeline::{ConsoleWriterPipeline, Pipeline};
use crate::scheduler::Scheduler;
use crate::spider::Spider;
use crate::stats::StatCollector;
use std::sync::Arc;
use tracing::debug;

/// Configuration for the crawler's concurrency settings.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// The maximum number of concurrent downloads.
    pub max_concurrent_downloads: usize,
    /// The number of workers dedicated to parsing responses.
    pub parser_workers: usize,
    /// The maximum number of concurrent item processing pipelines.
    pub max_concurrent_pipelines: usize,
    /// The capacity of communication channels between components.
    pub channel_capacity: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        CrawlerConfig {
            max_concurrent_downloads: num_cpus::get().max(16),
            parser_workers: num_cpus::get().clamp(4, 16),
            max_concurrent_pipelines: num_cpus::get().min(8),
            channel_capacity: 1000,
        }
    }
}

pub struct CrawlerBuilder<S: Spider, D>
where
    D: Downloader,
{
    crawler_config: CrawlerConfig,
    downloader: D,
    spider: Option<S>,
    middlewares: Vec<BoxedMiddleware<D::Client>>,
    spider_middlewares: Vec<BoxedSpiderMiddleware<S::Item>>,
    item_pipelines: Vec<Box<dyn Pipeline<S::Item>>>,
}

impl<S: Spider> CrawlerBuilder<S, ReqwestClientDownloader> {
    /// Creates a new `CrawlerBuilder` for a given spider with the default `ReqwestClientDownloader`.
    pub fn new(spider: S) -> Self {
        Self::with_downloader(spider, ReqwestClientDownloader::default())
    }
}

impl<S: Spider, D: Downloader> CrawlerBuilder<S, D> {
    /// Creates a new `CrawlerBuilder` for a given spider and downloader.
    pub fn with_downloader(spider: S, downloader: D) -> Self {
        Self {
            crawler_config: CrawlerConfig::default(),
            downloader,
            spider: Some(spider),
            middlewares: Vec::new(),
            spider_middlewares: Vec::new(),
            item_pipelines: Vec::new(),
        }
    }

    /// Sets the maximum number of concurrent downloads.
    pub fn max_concurrent_downloads(mut self, limit: usize) -> Self {
        self.crawler_config.max_concurrent_downloads = limit;
        self
    }

    /// Sets the maximum number of concurrent parser workers.
    pub fn max_parser_workers(mut self, limit: usize) -> Self {
        self.crawler_config.parser_workers = limit;
        self
    }

    /// Sets the maximum number of concurrent pipelines.
    pub fn max_concurrent_pipelines(mut self, limit: usize) -> Self {
        self.crawler_config.max_concurrent_pipelines = limit;
        self
    }

    /// Sets the capacity of communication channels between components.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.crawler_config.channel_capacity = capacity;
        self
    }

    /// Replaces the downloader with another of the same type.
    pub fn downloader(mut self, downloader: D) -> Self {
        self.downloader = downloader;
        self
    }

    /// Adds a downloader middleware. Requests pass the chain in registration
    /// order, responses in reverse.
    pub fn add_middleware<M>(mut self, middleware: M) -> Self
    where
        M: Middleware<D::Client> + Send + Sync + 'static,
    {
        self.middlewares.push(Box::new(middleware));
        self
    }

    /// Adds a spider middleware, applied to parse output in registration order.
    pub fn add_spider_middleware<M>(mut self, middleware: M) -> Self
    where
        M: SpiderMiddleware<S::Item> + Send + Sync + 'static,
    {
        self.spider_middlewares.push(Box::new(middleware));
        self
    }

    /// Adds an item pipeline to the crawler.
    pub fn add_pipeline<P>(mut self, pipeline: P) -> Self
    where
        P: Pipeline<S::Item> + 'static,
    {
        self.item_pipelines.push(Box::new(pipeline));
        self
    }

    /// Builds the `Crawler`, wiring a fresh scheduler and `StatCollector`.
    pub async fn build(mut self) -> Result<Crawler<S, D::Client>, SpiderError>
    where
        D::Client: 'static,
    {
        let spider = self.validate_and_get_spider()?;

        if self.item_pipelines.is_empty() {
            debug!("No item pipeline configured, adding ConsoleWriterPipeline");
            self = self.add_pipeline(ConsoleWriterPipeline::new());
        }

        let (scheduler, req_rx) = Scheduler::new();
        let downloader: Arc<dyn Downloader<Client = D::Client>> = Arc::new(self.downloader);
        let stats = Arc::new(StatCollector::new());

        Ok(Crawler::new(
            scheduler,
            req_rx,
            downloader,
            self.middlewares,
            self.spider_middlewares,
            spider,
            self.item_pipelines,
            self.crawler_config,
            stats,
        ))
    }

    fn validate_and_get_spider(&mut self) -> Result<S, SpiderError> {
        if self.crawler_config.max_concurrent_downloads == 0 {
            return Err(SpiderError::ConfigurationError(
                "max_concurrent_downloads must be greater than 0.".to_string(),
            ));
        }
        if self.crawler_config.parser_workers == 0 {
            return Err(SpiderError::ConfigurationError(
                "parser_workers must be greater than 0.".to_string(),
            ));
        }
        if self.crawler_config.max_concurrent_pipelines == 0 {
            return Err(SpiderError::ConfigurationError(
                "max_concurrent_pipelines must be greater than 0.".to_string(),
            ));
        }
        self.spider.take().ok_or_else(|| {
            SpiderError::ConfigurationError("Crawler must have a spider.".to_string())
        })
    }
}
