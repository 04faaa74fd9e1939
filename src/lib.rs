//! # spider-browser
//!
//! A crawl engine that renders pages through an external headless-browser
//! service.
//!
//! The [`browser`] module holds the adapters: building a render command,
//! rewriting requests into calls to the render service, reading the service's
//! event stream one page at a time, and re-scheduling the request while the
//! stream has more to deliver. The rest of the crate is the engine that hosts
//! them: `Crawler`, `Scheduler`, the `Spider` trait, middleware chains,
//! pipelines and statistics.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_browser::prelude::*;
//!
//! #[derive(Debug)]
//! struct Page {
//!     url: String,
//! }
//!
//! struct PagesSpider;
//!
//! #[async_trait]
//! impl Spider for PagesSpider {
//!     type Item = Page;
//!
//!     fn start_requests(&self) -> Result<Vec<Request>, SpiderError> {
//!         let request = BrowserRequest::new("http://books.toscrape.com/")
//!             .script(vec![ScriptAction::extract()])
//!             .build()?;
//!         Ok(vec![request])
//!     }
//!
//!     async fn parse(&self, response: Response) -> Result<ParseOutput<Page>, SpiderError> {
//!         let mut output = ParseOutput::new();
//!         output.add_item(Page { url: response.url.to_string() });
//!         Ok(output)
//!     }
//! }
//!
//! async fn run_crawler() -> Result<(), SpiderError> {
//!     let config = BrowserConfig::default();
//!     let crawler = CrawlerBuilder::with_downloader(PagesSpider, BrowserDownloader::new(config.clone())?)
//!         .add_middleware(BrowserDownloaderMiddleware::new(&config)?)
//!         .add_spider_middleware(BrowserSpiderMiddleware::new())
//!         .build()
//!         .await?;
//!     crawler.start_crawl().await
//! }
//! ```

pub mod browser;
pub mod builder;
pub mod crawler;
pub mod downloader;
pub mod error;
pub mod item;
pub mod middleware;
pub mod pipeline;
pub mod prelude;
pub mod request;
pub mod response;
pub mod scheduler;
pub mod spider;
pub mod state;
pub mod stats;

pub use builder::{CrawlerBuilder, CrawlerConfig};
pub use crawler::Crawler;
pub use downloader::{Downloader, ReqwestClientDownloader};
pub use error::SpiderError;
pub use item::{ParseOutput, ScrapedItem};
pub use request::Request;
pub use response::Response;
pub use scheduler::Scheduler;
pub use spider::Spider;
pub use stats::StatCollector;

pub use async_trait::async_trait;
pub use dashmap::DashMap;
pub use tokio;
