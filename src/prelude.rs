//! A "prelude" for users of the `spider-browser` crate.
//!
//! This prelude re-exports the most commonly used traits and structs so that
//! they can be easily imported.
//!
//! # Example
//!
//! ```
//! use spider_browser::prelude::*;
//! ```

pub use crate::{
    // Core structs
    Crawler,
    CrawlerBuilder,
    ParseOutput,
    Request,
    Response,
    // Core traits
    Downloader,
    ScrapedItem,
    Spider,
    SpiderError,
    // Essential re-exports for trait implementation
    async_trait,
};

pub use crate::browser::{
    BrowserConfig, BrowserDownloader, BrowserDownloaderMiddleware, BrowserRequest,
    BrowserSpiderMiddleware, ScriptAction,
};
pub use crate::middleware::{Middleware, MiddlewareAction, SpiderMiddleware};
pub use crate::pipeline::{CollectorPipeline, ConsoleWriterPipeline, Pipeline};
