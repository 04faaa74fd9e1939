//! # Browser Module
//!
//! Renders pages through an external headless-browser service and feeds the
//! result back into the crawl loop as ordinary responses.
//!
//! ## Overview
//!
//! A browser request carries a [`BrowserCommand`]: the page to open and a
//! script of interactions to run there. The render service answers one
//! command with a stream of rendered pages. The adapters in this module turn
//! that stream into a series of fetches of the same request:
//!
//! - [`BrowserRequest`] builds the request and its command.
//! - [`BrowserDownloaderMiddleware`] rewrites it into a `POST` to the render
//!   service and drops the empty delivery that ends a stream.
//! - [`BrowserDownloader`] opens the stream on the first fetch and hands out
//!   one page per fetch, each with its own deadline.
//! - [`BrowserSpiderMiddleware`] schedules the request again while the
//!   stream reports more pages.
//!
//! ## Example
//!
//! ```rust,ignore
//! let config = BrowserConfig::default().adapter_url("http://render:8050");
//! let crawler = CrawlerBuilder::with_downloader(BooksSpider, BrowserDownloader::new(config.clone())?)
//!     .add_middleware(BrowserDownloaderMiddleware::new(&config)?)
//!     .add_spider_middleware(BrowserSpiderMiddleware::new())
//!     .build()
//!     .await?;
//! crawler.start_crawl().await
//! ```

pub mod command;
pub mod config;
pub mod continuation;
pub mod rewrite;
pub mod script;
pub mod transport;

pub use command::{ABOUT_BLANK, BROWSER_META, BrowserCommand, BrowserOptions, BrowserRequest};
pub use config::{BrowserConfig, TlsMethod};
pub use continuation::BrowserSpiderMiddleware;
pub use rewrite::BrowserDownloaderMiddleware;
pub use script::ScriptAction;
pub use transport::{
    BrowserDownloadHandler, BrowserDownloader, Continuation, RenderEvent, StreamHandle,
    StreamState,
};
