//! # Crawler Module
//!
//! The engine that hosts downloader middlewares, spider middlewares and the
//! downloader for a crawl.
//!
//! ## Architecture
//!
//! Each stage runs in its own Tokio task and hands work to the next over a
//! bounded channel:
//!
//! - `spawn_downloader_task`: pulls requests from the scheduler, runs them
//!   through the downloader middleware chain and the downloader
//! - `spawn_parser_task`: runs the spider and the spider middleware chain over
//!   each response, enqueuing follow-up requests
//! - `spawn_item_processor_task`: feeds scraped items through the pipelines
//!
//! `Crawler` owns the lifecycle: it seeds the scheduler, watches for the crawl
//! to become idle and tears the stages down in order.

mod core;
mod item_processor;
mod middleware_manager;
mod request_handler;
mod response_parser;

pub use core::Crawler;
pub(crate) use item_processor::spawn_item_processor_task;
pub(crate) use middleware_manager::{
    BoxedMiddleware, BoxedSpiderMiddleware, SharedMiddlewareManager, SpiderMiddlewareChain,
};
pub(crate) use request_handler::spawn_downloader_task;
pub(crate) use response_parser::spawn_parser_task;
