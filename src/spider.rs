//! # Spider Module
//!
//! Defines the `Spider` trait: where a crawl starts and what to do with each
//! response.
//!
//! A spider that renders pages through the browser service returns
//! [`BrowserRequest`](crate::browser::BrowserRequest)s from `start_requests`.
//! Its `parse` then sees one response per rendered page of the stream; the
//! continuation middleware takes care of fetching the next one.
//!
//! ## Example
//!
//! ```rust,ignore
//! struct BooksSpider;
//!
//! #[async_trait]
//! impl Spider for BooksSpider {
//!     type Item = Book;
//!
//!     fn start_requests(&self) -> Result<Vec<Request>, SpiderError> {
//!         let request = BrowserRequest::new("http://books.toscrape.com/")
//!             .script(vec![ScriptAction::repeat(50, vec![
//!                 ScriptAction::extract(),
//!                 ScriptAction::click(".next a"),
//!             ])])
//!             .build()?;
//!         Ok(vec![request])
//!     }
//!
//!     async fn parse(&self, response: Response) -> Result<ParseOutput<Book>, SpiderError> {
//!         let mut output = ParseOutput::new();
//!         // ... extract books from response.text() ...
//!         Ok(output)
//!     }
//! }
//! ```

use crate::error::SpiderError;
use crate::item::{ParseOutput, ScrapedItem};
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use url::Url;

/// Defines the contract for a web spider.
#[async_trait]
pub trait Spider: Send + Sync + 'static {
    /// The type of item that the spider scrapes.
    type Item: ScrapedItem;

    /// Returns the initial URLs to start crawling from.
    fn start_urls(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Generates the initial requests. Defaults to a GET for each start URL.
    fn start_requests(&self) -> Result<Vec<Request>, SpiderError> {
        let urls: Result<Vec<Url>, url::ParseError> =
            self.start_urls().into_iter().map(Url::parse).collect();
        Ok(urls?.into_iter().map(Request::new).collect())
    }

    /// Parses a response and extracts scraped items and new requests.
    async fn parse(&self, response: Response) -> Result<ParseOutput<Self::Item>, SpiderError>;
}
