//! Spider middleware that keeps a browser stream flowing.
//!
//! Every page of a logical stream arrives as a response to the same request.
//! While the stream reports more pages, that request goes back to the
//! scheduler after the spider's own output, marked `dont_filter` so duplicate
//! suppression lets it through.

use crate::browser::command::BrowserOptions;
use crate::error::SpiderError;
use crate::item::ParseOutput;
use crate::middleware::SpiderMiddleware;
use crate::response::{NO_MORE_CONTENT, Response, STILL_RUNNING};
use async_trait::async_trait;
use tracing::trace;

#[derive(Debug, Clone, Default)]
pub struct BrowserSpiderMiddleware;

impl BrowserSpiderMiddleware {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<I: Send + 'static> SpiderMiddleware<I> for BrowserSpiderMiddleware {
    fn name(&self) -> &str {
        "BrowserSpiderMiddleware"
    }

    async fn process_spider_output(
        &self,
        response: &Response,
        mut output: ParseOutput<I>,
    ) -> Result<ParseOutput<I>, SpiderError> {
        let request = response.request_from_response();
        if BrowserOptions::of(request).is_none() {
            return Ok(output);
        }

        if response.has_flag(NO_MORE_CONTENT) {
            return Ok(ParseOutput::new());
        }

        if response.has_flag(STILL_RUNNING) {
            trace!("Stream for {} still running, fetching next page", request.url);
            let mut next = request.clone();
            next.dont_filter = true;
            output.add_request(next);
        }
        Ok(output)
    }
}
