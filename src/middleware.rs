//! Middleware contracts of the crawl loop.
//!
//! Downloader middlewares (`Middleware`) see every request on its way to the
//! downloader and every response on its way back, in reverse order. Spider
//! middlewares (`SpiderMiddleware`) see what a spider produced for a response
//! before it reaches the scheduler and the item pipelines.

use crate::error::SpiderError;
use crate::item::ParseOutput;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use std::time::Duration;

/// Outcome of a middleware hook.
#[derive(Debug)]
pub enum MiddlewareAction<T> {
    /// Hand the (possibly modified) value to the next middleware.
    Continue(T),
    /// Re-enqueue the request after a delay.
    Retry(Box<Request>, Duration),
    /// Stop processing silently. Not counted as a failure.
    Drop,
    /// Short-circuit the download with a ready response.
    ReturnResponse(Response),
}

#[async_trait]
pub trait Middleware<C: Send + Sync>: Send + Sync {
    fn name(&self) -> &str;

    async fn process_request(
        &mut self,
        _client: &C,
        request: Request,
    ) -> Result<MiddlewareAction<Request>, SpiderError> {
        Ok(MiddlewareAction::Continue(request))
    }

    async fn process_response(
        &mut self,
        response: Response,
    ) -> Result<MiddlewareAction<Response>, SpiderError> {
        Ok(MiddlewareAction::Continue(response))
    }
}

#[async_trait]
pub trait SpiderMiddleware<I: Send + 'static>: Send + Sync {
    fn name(&self) -> &str;

    /// Inspects or extends the spider output produced for `response`.
    async fn process_spider_output(
        &self,
        response: &Response,
        output: ParseOutput<I>,
    ) -> Result<ParseOutput<I>, SpiderError>;
}
