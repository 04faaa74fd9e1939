//! Downloader middleware turning browser requests into render service calls.

use crate::browser::command::BrowserOptions;
use crate::browser::config::BrowserConfig;
use crate::error::SpiderError;
use crate::middleware::{Middleware, MiddlewareAction};
use crate::request::Request;
use crate::response::{NO_MORE_CONTENT, Response};
use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use http::header::{CONTENT_TYPE, HeaderValue};
use tracing::{debug, trace};
use url::Url;

/// Rewrites each browser request once into a `POST` of its command to the
/// render service, and drops the empty deliveries that end a stream.
#[derive(Debug, Clone)]
pub struct BrowserDownloaderMiddleware {
    adapter_url: Url,
    endpoint: String,
}

impl BrowserDownloaderMiddleware {
    pub fn new(config: &BrowserConfig) -> Result<Self, SpiderError> {
        Ok(Self {
            adapter_url: config.base_url()?,
            endpoint: config.endpoint.clone(),
        })
    }

    /// Rewrites `request` for the render service. Requests without browser
    /// options, or already rewritten, are returned unchanged.
    pub fn rewrite(&self, mut request: Request) -> Result<Request, SpiderError> {
        let mut options = match BrowserOptions::resolve(&request)? {
            Some(options) if !options.is_processed() => options,
            _ => return Ok(request),
        };

        let base = options.browser_url.as_ref().unwrap_or(&self.adapter_url);
        let endpoint = options.endpoint.as_deref().unwrap_or(&self.endpoint);
        let target = base.join(endpoint)?;
        let body = options.command.to_json()?;

        debug!(
            "Rewriting browser request for {} to {}",
            options.command.target_url(),
            target
        );
        trace!("Render command: {}", String::from_utf8_lossy(&body));

        request.url = target;
        request.method = Method::POST;
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        request.body = Some(Bytes::from(body));

        options.mark_processed();
        options.attach(&mut request);
        Ok(request)
    }
}

#[async_trait]
impl<C: Send + Sync> Middleware<C> for BrowserDownloaderMiddleware {
    fn name(&self) -> &str {
        "BrowserDownloaderMiddleware"
    }

    async fn process_request(
        &mut self,
        _client: &C,
        request: Request,
    ) -> Result<MiddlewareAction<Request>, SpiderError> {
        Ok(MiddlewareAction::Continue(self.rewrite(request)?))
    }

    async fn process_response(
        &mut self,
        response: Response,
    ) -> Result<MiddlewareAction<Response>, SpiderError> {
        if BrowserOptions::of(response.request_from_response()).is_some()
            && response.has_flag(NO_MORE_CONTENT)
        {
            debug!("Browser stream for {} has no more content", response.url);
            return Ok(MiddlewareAction::Drop);
        }
        Ok(MiddlewareAction::Continue(response))
    }
}
