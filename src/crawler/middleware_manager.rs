//! Middleware chains shared by the crawler's worker tasks.
//!
//! Downloader middlewares take `&mut self`, so their chain sits behind a lock.
//! Spider middlewares only need `&self` and are shared without one.

use crate::error::SpiderError;
use crate::item::ParseOutput;
use crate::middleware::{Middleware, MiddlewareAction, SpiderMiddleware};
use crate::request::Request;
use crate::response::Response;
use std::sync::Arc;
use tokio::sync::RwLock;

pub(crate) type BoxedMiddleware<C> = Box<dyn Middleware<C> + Send + Sync>;
pub(crate) type BoxedSpiderMiddleware<I> = Box<dyn SpiderMiddleware<I> + Send + Sync>;

struct MiddlewareManager<C> {
    middlewares: Vec<BoxedMiddleware<C>>,
}

impl<C: Send + Sync + 'static> MiddlewareManager<C> {
    async fn process_request(
        &mut self,
        client: &C,
        request: Request,
    ) -> Result<MiddlewareAction<Request>, SpiderError> {
        let mut current_request = request;

        for middleware in self.middlewares.iter_mut() {
            match middleware.process_request(client, current_request).await? {
                MiddlewareAction::Continue(req) => current_request = req,
                action => return Ok(action),
            }
        }

        Ok(MiddlewareAction::Continue(current_request))
    }

    async fn process_response(
        &mut self,
        response: Response,
    ) -> Result<MiddlewareAction<Response>, SpiderError> {
        let mut current_response = response;

        // Reverse order, mirroring the request chain.
        for middleware in self.middlewares.iter_mut().rev() {
            match middleware.process_response(current_response).await? {
                MiddlewareAction::Continue(res) => current_response = res,
                action => return Ok(action),
            }
        }

        Ok(MiddlewareAction::Continue(current_response))
    }
}

/// Downloader middleware chain that can be cloned into every download task.
pub struct SharedMiddlewareManager<C> {
    manager: Arc<RwLock<MiddlewareManager<C>>>,
}

impl<C: Send + Sync + 'static> SharedMiddlewareManager<C> {
    pub fn new(middlewares: Vec<BoxedMiddleware<C>>) -> Self {
        Self {
            manager: Arc::new(RwLock::new(MiddlewareManager { middlewares })),
        }
    }

    pub async fn process_request(
        &self,
        client: &C,
        request: Request,
    ) -> Result<MiddlewareAction<Request>, SpiderError> {
        self.manager
            .write()
            .await
            .process_request(client, request)
            .await
    }

    pub async fn process_response(
        &self,
        response: Response,
    ) -> Result<MiddlewareAction<Response>, SpiderError> {
        self.manager.write().await.process_response(response).await
    }
}

impl<C> Clone for SharedMiddlewareManager<C> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

/// Spider middleware chain, applied in registration order.
pub struct SpiderMiddlewareChain<I> {
    middlewares: Arc<Vec<BoxedSpiderMiddleware<I>>>,
}

impl<I: Send + 'static> SpiderMiddlewareChain<I> {
    pub fn new(middlewares: Vec<BoxedSpiderMiddleware<I>>) -> Self {
        Self {
            middlewares: Arc::new(middlewares),
        }
    }

    pub async fn process_spider_output(
        &self,
        response: &Response,
        output: ParseOutput<I>,
    ) -> Result<ParseOutput<I>, SpiderError> {
        let mut current = output;
        for middleware in self.middlewares.iter() {
            current = middleware.process_spider_output(response, current).await?;
        }
        Ok(current)
    }
}

impl<I> Clone for SpiderMiddlewareChain<I> {
    fn clone(&self) -> Self {
        Self {
            middlewares: Arc::clone(&self.middlewares),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use http::StatusCode;
    use url::Url;

    struct Tag(&'static str);

    #[async_trait]
    impl Middleware<()> for Tag {
        fn name(&self) -> &str {
            self.0
        }

        async fn process_request(
            &mut self,
            _client: &(),
            request: Request,
        ) -> Result<MiddlewareAction<Request>, SpiderError> {
            let trail = format!("{}{}", request.url.path(), self.0);
            let mut request = request;
            request.url.set_path(&trail);
            Ok(MiddlewareAction::Continue(request))
        }

        async fn process_response(
            &mut self,
            mut response: Response,
        ) -> Result<MiddlewareAction<Response>, SpiderError> {
            response.add_flag(self.0);
            if self.0 == "stop" {
                return Ok(MiddlewareAction::Drop);
            }
            Ok(MiddlewareAction::Continue(response))
        }
    }

    fn request() -> Request {
        Request::new(Url::parse("http://example.com/").unwrap())
    }

    #[tokio::test]
    async fn requests_run_forward_responses_run_backward() {
        let manager = SharedMiddlewareManager::<()>::new(vec![Box::new(Tag("a")), Box::new(Tag("b"))]);

        let Ok(MiddlewareAction::Continue(request)) = manager.process_request(&(), request()).await
        else {
            panic!("expected continue");
        };
        assert_eq!(request.url.path(), "/ab");

        let response = Response::new(request.url.clone(), StatusCode::OK, request);
        let Ok(MiddlewareAction::Continue(response)) = manager.process_response(response).await
        else {
            panic!("expected continue");
        };
        assert_eq!(response.flags, vec!["b".to_string(), "a".to_string()]);
    }

    #[tokio::test]
    async fn drop_short_circuits_the_chain() {
        let manager = SharedMiddlewareManager::<()>::new(vec![Box::new(Tag("a")), Box::new(Tag("stop"))]);
        let response = Response::new(request().url.clone(), StatusCode::OK, request());
        assert!(matches!(
            manager.process_response(response).await,
            Ok(MiddlewareAction::Drop)
        ));
    }
}
