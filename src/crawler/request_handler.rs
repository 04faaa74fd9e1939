//! Contains the request handling logic for the crawler.
//!
//! The downloader task receives requests from the scheduler and runs each one
//! in its own task, bounded by `max_concurrent_downloads`:
//!
//! - the request passes through the downloader middleware chain, where the
//!   browser middleware rewrites it for the render service,
//! - the downloader fetches it (for browser requests, the next page of the
//!   stream),
//! - the response passes back through the chain in reverse, where empty
//!   terminal deliveries are dropped,
//! - whatever survives goes to the parser task.
//!
//! A failed download is logged and counted, never retried here.

use crate::crawler::SharedMiddlewareManager;
use crate::downloader::Downloader;
use crate::middleware::MiddlewareAction;
use crate::request::Request;
use crate::response::Response;
use crate::scheduler::Scheduler;
use crate::state::CrawlerState;
use crate::stats::StatCollector;

use kanal::{AsyncReceiver, AsyncSender};
use log::{debug, error, trace, warn};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

#[allow(clippy::too_many_arguments)]
pub fn spawn_downloader_task<C>(
    scheduler: Arc<Scheduler>,
    req_rx: AsyncReceiver<Request>,
    downloader: Arc<dyn Downloader<Client = C>>,
    middlewares: SharedMiddlewareManager<C>,
    state: Arc<CrawlerState>,
    res_tx: AsyncSender<Response>,
    max_concurrent_downloads: usize,
    stats: Arc<StatCollector>,
) -> tokio::task::JoinHandle<()>
where
    C: Send + Sync + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrent_downloads));
    let mut tasks = JoinSet::new();

    tokio::spawn(async move {
        trace!(
            "Downloader task started with max_concurrent_downloads: {}",
            max_concurrent_downloads
        );
        loop {
            if scheduler.is_shutting_down.load(Ordering::SeqCst) {
                trace!("Scheduler shutdown flag detected, exiting downloader task");
                break;
            }

            let request = tokio::select! {
                result = req_rx.recv() => match result {
                    Ok(req) => req,
                    Err(_) => {
                        trace!("Request channel closed, exiting downloader task");
                        break;
                    }
                },
                _ = tokio::time::sleep(Duration::from_millis(100)) => continue,
            };
            state.in_flight_requests.fetch_add(1, Ordering::SeqCst);
            trace!("Received request for URL: {}", request.url);

            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("Download semaphore closed, dropping request {}", request.url);
                    state.in_flight_requests.fetch_sub(1, Ordering::SeqCst);
                    break;
                }
            };

            let downloader = Arc::clone(&downloader);
            let middlewares = middlewares.clone();
            let res_tx = res_tx.clone();
            let state = Arc::clone(&state);
            let scheduler = Arc::clone(&scheduler);
            let stats = Arc::clone(&stats);

            while tasks.try_join_next().is_some() {}
            tasks.spawn(async move {
                if let Some(response) =
                    process_request(request, &downloader, &middlewares, &scheduler, &stats).await
                {
                    trace!("Sending response for URL: {}", response.url);
                    // Counted as parsing before the download slot is released,
                    // so the crawl never looks idle in between.
                    state.parsing_responses.fetch_add(1, Ordering::SeqCst);
                    if res_tx.send(response).await.is_err() {
                        error!("Response channel closed, cannot send response.");
                        state.parsing_responses.fetch_sub(1, Ordering::SeqCst);
                    }
                }
                state.in_flight_requests.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
            });
        }

        trace!("Waiting for active download tasks to complete");
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                error!("A download task failed: {:?}", e);
            }
        }
        trace!("Downloader task finished");
    })
}

/// Runs one request through the middleware chain and the downloader.
/// `None` means the request or its response went no further.
async fn process_request<C>(
    request: Request,
    downloader: &Arc<dyn Downloader<Client = C>>,
    middlewares: &SharedMiddlewareManager<C>,
    scheduler: &Arc<Scheduler>,
    stats: &Arc<StatCollector>,
) -> Option<Response>
where
    C: Send + Sync + 'static,
{
    let original_request_url = request.url.clone();

    let action = match middlewares.process_request(downloader.client(), request).await {
        Ok(action) => action,
        Err(e) => {
            error!(
                "Request middleware error for URL {}: {}",
                original_request_url, e
            );
            stats.record_download_failure(&e);
            return None;
        }
    };

    let response = match action {
        MiddlewareAction::Continue(request) => {
            let request_url = request.url.clone();
            trace!("Downloading request for URL: {}", request_url);
            stats.increment_requests_sent();

            let start_time = Instant::now();
            match downloader.download(request).await {
                Ok(resp) => {
                    trace!(
                        "Download successful for URL: {}, took {:?}",
                        resp.url,
                        start_time.elapsed()
                    );
                    stats.increment_requests_succeeded();
                    stats.record_response(resp.status.as_u16(), resp.body.len());
                    resp
                }
                Err(e) => {
                    error!(
                        "Download error for URL {} after {:?}: {}",
                        request_url,
                        start_time.elapsed(),
                        e
                    );
                    stats.record_download_failure(&e);
                    return None;
                }
            }
        }
        MiddlewareAction::ReturnResponse(resp) => {
            trace!("Request middleware returned a response for URL: {}", resp.url);
            stats.increment_requests_succeeded();
            stats.record_response(resp.status.as_u16(), resp.body.len());
            resp
        }
        MiddlewareAction::Retry(req, delay) => {
            retry(*req, delay, scheduler, stats).await;
            return None;
        }
        MiddlewareAction::Drop => {
            debug!(
                "Request dropped by middleware for URL: {}",
                original_request_url
            );
            stats.increment_requests_dropped();
            return None;
        }
    };

    let response_url = response.url.clone();
    match middlewares.process_response(response).await {
        Ok(MiddlewareAction::Continue(res)) => Some(res),
        Ok(MiddlewareAction::Retry(req, delay)) => {
            retry(*req, delay, scheduler, stats).await;
            None
        }
        Ok(MiddlewareAction::Drop) => {
            debug!("Response dropped by middleware for URL: {}", response_url);
            stats.increment_requests_dropped();
            None
        }
        Ok(MiddlewareAction::ReturnResponse(res)) => Some(res),
        Err(e) => {
            error!("Response middleware error for URL {}: {}", response_url, e);
            None
        }
    }
}

async fn retry(request: Request, delay: Duration, scheduler: &Scheduler, stats: &StatCollector) {
    let request_url = request.url.clone();
    debug!(
        "Middleware scheduled retry for URL: {} after {:?}",
        request_url, delay
    );
    stats.increment_requests_retried();
    tokio::time::sleep(delay).await;
    if let Err(e) = scheduler.enqueue_request(request.with_dont_filter(true)).await {
        error!(
            "Failed to re-enqueue retried request for URL {}: {}",
            request_url, e
        );
    }
}
