//! # Response Parser Module
//!
//! Runs the spider over downloaded responses.
//!
//! ## Overview
//!
//! A coordinator task receives responses from the downloader task and hands
//! them to a fixed pool of parser workers. Each worker:
//!
//! 1. calls `Spider::parse`,
//! 2. passes the output through the spider middleware chain, which may append
//!    requests (a browser stream that is still running re-enqueues its own
//!    request here) or discard the output entirely,
//! 3. enqueues the resulting requests with the scheduler and sends the items
//!    to the item processor.
//!
//! Every response arrives already counted in `parsing_responses`; the worker
//! releases that count once the output has been handed on.

use crate::browser::BrowserOptions;
use crate::crawler::SpiderMiddlewareChain;
use crate::item::{ParseOutput, ScrapedItem};
use crate::response::Response;
use crate::scheduler::Scheduler;
use crate::spider::Spider;
use crate::state::CrawlerState;
use crate::stats::StatCollector;
use kanal::{AsyncReceiver, AsyncSender};
use log::{debug, error, trace, warn};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::task::JoinSet;

#[allow(clippy::too_many_arguments)]
pub fn spawn_parser_task<S>(
    scheduler: Arc<Scheduler>,
    spider: Arc<S>,
    spider_middlewares: SpiderMiddlewareChain<S::Item>,
    state: Arc<CrawlerState>,
    res_rx: AsyncReceiver<Response>,
    item_tx: AsyncSender<S::Item>,
    parser_workers: usize,
    stats: Arc<StatCollector>,
) -> tokio::task::JoinHandle<()>
where
    S: Spider + 'static,
    S::Item: ScrapedItem,
{
    let (internal_parse_tx, internal_parse_rx) =
        kanal::bounded_async::<Response>(parser_workers * 2);

    let mut workers = JoinSet::new();
    for worker_id in 0..parser_workers {
        let internal_parse_rx = internal_parse_rx.clone();
        let spider = Arc::clone(&spider);
        let spider_middlewares = spider_middlewares.clone();
        let scheduler = Arc::clone(&scheduler);
        let item_tx = item_tx.clone();
        let state = Arc::clone(&state);
        let stats = Arc::clone(&stats);

        workers.spawn(async move {
            trace!("Parser worker {} started", worker_id);
            while let Ok(response) = internal_parse_rx.recv().await {
                debug!("Parsing response from {}", response.url);
                match parse_response(&*spider, &spider_middlewares, response).await {
                    Ok(output) => {
                        process_crawl_outputs::<S>(output, &scheduler, &item_tx, &state, &stats)
                            .await;
                    }
                    Err(e) => error!("Spider parsing error: {}", e),
                }
                state.parsing_responses.fetch_sub(1, Ordering::SeqCst);
            }
            trace!("Parser worker {} finished", worker_id);
        });
    }
    drop(internal_parse_rx);

    tokio::spawn(async move {
        trace!(
            "Response parser coordinator started with {} workers",
            parser_workers
        );
        while let Ok(response) = res_rx.recv().await {
            trace!("Received response for parsing from URL: {}", response.url);
            if internal_parse_tx.send(response).await.is_err() {
                error!("Internal parse channel closed, cannot send response to parser worker.");
                state.parsing_responses.fetch_sub(1, Ordering::SeqCst);
            }
        }

        trace!("Closing internal parse channel");
        drop(internal_parse_tx);

        while let Some(res) = workers.join_next().await {
            if let Err(e) = res {
                error!("A parsing worker task failed: {:?}", e);
            }
        }
        trace!("Response parser coordinator finished");
    })
}

async fn parse_response<S: Spider>(
    spider: &S,
    spider_middlewares: &SpiderMiddlewareChain<S::Item>,
    response: Response,
) -> Result<ParseOutput<S::Item>, crate::error::SpiderError> {
    // The spider consumes the response; middlewares still need to see it.
    let output = spider.parse(response.clone()).await?;
    spider_middlewares
        .process_spider_output(&response, output)
        .await
}

pub(crate) async fn process_crawl_outputs<S>(
    output: ParseOutput<S::Item>,
    scheduler: &Scheduler,
    item_tx: &AsyncSender<S::Item>,
    state: &CrawlerState,
    stats: &StatCollector,
) where
    S: Spider + 'static,
    S::Item: ScrapedItem,
{
    let (items, requests) = output.into_parts();
    let items_len = items.len();
    let requests_len = requests.len();

    if requests_len == 0 && items_len == 0 {
        trace!("Spider output contained no requests or items");
        return;
    }
    debug!(
        "Processing {} requests and {} items from spider output.",
        requests_len, items_len
    );
    stats.add_items_scraped(items_len);

    let mut request_error_total = 0;
    for request in requests {
        if scheduler.is_shutting_down.load(Ordering::SeqCst) {
            debug!(
                "Scheduler is shutting down, skipping request: {}",
                request.url
            );
            request_error_total += 1;
            continue;
        }

        let continues_stream = request.dont_filter
            && BrowserOptions::of(&request).is_some_and(|o| o.stream().is_some());
        match scheduler.enqueue_request(request).await {
            Ok(true) => {
                stats.increment_requests_enqueued();
                if continues_stream {
                    stats.increment_continuations_scheduled();
                }
            }
            Ok(false) => stats.increment_requests_filtered(),
            Err(e) => {
                error!("Failed to enqueue request: {}", e);
                request_error_total += 1;
            }
        }
    }
    if request_error_total > 0 {
        warn!(
            "Failed to enqueue {} of {} requests.",
            request_error_total, requests_len
        );
    }

    let mut item_error_total = 0;
    for (idx, item) in items.into_iter().enumerate() {
        if item_tx.is_closed() {
            warn!("Item channel is closed, stopping item processing");
            item_error_total += items_len - idx;
            break;
        }

        state.processing_items.fetch_add(1, Ordering::SeqCst);
        if item_tx.send(item).await.is_err() {
            error!("Failed to send item to processing channel");
            item_error_total += 1;
            state.processing_items.fetch_sub(1, Ordering::SeqCst);
        }
    }
    if item_error_total > 0 {
        warn!(
            "Failed to send {} of {} scraped items.",
            item_error_total, items_len
        );
    }
}
