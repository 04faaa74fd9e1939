//! The core Crawler implementation.
//!
//! `Crawler` ties the scheduler, the downloader with its middleware chain,
//! the spider with its middleware chain and the item pipelines together. Each
//! stage runs in its own task; stages talk over bounded `kanal` channels.
//!
//! The crawl ends when the scheduler is empty and no request, response or
//! item is in flight. The downloader is closed afterwards, which gives open
//! browser streams their grace period before they are torn down.

use crate::builder::CrawlerConfig;
use crate::crawler::{
    BoxedMiddleware, BoxedSpiderMiddleware, SharedMiddlewareManager, SpiderMiddlewareChain,
};
use crate::downloader::Downloader;
use crate::error::SpiderError;
use crate::pipeline::Pipeline;
use crate::request::Request;
use crate::scheduler::Scheduler;
use crate::spider::Spider;
use crate::state::CrawlerState;
use crate::stats::StatCollector;
use futures_util::future::join_all;
use kanal::{AsyncReceiver, bounded_async};
use tracing::{debug, error, info, trace, warn};

use std::sync::Arc;
use std::time::Duration;

const IDLE_POLL: Duration = Duration::from_millis(100);
const IDLE_CONFIRM: Duration = Duration::from_millis(50);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// The central orchestrator of a crawl.
pub struct Crawler<S: Spider, C> {
    scheduler: Arc<Scheduler>,
    req_rx: AsyncReceiver<Request>,
    stats: Arc<StatCollector>,
    downloader: Arc<dyn Downloader<Client = C>>,
    middlewares: Vec<BoxedMiddleware<C>>,
    spider_middlewares: Vec<BoxedSpiderMiddleware<S::Item>>,
    spider: Arc<S>,
    item_pipelines: Vec<Box<dyn Pipeline<S::Item>>>,
    config: CrawlerConfig,
}

impl<S, C> Crawler<S, C>
where
    S: Spider + 'static,
    C: Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        scheduler: Arc<Scheduler>,
        req_rx: AsyncReceiver<Request>,
        downloader: Arc<dyn Downloader<Client = C>>,
        middlewares: Vec<BoxedMiddleware<C>>,
        spider_middlewares: Vec<BoxedSpiderMiddleware<S::Item>>,
        spider: S,
        item_pipelines: Vec<Box<dyn Pipeline<S::Item>>>,
        config: CrawlerConfig,
        stats: Arc<StatCollector>,
    ) -> Self {
        Crawler {
            scheduler,
            req_rx,
            stats,
            downloader,
            middlewares,
            spider_middlewares,
            spider: Arc::new(spider),
            item_pipelines,
            config,
        }
    }

    /// Runs the crawl until it becomes idle or Ctrl-C is received.
    pub async fn start_crawl(self) -> Result<(), SpiderError> {
        let Crawler {
            scheduler,
            req_rx,
            stats,
            downloader,
            middlewares,
            spider_middlewares,
            spider,
            item_pipelines,
            config,
        } = self;

        info!(
            "Crawler starting crawl with configuration: max_concurrent_downloads={}, parser_workers={}, max_concurrent_pipelines={}",
            config.max_concurrent_downloads, config.parser_workers, config.max_concurrent_pipelines
        );

        let state = CrawlerState::new();
        let pipelines = Arc::new(item_pipelines);

        let channel_capacity = std::cmp::max(
            config.max_concurrent_downloads * 3,
            config.parser_workers * config.max_concurrent_pipelines * 2,
        )
        .max(config.channel_capacity);
        trace!(
            "Creating communication channels with capacity: {}",
            channel_capacity
        );
        let (res_tx, res_rx) = bounded_async(channel_capacity);
        let (item_tx, item_rx) = bounded_async(channel_capacity);

        enqueue_start_requests(&*spider, &scheduler, &stats).await;

        let downloader_task = super::spawn_downloader_task::<C>(
            scheduler.clone(),
            req_rx,
            Arc::clone(&downloader),
            SharedMiddlewareManager::new(middlewares),
            state.clone(),
            res_tx.clone(),
            config.max_concurrent_downloads,
            stats.clone(),
        );

        let parser_task = super::spawn_parser_task::<S>(
            scheduler.clone(),
            spider.clone(),
            SpiderMiddlewareChain::new(spider_middlewares),
            state.clone(),
            res_rx,
            item_tx.clone(),
            config.parser_workers,
            stats.clone(),
        );

        let item_processor_task = super::spawn_item_processor_task::<S::Item>(
            state.clone(),
            item_rx,
            pipelines.clone(),
            config.max_concurrent_pipelines,
            stats.clone(),
        );

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, initiating graceful shutdown.");
            }
            _ = async {
                loop {
                    if scheduler.is_idle() && state.is_idle() {
                        tokio::time::sleep(IDLE_CONFIRM).await;
                        if scheduler.is_idle() && state.is_idle() {
                            break;
                        }
                    }
                    tokio::time::sleep(IDLE_POLL).await;
                }
            } => {
                info!("Crawl has become idle, initiating shutdown.");
            }
        };

        trace!("Closing communication channels");
        drop(res_tx);
        drop(item_tx);

        if let Err(e) = scheduler.shutdown().await {
            error!("Error during scheduler shutdown: {}", e);
        }

        let mut task_set = tokio::task::JoinSet::new();
        task_set.spawn(item_processor_task);
        task_set.spawn(parser_task);
        task_set.spawn(downloader_task);

        let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
            while let Some(result) = task_set.join_next().await {
                match result {
                    Ok(Err(e)) | Err(e) => error!("Task failed during shutdown: {}", e),
                    Ok(Ok(())) => {}
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                "Tasks did not complete within {:?}, aborting remaining tasks.",
                SHUTDOWN_TIMEOUT
            );
            task_set.abort_all();
        }

        debug!("Closing downloader");
        downloader.close().await;

        info!("Closing item pipelines...");
        let closing = join_all(pipelines.iter().map(|p| p.close())).await;
        for (pipeline, result) in pipelines.iter().zip(closing) {
            if let Err(e) = result {
                error!("Pipeline '{}' failed to close: {}", pipeline.name(), e);
            }
        }

        info!("Crawl finished. {}", stats);
        Ok(())
    }

    /// Returns the `StatCollector` of this crawler, usable during and after the crawl.
    pub fn get_stats(&self) -> Arc<StatCollector> {
        Arc::clone(&self.stats)
    }
}

async fn enqueue_start_requests<S: Spider>(spider: &S, scheduler: &Scheduler, stats: &StatCollector) {
    let requests = match spider.start_requests() {
        Ok(requests) => requests,
        Err(e) => {
            error!("Failed to create start requests: {}", e);
            return;
        }
    };

    for mut request in requests {
        request.url.set_fragment(None);
        match scheduler.enqueue_request(request).await {
            Ok(true) => stats.increment_requests_enqueued(),
            Ok(false) => stats.increment_requests_filtered(),
            Err(e) => error!("Failed to enqueue initial request: {}", e),
        }
    }
}
