//! Item pipelines: the last stop of every scraped item.

use crate::error::SpiderError;
use crate::item::ScrapedItem;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// Processes scraped items one at a time.
///
/// Returning `Ok(None)` drops the item; later pipelines do not see it.
#[async_trait]
pub trait Pipeline<I: ScrapedItem>: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn process_item(&self, item: I) -> Result<Option<I>, SpiderError>;

    /// Called once after the crawl finished.
    async fn close(&self) -> Result<(), SpiderError> {
        Ok(())
    }
}

/// Logs every item. Installed when no other pipeline is configured.
#[derive(Debug, Default)]
pub struct ConsoleWriterPipeline;

impl ConsoleWriterPipeline {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<I: ScrapedItem> Pipeline<I> for ConsoleWriterPipeline {
    fn name(&self) -> &str {
        "ConsoleWriterPipeline"
    }

    async fn process_item(&self, item: I) -> Result<Option<I>, SpiderError> {
        info!("{:?}", item);
        Ok(Some(item))
    }
}

/// Keeps every item in memory. Clones share the same storage.
#[derive(Debug)]
pub struct CollectorPipeline<I> {
    items: Arc<Mutex<Vec<I>>>,
}

impl<I> Default for CollectorPipeline<I> {
    fn default() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<I> Clone for CollectorPipeline<I> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<I: Clone> CollectorPipeline<I> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items collected so far, in arrival order.
    pub fn items(&self) -> Vec<I> {
        self.items.lock().clone()
    }
}

#[async_trait]
impl<I: ScrapedItem + Clone> Pipeline<I> for CollectorPipeline<I> {
    fn name(&self) -> &str {
        "CollectorPipeline"
    }

    async fn process_item(&self, item: I) -> Result<Option<I>, SpiderError> {
        self.items.lock().push(item.clone());
        Ok(Some(item))
    }
}
