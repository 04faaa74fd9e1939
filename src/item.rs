//! Spider output: scraped items plus follow-up requests.

use crate::request::Request;
use std::fmt::Debug;

/// Marker for values a spider can emit as items.
pub trait ScrapedItem: Debug + Send + Sync + 'static {}

impl<T> ScrapedItem for T where T: Debug + Send + Sync + 'static {}

/// What a spider returns from `parse`. Middlewares may append to it.
#[derive(Debug)]
pub struct ParseOutput<I> {
    items: Vec<I>,
    requests: Vec<Request>,
}

impl<I> Default for ParseOutput<I> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            requests: Vec::new(),
        }
    }
}

impl<I> ParseOutput<I> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_item(&mut self, item: I) {
        self.items.push(item);
    }

    pub fn add_items(&mut self, items: impl IntoIterator<Item = I>) {
        self.items.extend(items);
    }

    /// Appends a request after everything already in the output.
    pub fn add_request(&mut self, request: Request) {
        self.requests.push(request);
    }

    pub fn add_requests(&mut self, requests: impl IntoIterator<Item = Request>) {
        self.requests.extend(requests);
    }

    pub fn items(&self) -> &[I] {
        &self.items
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.requests.is_empty()
    }

    pub fn into_parts(self) -> (Vec<I>, Vec<Request>) {
        (self.items, self.requests)
    }
}
