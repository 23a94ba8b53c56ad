//! Page tracking for paginated queries.

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;

use crate::error::ApiError;
use crate::query::{QueryCache, QueryKey, QueryObserver, QueryOptions, QueryResult};

type PageFetcher<T> = Arc<dyn Fn(u32) -> BoxFuture<'static, Result<T, ApiError>> + Send + Sync>;
type PageKey = Arc<dyn Fn(u32) -> QueryKey + Send + Sync>;

/// Current page (1-based) of a paginated resource.
///
/// Every page change queries the cache under a key that includes the page
/// number, with previous data kept visible until the new page arrives.
/// Whether a next page exists is the server's call (see
/// [`CatalogPage::has_next_page`](crate::api::types::CatalogPage::has_next_page));
/// `next` does not enforce it.
pub struct PaginationController<T> {
  page: u32,
  observer: QueryObserver,
  key_for: PageKey,
  fetch_page: PageFetcher<T>,
}

impl<T: Send + Sync + 'static> PaginationController<T> {
  /// Controller at page 1. Nothing is fetched until [`load`](Self::load) or a
  /// page change.
  pub fn new<K, F, Fut>(cache: QueryCache, key_for: K, fetch_page: F) -> Self
  where
    K: Fn(u32) -> QueryKey + Send + Sync + 'static,
    F: Fn(u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    Self {
      page: 1,
      observer: QueryObserver::new(cache),
      key_for: Arc::new(key_for),
      fetch_page: Arc::new(move |page| fetch_page(page).boxed()),
    }
  }

  pub fn page(&self) -> u32 {
    self.page
  }

  /// Query the current page.
  pub fn load(&self) -> QueryResult {
    let page = self.page;
    let fetch_page = Arc::clone(&self.fetch_page);
    self.observer.set_query(
      (self.key_for)(page),
      move || fetch_page(page),
      &QueryOptions::new().keep_previous_data(true),
    )
  }

  pub fn next(&mut self) -> QueryResult {
    self.page = self.page.saturating_add(1);
    self.load()
  }

  /// Go back one page; stays on page 1.
  pub fn previous(&mut self) -> QueryResult {
    self.page = self.page.saturating_sub(1).max(1);
    self.load()
  }

  pub fn go_to(&mut self, page: u32) -> QueryResult {
    self.page = page.max(1);
    self.load()
  }

  pub fn current(&self) -> Option<QueryResult> {
    self.observer.current()
  }

  /// Wait for the current page's request to settle.
  pub async fn settled(&self) -> Option<QueryResult> {
    self.observer.settled().await
  }

  pub fn observer(&self) -> &QueryObserver {
    &self.observer
  }
}
