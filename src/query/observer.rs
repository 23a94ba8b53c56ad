//! Consumer-side view onto one query at a time.
//!
//! A `QueryObserver` plays the role a single view plays: it follows one key,
//! switches keys when its inputs change, and publishes what should be shown.
//! Results for a key it has already moved away from are ignored, so a slow
//! early response can never overwrite a fast later one.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::debug;

use super::cache::{QueryCache, QueryOptions, Subscription};
use super::entry::{CacheEntry, QueryStatus};
use super::key::QueryKey;
use crate::error::ApiError;

/// What a consumer should display.
#[derive(Debug, Clone)]
pub struct QueryResult {
  pub entry: Arc<CacheEntry>,
  /// `entry` carries the previous key's data while the current key loads
  pub is_placeholder_data: bool,
}

struct ObserverState {
  key: Option<QueryKey>,
  keep_previous: bool,
  /// Most recent entry with data seen by this observer, any key
  last_with_data: Option<Arc<CacheEntry>>,
  /// Version of the last entry published for `key`
  published: u64,
  subscription: Option<Subscription>,
  tx: watch::Sender<Option<QueryResult>>,
}

impl ObserverState {
  fn view(&self, entry: &Arc<CacheEntry>) -> QueryResult {
    if self.keep_previous && entry.status == QueryStatus::Loading && !entry.has_data() {
      if let Some(previous) = &self.last_with_data {
        return QueryResult {
          entry: Arc::new(CacheEntry::placeholder(entry.key.clone(), previous)),
          is_placeholder_data: true,
        };
      }
    }
    QueryResult {
      entry: Arc::clone(entry),
      is_placeholder_data: false,
    }
  }
}

/// Follows the query a consumer currently declares.
pub struct QueryObserver {
  cache: QueryCache,
  state: Arc<Mutex<ObserverState>>,
}

impl QueryObserver {
  pub fn new(cache: QueryCache) -> Self {
    let (tx, _rx) = watch::channel(None);
    Self {
      cache,
      state: Arc::new(Mutex::new(ObserverState {
        key: None,
        keep_previous: false,
        last_with_data: None,
        published: 0,
        subscription: None,
        tx,
      })),
    }
  }

  fn lock(&self) -> MutexGuard<'_, ObserverState> {
    lock_state(&self.state)
  }

  /// Declare the query this consumer wants. Re-declaring the same key is
  /// cheap: the cache deduplicates and serves fresh entries directly.
  pub fn set_query<T, F, Fut>(
    &self,
    key: QueryKey,
    fetcher: F,
    options: &QueryOptions,
  ) -> QueryResult
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let switched = {
      let mut state = self.lock();
      state.keep_previous = options.keep_previous_data;
      if state.key.as_ref() != Some(&key) {
        debug!(from = ?state.key, to = %key, "observer switching key");
        state.key = Some(key.clone());
        state.published = 0;
        state.subscription = None;
        true
      } else {
        false
      }
    };

    if switched {
      let weak = Arc::downgrade(&self.state);
      let subscription = self.cache.subscribe(&key, move |entry| {
        if let Some(state) = weak.upgrade() {
          publish(&state, entry);
        }
      });
      let mut state = self.lock();
      if state.key.as_ref() == Some(&key) {
        state.subscription = Some(subscription);
      }
    }

    let entry = self.cache.fetch(key, fetcher, options);
    match publish(&self.state, &entry) {
      Some(result) => result,
      None => self.lock().view(&entry),
    }
  }

  /// Key currently followed.
  pub fn key(&self) -> Option<QueryKey> {
    self.lock().key.clone()
  }

  /// Latest published result.
  pub fn current(&self) -> Option<QueryResult> {
    self.lock().tx.borrow().clone()
  }

  /// Receiver that wakes on every published result.
  pub fn changes(&self) -> watch::Receiver<Option<QueryResult>> {
    self.lock().tx.subscribe()
  }

  /// Wait for the current key's request (if any) to settle.
  pub async fn settled(&self) -> Option<QueryResult> {
    let key = self.key()?;
    self.cache.wait(&key).await;
    self.current()
  }

  /// Manual retry of the current key.
  pub fn refetch(&self) -> Option<QueryResult> {
    let key = self.key()?;
    let entry = self.cache.refetch(&key)?;
    publish(&self.state, &entry)
  }
}

impl std::fmt::Debug for QueryObserver {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryObserver")
      .field("key", &self.key())
      .finish_non_exhaustive()
  }
}

fn lock_state(state: &Mutex<ObserverState>) -> MutexGuard<'_, ObserverState> {
  state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Publish `entry` if it belongs to the key currently followed and is not
/// older than what was already published for it. An older entry yields the
/// current result instead.
fn publish(state: &Mutex<ObserverState>, entry: &Arc<CacheEntry>) -> Option<QueryResult> {
  let mut state = lock_state(state);
  if state.key.as_ref() != Some(&entry.key) {
    debug!(key = %entry.key, "ignoring result for superseded key");
    return None;
  }
  if entry.version() < state.published {
    debug!(key = %entry.key, version = entry.version(), "ignoring outdated entry");
    return state.tx.borrow().clone();
  }
  state.published = entry.version();
  if entry.has_data() {
    state.last_with_data = Some(Arc::clone(entry));
  }
  let result = state.view(entry);
  state.tx.send_replace(Some(result.clone()));
  Some(result)
}
