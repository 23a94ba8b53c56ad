//! Keyed store of async resource entries.
//!
//! Each key owns at most one in-flight request. Callers asking for a key that
//! is already being fetched join that request instead of issuing another one.
//! Responses are tagged with a generation; a response whose generation no
//! longer matches the entry (the entry was removed or reset meanwhile) is
//! dropped instead of being applied.
//!
//! Every snapshot carries a cache-wide version. Listeners of one key see its
//! snapshots one at a time and in version order, whichever thread produced
//! them. Entries nobody observes are evicted once they have been unused for
//! the cache time.

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::debug;

use super::entry::{CacheEntry, InvalidationReason, Payload, QueryStatus};
use super::key::QueryKey;
use crate::error::ApiError;

/// Default time a successful entry counts as fresh.
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(5 * 60);

/// Default time an unobserved entry is kept before eviction.
pub const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(5 * 60);

type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, Result<Payload, ApiError>> + Send + Sync>;
type Listener = Arc<dyn Fn(&Arc<CacheEntry>) + Send + Sync>;
type Settled = Shared<BoxFuture<'static, ()>>;

/// Per-call query options.
#[derive(Debug, Clone)]
pub struct QueryOptions {
  /// When false, `fetch` is a no-op and the entry stays idle
  pub enabled: bool,
  /// Keep the previous key's data visible while a new key loads.
  /// Honoured by [`QueryObserver`](super::QueryObserver), which is what
  /// tracks "previous key" for a consumer.
  pub keep_previous_data: bool,
  /// Overrides the cache-wide stale time for this call
  pub stale_time: Option<Duration>,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self {
      enabled: true,
      keep_previous_data: false,
      stale_time: None,
    }
  }
}

impl QueryOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  pub fn keep_previous_data(mut self, keep: bool) -> Self {
    self.keep_previous_data = keep;
    self
  }

  pub fn stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = Some(stale_time);
    self
  }
}

struct InFlight {
  generation: u64,
  settled: Settled,
  /// Set when the entry was invalidated while this request was running; the
  /// response predates the invalidation, so it is applied but stays stale.
  rerun: Option<InvalidationReason>,
}

struct Slot {
  /// Distinguishes this slot from a later one created under the same key
  id: u64,
  entry: Arc<CacheEntry>,
  fetcher: Option<Fetcher>,
  /// Whether the most recent `fetch` call for this key was enabled
  enabled: bool,
  in_flight: Option<InFlight>,
  listeners: Vec<(u64, Listener)>,
  /// Snapshots waiting to reach the listeners, oldest first
  outbox: VecDeque<Arc<CacheEntry>>,
  /// Some caller is draining `outbox`
  delivering: bool,
  last_used: Instant,
}

impl Slot {
  fn new(id: u64, key: QueryKey) -> Self {
    Self {
      id,
      entry: Arc::new(CacheEntry::idle(key)),
      fetcher: None,
      enabled: false,
      in_flight: None,
      listeners: Vec::new(),
      outbox: VecDeque::new(),
      delivering: false,
      last_used: Instant::now(),
    }
  }

  fn can_refetch(&self) -> bool {
    self.enabled && self.fetcher.is_some()
  }

  fn is_unused(&self) -> bool {
    self.listeners.is_empty() && self.in_flight.is_none() && !self.delivering
  }
}

/// Right to drain one slot's outbox. Handed out to exactly one caller at a
/// time; redeemed with [`QueryCache::deliver`] after the lock is released.
struct Delivery {
  key: QueryKey,
  slot: u64,
}

struct Inner {
  slots: HashMap<QueryKey, Slot>,
  stale_time: Duration,
  cache_time: Duration,
  next_generation: u64,
  next_listener: u64,
  next_version: u64,
  next_slot: u64,
}

impl Inner {
  fn slot_mut(&mut self, key: &QueryKey) -> &mut Slot {
    let next_slot = &mut self.next_slot;
    self.slots.entry(key.clone()).or_insert_with(|| {
      *next_slot += 1;
      Slot::new(*next_slot, key.clone())
    })
  }

  /// Install `entry` as the current snapshot for `key` under a fresh version
  /// and queue it for the key's listeners.
  fn replace(&mut self, key: &QueryKey, entry: CacheEntry) -> Option<Delivery> {
    self.next_version += 1;
    let version = self.next_version;
    let slot = self.slots.get_mut(key)?;
    slot.entry = Arc::new(entry.with_version(version));
    slot.last_used = Instant::now();
    if slot.listeners.is_empty() {
      return None;
    }
    slot.outbox.push_back(Arc::clone(&slot.entry));
    if slot.delivering {
      return None;
    }
    slot.delivering = true;
    Some(Delivery {
      key: key.clone(),
      slot: slot.id,
    })
  }

  fn entry(&self, key: &QueryKey) -> Arc<CacheEntry> {
    match self.slots.get(key) {
      Some(slot) => Arc::clone(&slot.entry),
      None => Arc::new(CacheEntry::idle(key.clone())),
    }
  }

  /// Evict unobserved entries idle for at least the cache time.
  fn collect_garbage(&mut self) -> usize {
    let cache_time = self.cache_time;
    let before = self.slots.len();
    self.slots.retain(|key, slot| {
      let keep = !slot.is_unused() || slot.last_used.elapsed() < cache_time;
      if !keep {
        debug!(%key, "evicting unused entry");
      }
      keep
    });
    before - self.slots.len()
  }
}

/// Shared query cache. Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct QueryCache {
  inner: Arc<Mutex<Inner>>,
}

impl Default for QueryCache {
  fn default() -> Self {
    Self::new(DEFAULT_STALE_TIME)
  }
}

impl QueryCache {
  /// Create an empty cache where successful entries stay fresh for `stale_time`.
  pub fn new(stale_time: Duration) -> Self {
    Self {
      inner: Arc::new(Mutex::new(Inner {
        slots: HashMap::new(),
        stale_time,
        cache_time: DEFAULT_CACHE_TIME,
        next_generation: 0,
        next_listener: 0,
        next_version: 0,
        next_slot: 0,
      })),
    }
  }

  /// Keep entries without subscribers or requests for `cache_time` after
  /// their last use, then evict them.
  pub fn with_cache_time(self, cache_time: Duration) -> Self {
    self.lock().cache_time = cache_time;
    self
  }

  // Every critical section replaces whole values, so a poisoned lock still
  // guards consistent state.
  fn lock(&self) -> MutexGuard<'_, Inner> {
    lock_inner(&self.inner)
  }

  /// Current snapshot for `key`, without fetching.
  pub fn get(&self, key: &QueryKey) -> Option<Arc<CacheEntry>> {
    self.lock().slots.get(key).map(|slot| Arc::clone(&slot.entry))
  }

  /// Return the current entry for `key` and, if it is missing or stale and
  /// nothing is in flight for it, start exactly one background fetch.
  ///
  /// Must be called from within a tokio runtime.
  pub fn fetch<T, F, Fut>(
    &self,
    key: QueryKey,
    fetcher: F,
    options: &QueryOptions,
  ) -> Arc<CacheEntry>
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let fetcher: Fetcher = Arc::new(move || {
      let fut = fetcher();
      async move { fut.await.map(|data| Arc::new(data) as Payload) }.boxed()
    });
    self.fetch_erased(key, fetcher, options)
  }

  fn fetch_erased(
    &self,
    key: QueryKey,
    fetcher: Fetcher,
    options: &QueryOptions,
  ) -> Arc<CacheEntry> {
    let mut inner = self.lock();
    inner.collect_garbage();

    if !options.enabled {
      debug!(%key, "query disabled");
      if let Some(slot) = inner.slots.get_mut(&key) {
        slot.enabled = false;
        slot.last_used = Instant::now();
      }
      return inner.entry(&key);
    }

    let stale_time = options.stale_time.unwrap_or(inner.stale_time);
    let slot = inner.slot_mut(&key);
    slot.fetcher = Some(fetcher);
    slot.enabled = true;
    slot.last_used = Instant::now();

    if slot.in_flight.is_some() {
      debug!(%key, "joining in-flight request");
      return Arc::clone(&slot.entry);
    }
    if !needs_fetch(&slot.entry, stale_time) {
      return Arc::clone(&slot.entry);
    }

    let delivery = self.start(&mut inner, &key);
    let entry = inner.entry(&key);
    drop(inner);

    self.deliver(delivery);
    entry
  }

  /// Fetch `key` (as [`fetch`](Self::fetch)) and wait until it settles.
  pub async fn resolve<T, F, Fut>(
    &self,
    key: QueryKey,
    fetcher: F,
    options: &QueryOptions,
  ) -> Arc<CacheEntry>
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let entry = self.fetch(key.clone(), fetcher, options);
    if !options.enabled {
      return entry;
    }
    self.wait(&key).await
  }

  /// Wait until no request is in flight for `key` and return the entry.
  pub async fn wait(&self, key: &QueryKey) -> Arc<CacheEntry> {
    loop {
      let settled = {
        let inner = self.lock();
        match inner.slots.get(key) {
          Some(slot) => match &slot.in_flight {
            Some(flight) => flight.settled.clone(),
            None => return Arc::clone(&slot.entry),
          },
          None => return Arc::new(CacheEntry::idle(key.clone())),
        }
      };
      settled.await;
    }
  }

  /// Manual re-fetch ("try again"). Joins the in-flight request if there is
  /// one. Returns `None` when the key has never been fetched while enabled.
  pub fn refetch(&self, key: &QueryKey) -> Option<Arc<CacheEntry>> {
    let mut inner = self.lock();
    let slot = inner.slots.get(key)?;
    if slot.in_flight.is_some() {
      return Some(Arc::clone(&slot.entry));
    }
    if !slot.can_refetch() {
      return None;
    }

    let delivery = self.start(&mut inner, key);
    let entry = inner.entry(key);
    drop(inner);

    self.deliver(delivery);
    Some(entry)
  }

  /// Mark every entry under `pattern` stale.
  ///
  /// Entries with live subscribers are re-fetched in the background right
  /// away; the rest are only marked, so their next `fetch` re-executes.
  /// Returns the number of entries matched.
  pub fn invalidate(&self, pattern: &QueryKey, reason: InvalidationReason) -> usize {
    let mut inner = self.lock();
    let keys: Vec<QueryKey> = inner
      .slots
      .keys()
      .filter(|k| k.matches(pattern))
      .cloned()
      .collect();

    let mut deliveries = Vec::with_capacity(keys.len());
    for key in &keys {
      let Some(slot) = inner.slots.get_mut(key) else {
        continue;
      };
      let stale = slot.entry.to_stale(reason.clone());
      let refetch = match slot.in_flight.as_mut() {
        Some(flight) => {
          flight.rerun = Some(reason.clone());
          false
        }
        None => !slot.listeners.is_empty() && slot.can_refetch(),
      };
      if refetch {
        // `start` notifies with the loading snapshot, which is already stale
        if let Some(slot) = inner.slots.get_mut(key) {
          slot.entry = Arc::new(stale);
        }
        deliveries.extend(self.start(&mut inner, key));
      } else {
        deliveries.extend(inner.replace(key, stale));
      }
    }
    drop(inner);

    debug!(%pattern, %reason, matched = keys.len(), "invalidated");
    for delivery in deliveries {
      self.deliver(Some(delivery));
    }
    keys.len()
  }

  /// Drop every entry under `pattern`. In-flight responses for them are
  /// discarded. Entries with live subscribers are reset to idle instead of
  /// dropped, so their subscribers keep receiving updates.
  pub fn remove(&self, pattern: &QueryKey) -> usize {
    let mut inner = self.lock();
    let keys: Vec<QueryKey> = inner
      .slots
      .keys()
      .filter(|k| k.matches(pattern))
      .cloned()
      .collect();

    let mut deliveries = Vec::new();
    for key in &keys {
      let keep = match inner.slots.get_mut(key) {
        Some(slot) if !slot.listeners.is_empty() => {
          slot.fetcher = None;
          slot.enabled = false;
          slot.in_flight = None;
          true
        }
        _ => false,
      };
      if keep {
        deliveries.extend(inner.replace(key, CacheEntry::idle(key.clone())));
      } else {
        inner.slots.remove(key);
      }
    }
    drop(inner);

    debug!(%pattern, removed = keys.len(), "removed entries");
    for delivery in deliveries {
      self.deliver(Some(delivery));
    }
    keys.len()
  }

  /// Register for change notifications on `key`.
  ///
  /// Every subscriber of a key receives the same `Arc<CacheEntry>` per
  /// update, in the order the updates happened. The listener runs outside the
  /// cache lock and may call back into the cache; updates it causes on its own
  /// key are delivered after it returns. Dropping the returned handle
  /// deregisters it.
  pub fn subscribe<F>(&self, key: &QueryKey, listener: F) -> Subscription
  where
    F: Fn(&Arc<CacheEntry>) + Send + Sync + 'static,
  {
    let mut inner = self.lock();
    inner.collect_garbage();
    inner.next_listener += 1;
    let id = inner.next_listener;
    let slot = inner.slot_mut(key);
    slot.listeners.push((id, Arc::new(listener)));
    slot.last_used = Instant::now();

    Subscription {
      cache: Arc::downgrade(&self.inner),
      key: key.clone(),
      id,
    }
  }

  /// Evict every entry that has had no subscriber, request or read for the
  /// cache time. Runs on its own after entries fall out of use; returns the
  /// number evicted.
  pub fn collect_garbage(&self) -> usize {
    self.lock().collect_garbage()
  }

  #[cfg(test)]
  fn subscriber_count(&self, key: &QueryKey) -> usize {
    self
      .lock()
      .slots
      .get(key)
      .map(|slot| slot.listeners.len())
      .unwrap_or(0)
  }

  /// Start a request for `key` using its stored fetcher. Caller holds the lock
  /// and delivers after releasing it.
  fn start(&self, inner: &mut Inner, key: &QueryKey) -> Option<Delivery> {
    inner.next_generation += 1;
    let generation = inner.next_generation;
    let slot = inner.slots.get_mut(key)?;
    let fetcher = slot.fetcher.clone()?;

    let cache = Arc::downgrade(&self.inner);
    let task_key = key.clone();
    let settled = async move {
      let result = fetcher().await;
      if let Some(inner) = cache.upgrade() {
        QueryCache { inner }.settle(&task_key, generation, result);
      }
    }
    .boxed()
    .shared();

    slot.in_flight = Some(InFlight {
      generation,
      settled: settled.clone(),
      rerun: None,
    });
    let loading = slot.entry.to_loading();
    debug!(%key, generation, revalidating = loading.has_data(), "fetch started");

    tokio::spawn(settled);
    inner.replace(key, loading)
  }

  /// Apply a response, unless it has been superseded.
  fn settle(&self, key: &QueryKey, generation: u64, result: Result<Payload, ApiError>) {
    let mut inner = self.lock();

    let (next, rerun_active) = {
      let Some(slot) = inner.slots.get_mut(key) else {
        debug!(%key, generation, "discarding response for removed entry");
        return;
      };
      let current = slot.in_flight.as_ref().map(|f| f.generation);
      if current != Some(generation) {
        debug!(%key, generation, ?current, "discarding superseded response");
        return;
      }
      let rerun = slot.in_flight.take().and_then(|f| f.rerun);

      let next = match result {
        Ok(data) => slot.entry.to_success(data),
        Err(err) => {
          debug!(%key, error = %err, "fetch failed");
          slot.entry.to_error(err)
        }
      };
      let rerun_active = rerun.is_some() && !slot.listeners.is_empty() && slot.can_refetch();
      let next = match rerun {
        Some(reason) => next.to_stale(reason),
        None => next,
      };
      (next, rerun_active)
    };

    let delivery = inner.replace(key, next);
    let follow_up = if rerun_active {
      self.start(&mut inner, key)
    } else {
      None
    };
    let unobserved = inner.slots.get(key).is_some_and(Slot::is_unused);
    let cache_time = inner.cache_time;
    drop(inner);

    self.deliver(delivery);
    self.deliver(follow_up);
    if unobserved {
      schedule_collection(Arc::downgrade(&self.inner), cache_time);
    }
  }

  /// Hand queued snapshots to the slot's listeners, oldest first, until the
  /// outbox is empty. Snapshots queued meanwhile by other callers are
  /// delivered here too.
  fn deliver(&self, delivery: Option<Delivery>) {
    let Some(Delivery { key, slot: id }) = delivery else {
      return;
    };
    loop {
      let (entry, listeners) = {
        let mut inner = self.lock();
        let Some(slot) = inner.slots.get_mut(&key).filter(|s| s.id == id) else {
          return;
        };
        match slot.outbox.pop_front() {
          Some(entry) => {
            let listeners: Vec<Listener> =
              slot.listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
            (entry, listeners)
          }
          None => {
            slot.delivering = false;
            return;
          }
        }
      };
      for listener in listeners {
        listener(&entry);
      }
    }
  }
}

fn lock_inner(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
  inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn needs_fetch(entry: &CacheEntry, stale_time: Duration) -> bool {
  match entry.status {
    QueryStatus::Idle | QueryStatus::Loading => true,
    // Failures are only retried manually, or after an explicit invalidation
    QueryStatus::Error => entry.is_invalidated(),
    QueryStatus::Success => {
      entry.is_invalidated()
        || entry
          .fetched_at
          .and_then(|at| Utc::now().signed_duration_since(at).to_std().ok())
          .map(|age| age >= stale_time)
          .unwrap_or(true)
    }
  }
}

/// Sweep the cache once `after` has passed. Outside a tokio runtime the next
/// `fetch` or `subscribe` sweeps instead.
fn schedule_collection(cache: Weak<Mutex<Inner>>, after: Duration) {
  let Ok(handle) = tokio::runtime::Handle::try_current() else {
    return;
  };
  handle.spawn(async move {
    tokio::time::sleep(after).await;
    if let Some(inner) = cache.upgrade() {
      lock_inner(&inner).collect_garbage();
    }
  });
}

/// Deregistration handle returned by [`QueryCache::subscribe`].
#[must_use = "dropping a Subscription deregisters the listener"]
pub struct Subscription {
  cache: Weak<Mutex<Inner>>,
  key: QueryKey,
  id: u64,
}

impl Subscription {
  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  /// Deregister now (same as dropping).
  pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
  fn drop(&mut self) {
    let Some(inner) = self.cache.upgrade() else {
      return;
    };
    let cache_time = {
      let mut guard = lock_inner(&inner);
      let cache_time = guard.cache_time;
      let Some(slot) = guard.slots.get_mut(&self.key) else {
        return;
      };
      slot.listeners.retain(|(id, _)| *id != self.id);
      slot.last_used = Instant::now();
      if !slot.listeners.is_empty() {
        return;
      }
      cache_time
    };
    schedule_collection(Arc::downgrade(&inner), cache_time);
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("key", &self.key)
      .field("id", &self.id)
      .finish()
  }
}
