//! Confirmed writes followed by cache invalidation.
//!
//! A write is awaited to completion first. Only a success response
//! invalidates the declared keys; a failure leaves the cache exactly as it was
//! and hands the error back. Nothing is applied optimistically, so there is
//! never anything to roll back.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::query::{InvalidationReason, QueryCache, QueryKey};

/// Outcome of the most recently completed run of a [`Mutation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationState {
  Idle,
  Pending,
  Success,
  Error(ApiError),
}

/// Runs writes against the backend and invalidates on success.
#[derive(Clone)]
pub struct MutationExecutor {
  cache: QueryCache,
}

impl MutationExecutor {
  pub fn new(cache: QueryCache) -> Self {
    Self { cache }
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  /// Declare a named mutation that invalidates `invalidates` on success.
  pub fn mutation(&self, name: &'static str, invalidates: Vec<QueryKey>) -> Mutation {
    Mutation {
      executor: self.clone(),
      name,
      invalidates: invalidates.into(),
      pending: Arc::new(AtomicUsize::new(0)),
      state: Arc::new(Mutex::new(MutationState::Idle)),
    }
  }

  /// Await `write`; on success invalidate every key pattern in `invalidates`.
  pub async fn execute<T, Fut>(
    &self,
    name: &'static str,
    invalidates: &[QueryKey],
    write: Fut,
  ) -> Result<T, ApiError>
  where
    Fut: Future<Output = Result<T, ApiError>>,
  {
    debug!(mutation = name, "executing");
    match write.await {
      Ok(value) => {
        let matched: usize = invalidates
          .iter()
          .map(|key| self.cache.invalidate(key, InvalidationReason::Mutation(name)))
          .sum();
        info!(mutation = name, invalidated = matched, "mutation succeeded");
        Ok(value)
      }
      Err(err) => {
        warn!(mutation = name, error = %err, "mutation failed");
        Err(err)
      }
    }
  }
}

/// A declared write, as used by one control (e.g. a bookmark button).
///
/// Concurrent runs are not deduplicated or serialized: each executes
/// independently and the state reflects whichever completed last.
#[derive(Clone)]
pub struct Mutation {
  executor: MutationExecutor,
  name: &'static str,
  invalidates: Arc<[QueryKey]>,
  pending: Arc<AtomicUsize>,
  state: Arc<Mutex<MutationState>>,
}

impl Mutation {
  pub fn name(&self) -> &'static str {
    self.name
  }

  pub async fn run<T, Fut>(&self, write: Fut) -> Result<T, ApiError>
  where
    Fut: Future<Output = Result<T, ApiError>>,
  {
    let _pending = PendingGuard::enter(&self.pending);
    self.set_state(MutationState::Pending);

    let result = self
      .executor
      .execute(self.name, &self.invalidates, write)
      .await;

    self.set_state(match &result {
      Ok(_) => MutationState::Success,
      Err(err) => MutationState::Error(err.clone()),
    });
    result
  }

  /// True while any run is outstanding; a control should stay disabled.
  pub fn is_pending(&self) -> bool {
    self.pending.load(Ordering::SeqCst) > 0
  }

  pub fn state(&self) -> MutationState {
    self
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub fn reset(&self) {
    self.set_state(MutationState::Idle);
  }

  fn set_state(&self, state: MutationState) {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
  }
}

/// Keeps the pending count right even if the run future is dropped midway.
struct PendingGuard<'a>(&'a AtomicUsize);

impl<'a> PendingGuard<'a> {
  fn enter(counter: &'a AtomicUsize) -> Self {
    counter.fetch_add(1, Ordering::SeqCst);
    Self(counter)
  }
}

impl Drop for PendingGuard<'_> {
  fn drop(&mut self) {
    self.0.fetch_sub(1, Ordering::SeqCst);
  }
}
