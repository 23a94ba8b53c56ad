//! Cache entries and their status.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::key::QueryKey;
use crate::error::ApiError;

/// Type-erased payload shared between the cache and its readers.
///
/// Entries for different resources hold different types; readers recover the
/// concrete type with [`CacheEntry::data`].
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Never fetched, or gated off
  Idle,
  /// A request is in flight (data may still be present from an earlier success)
  Loading,
  /// The latest request succeeded
  Success,
  /// The latest request failed (data from an earlier success is retained)
  Error,
}

/// Why an entry stopped being authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationReason {
  /// Explicit `invalidate` call
  Manual,
  /// A named mutation succeeded
  Mutation(&'static str),
  /// The credential changed (login)
  SessionChanged,
}

impl fmt::Display for InvalidationReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      InvalidationReason::Manual => f.write_str("manual"),
      InvalidationReason::Mutation(name) => write!(f, "mutation {}", name),
      InvalidationReason::SessionChanged => f.write_str("session changed"),
    }
  }
}

/// Immutable snapshot of one keyed resource.
///
/// The cache replaces the whole `Arc<CacheEntry>` on every transition, so a
/// reader holding a snapshot never observes a half-applied update.
#[derive(Clone)]
pub struct CacheEntry {
  pub key: QueryKey,
  pub status: QueryStatus,
  data: Option<Payload>,
  pub error: Option<ApiError>,
  /// Time of the last successful fetch
  pub fetched_at: Option<DateTime<Utc>>,
  pub stale_because_of: Option<InvalidationReason>,
  /// Cache-wide sequence number of this snapshot; later transitions carry
  /// larger numbers.
  version: u64,
}

impl CacheEntry {
  pub(crate) fn idle(key: QueryKey) -> Self {
    Self {
      key,
      status: QueryStatus::Idle,
      data: None,
      error: None,
      fetched_at: None,
      stale_because_of: None,
      version: 0,
    }
  }

  pub(crate) fn with_version(mut self, version: u64) -> Self {
    self.version = version;
    self
  }

  pub fn version(&self) -> u64 {
    self.version
  }

  /// Copy of this entry with a request in flight. Data is kept so the
  /// consumer can keep showing it during revalidation.
  pub(crate) fn to_loading(&self) -> Self {
    Self {
      status: QueryStatus::Loading,
      ..self.clone()
    }
  }

  pub(crate) fn to_success(&self, data: Payload) -> Self {
    Self {
      key: self.key.clone(),
      status: QueryStatus::Success,
      data: Some(data),
      error: None,
      fetched_at: Some(Utc::now()),
      stale_because_of: None,
      version: self.version,
    }
  }

  /// Failed fetch: previous successful data stays for continuity.
  pub(crate) fn to_error(&self, error: ApiError) -> Self {
    Self {
      status: QueryStatus::Error,
      error: Some(error),
      stale_because_of: None,
      ..self.clone()
    }
  }

  pub(crate) fn to_stale(&self, reason: InvalidationReason) -> Self {
    Self {
      stale_because_of: Some(reason),
      ..self.clone()
    }
  }

  /// Placeholder shown under `key` while it loads, carrying another key's data.
  pub(crate) fn placeholder(key: QueryKey, previous: &CacheEntry) -> Self {
    Self {
      key,
      status: QueryStatus::Loading,
      data: previous.data.clone(),
      error: None,
      fetched_at: previous.fetched_at,
      stale_because_of: None,
      version: 0,
    }
  }

  /// Typed view of the payload, if present and of type `T`.
  pub fn data<T: Any>(&self) -> Option<&T> {
    self.data.as_deref().and_then(|d| d.downcast_ref::<T>())
  }

  pub fn has_data(&self) -> bool {
    self.data.is_some()
  }

  pub fn is_idle(&self) -> bool {
    self.status == QueryStatus::Idle
  }

  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Loading
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }

  /// Loading while data from an earlier success is being shown.
  pub fn is_revalidating(&self) -> bool {
    self.is_loading() && self.has_data()
  }

  pub fn is_invalidated(&self) -> bool {
    self.stale_because_of.is_some()
  }
}

impl fmt::Debug for CacheEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheEntry")
      .field("key", &self.key)
      .field("status", &self.status)
      .field("has_data", &self.data.is_some())
      .field("error", &self.error)
      .field("fetched_at", &self.fetched_at)
      .field("stale_because_of", &self.stale_because_of)
      .field("version", &self.version)
      .finish()
  }
}
