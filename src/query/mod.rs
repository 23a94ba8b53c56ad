//! Async query cache with request deduplication, gating, invalidation and
//! stale-while-revalidate reads.
//!
//! Inspired by TanStack Query: resources are addressed by structured
//! [`QueryKey`]s, [`QueryCache`] owns one [`CacheEntry`] per key, and a
//! [`QueryObserver`] follows whichever key a consumer currently needs.
//!
//! # Example
//!
//! ```ignore
//! let cache = QueryCache::default();
//! let api = api_client.clone();
//! let entry = cache
//!     .resolve(QueryKey::new("news"), move || {
//!         let api = api.clone();
//!         async move { api.news().await }
//!     }, &QueryOptions::new())
//!     .await;
//!
//! match entry.status {
//!     QueryStatus::Success => render(entry.data::<Vec<NewsItem>>()),
//!     QueryStatus::Error => render_error(entry.error.as_ref()),
//!     _ => render_spinner(),
//! }
//! ```

mod cache;
mod entry;
mod key;
mod observer;

pub use cache::{QueryCache, QueryOptions, Subscription, DEFAULT_CACHE_TIME, DEFAULT_STALE_TIME};
pub use entry::{CacheEntry, InvalidationReason, Payload, QueryStatus};
pub use key::{KeyPart, QueryKey};
pub use observer::{QueryObserver, QueryResult};
