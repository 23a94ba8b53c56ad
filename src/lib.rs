//! Client-side sync core for a manga catalog backend.
//!
//! - [`query`]: keyed async cache with request deduplication, gating,
//!   invalidation and keep-previous-data reads
//! - [`mutation`]: writes that invalidate cached keys only after success
//! - [`listing`]: filter/sort pipeline, per-status counts, pagination
//! - [`auth`]: the shared credential and its persistence
//! - [`api`]: the backend HTTP surface and the cached [`api::MangaClient`]

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod listing;
pub mod mutation;
pub mod query;

pub use error::ApiError;
