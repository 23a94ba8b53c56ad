//! Derived list state: filtering, sorting, per-status counts and paging.
//!
//! Nothing in here performs I/O except `PaginationController`, which goes
//! through the query cache.

mod counts;
mod filter;
mod pagination;

pub use counts::{StatusCounts, StatusFilter};
pub use filter::{apply, FilterSortParams, Listable, SortKey};
pub use pagination::PaginationController;
