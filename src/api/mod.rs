//! Backend HTTP surface and the cached facade over it.

mod client;
pub mod keys;
mod session;
pub mod types;

pub use client::ApiClient;
pub use session::MangaClient;
