//! Authentication state and credential persistence.

mod state;
mod storage;

pub use state::{fingerprint, AuthSnapshot, AuthState, AuthSubscription};
pub use storage::{MemoryTokenStore, SqliteTokenStore, TokenStore};
