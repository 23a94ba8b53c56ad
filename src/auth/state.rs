//! Process-wide authentication state.
//!
//! The only deliberately shared mutable state besides the query cache. All
//! changes go through [`AuthState::set_token`] and [`AuthState::clear_token`],
//! which persist, swap the snapshot and notify listeners in that order.

use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::info;

use super::storage::TokenStore;

/// Read-only view of the credential.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct AuthSnapshot {
  token: Option<String>,
}

impl AuthSnapshot {
  pub fn token(&self) -> Option<&str> {
    self.token.as_deref()
  }

  /// Derived from the token alone.
  pub fn is_authenticated(&self) -> bool {
    self.token.is_some()
  }
}

impl std::fmt::Debug for AuthSnapshot {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AuthSnapshot")
      .field("token", &self.token.as_deref().map(fingerprint))
      .finish()
  }
}

type AuthListener = Arc<dyn Fn(&AuthSnapshot) + Send + Sync>;

struct State {
  snapshot: Arc<AuthSnapshot>,
  listeners: Vec<(u64, AuthListener)>,
  next_listener: u64,
}

struct Inner {
  state: Mutex<State>,
  store: Arc<dyn TokenStore>,
}

/// Shared handle to the authentication state. Clones refer to the same state.
#[derive(Clone)]
pub struct AuthState {
  inner: Arc<Inner>,
}

impl AuthState {
  /// Initialize from whatever `store` has persisted.
  pub fn load(store: Arc<dyn TokenStore>) -> Result<Self> {
    let token = store.load()?;
    if let Some(token) = &token {
      info!(token = %fingerprint(token), "restored session");
    }
    Ok(Self::with_token(store, token))
  }

  /// Initialize with an explicit token (not written to `store`).
  pub fn with_token(store: Arc<dyn TokenStore>, token: Option<String>) -> Self {
    Self {
      inner: Arc::new(Inner {
        state: Mutex::new(State {
          snapshot: Arc::new(AuthSnapshot { token }),
          listeners: Vec::new(),
          next_listener: 0,
        }),
        store,
      }),
    }
  }

  fn lock(&self) -> MutexGuard<'_, State> {
    self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn get_state(&self) -> Arc<AuthSnapshot> {
    Arc::clone(&self.lock().snapshot)
  }

  pub fn is_authenticated(&self) -> bool {
    self.lock().snapshot.is_authenticated()
  }

  pub fn token(&self) -> Option<String> {
    self.lock().snapshot.token.clone()
  }

  /// Login success: persist `token`, then flip to authenticated.
  pub fn set_token(&self, token: impl Into<String>) -> Result<()> {
    let token = token.into();
    if token.trim().is_empty() {
      return Err(eyre!("Refusing to store an empty credential"));
    }
    if self.lock().snapshot.token.as_deref() == Some(token.as_str()) {
      return Ok(());
    }

    self.inner.store.save(&token)?;
    info!(token = %fingerprint(&token), "logged in");
    self.replace(Some(token));
    Ok(())
  }

  /// Logout: forget the token. The in-memory state flips even if the store
  /// fails; the store error is still returned.
  pub fn clear_token(&self) -> Result<()> {
    let persisted = self.inner.store.clear();
    if self.lock().snapshot.is_authenticated() {
      info!("logged out");
      self.replace(None);
    }
    persisted
  }

  fn replace(&self, token: Option<String>) {
    let (snapshot, listeners) = {
      let mut state = self.lock();
      state.snapshot = Arc::new(AuthSnapshot { token });
      let listeners: Vec<AuthListener> =
        state.listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
      (Arc::clone(&state.snapshot), listeners)
    };
    for listener in listeners {
      listener(&snapshot);
    }
  }

  /// Be told about every login/logout. Dropping the handle deregisters.
  pub fn subscribe<F>(&self, listener: F) -> AuthSubscription
  where
    F: Fn(&AuthSnapshot) + Send + Sync + 'static,
  {
    let mut state = self.lock();
    state.next_listener += 1;
    let id = state.next_listener;
    state.listeners.push((id, Arc::new(listener)));
    AuthSubscription {
      auth: Arc::downgrade(&self.inner),
      id,
    }
  }
}

impl std::fmt::Debug for AuthState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AuthState")
      .field("snapshot", &self.get_state())
      .finish_non_exhaustive()
  }
}

/// Deregistration handle returned by [`AuthState::subscribe`].
#[must_use = "dropping an AuthSubscription deregisters the listener"]
pub struct AuthSubscription {
  auth: Weak<Inner>,
  id: u64,
}

impl Drop for AuthSubscription {
  fn drop(&mut self) {
    if let Some(inner) = self.auth.upgrade() {
      let mut state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
      state.listeners.retain(|(id, _)| *id != self.id);
    }
  }
}

/// Short, stable identifier for a token that is safe to log.
pub fn fingerprint(token: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(token.as_bytes());
  let digest = hex::encode(hasher.finalize());
  digest[..12].to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::auth::storage::MemoryTokenStore;

  #[test]
  fn test_load_from_store() {
    let store = Arc::new(MemoryTokenStore::with_token("saved"));
    let auth = AuthState::load(store).unwrap();
    assert!(auth.is_authenticated());
    assert_eq!(auth.token().as_deref(), Some("saved"));

    let empty = AuthState::load(Arc::new(MemoryTokenStore::new())).unwrap();
    assert!(!empty.is_authenticated());
  }

  #[test]
  fn test_set_and_clear_persist_and_notify() {
    let store = Arc::new(MemoryTokenStore::new());
    let auth = AuthState::load(store.clone()).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let _sub = auth.subscribe(move |snapshot| {
      seen_clone.lock().unwrap().push(snapshot.is_authenticated());
    });

    auth.set_token("abc").unwrap();
    assert!(auth.get_state().is_authenticated());
    assert_eq!(store.load().unwrap(), Some("abc".to_string()));

    // Same token again is not a change
    auth.set_token("abc").unwrap();

    auth.clear_token().unwrap();
    assert!(!auth.is_authenticated());
    assert_eq!(store.load().unwrap(), None);

    // Already logged out
    auth.clear_token().unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![true, false]);
  }

  #[test]
  fn test_flag_follows_token() {
    let auth = AuthState::with_token(Arc::new(MemoryTokenStore::new()), None);
    let before = auth.get_state();
    auth.set_token("t").unwrap();
    let after = auth.get_state();

    // Snapshots are immutable; the old one still reads logged-out
    assert_eq!(before.is_authenticated(), before.token().is_some());
    assert_eq!(after.is_authenticated(), after.token().is_some());
    assert!(!before.is_authenticated());
    assert!(after.is_authenticated());
  }

  #[test]
  fn test_empty_token_rejected() {
    let auth = AuthState::with_token(Arc::new(MemoryTokenStore::new()), None);
    assert!(auth.set_token("  ").is_err());
    assert!(!auth.is_authenticated());
  }

  #[test]
  fn test_dropped_subscription_is_not_called() {
    let auth = AuthState::with_token(Arc::new(MemoryTokenStore::new()), None);
    let calls = Arc::new(Mutex::new(0));
    let calls_clone = calls.clone();
    let sub = auth.subscribe(move |_| *calls_clone.lock().unwrap() += 1);

    auth.set_token("one").unwrap();
    drop(sub);
    auth.set_token("two").unwrap();

    assert_eq!(*calls.lock().unwrap(), 1);
  }

  #[test]
  fn test_fingerprint_hides_token() {
    let fp = fingerprint("super-secret");
    assert_eq!(fp.len(), 12);
    assert!(!fp.contains("secret"));
    assert_eq!(fp, fingerprint("super-secret"));
    let snapshot = AuthSnapshot {
      token: Some("super-secret".into()),
    };
    assert!(!format!("{:?}", snapshot).contains("secret"));
  }
}
