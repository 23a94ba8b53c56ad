//! Cached backend facade.
//!
//! [`MangaClient`] is what a view talks to. Reads go through the shared
//! [`QueryCache`] under the keys in [`keys`](super::keys), gated on their
//! inputs; writes go through declared [`Mutation`]s that invalidate the
//! collection on success.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::client::ApiClient;
use super::keys;
use super::types::{CatalogPage, CollectionStatus, Credentials, NewUser, User};
use crate::auth::{AuthState, AuthSubscription, MemoryTokenStore, SqliteTokenStore, TokenStore};
use crate::config::{Config, TokenStoreKind};
use crate::error::ApiError;
use crate::listing::PaginationController;
use crate::mutation::{Mutation, MutationExecutor};
use crate::query::{CacheEntry, InvalidationReason, QueryCache, QueryKey, QueryOptions};

/// Backend client with transparent caching and session handling.
///
/// Logging in invalidates every user-scoped entry; logging out (explicitly,
/// or because the backend rejected the credential) removes them, so the next
/// user never sees the previous user's data.
#[derive(Clone)]
pub struct MangaClient {
  api: ApiClient,
  cache: QueryCache,
  auth: AuthState,
  mutations: MutationExecutor,
  add: Mutation,
  set_status: Mutation,
  remove: Mutation,
  logout_on_auth_error: bool,
  _session: Arc<AuthSubscription>,
}

impl MangaClient {
  pub fn new(api: ApiClient, cache: QueryCache) -> Self {
    let auth = api.auth().clone();
    let mutations = MutationExecutor::new(cache.clone());
    let collection = vec![keys::user_collection()];

    let session = {
      let cache = cache.clone();
      auth.subscribe(move |snapshot| {
        if snapshot.is_authenticated() {
          for key in keys::user_scoped() {
            cache.invalidate(&key, InvalidationReason::SessionChanged);
          }
        } else {
          let removed: usize = keys::user_scoped().iter().map(|key| cache.remove(key)).sum();
          debug!(removed, "dropped user data");
        }
      })
    };

    Self {
      add: mutations.mutation("add_to_collection", collection.clone()),
      set_status: mutations.mutation("update_status", collection.clone()),
      remove: mutations.mutation("remove_from_collection", collection),
      api,
      cache,
      auth,
      mutations,
      logout_on_auth_error: true,
      _session: Arc::new(session),
    }
  }

  /// Build the whole stack (credential store, auth state, HTTP client,
  /// cache) from configuration.
  pub fn from_config(config: &Config) -> Result<Self> {
    let store: Arc<dyn TokenStore> = match config.auth.token_store {
      TokenStoreKind::Sqlite => match &config.auth.token_path {
        Some(path) => Arc::new(SqliteTokenStore::open_at(path)?),
        None => Arc::new(SqliteTokenStore::open()?),
      },
      TokenStoreKind::Memory => Arc::new(MemoryTokenStore::new()),
    };

    let auth = match Config::env_token() {
      Some(token) => AuthState::with_token(store, Some(token)),
      None => AuthState::load(store)?,
    };

    let api = ApiClient::from_config(config, auth)?;
    let cache =
      QueryCache::new(config.cache.stale_time()).with_cache_time(config.cache.cache_time());

    Ok(Self::new(api, cache).logout_on_auth_error(config.auth.logout_on_auth_error))
  }

  /// Whether a rejected credential logs the user out.
  pub fn logout_on_auth_error(mut self, enabled: bool) -> Self {
    self.logout_on_auth_error = enabled;
    self
  }

  pub fn api(&self) -> &ApiClient {
    &self.api
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  pub fn auth(&self) -> &AuthState {
    &self.auth
  }

  // ==========================================================================
  // Public reads
  // ==========================================================================

  /// Search suggestions. Does nothing for a blank query.
  pub async fn search(&self, query: &str) -> Arc<CacheEntry> {
    let api = self.api.clone();
    let q = query.trim().to_string();
    self
      .read(keys::search_manga(query), !q.is_empty(), move || {
        let api = api.clone();
        let q = q.clone();
        async move { api.search(&q).await }
      })
      .await
  }

  pub async fn top(&self, filter: Option<&str>) -> Arc<CacheEntry> {
    let api = self.api.clone();
    let filter = filter.map(String::from);
    self
      .read(keys::top_manga(filter.as_deref()), true, move || {
        let api = api.clone();
        let filter = filter.clone();
        async move { api.top(filter.as_deref()).await }
      })
      .await
  }

  pub async fn recommended(&self) -> Arc<CacheEntry> {
    let api = self.api.clone();
    self
      .read(keys::recommended_manga(), true, move || {
        let api = api.clone();
        async move { api.recommended().await }
      })
      .await
  }

  pub async fn by_genre(&self, genre_id: u64) -> Arc<CacheEntry> {
    let api = self.api.clone();
    self
      .read(keys::manga_by_genre(genre_id), true, move || {
        let api = api.clone();
        async move { api.by_genre(genre_id).await }
      })
      .await
  }

  /// Detail page. Does nothing until an id is known.
  pub async fn details(&self, mal_id: Option<u64>) -> Arc<CacheEntry> {
    let api = self.api.clone();
    self
      .read(keys::manga_details(mal_id), mal_id.is_some(), move || {
        let api = api.clone();
        async move {
          match mal_id {
            Some(id) => api.details(id).await,
            None => Err(ApiError::NotFound {
              detail: "no manga selected".to_string(),
            }),
          }
        }
      })
      .await
  }

  pub async fn news(&self) -> Arc<CacheEntry> {
    let api = self.api.clone();
    self
      .read(keys::news(), true, move || {
        let api = api.clone();
        async move { api.news().await }
      })
      .await
  }

  pub async fn catalog(&self, page: u32, genre: Option<&str>) -> Arc<CacheEntry> {
    let page = page.max(1);
    let genre = genre.map(String::from);
    let api = self.api.clone();
    let key = keys::catalog_page(page, genre.as_deref());
    self
      .read(key, true, move || {
        let api = api.clone();
        let genre = genre.clone();
        async move { api.catalog(page, genre.as_deref()).await }
      })
      .await
  }

  /// Page-by-page catalog browsing, keeping the previous page visible while
  /// the next one loads.
  pub fn catalog_paginator(&self, genre: Option<String>) -> PaginationController<CatalogPage> {
    let api = self.api.clone();
    let key_genre = genre.clone();
    PaginationController::new(
      self.cache.clone(),
      move |page| keys::catalog_page(page, key_genre.as_deref()),
      move |page| {
        let api = api.clone();
        let genre = genre.clone();
        async move { api.catalog(page, genre.as_deref()).await }
      },
    )
  }

  // ==========================================================================
  // Gated reads
  // ==========================================================================

  pub async fn current_user(&self) -> Arc<CacheEntry> {
    let api = self.api.clone();
    self
      .read_gated(keys::current_user(), true, move || {
        let api = api.clone();
        async move { api.me().await }
      })
      .await
  }

  pub async fn user(&self, user_id: Option<u64>) -> Arc<CacheEntry> {
    let api = self.api.clone();
    self
      .read_gated(keys::user(user_id), user_id.is_some(), move || {
        let api = api.clone();
        async move {
          match user_id {
            Some(id) => api.user_by_id(id).await,
            None => Err(ApiError::NotFound {
              detail: "no user selected".to_string(),
            }),
          }
        }
      })
      .await
  }

  pub async fn collection(&self) -> Arc<CacheEntry> {
    let api = self.api.clone();
    self
      .read_gated(keys::user_collection(), true, move || {
        let api = api.clone();
        async move { api.collection().await }
      })
      .await
  }

  // ==========================================================================
  // Session
  // ==========================================================================

  /// Exchange credentials for a token and sign in with it.
  pub async fn login(&self, credentials: &Credentials) -> Result<()> {
    let token = self.api.login(credentials).await?;
    self.auth.set_token(token.access_token)
  }

  pub async fn signup(&self, new_user: &NewUser) -> Result<User, ApiError> {
    self
      .mutations
      .execute("signup", &[], self.api.signup(new_user))
      .await
  }

  pub fn logout(&self) -> Result<()> {
    self.auth.clear_token()
  }

  // ==========================================================================
  // Collection writes
  // ==========================================================================

  pub async fn add_to_collection(&self, mal_id: u64) -> Result<(), ApiError> {
    self.write(&self.add, self.api.add_to_collection(mal_id)).await
  }

  pub async fn update_status(&self, mal_id: u64, status: CollectionStatus) -> Result<(), ApiError> {
    self
      .write(&self.set_status, self.api.update_status(mal_id, status))
      .await
  }

  pub async fn remove_from_collection(&self, mal_id: u64) -> Result<(), ApiError> {
    self
      .write(&self.remove, self.api.remove_from_collection(mal_id))
      .await
  }

  /// State of the add control; disable it while [`Mutation::is_pending`].
  pub fn add_mutation(&self) -> &Mutation {
    &self.add
  }

  pub fn status_mutation(&self) -> &Mutation {
    &self.set_status
  }

  pub fn remove_mutation(&self) -> &Mutation {
    &self.remove
  }

  // ==========================================================================
  // Plumbing
  // ==========================================================================

  async fn read<T, F, Fut>(&self, key: QueryKey, enabled: bool, fetcher: F) -> Arc<CacheEntry>
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, ApiError>> + Send + 'static,
  {
    self
      .cache
      .resolve(key, fetcher, &QueryOptions::new().enabled(enabled))
      .await
  }

  /// Read that also requires a credential.
  async fn read_gated<T, F, Fut>(&self, key: QueryKey, enabled: bool, fetcher: F) -> Arc<CacheEntry>
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, ApiError>> + Send + 'static,
  {
    let token = self.auth.token();
    let entry = self.read(key, enabled && token.is_some(), fetcher).await;
    if let Some(err) = &entry.error {
      self.on_error(err, token.as_deref());
    }
    entry
  }

  async fn write<Fut>(&self, mutation: &Mutation, request: Fut) -> Result<(), ApiError>
  where
    Fut: Future<Output = std::result::Result<(), ApiError>>,
  {
    let token = self.auth.token();
    let result = mutation.run(request).await;
    if let Err(err) = &result {
      self.on_error(err, token.as_deref());
    }
    result
  }

  /// Log out when the backend rejects the credential a request was sent with.
  /// A request sent without one, or a credential replaced in the meantime,
  /// leaves the session alone.
  fn on_error(&self, err: &ApiError, sent_with: Option<&str>) {
    if !self.logout_on_auth_error || !err.is_auth() || sent_with.is_none() {
      return;
    }
    if self.auth.token().as_deref() != sent_with {
      return;
    }
    warn!(error = %err, "credential rejected, logging out");
    if let Err(e) = self.auth.clear_token() {
      warn!("Failed to clear stored credential: {}", e);
    }
  }
}

impl std::fmt::Debug for MangaClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MangaClient")
      .field("api", &self.api)
      .field("auth", &self.auth)
      .field("logout_on_auth_error", &self.logout_on_auth_error)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::types::{CollectionItem, Manga, NewsItem};
  use crate::listing::{StatusCounts, StatusFilter};
  use crate::mutation::MutationState;
  use serde_json::{json, Value};
  use std::time::Duration;
  use wiremock::matchers::{header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn client(server: &MockServer, token: Option<&str>) -> (MangaClient, Arc<MemoryTokenStore>) {
    let store = Arc::new(match token {
      Some(token) => MemoryTokenStore::with_token(token),
      None => MemoryTokenStore::new(),
    });
    let auth = AuthState::load(store.clone()).unwrap();
    let api = ApiClient::new(
      &format!("{}/api/v1", server.uri()),
      Duration::from_secs(5),
      auth,
    )
    .unwrap();
    (MangaClient::new(api, QueryCache::default()), store)
  }

  fn item(id: u64, title: &str, status: &str) -> Value {
    json!({"mal_id": id, "title": title, "status": status, "rating": 8.5})
  }

  async fn mount_collection(server: &MockServer, items: Vec<Value>) {
    Mock::given(method("GET"))
      .and(path("/api/v1/user/collection"))
      .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(items)))
      .mount(server)
      .await;
  }

  fn counts(entry: &CacheEntry) -> StatusCounts {
    StatusCounts::from_items(entry.data::<Vec<CollectionItem>>().unwrap())
  }

  #[tokio::test]
  async fn test_gated_queries_never_fire_without_token() {
    let server = MockServer::start().await;
    Mock::given(path("/api/v1/user/me"))
      .respond_with(ResponseTemplate::new(200))
      .expect(0)
      .mount(&server)
      .await;
    Mock::given(path("/api/v1/user/collection"))
      .respond_with(ResponseTemplate::new(200))
      .expect(0)
      .mount(&server)
      .await;

    let (manga, _) = client(&server, None);
    assert!(manga.current_user().await.is_idle());
    assert!(manga.collection().await.is_idle());
    assert!(manga.user(Some(1)).await.is_idle());
  }

  #[tokio::test]
  async fn test_missing_inputs_keep_queries_idle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
      .expect(0)
      .mount(&server)
      .await;

    let (manga, _) = client(&server, Some("tok"));
    assert!(manga.search("   ").await.is_idle());
    assert!(manga.details(None).await.is_idle());
    assert!(manga.user(None).await.is_idle());
  }

  #[tokio::test]
  async fn test_concurrent_reads_share_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/v1/news"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_json(json!([{"title": "New volume announced", "comments": 4}]))
          .set_delay(Duration::from_millis(50)),
      )
      .expect(1)
      .mount(&server)
      .await;

    let (manga, _) = client(&server, None);
    let (a, b, c) = tokio::join!(manga.news(), manga.news(), manga.news());

    assert!(Arc::ptr_eq(&a, &b) && Arc::ptr_eq(&b, &c));
    let news = a.data::<Vec<NewsItem>>().unwrap();
    assert_eq!(news[0].comments, Some(4));
  }

  #[tokio::test]
  async fn test_login_sets_token_and_refetches_user_data() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/v1/auth/login"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_json(json!({"access_token": "fresh", "token_type": "bearer"})),
      )
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/api/v1/user/me"))
      .and(header("authorization", "Bearer fresh"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_json(json!({"id": 7, "name": "Ana", "email": "ana@example.com"})),
      )
      .expect(1)
      .mount(&server)
      .await;

    let (manga, store) = client(&server, None);
    assert!(manga.current_user().await.is_idle());

    manga
      .login(&Credentials {
        username: "ana@example.com".into(),
        password: "pw".into(),
      })
      .await
      .unwrap();
    assert!(manga.auth().is_authenticated());
    assert_eq!(store.load().unwrap(), Some("fresh".to_string()));

    let me = manga.current_user().await;
    assert_eq!(me.data::<User>().unwrap().name, "Ana");
  }

  #[tokio::test]
  async fn test_add_then_remove_restores_counts() {
    let server = MockServer::start().await;
    let before = vec![item(1, "Vinland Saga", "reading"), item(2, "Monster", "completed")];
    mount_collection(&server, before.clone()).await;

    let (manga, _) = client(&server, Some("tok"));
    let original = counts(&*manga.collection().await);
    assert_eq!(original.all(), 2);

    // Add
    server.reset().await;
    Mock::given(method("POST"))
      .and(path("/api/v1/user/collection"))
      .respond_with(ResponseTemplate::new(201).set_body_json(json!({"message": "added"})))
      .expect(1)
      .mount(&server)
      .await;
    let mut after_add = before.clone();
    after_add.push(item(3, "Blame!", "planned"));
    mount_collection(&server, after_add).await;

    manga.add_to_collection(3).await.unwrap();
    assert!(manga.cache().get(&keys::user_collection()).unwrap().is_invalidated());
    let added = counts(&*manga.collection().await);
    assert_eq!(added.planned, original.planned + 1);
    assert_eq!(added.all(), original.all() + 1);

    // Remove
    server.reset().await;
    Mock::given(method("DELETE"))
      .and(path("/api/v1/user/collection/3"))
      .respond_with(ResponseTemplate::new(204))
      .expect(1)
      .mount(&server)
      .await;
    mount_collection(&server, before).await;

    manga.remove_from_collection(3).await.unwrap();
    let restored = manga.collection().await;
    assert_eq!(counts(&restored), original);

    let ids: Vec<u64> = StatusFilter::All
      .view(restored.data::<Vec<CollectionItem>>().unwrap(), Default::default())
      .iter()
      .map(|i| i.mal_id)
      .collect();
    assert_eq!(ids.len(), 2);
    assert!(!ids.contains(&3));
  }

  #[tokio::test]
  async fn test_failed_write_leaves_cache_untouched() {
    let server = MockServer::start().await;
    mount_collection(&server, vec![item(1, "Monster", "reading")]).await;
    Mock::given(method("POST"))
      .and(path("/api/v1/user/collection"))
      .respond_with(
        ResponseTemplate::new(400).set_body_json(json!({"detail": "Manga already in collection"})),
      )
      .mount(&server)
      .await;

    let (manga, _) = client(&server, Some("tok"));
    let before = manga.collection().await;

    let err = manga.add_to_collection(1).await.unwrap_err();
    assert_eq!(err.to_string(), "Manga already in collection");
    assert!(matches!(manga.add_mutation().state(), MutationState::Error(_)));
    assert!(!manga.add_mutation().is_pending());

    let after = manga.cache().get(&keys::user_collection()).unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert!(manga.auth().is_authenticated());
  }

  #[tokio::test]
  async fn test_rejected_token_forces_logout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/v1/user/collection"))
      .respond_with(
        ResponseTemplate::new(401)
          .set_body_json(json!({"detail": "Could not validate credentials"})),
      )
      .expect(1)
      .mount(&server)
      .await;

    let (manga, store) = client(&server, Some("expired"));
    let entry = manga.collection().await;

    assert!(entry.error.as_ref().is_some_and(ApiError::is_auth));
    assert!(!manga.auth().is_authenticated());
    assert_eq!(store.load().unwrap(), None);
    assert!(manga.cache().get(&keys::user_collection()).is_none());

    // Now gated off: no second request
    assert!(manga.collection().await.is_idle());
  }

  #[tokio::test]
  async fn test_rejected_token_kept_when_policy_disabled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/v1/user/me"))
      .respond_with(ResponseTemplate::new(403))
      .mount(&server)
      .await;

    let (manga, _) = client(&server, Some("tok"));
    let manga = manga.logout_on_auth_error(false);

    assert!(manga.current_user().await.is_error());
    assert!(manga.auth().is_authenticated());
  }

  #[tokio::test]
  async fn test_logout_drops_user_data_but_keeps_catalog() {
    let server = MockServer::start().await;
    mount_collection(&server, vec![item(1, "Monster", "reading")]).await;
    Mock::given(method("GET"))
      .and(path("/api/v1/manga/top"))
      .respond_with(
        ResponseTemplate::new(200).set_body_json(json!([{"mal_id": 2, "title": "Berserk"}])),
      )
      .mount(&server)
      .await;

    let (manga, _) = client(&server, Some("tok"));
    assert!(manga.collection().await.is_success());
    assert!(manga.top(None).await.is_success());

    manga.logout().unwrap();

    assert!(manga.cache().get(&keys::user_collection()).is_none());
    let top = manga.cache().get(&keys::top_manga(None)).unwrap();
    assert_eq!(top.data::<Vec<Manga>>().unwrap()[0].title, "Berserk");
  }

  #[tokio::test]
  async fn test_catalog_paginator_keys_by_page_and_genre() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/api/v1/manga/catalog"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "mangas": [{"mal_id": 1, "title": "Monster"}],
        "pagination": {"has_next_page": true}
      })))
      .mount(&server)
      .await;

    let (manga, _) = client(&server, None);
    let mut pages = manga.catalog_paginator(Some("1".into()));
    pages.load();
    let first = pages.settled().await.unwrap();
    assert!(first.entry.data::<CatalogPage>().unwrap().has_next_page());

    pages.next();
    assert_eq!(pages.observer().key(), Some(keys::catalog_page(2, Some("1"))));
    pages.settled().await;
    assert!(manga.cache().get(&keys::catalog_page(1, Some("1"))).is_some());
  }
}
