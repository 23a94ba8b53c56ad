use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::types::{
  AddToCollection, CatalogPage, CollectionItem, CollectionStatus, Credentials, Manga, NewUser,
  NewsItem, StatusUpdate, Token, User,
};
use crate::auth::AuthState;
use crate::config::Config;
use crate::error::ApiError;

/// Backend API client
///
/// Thin typed wrapper over the HTTP surface. Requests that need a credential
/// read it from [`AuthState`] at send time and fail with
/// [`ApiError::missing_credential`] without touching the network when none is
/// held. Nothing here caches; see [`MangaClient`](super::MangaClient).
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  auth: AuthState,
}

impl ApiClient {
  pub fn new(base_url: &str, timeout: Duration, auth: AuthState) -> Result<Self> {
    let base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid API base url '{}': {}", base_url, e))?;
    if base_url.cannot_be_a_base() {
      return Err(eyre!("Invalid API base url '{}': not a hierarchical url", base_url));
    }

    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      auth,
    })
  }

  pub fn from_config(config: &Config, auth: AuthState) -> Result<Self> {
    Self::new(
      &config.api.base_url,
      Duration::from_secs(config.api.timeout_secs),
      auth,
    )
  }

  pub fn auth(&self) -> &AuthState {
    &self.auth
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  // ==========================================================================
  // Catalog (public)
  // ==========================================================================

  /// Title search suggestions
  pub async fn search(&self, query: &str) -> Result<Vec<Manga>, ApiError> {
    let request = self.request(Method::GET, &["manga", "search"]).query(&[("q", query)]);
    self.send_json(request).await
  }

  /// Top-ranked list, optionally narrowed to a category
  pub async fn top(&self, filter: Option<&str>) -> Result<Vec<Manga>, ApiError> {
    let mut request = self.request(Method::GET, &["manga", "top"]);
    if let Some(filter) = filter {
      request = request.query(&[("filter", filter)]);
    }
    self.send_json(request).await
  }

  pub async fn recommended(&self) -> Result<Vec<Manga>, ApiError> {
    self
      .send_json(self.request(Method::GET, &["manga", "recommended"]))
      .await
  }

  pub async fn by_genre(&self, genre_id: u64) -> Result<Vec<Manga>, ApiError> {
    let genre_id = genre_id.to_string();
    self
      .send_json(self.request(Method::GET, &["manga", "genre", &genre_id]))
      .await
  }

  /// One page of the catalog (pages are 1-based)
  pub async fn catalog(&self, page: u32, genre: Option<&str>) -> Result<CatalogPage, ApiError> {
    let mut request = self
      .request(Method::GET, &["manga", "catalog"])
      .query(&[("page", page)]);
    if let Some(genre) = genre {
      request = request.query(&[("genre", genre)]);
    }
    self.send_json(request).await
  }

  pub async fn details(&self, mal_id: u64) -> Result<Manga, ApiError> {
    let mal_id = mal_id.to_string();
    self
      .send_json(self.request(Method::GET, &["manga", &mal_id]))
      .await
  }

  pub async fn news(&self) -> Result<Vec<NewsItem>, ApiError> {
    self.send_json(self.request(Method::GET, &["news"])).await
  }

  // ==========================================================================
  // Accounts
  // ==========================================================================

  /// Exchange credentials for a token. Does not touch [`AuthState`].
  pub async fn login(&self, credentials: &Credentials) -> Result<Token, ApiError> {
    let request = self
      .request(Method::POST, &["auth", "login"])
      .form(credentials);
    self.send_json(request).await
  }

  pub async fn signup(&self, new_user: &NewUser) -> Result<User, ApiError> {
    let request = self
      .request(Method::POST, &["auth", "signup"])
      .json(new_user);
    self.send_json(request).await
  }

  pub async fn me(&self) -> Result<User, ApiError> {
    let request = self.authorized(Method::GET, &["user", "me"])?;
    self.send_json(request).await
  }

  pub async fn user_by_id(&self, user_id: u64) -> Result<User, ApiError> {
    let user_id = user_id.to_string();
    let request = self.authorized(Method::GET, &["user", &user_id])?;
    self.send_json(request).await
  }

  // ==========================================================================
  // Collection (authenticated)
  // ==========================================================================

  pub async fn collection(&self) -> Result<Vec<CollectionItem>, ApiError> {
    let request = self.authorized(Method::GET, &["user", "collection"])?;
    self.send_json(request).await
  }

  pub async fn add_to_collection(&self, mal_id: u64) -> Result<(), ApiError> {
    let request = self
      .authorized(Method::POST, &["user", "collection"])?
      .json(&AddToCollection { mal_id });
    self.send(request).await
  }

  pub async fn update_status(&self, mal_id: u64, status: CollectionStatus) -> Result<(), ApiError> {
    let mal_id = mal_id.to_string();
    let request = self
      .authorized(Method::PATCH, &["user", "collection", &mal_id])?
      .json(&StatusUpdate { status });
    self.send(request).await
  }

  pub async fn remove_from_collection(&self, mal_id: u64) -> Result<(), ApiError> {
    let mal_id = mal_id.to_string();
    let request = self.authorized(Method::DELETE, &["user", "collection", &mal_id])?;
    self.send(request).await
  }

  // ==========================================================================
  // Plumbing
  // ==========================================================================

  fn endpoint(&self, segments: &[&str]) -> Url {
    let mut url = self.base_url.clone();
    // Checked in `new`: the base can always take path segments.
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url
  }

  fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
    self.http.request(method, self.endpoint(segments))
  }

  fn authorized(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, ApiError> {
    let token = self.auth.token().ok_or_else(ApiError::missing_credential)?;
    Ok(self.request(method, segments).bearer_auth(token))
  }

  async fn send(&self, request: RequestBuilder) -> Result<(), ApiError> {
    self.execute(request).await.map(|_| ())
  }

  async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
    let response = self.execute(request).await?;
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
  }

  async fn execute(&self, request: RequestBuilder) -> Result<reqwest::Response, ApiError> {
    let response = request.send().await?;
    let status = response.status();
    debug!(path = response.url().path(), %status, "backend response");

    if status.is_success() {
      return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::from_status(status, &body))
  }
}

impl std::fmt::Debug for ApiClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ApiClient")
      .field("base_url", &self.base_url.as_str())
      .finish_non_exhaustive()
  }
}
