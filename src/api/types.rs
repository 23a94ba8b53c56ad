//! Resource types exchanged with the backend.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::listing::Listable;

/// Catalog entry (search results, top lists, genre lists, detail pages).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manga {
  pub mal_id: u64,
  pub title: String,
  /// Publication status as reported upstream ("Finished", "Publishing", ...)
  #[serde(default)]
  pub status: Option<String>,
  #[serde(default)]
  pub cover_url: Option<String>,
  #[serde(default)]
  pub author: Option<String>,
  #[serde(default, deserialize_with = "deserialize_year")]
  pub year: Option<i32>,
  #[serde(default)]
  pub rating: Option<f64>,
  #[serde(default, deserialize_with = "deserialize_tags")]
  pub tags: Vec<String>,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub alternative_title: Option<String>,
}

/// Reading status of a saved item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
  Reading,
  Completed,
  Planned,
}

impl CollectionStatus {
  pub const ALL: [CollectionStatus; 3] = [
    CollectionStatus::Reading,
    CollectionStatus::Completed,
    CollectionStatus::Planned,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      CollectionStatus::Reading => "reading",
      CollectionStatus::Completed => "completed",
      CollectionStatus::Planned => "planned",
    }
  }
}

impl fmt::Display for CollectionStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown collection status '{0}' (expected reading, completed or planned)")]
pub struct UnknownStatus(pub String);

impl FromStr for CollectionStatus {
  type Err = UnknownStatus;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    CollectionStatus::ALL
      .into_iter()
      .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
      .ok_or_else(|| UnknownStatus(s.to_string()))
  }
}

/// Read-only projection of an item in the user's collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionItem {
  pub mal_id: u64,
  pub title: String,
  pub status: CollectionStatus,
  #[serde(default)]
  pub cover_url: Option<String>,
  #[serde(default)]
  pub author: Option<String>,
  #[serde(default, deserialize_with = "deserialize_year")]
  pub year: Option<i32>,
  #[serde(default)]
  pub rating: Option<f64>,
  #[serde(default, deserialize_with = "deserialize_tags")]
  pub tags: Vec<String>,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub alternative_title: Option<String>,
}

/// One page of the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogPage {
  #[serde(default)]
  pub mangas: Vec<Manga>,
  #[serde(default)]
  pub pagination: Pagination,
}

impl CatalogPage {
  pub fn has_next_page(&self) -> bool {
    self.pagination.has_next_page
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
  #[serde(default)]
  pub has_next_page: bool,
  #[serde(default)]
  pub current_page: Option<u32>,
  #[serde(default)]
  pub last_visible_page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
  pub title: String,
  #[serde(default)]
  pub mal_id: Option<u64>,
  #[serde(default)]
  pub url: Option<String>,
  #[serde(default)]
  pub date: Option<String>,
  #[serde(default)]
  pub author_username: Option<String>,
  #[serde(default)]
  pub excerpt: Option<String>,
  #[serde(default)]
  pub comments: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub id: u64,
  pub name: String,
  pub email: String,
}

/// Login response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Token {
  pub access_token: String,
  #[serde(default)]
  pub token_type: Option<String>,
}

/// OAuth2 password-form login fields.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
  pub username: String,
  pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
  pub name: String,
  pub email: String,
  pub password: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct AddToCollection {
  pub mal_id: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct StatusUpdate {
  pub status: CollectionStatus,
}

// ============================================================================
// Lenient field decoding
// ============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum YearRepr {
  Int(i64),
  Float(f64),
  Text(String),
}

/// `year` arrives as an integer, a numeric string, or not at all.
fn deserialize_year<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
  D: Deserializer<'de>,
{
  let raw: Option<YearRepr> = Option::deserialize(deserializer)?;
  Ok(raw.and_then(|year| match year {
    YearRepr::Int(i) => i32::try_from(i).ok(),
    YearRepr::Float(f) if f.is_finite() => Some(f.trunc() as i32),
    YearRepr::Float(_) => None,
    YearRepr::Text(s) => s.trim().parse().ok(),
  }))
}

/// `tags` may be null or contain nulls.
fn deserialize_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: Deserializer<'de>,
{
  let raw: Option<Vec<Option<String>>> = Option::deserialize(deserializer)?;
  Ok(raw.unwrap_or_default().into_iter().flatten().collect())
}

// ============================================================================
// Listable implementations
// ============================================================================

impl Listable for Manga {
  fn title(&self) -> &str {
    &self.title
  }

  fn year(&self) -> Option<i32> {
    self.year
  }

  fn rating(&self) -> Option<f64> {
    self.rating
  }

  fn author(&self) -> Option<&str> {
    self.author.as_deref()
  }

  fn tags(&self) -> &[String] {
    &self.tags
  }

  fn status_label(&self) -> Option<&str> {
    self.status.as_deref()
  }
}

impl Listable for CollectionItem {
  fn title(&self) -> &str {
    &self.title
  }

  fn year(&self) -> Option<i32> {
    self.year
  }

  fn rating(&self) -> Option<f64> {
    self.rating
  }

  fn author(&self) -> Option<&str> {
    self.author.as_deref()
  }

  fn tags(&self) -> &[String] {
    &self.tags
  }

  fn status_label(&self) -> Option<&str> {
    Some(self.status.as_str())
  }
}
