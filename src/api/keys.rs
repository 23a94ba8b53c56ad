//! Query keys for every cached backend resource.
//!
//! Keys are structural: invalidating `user_collection()` matches any key that
//! starts with `["userCollection"]`, and `QueryKey::new(CATALOG_PAGE)` matches
//! every catalog page regardless of number or genre.

use crate::query::QueryKey;

pub const MANGA_DETAILS: &str = "mangaDetails";
pub const SEARCH_MANGA: &str = "searchManga";
pub const TOP_MANGA: &str = "topManga";
pub const RECOMMENDED_MANGA: &str = "recommendedManga";
pub const MANGA_BY_GENRE: &str = "mangaByGenre";
pub const NEWS: &str = "news";
pub const CATALOG_PAGE: &str = "catalogPage";
pub const CURRENT_USER: &str = "currentUser";
pub const USER: &str = "user";
pub const USER_COLLECTION: &str = "userCollection";

pub fn manga_details(mal_id: Option<u64>) -> QueryKey {
  QueryKey::new(MANGA_DETAILS).with(mal_id)
}

pub fn search_manga(query: &str) -> QueryKey {
  QueryKey::new(SEARCH_MANGA).with(query.trim())
}

pub fn top_manga(filter: Option<&str>) -> QueryKey {
  QueryKey::new(TOP_MANGA).with(filter)
}

pub fn recommended_manga() -> QueryKey {
  QueryKey::new(RECOMMENDED_MANGA)
}

pub fn manga_by_genre(genre_id: u64) -> QueryKey {
  QueryKey::new(MANGA_BY_GENRE).with(genre_id)
}

pub fn news() -> QueryKey {
  QueryKey::new(NEWS)
}

pub fn catalog_page(page: u32, genre: Option<&str>) -> QueryKey {
  QueryKey::new(CATALOG_PAGE).with(page).with(genre)
}

pub fn current_user() -> QueryKey {
  QueryKey::new(CURRENT_USER)
}

pub fn user(user_id: Option<u64>) -> QueryKey {
  QueryKey::new(USER).with(user_id)
}

pub fn user_collection() -> QueryKey {
  QueryKey::new(USER_COLLECTION)
}

/// Prefixes of every entry whose data belongs to the signed-in user.
pub fn user_scoped() -> Vec<QueryKey> {
  vec![
    current_user(),
    user_collection(),
    QueryKey::new(USER),
  ]
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_catalog_prefix_matches_all_pages() {
    let prefix = QueryKey::new(CATALOG_PAGE);
    assert!(catalog_page(1, None).matches(&prefix));
    assert!(catalog_page(7, Some("1")).matches(&prefix));
    assert!(!catalog_page(1, Some("1")).matches(&catalog_page(1, None)));
  }

  #[test]
  fn test_user_scoped_keys() {
    let scoped = user_scoped();
    for key in [current_user(), user_collection(), user(Some(3))] {
      assert!(scoped.iter().any(|p| key.matches(p)), "{} not user scoped", key);
    }
    assert!(!scoped.iter().any(|p| news().matches(p)));
    assert!(!scoped.iter().any(|p| manga_details(Some(1)).matches(p)));
  }

  #[test]
  fn test_search_key_ignores_surrounding_whitespace() {
    assert_eq!(search_manga(" berserk "), search_manga("berserk"));
  }
}
