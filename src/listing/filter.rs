//! Filter and sort pipeline for resource lists.
//!
//! Pure and synchronous: input list → filter predicates → stable sort →
//! new list. The input is never modified, and applying the pipeline to its
//! own output returns that output unchanged.

use feruca::Collator;
use std::cmp::Ordering;
use std::fmt;

/// Fields the pipeline reads from a list item.
pub trait Listable {
  fn title(&self) -> &str;
  fn year(&self) -> Option<i32>;
  fn rating(&self) -> Option<f64>;
  fn author(&self) -> Option<&str>;
  /// Genre/tag names
  fn tags(&self) -> &[String];
  /// Publication status for catalog items, reading status for collection items
  fn status_label(&self) -> Option<&str>;
}

/// Sort order. Unknown names parse to [`SortKey::Unordered`], which keeps the
/// input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
  /// Lexicographic ascending, case-insensitive
  Title,
  /// Descending, missing year counts as 0
  Year,
  /// Descending, missing rating counts as 0
  Rating,
  /// Lexicographic ascending, missing author counts as ""
  Author,
  /// Same order as `Rating`
  #[default]
  Popularity,
  Unordered,
}

impl SortKey {
  pub fn as_str(&self) -> &'static str {
    match self {
      SortKey::Title => "title",
      SortKey::Year => "year",
      SortKey::Rating => "rating",
      SortKey::Author => "author",
      SortKey::Popularity => "popularity",
      SortKey::Unordered => "unordered",
    }
  }

  pub fn all() -> &'static [SortKey] {
    &[
      SortKey::Title,
      SortKey::Year,
      SortKey::Rating,
      SortKey::Author,
      SortKey::Popularity,
    ]
  }

  fn compare<T: Listable>(&self, collator: &mut Collator, a: &T, b: &T) -> Ordering {
    match self {
      SortKey::Title => compare_text(collator, a.title(), b.title()),
      SortKey::Year => b.year().unwrap_or(0).cmp(&a.year().unwrap_or(0)),
      SortKey::Rating | SortKey::Popularity => b
        .rating()
        .unwrap_or(0.0)
        .total_cmp(&a.rating().unwrap_or(0.0)),
      SortKey::Author => compare_text(
        collator,
        a.author().unwrap_or(""),
        b.author().unwrap_or(""),
      ),
      SortKey::Unordered => Ordering::Equal,
    }
  }
}

impl From<&str> for SortKey {
  fn from(s: &str) -> Self {
    match s.trim().to_lowercase().as_str() {
      "title" => SortKey::Title,
      "year" => SortKey::Year,
      "rating" => SortKey::Rating,
      "author" => SortKey::Author,
      "popularity" => SortKey::Popularity,
      _ => SortKey::Unordered,
    }
  }
}

impl fmt::Display for SortKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Filter and sort parameters. `None`, empty and `"all"` filters pass
/// everything through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSortParams {
  pub genre: Option<String>,
  pub status: Option<String>,
  pub sort_key: SortKey,
}

impl FilterSortParams {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn genre(mut self, genre: impl Into<String>) -> Self {
    self.genre = Some(genre.into());
    self
  }

  pub fn status(mut self, status: impl Into<String>) -> Self {
    self.status = Some(status.into());
    self
  }

  pub fn sort_by(mut self, sort_key: SortKey) -> Self {
    self.sort_key = sort_key;
    self
  }

  fn keeps<T: Listable>(&self, item: &T) -> bool {
    let genre_ok = match active(&self.genre) {
      Some(genre) => item.tags().iter().any(|tag| eq_ignore_case(tag, genre)),
      None => true,
    };
    let status_ok = match active(&self.status) {
      Some(status) => item
        .status_label()
        .is_some_and(|label| eq_ignore_case(label, status)),
      None => true,
    };
    genre_ok && status_ok
  }
}

/// Run the pipeline over `items`, returning a new list.
pub fn apply<T: Listable + Clone>(items: &[T], params: &FilterSortParams) -> Vec<T> {
  let mut out: Vec<T> = items
    .iter()
    .filter(|item| params.keeps(*item))
    .cloned()
    .collect();
  // Stable: ties keep their relative order, which makes the pipeline idempotent
  let mut collator = Collator::default();
  out.sort_by(|a, b| params.sort_key.compare(&mut collator, a, b));
  out
}

fn active(filter: &Option<String>) -> Option<&str> {
  filter
    .as_deref()
    .map(str::trim)
    .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
  a.chars()
    .flat_map(char::to_lowercase)
    .eq(b.chars().flat_map(char::to_lowercase))
}

/// Unicode collation (CLDR root): accents and case only decide between
/// otherwise equal strings. Exact order breaks any remaining tie.
fn compare_text(collator: &mut Collator, a: &str, b: &str) -> Ordering {
  collator.collate(a, b).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, Clone, PartialEq)]
  struct Item {
    title: &'static str,
    year: Option<i32>,
    rating: Option<f64>,
    author: Option<&'static str>,
    tags: Vec<String>,
    status: Option<&'static str>,
  }

  impl Item {
    fn new(title: &'static str) -> Self {
      Self {
        title,
        year: None,
        rating: None,
        author: None,
        tags: Vec::new(),
        status: None,
      }
    }

    fn tagged(mut self, tags: &[&str]) -> Self {
      self.tags = tags.iter().map(|t| t.to_string()).collect();
      self
    }
  }

  impl Listable for Item {
    fn title(&self) -> &str {
      self.title
    }
    fn year(&self) -> Option<i32> {
      self.year
    }
    fn rating(&self) -> Option<f64> {
      self.rating
    }
    fn author(&self) -> Option<&str> {
      self.author
    }
    fn tags(&self) -> &[String] {
      &self.tags
    }
    fn status_label(&self) -> Option<&str> {
      self.status
    }
  }

  fn titles(items: &[Item]) -> Vec<&str> {
    items.iter().map(|i| i.title).collect()
  }

  fn sample() -> Vec<Item> {
    vec![
      Item {
        year: Some(1997),
        rating: Some(9.2),
        author: Some("Oda, Eiichiro"),
        status: Some("Publishing"),
        ..Item::new("One Piece").tagged(&["Action", "Adventure"])
      },
      Item {
        year: Some(1989),
        rating: Some(9.4),
        author: Some("Miura, Kentarou"),
        status: Some("On Hiatus"),
        ..Item::new("Berserk").tagged(&["Action", "Drama"])
      },
      Item {
        status: Some("Finished"),
        ..Item::new("akira").tagged(&["Sci-Fi"])
      },
      Item {
        year: Some(2014),
        rating: Some(8.1),
        author: Some("Fujimoto, Tatsuki"),
        status: Some("Finished"),
        ..Item::new("Chainsaw Man").tagged(&["Action"])
      },
    ]
  }

  #[test]
  fn test_genre_filter_is_case_insensitive_and_keeps_order() {
    let items = vec![
      Item::new("first").tagged(&["Action"]),
      Item::new("second").tagged(&["Romance"]),
      Item::new("third").tagged(&["Action", "Drama"]),
    ];
    let params = FilterSortParams::new()
      .genre("action")
      .sort_by(SortKey::Unordered);

    assert_eq!(titles(&apply(&items, &params)), vec!["first", "third"]);
  }

  #[test]
  fn test_status_filter() {
    let params = FilterSortParams::new()
      .status("finished")
      .sort_by(SortKey::Title);
    assert_eq!(titles(&apply(&sample(), &params)), vec!["akira", "Chainsaw Man"]);
  }

  #[test]
  fn test_all_and_empty_filters_pass_through() {
    for value in ["all", "All", "", "  "] {
      let params = FilterSortParams::new()
        .genre(value)
        .status(value)
        .sort_by(SortKey::Unordered);
      assert_eq!(apply(&sample(), &params), sample());
    }
  }

  #[test]
  fn test_title_sort_ignores_case() {
    let params = FilterSortParams::new().sort_by(SortKey::Title);
    assert_eq!(
      titles(&apply(&sample(), &params)),
      vec!["akira", "Berserk", "Chainsaw Man", "One Piece"]
    );
  }

  #[test]
  fn test_title_sort_places_accented_letters_with_their_base() {
    let items = vec![
      Item::new("Zetman"),
      Item::new("Ōoku"),
      Item::new("Éclair"),
      Item::new("Frieren"),
      Item::new("eclair"),
    ];
    let params = FilterSortParams::new().sort_by(SortKey::Title);
    assert_eq!(
      titles(&apply(&items, &params)),
      vec!["eclair", "Éclair", "Frieren", "Ōoku", "Zetman"]
    );
  }

  #[test]
  fn test_year_sort_descending_missing_is_zero() {
    let params = FilterSortParams::new().sort_by(SortKey::Year);
    assert_eq!(
      titles(&apply(&sample(), &params)),
      vec!["Chainsaw Man", "One Piece", "Berserk", "akira"]
    );
  }

  #[test]
  fn test_rating_and_popularity_sort_missing_is_zero() {
    let expected = vec!["Berserk", "One Piece", "Chainsaw Man", "akira"];
    for key in [SortKey::Rating, SortKey::Popularity] {
      let params = FilterSortParams::new().sort_by(key);
      assert_eq!(titles(&apply(&sample(), &params)), expected);
    }
  }

  #[test]
  fn test_author_sort_missing_is_empty_string() {
    let params = FilterSortParams::new().sort_by(SortKey::Author);
    assert_eq!(
      titles(&apply(&sample(), &params)),
      vec!["akira", "Chainsaw Man", "Berserk", "One Piece"]
    );
  }

  #[test]
  fn test_unknown_sort_key_keeps_input_order() {
    assert_eq!(SortKey::from("newest"), SortKey::Unordered);
    let params = FilterSortParams::new().sort_by(SortKey::from("newest"));
    assert_eq!(apply(&sample(), &params), sample());
  }

  #[test]
  fn test_pipeline_is_idempotent_and_pure() {
    let mut items = sample();
    items.push(Item {
      rating: Some(9.2),
      ..Item::new("Vagabond").tagged(&["Action"])
    });
    let original = items.clone();

    for key in SortKey::all().iter().copied().chain([SortKey::Unordered]) {
      let params = FilterSortParams::new().genre("action").sort_by(key);
      let once = apply(&items, &params);
      let twice = apply(&once, &params);
      assert_eq!(once, twice, "sort key {}", key);
    }
    assert_eq!(items, original);
  }

  #[test]
  fn test_sort_key_parse_round_trip() {
    for key in SortKey::all() {
      assert_eq!(SortKey::from(key.as_str()), *key);
    }
    assert_eq!(SortKey::from(" Rating "), SortKey::Rating);
    assert_eq!(SortKey::default(), SortKey::Popularity);
  }
}
