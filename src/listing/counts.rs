//! Per-status counts for the user's collection.

use std::fmt;
use std::str::FromStr;

use super::filter::{apply, FilterSortParams, SortKey};
use crate::api::types::{CollectionItem, CollectionStatus, UnknownStatus};

/// Collection tab: everything, or one reading status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
  #[default]
  All,
  Only(CollectionStatus),
}

impl StatusFilter {
  pub fn matches(&self, item: &CollectionItem) -> bool {
    match self {
      StatusFilter::All => true,
      StatusFilter::Only(status) => item.status == *status,
    }
  }

  /// Filter and sort `items` for this tab.
  pub fn view(&self, items: &[CollectionItem], sort_key: SortKey) -> Vec<CollectionItem> {
    let params = match self {
      StatusFilter::All => FilterSortParams::new(),
      StatusFilter::Only(status) => FilterSortParams::new().status(status.as_str()),
    };
    apply(items, &params.sort_by(sort_key))
  }
}

impl FromStr for StatusFilter {
  type Err = UnknownStatus;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if s.trim().eq_ignore_ascii_case("all") {
      Ok(StatusFilter::All)
    } else {
      s.parse().map(StatusFilter::Only)
    }
  }
}

impl fmt::Display for StatusFilter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StatusFilter::All => f.write_str("all"),
      StatusFilter::Only(status) => write!(f, "{}", status),
    }
  }
}

/// Number of items per tab. `all` always equals the sum of the three
/// statuses, since every item carries exactly one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
  pub reading: usize,
  pub completed: usize,
  pub planned: usize,
}

impl StatusCounts {
  pub fn from_items(items: &[CollectionItem]) -> Self {
    items.iter().fold(Self::default(), |mut counts, item| {
      match item.status {
        CollectionStatus::Reading => counts.reading += 1,
        CollectionStatus::Completed => counts.completed += 1,
        CollectionStatus::Planned => counts.planned += 1,
      }
      counts
    })
  }

  pub fn all(&self) -> usize {
    self.reading + self.completed + self.planned
  }

  pub fn counts_for(&self, filter: StatusFilter) -> usize {
    match filter {
      StatusFilter::All => self.all(),
      StatusFilter::Only(CollectionStatus::Reading) => self.reading,
      StatusFilter::Only(CollectionStatus::Completed) => self.completed,
      StatusFilter::Only(CollectionStatus::Planned) => self.planned,
    }
  }
}
