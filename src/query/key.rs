//! Structured query keys.

use std::borrow::Cow;
use std::fmt;

/// One scalar parameter of a query key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
  /// Absent optional parameter (e.g. no category filter)
  Null,
  Bool(bool),
  Int(i64),
  Str(String),
}

impl fmt::Display for KeyPart {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      KeyPart::Null => f.write_str("null"),
      KeyPart::Bool(b) => write!(f, "{}", b),
      KeyPart::Int(i) => write!(f, "{}", i),
      KeyPart::Str(s) => write!(f, "{:?}", s),
    }
  }
}

impl From<bool> for KeyPart {
  fn from(v: bool) -> Self {
    KeyPart::Bool(v)
  }
}

impl From<i64> for KeyPart {
  fn from(v: i64) -> Self {
    KeyPart::Int(v)
  }
}

impl From<u32> for KeyPart {
  fn from(v: u32) -> Self {
    KeyPart::Int(i64::from(v))
  }
}

impl From<u64> for KeyPart {
  fn from(v: u64) -> Self {
    // Resource ids never get near i64::MAX; saturate rather than wrap.
    KeyPart::Int(i64::try_from(v).unwrap_or(i64::MAX))
  }
}

impl From<&str> for KeyPart {
  fn from(v: &str) -> Self {
    KeyPart::Str(v.to_string())
  }
}

impl From<String> for KeyPart {
  fn from(v: String) -> Self {
    KeyPart::Str(v)
  }
}

impl<T: Into<KeyPart>> From<Option<T>> for KeyPart {
  fn from(v: Option<T>) -> Self {
    v.map(Into::into).unwrap_or(KeyPart::Null)
  }
}

/// Composite cache index: a resource name plus ordered scalar parameters.
///
/// Two keys are equal iff the resource and every parameter are equal by
/// value. A key with fewer parameters also acts as a prefix pattern for
/// invalidation (see [`QueryKey::matches`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
  resource: Cow<'static, str>,
  params: Vec<KeyPart>,
}

impl QueryKey {
  /// Key for a resource with no parameters.
  pub fn new(resource: impl Into<Cow<'static, str>>) -> Self {
    Self {
      resource: resource.into(),
      params: Vec::new(),
    }
  }

  /// Append a parameter.
  pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
    self.params.push(part.into());
    self
  }

  pub fn resource(&self) -> &str {
    &self.resource
  }

  pub fn params(&self) -> &[KeyPart] {
    &self.params
  }

  /// Whether `self` falls under `pattern`: same resource, and the pattern's
  /// parameters are a leading slice of this key's parameters.
  pub fn matches(&self, pattern: &QueryKey) -> bool {
    self.resource == pattern.resource && self.params.starts_with(&pattern.params)
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{}", self.resource)?;
    for p in &self.params {
      write!(f, ", {}", p)?;
    }
    f.write_str("]")
  }
}
