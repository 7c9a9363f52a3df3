use std::fmt::{self, Write};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A single primitive segment of a [`QueryKey`].
///
/// Segments are type-tagged when canonicalized, so `Int(1)` and `Str("1")`
/// never produce the same identity.
#[derive(Debug, Clone)]
pub enum KeySegment {
  Null,
  Bool(bool),
  Int(i128),
  Float(f64),
  Str(String),
  List(Vec<KeySegment>),
}

impl KeySegment {
  /// Returns the canonical, type-tagged string form of this segment.
  pub fn canonical(&self) -> String {
    let mut out = String::new();
    self.write_canonical(&mut out);
    out
  }

  fn write_canonical(&self, out: &mut String) {
    match self {
      KeySegment::Null => out.push_str("null"),
      KeySegment::Bool(true) => out.push_str("true"),
      KeySegment::Bool(false) => out.push_str("false"),
      KeySegment::Int(value) => {
        let _ = write!(out, "i{}", value);
      }
      KeySegment::Float(value) => {
        let _ = write!(out, "f{:?}", value);
      }
      KeySegment::Str(value) => {
        out.push('"');
        for c in value.chars() {
          match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
          }
        }
        out.push('"');
      }
      KeySegment::List(items) => {
        out.push('[');
        for (i, item) in items.iter().enumerate() {
          if i > 0 {
            out.push(',');
          }
          item.write_canonical(out);
        }
        out.push(']');
      }
    }
  }
}

macro_rules! impl_int_segment {
  ($($ty:ty),*) => {
    $(
      impl From<$ty> for KeySegment {
        fn from(value: $ty) -> Self {
          KeySegment::Int(value as i128)
        }
      }
    )*
  };
}

impl_int_segment!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, usize);

impl From<bool> for KeySegment {
  fn from(value: bool) -> Self {
    KeySegment::Bool(value)
  }
}

impl From<f32> for KeySegment {
  fn from(value: f32) -> Self {
    KeySegment::Float(value as f64)
  }
}

impl From<f64> for KeySegment {
  fn from(value: f64) -> Self {
    KeySegment::Float(value)
  }
}

impl From<&str> for KeySegment {
  fn from(value: &str) -> Self {
    KeySegment::Str(value.to_owned())
  }
}

impl From<String> for KeySegment {
  fn from(value: String) -> Self {
    KeySegment::Str(value)
  }
}

impl<T: Into<KeySegment>> From<Option<T>> for KeySegment {
  fn from(value: Option<T>) -> Self {
    value.map_or(KeySegment::Null, Into::into)
  }
}

impl<T: Into<KeySegment>> From<Vec<T>> for KeySegment {
  fn from(value: Vec<T>) -> Self {
    KeySegment::List(value.into_iter().map(Into::into).collect())
  }
}

/// A structured, hierarchical identifier for a cacheable query.
///
/// Equality and hashing use the canonical identity only. The key is cheap to
/// clone; all internal buffers are shared.
#[derive(Clone)]
pub struct QueryKey {
  segments: Arc<[KeySegment]>,
  parts: Arc<[Box<str>]>,
  identity: Arc<str>,
}

impl QueryKey {
  /// Builds a key from an ordered list of segments.
  pub fn from_segments(segments: Vec<KeySegment>) -> Self {
    let parts: Vec<Box<str>> = segments
      .iter()
      .map(|segment| segment.canonical().into_boxed_str())
      .collect();
    let identity = canonicalize_parts(&parts);

    Self {
      segments: segments.into(),
      parts: parts.into(),
      identity: identity.into(),
    }
  }

  /// Returns a new key with `segment` appended.
  pub fn child(&self, segment: impl Into<KeySegment>) -> Self {
    let mut segments = self.segments.to_vec();
    segments.push(segment.into());
    Self::from_segments(segments)
  }

  /// The canonical identity used for lookup.
  #[inline]
  pub fn identity(&self) -> &str {
    &self.identity
  }

  #[inline]
  pub fn segments(&self) -> &[KeySegment] {
    &self.segments
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.segments.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.segments.is_empty()
  }

  /// Returns `true` if this key's segments are a prefix of `other`'s.
  ///
  /// Every key is a prefix of itself, and the empty key is a prefix of all keys.
  pub fn is_prefix_of(&self, other: &QueryKey) -> bool {
    self.parts.len() <= other.parts.len()
      && self
        .parts
        .iter()
        .zip(other.parts.iter())
        .all(|(a, b)| a == b)
  }
}

fn canonicalize_parts(parts: &[Box<str>]) -> String {
  let mut identity = String::with_capacity(parts.iter().map(|p| p.len() + 1).sum::<usize>() + 2);
  identity.push('[');
  for (i, part) in parts.iter().enumerate() {
    if i > 0 {
      identity.push(',');
    }
    identity.push_str(part);
  }
  identity.push(']');
  identity
}

/// Produces the canonical identity for a list of segments.
pub fn canonicalize(segments: &[KeySegment]) -> String {
  KeySegment::List(segments.to_vec()).canonical()
}

/// Returns `true` if `prefix` is a hierarchical ancestor of (or equal to) `key`.
#[inline]
pub fn is_prefix_of(prefix: &QueryKey, key: &QueryKey) -> bool {
  prefix.is_prefix_of(key)
}

impl PartialEq for QueryKey {
  fn eq(&self, other: &Self) -> bool {
    self.identity == other.identity
  }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.identity.hash(state);
  }
}

impl fmt::Debug for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.identity)
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.identity)
  }
}

impl From<Vec<KeySegment>> for QueryKey {
  fn from(segments: Vec<KeySegment>) -> Self {
    QueryKey::from_segments(segments)
  }
}

impl From<&str> for QueryKey {
  fn from(segment: &str) -> Self {
    QueryKey::from_segments(vec![segment.into()])
  }
}

/// Builds a [`QueryKey`] from a list of heterogeneous segments.
///
/// ```
/// use fibre_query::query_key;
///
/// let detail = query_key!["user", 1];
/// let all = query_key!["user"];
/// assert!(all.is_prefix_of(&detail));
/// assert_ne!(detail, query_key!["user", "1"]);
/// ```
#[macro_export]
macro_rules! query_key {
  () => {
    $crate::QueryKey::from_segments(::std::vec::Vec::new())
  };
  ($($segment:expr),+ $(,)?) => {
    $crate::QueryKey::from_segments(::std::vec![$($crate::KeySegment::from($segment)),+])
  };
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn canonical_form_is_type_tagged() {
    let key = query_key!["user", 1, 2.5, true, None::<i32>];
    assert_eq!(key.identity(), r#"["user",i1,f2.5,true,null]"#);
  }

  #[test]
  fn numbers_and_strings_never_collide() {
    assert_ne!(query_key!["user", 1], query_key!["user", "1"]);
    assert_ne!(query_key![1], query_key![1.0]);
    assert_ne!(query_key![true], query_key!["true"]);
  }

  #[test]
  fn order_matters() {
    assert_ne!(query_key!["a", "b"], query_key!["b", "a"]);
  }

  #[test]
  fn escaping_prevents_separator_injection() {
    let joined = query_key![r#"a","b"#];
    let split = query_key!["a", "b"];
    assert_ne!(joined, split);
    assert_ne!(query_key![r"a\"], query_key![r"a\\"]);
  }

  #[test]
  fn nested_lists_are_distinct_from_flat_keys() {
    let nested = query_key!["users", vec![1, 2]];
    let flat = query_key!["users", 1, 2];
    assert_ne!(nested, flat);
    assert_eq!(nested.identity(), r#"["users",[i1,i2]]"#);
  }

  #[test]
  fn integer_widths_share_identity() {
    assert_eq!(query_key!["user", 7u8], query_key!["user", 7i64]);
  }

  #[test]
  fn prefix_matching_is_segment_wise() {
    let users = query_key!["users"];
    let detail = query_key!["users", "detail", 7];
    let other = query_key!["users2"];

    assert!(users.is_prefix_of(&detail));
    assert!(users.is_prefix_of(&users));
    assert!(!detail.is_prefix_of(&users));
    assert!(!users.is_prefix_of(&other));
    assert!(query_key![].is_prefix_of(&detail));
  }

  #[test]
  fn child_extends_the_key() {
    let user = query_key!["user"].child(3);
    assert_eq!(user, query_key!["user", 3]);
    assert_eq!(canonicalize(user.segments()), user.identity());
  }
}
