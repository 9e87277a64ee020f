//! Canonical absolute path model.
//!
//! [`VfsPath`] is an ordered sequence of non-empty segments; `/` is the root
//! (empty sequence). Construction from a string normalizes away empty
//! segments, `.` and `..`, so two paths compare equal iff their segments do.

use std::fmt;
use std::hash::Hash;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Canonical absolute path inside a virtual filesystem.
///
/// Invariants: no segment is empty, `.` or `..`, and no segment contains
/// `/` or `\`. Paths are always absolute; there is no notion of a current
/// directory.
///
/// # Example
///
/// ```rust
/// use vfskit::VfsPath;
///
/// let path = VfsPath::parse("/a//b/./c/../d");
/// assert_eq!(path.to_string(), "/a/b/d");
/// assert_eq!(path.filename(), Some("d"));
/// assert_eq!(path.parent().unwrap().to_string(), "/a/b");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VfsPath {
    segments: Vec<String>,
}

impl VfsPath {
    /// The root path `/`.
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parse a string into a canonical path.
    ///
    /// Splits on `/` (backslashes count as separators so no segment can
    /// contain one), drops empty and `.` parts, and resolves `..` by
    /// popping the previous segment, never escaping the root.
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.replace('\\', "/");
        let mut segments: Vec<String> = Vec::new();
        for part in normalized.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other.to_string()),
            }
        }
        Self { segments }
    }

    /// Build a path directly from segments, skipping any that are empty.
    pub fn from_segments<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments = parts
            .into_iter()
            .map(Into::into)
            .filter(|s| !s.is_empty())
            .collect();
        Self { segments }
    }

    /// Whether this is the root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// The last segment, absent at the root.
    pub fn filename(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The parent path, absent at the root.
    pub fn parent(&self) -> Option<VfsPath> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Path segments in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments (0 at the root).
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Append a segment (or several, when the argument contains `/`).
    ///
    /// The argument is normalized like [`parse`](Self::parse) input.
    pub fn join(&self, segment: &str) -> VfsPath {
        let mut out = self.clone();
        let tail = VfsPath::parse(segment);
        out.segments.extend(tail.segments);
        out
    }

    /// Append every segment of `other`.
    pub fn join_path(&self, other: &VfsPath) -> VfsPath {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    /// Whether `self` is a (non-strict) prefix of `other`.
    pub fn is_prefix_of(&self, other: &VfsPath) -> bool {
        other.segments.len() >= self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// Strip `prefix` from the front of this path.
    ///
    /// Returns `None` when `prefix` is not actually a prefix.
    pub fn strip_prefix(&self, prefix: &VfsPath) -> Option<VfsPath> {
        if !prefix.is_prefix_of(self) {
            return None;
        }
        Some(Self {
            segments: self.segments[prefix.segments.len()..].to_vec(),
        })
    }

    /// Relative depth of `self` under `prefix`, when `prefix` applies.
    ///
    /// `/a/b` is at depth 1 under `/a` and depth 2 under `/`.
    pub fn depth_under(&self, prefix: &VfsPath) -> Option<usize> {
        self.strip_prefix(prefix).map(|rest| rest.depth())
    }
}

impl Default for VfsPath {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl From<&str> for VfsPath {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl Serialize for VfsPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VfsPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Err(D::Error::custom("empty path"));
        }
        Ok(VfsPath::parse(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes() {
        assert_eq!(VfsPath::parse("/a//b/./c").to_string(), "/a/b/c");
        assert_eq!(VfsPath::parse("a/b").to_string(), "/a/b");
        assert_eq!(VfsPath::parse("").to_string(), "/");
        assert_eq!(VfsPath::parse("/").to_string(), "/");
        assert_eq!(VfsPath::parse("///").to_string(), "/");
    }

    #[test]
    fn parse_resolves_parent_refs() {
        assert_eq!(VfsPath::parse("/a/b/../c").to_string(), "/a/c");
        assert_eq!(VfsPath::parse("/../../a").to_string(), "/a");
        assert_eq!(VfsPath::parse("/a/..").to_string(), "/");
    }

    #[test]
    fn root_has_no_filename_or_parent() {
        let root = VfsPath::root();
        assert!(root.is_root());
        assert_eq!(root.filename(), None);
        assert_eq!(root.parent(), None);
    }

    #[test]
    fn filename_and_parent() {
        let path = VfsPath::parse("/a/b/c");
        assert_eq!(path.filename(), Some("c"));
        assert_eq!(path.parent().unwrap().to_string(), "/a/b");
        assert_eq!(
            path.parent().unwrap().parent().unwrap().to_string(),
            "/a"
        );
    }

    #[test]
    fn join_normalizes_its_argument() {
        let base = VfsPath::parse("/a");
        assert_eq!(base.join("b").to_string(), "/a/b");
        assert_eq!(base.join("b/c").to_string(), "/a/b/c");
        assert_eq!(base.join("..").to_string(), "/a");
    }

    #[test]
    fn prefix_relations() {
        let root = VfsPath::root();
        let a = VfsPath::parse("/a");
        let ab = VfsPath::parse("/a/b");
        let ax = VfsPath::parse("/ax");

        assert!(root.is_prefix_of(&ab));
        assert!(a.is_prefix_of(&ab));
        assert!(a.is_prefix_of(&a));
        assert!(!a.is_prefix_of(&ax));
        assert!(!ab.is_prefix_of(&a));

        assert_eq!(ab.strip_prefix(&a).unwrap().to_string(), "/b");
        assert_eq!(ab.strip_prefix(&root).unwrap().to_string(), "/a/b");
        assert!(a.strip_prefix(&ab).is_none());
        assert_eq!(ab.depth_under(&a), Some(1));
        assert_eq!(ab.depth_under(&root), Some(2));
    }

    #[test]
    fn equality_is_segment_wise() {
        assert_eq!(VfsPath::parse("/a/b/"), VfsPath::parse("a/b"));
        assert_ne!(VfsPath::parse("/a/b"), VfsPath::parse("/a/c"));
    }

    #[test]
    fn serde_round_trip() {
        let path = VfsPath::parse("/a/b");
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"/a/b\"");
        let back: VfsPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }
}
