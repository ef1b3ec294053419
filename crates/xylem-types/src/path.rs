//! Normalized collection paths.
//!
//! A [`CollectionPath`] is an absolute, `/`-separated path with no empty
//! segments, no `.`/`..` components and no trailing slash. The namespace
//! root is `/db`. Paths double as store keys and as lock names, so
//! normalization must be total: two spellings of the same location must
//! compare equal.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Path of the namespace root collection.
pub const ROOT_PATH: &str = "/db";

/// Synthetic lock name that orders creation of the root itself. Sorts
/// before every real path and is never a valid collection path.
pub const ROOT_SENTINEL: &str = "/";

/// A normalized absolute collection path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionPath(String);

impl CollectionPath {
    /// The root collection path, `/db`.
    #[must_use]
    pub fn root() -> Self {
        Self(ROOT_PATH.to_string())
    }

    /// Normalize an arbitrary spelling into a canonical path.
    ///
    /// Relative input is resolved against the root, `.` segments drop out,
    /// `..` pops (never above the root), repeated and trailing slashes
    /// collapse. Returns `None` for segments containing interior `/` after
    /// normalization cannot occur; the only rejection is a path that
    /// escapes or does not reach the `/db` prefix.
    #[must_use]
    pub fn normalize(raw: &str) -> Option<Self> {
        let mut segments: Vec<&str> = Vec::new();
        for seg in raw.split('/') {
            match seg {
                "" | "." => {}
                ".." => {
                    segments.pop()?;
                }
                s => segments.push(s),
            }
        }
        // Relative spellings resolve under the root.
        let first = segments.first().copied();
        let path = if first == Some("db") {
            let mut p = String::new();
            for s in &segments {
                p.push('/');
                p.push_str(s);
            }
            p
        } else {
            let mut p = String::from(ROOT_PATH);
            for s in &segments {
                p.push('/');
                p.push_str(s);
            }
            p
        };
        Some(Self(path))
    }

    /// True when a string is a legal single path segment (for `new_name`
    /// arguments of move/copy).
    #[must_use]
    pub fn is_single_segment(name: &str) -> bool {
        !name.is_empty() && name != "." && name != ".." && !name.contains('/')
    }

    /// The canonical string form.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the namespace root.
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == ROOT_PATH
    }

    /// The parent path, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let idx = self.0.rfind('/')?;
        Some(Self(self.0[..idx].to_string()))
    }

    /// The last path segment.
    #[must_use]
    pub fn last_segment(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Child path `self/name`. `name` must be a single segment.
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        debug_assert!(Self::is_single_segment(name), "child name must be one segment");
        Self(format!("{}/{}", self.0, name))
    }

    /// True when `self` is a strict ancestor of `other`.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }

    /// Path segments below `/`, root first.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// All ancestor-or-self prefixes from the root down to `self`.
    ///
    /// For `/db/a/b` this yields `/db`, `/db/a`, `/db/a/b`. This is the
    /// canonical lock-acquisition order: ancestors strictly before
    /// descendants.
    #[must_use]
    pub fn prefixes(&self) -> Vec<Self> {
        let mut out = Vec::new();
        let mut acc = String::new();
        for seg in self.segments() {
            acc.push('/');
            acc.push_str(seg);
            out.push(Self(acc.clone()));
        }
        out
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalize_canonical_forms() {
        for raw in ["/db", "db", "/db/", "//db//", "/db/./", "/db/a/.."] {
            assert_eq!(CollectionPath::normalize(raw).unwrap().as_str(), "/db", "{raw}");
        }
        assert_eq!(
            CollectionPath::normalize("/db/a//b/").unwrap().as_str(),
            "/db/a/b"
        );
        // Relative spellings resolve under the root.
        assert_eq!(CollectionPath::normalize("a/b").unwrap().as_str(), "/db/a/b");
    }

    #[test]
    fn normalize_rejects_escape() {
        assert!(CollectionPath::normalize("/db/../..").is_none());
    }

    #[test]
    fn parent_and_segments() {
        let p = CollectionPath::normalize("/db/a/b").unwrap();
        assert_eq!(p.parent().unwrap().as_str(), "/db/a");
        assert_eq!(p.last_segment(), "b");
        assert!(CollectionPath::root().parent().is_none());
        assert_eq!(
            p.prefixes().iter().map(CollectionPath::as_str).collect::<Vec<_>>(),
            vec!["/db", "/db/a", "/db/a/b"]
        );
    }

    #[test]
    fn ancestry_is_segment_aware() {
        let a = CollectionPath::normalize("/db/a").unwrap();
        let ab = CollectionPath::normalize("/db/a/b").unwrap();
        let a2 = CollectionPath::normalize("/db/a2").unwrap();
        assert!(a.is_ancestor_of(&ab));
        assert!(!a.is_ancestor_of(&a2));
        assert!(!ab.is_ancestor_of(&a));
        assert!(!a.is_ancestor_of(&a));
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(segs in prop::collection::vec("[a-z0-9]{1,8}", 0..6)) {
            let raw = format!("/db/{}", segs.join("/"));
            let once = CollectionPath::normalize(&raw).unwrap();
            let twice = CollectionPath::normalize(once.as_str()).unwrap();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn child_of_parent_round_trips(segs in prop::collection::vec("[a-z0-9]{1,8}", 1..6)) {
            let raw = format!("/db/{}", segs.join("/"));
            let p = CollectionPath::normalize(&raw).unwrap();
            let parent = p.parent().unwrap();
            prop_assert_eq!(parent.child(p.last_segment()), p);
        }
    }
}
