//! Dotted hierarchical vertex addressing.
//!
//! A [`Path`] names a vertex inside a (possibly nested) DAG: `outer.sub.inner.A`.
//! Paths are persisted verbatim in rerun contexts and trace records, so the
//! serialized form is a plain JSON array of segments.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An ordered list of name segments addressing a vertex within nested DAGs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<String>);

impl Path {
    /// Create an empty path.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Build a path from an iterator of segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parse a dotted string (`"a.b.c"`). Empty segments are dropped.
    pub fn from_dotted(s: &str) -> Self {
        Self(
            s.split('.')
                .filter(|seg| !seg.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Return a new path with `segment` appended.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Append a segment in place.
    pub fn push(&mut self, segment: impl Into<String>) {
        self.0.push(segment.into());
    }

    /// The first segment, if any.
    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// The path with its first segment removed. Empty paths stay empty.
    pub fn descend(&self) -> Self {
        if self.0.is_empty() {
            Self::new()
        } else {
            Self(self.0[1..].to_vec())
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// The dot-joined form used as a store key.
    pub fn dotted(&self) -> String {
        self.0.join(".")
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dotted())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
