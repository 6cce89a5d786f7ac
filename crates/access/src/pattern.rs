//! Ant-style request path patterns
//!
//! - `**` matches zero or more whole path segments
//! - `*` alone matches exactly one segment
//! - within a segment, each `*` matches any run of characters, so
//!   `report-*`, `*.pdf`, `*draft*` and `img*-v*.png` all work
//! - anything else is a literal segment
//!
//! Empty segments are ignored, so `/a//b/` and `/a/b` are the same path.

use serde::Deserialize;

/// One compiled pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    AnyDepth,
    Exact(String),
    /// Literal pieces between the stars; always at least two.
    Glob(Vec<String>),
}

impl Segment {
    fn new(s: &str) -> Self {
        if s == "**" {
            Self::AnyDepth
        } else if s.contains('*') {
            Self::Glob(s.split('*').map(String::from).collect())
        } else {
            Self::Exact(s.to_string())
        }
    }

    fn matches(&self, segment: &str) -> bool {
        match self {
            Self::AnyDepth => true,
            Self::Exact(e) => segment == e,
            Self::Glob(pieces) => glob_matches(pieces, segment),
        }
    }
}

/// Leftmost-first matching is exact for patterns whose only wildcard is `*`.
fn glob_matches(pieces: &[String], segment: &str) -> bool {
    let Some((first, rest)) = pieces.split_first() else {
        return segment.is_empty();
    };
    let Some((last, middle)) = rest.split_last() else {
        return segment == first;
    };
    let Some(mut remaining) = segment.strip_prefix(first.as_str()) else {
        return false;
    };
    for piece in middle {
        match remaining.find(piece.as_str()) {
            Some(at) => remaining = &remaining[at + piece.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last.as_str())
}

/// A compiled path pattern such as `/public/*` or `/api/**`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            raw: pattern.to_string(),
            segments: split(pattern).map(Segment::new).collect(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `path` (without query string) matches this pattern.
    pub fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = split(path).collect();
        match_segments(&self.segments, &parts)
    }
}

impl From<String> for PathPattern {
    fn from(pattern: String) -> Self {
        PathPattern::new(&pattern)
    }
}

impl From<&str> for PathPattern {
    fn from(pattern: &str) -> Self {
        PathPattern::new(pattern)
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// `matched[i][j]` records whether `pattern[i..]` matches `path[j..]`,
/// filled from the end so each pair is decided once.
fn match_segments(pattern: &[Segment], path: &[&str]) -> bool {
    let (rows, cols) = (pattern.len(), path.len());
    let mut matched = vec![vec![false; cols + 1]; rows + 1];
    matched[rows][cols] = true;

    for i in (0..rows).rev() {
        for j in (0..=cols).rev() {
            matched[i][j] = match &pattern[i] {
                Segment::AnyDepth => matched[i + 1][j] || (j < cols && matched[i][j + 1]),
                segment => j < cols && segment.matches(path[j]) && matched[i + 1][j + 1],
            };
        }
    }
    matched[0][0]
}
