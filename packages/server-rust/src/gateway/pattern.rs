//! Route pattern compiler and matcher.
//!
//! A pattern such as `/comics/{id}` compiles to an ordered list of segment
//! matchers. A concrete path matches when it has the same number of
//! segments and every literal segment is equal; capture segments bind the
//! path segment under their name.

use std::fmt;

/// One compiled segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Capture(String),
}

/// Why a pattern failed to compile.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("pattern must start with '/'")]
    MissingLeadingSlash,
    #[error("empty segment at position {0}")]
    EmptySegment(usize),
    #[error("invalid capture segment {0:?}")]
    InvalidCapture(String),
    #[error("capture {0:?} declared twice")]
    DuplicateCapture(String),
}

/// A compiled route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl RoutePattern {
    /// Compiles `raw`.
    ///
    /// # Errors
    ///
    /// Returns `PatternError` for a missing leading `/`, an empty segment,
    /// a malformed capture, or a capture name used twice.
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let rest = raw.strip_prefix('/').ok_or(PatternError::MissingLeadingSlash)?;
        let mut segments = Vec::new();
        if !rest.is_empty() {
            for (pos, part) in rest.split('/').enumerate() {
                if part.is_empty() {
                    return Err(PatternError::EmptySegment(pos));
                }
                let segment = if let Some(inner) =
                    part.strip_prefix('{').and_then(|p| p.strip_suffix('}'))
                {
                    if !is_identifier(inner) {
                        return Err(PatternError::InvalidCapture(part.to_string()));
                    }
                    if segments
                        .iter()
                        .any(|s| matches!(s, Segment::Capture(n) if n == inner))
                    {
                        return Err(PatternError::DuplicateCapture(inner.to_string()));
                    }
                    Segment::Capture(inner.to_string())
                } else if part.contains(['{', '}']) {
                    return Err(PatternError::InvalidCapture(part.to_string()));
                } else {
                    Segment::Literal(part.to_string())
                };
                segments.push(segment);
            }
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Names of the capture segments, in order.
    pub fn captures(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Capture(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Matches already-split path segments, binding captures.
    #[must_use]
    pub fn match_segments(&self, path: &[&str]) -> Option<PathParams> {
        if path.len() != self.segments.len() {
            return None;
        }
        let mut params = PathParams::default();
        for (segment, value) in self.segments.iter().zip(path) {
            match segment {
                Segment::Literal(lit) if lit == value => {}
                Segment::Literal(_) => return None,
                Segment::Capture(name) => params.0.push((name.clone(), (*value).to_string())),
            }
        }
        Some(params)
    }

    /// Matches a concrete request path. See [`split_path`].
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<PathParams> {
        self.match_segments(&split_path(path))
    }

    /// Whether some concrete path would match both patterns.
    ///
    /// Two patterns overlap when they have the same length and no position
    /// holds two different literals.
    #[must_use]
    pub fn overlaps(&self, other: &RoutePattern) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|pair| match pair {
                    (Segment::Literal(a), Segment::Literal(b)) => a == b,
                    _ => true,
                })
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Captured path parameters, in pattern order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(Vec<(String, String)>);

impl PathParams {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Splits a request path into segments.
///
/// The query string and a single trailing `/` are dropped. `/` and the
/// empty path both give no segments.
#[must_use]
pub fn split_path(path: &str) -> Vec<&str> {
    let path = path.split_once('?').map_or(path, |(p, _)| p);
    let path = path.strip_prefix('/').unwrap_or(path);
    let path = path.strip_suffix('/').unwrap_or(path);
    if path.is_empty() {
        Vec::new()
    } else {
        path.split('/').collect()
    }
}
