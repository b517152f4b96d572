use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;
use uuid::Uuid;

pub use gts_id::{GTS_PREFIX, IdErrorKind, Segment};

/// URI-compatible prefix for GTS identifiers in JSON Schema `$id` and `$ref`
/// fields (e.g. `gts://gts.x.y...`). Only used for schema documents, never
/// inside GTS ID parsing itself.
pub const GTS_URI_PREFIX: &str = "gts://";

static GTS_NS: LazyLock<Uuid> = LazyLock::new(|| Uuid::new_v5(&Uuid::NAMESPACE_URL, b"gts"));

#[derive(Debug, Error)]
pub enum GtsError {
    #[error("Invalid GTS identifier: {id}: {cause}")]
    InvalidId { id: String, cause: String },

    #[error("Invalid GTS wildcard pattern: {pattern}: {cause}")]
    InvalidWildcard { pattern: String, cause: String },
}

/// A validated GTS identifier.
///
/// Identifiers follow `gts.<vendor>.<package>.<namespace>.<type>.<version>[~]`
/// with `~`-joined chains for derived types and instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GtsID {
    pub id: String,
    pub segments: Vec<Segment>,
}

impl GtsID {
    /// Parse and validate a GTS identifier string.
    ///
    /// # Errors
    /// Returns `GtsError::InvalidId` when the string is not a well-formed
    /// GTS identifier.
    pub fn new(id: &str) -> Result<Self, GtsError> {
        let segments = gts_id::parse_chain(id, false).map_err(|e| GtsError::InvalidId {
            id: id.to_owned(),
            cause: e.to_string(),
        })?;

        Ok(GtsID {
            id: id.trim().to_owned(),
            segments,
        })
    }

    /// Whether this identifier names a type (schema).
    #[must_use]
    pub fn is_type(&self) -> bool {
        self.id.ends_with('~')
    }

    /// Whether a string is a well-formed GTS identifier.
    #[must_use]
    pub fn is_valid(s: &str) -> bool {
        s.starts_with(GTS_PREFIX) && Self::new(s).is_ok()
    }

    /// The chain prefix naming this entity's parent type: every segment but
    /// the last, trailing `~` included. `None` for single-segment ids.
    #[must_use]
    pub fn type_prefix(&self) -> Option<String> {
        if self.segments.len() < 2 {
            return None;
        }
        match self.id.rfind('~') {
            // For a type id the final '~' is its own; the parent ends at the
            // previous one.
            Some(_) if self.is_type() => {
                let body = &self.id[..self.id.len() - 1];
                body.rfind('~').map(|pos| body[..=pos].to_owned())
            }
            Some(pos) => Some(self.id[..=pos].to_owned()),
            None => None,
        }
    }

    /// Deterministic UUIDv5 of the canonical identifier under the fixed
    /// `gts` namespace.
    #[must_use]
    pub fn to_uuid(&self) -> Uuid {
        Uuid::new_v5(&GTS_NS, self.id.as_bytes())
    }

    /// Split `<gts-id>@<dotted.path>` into the id and the optional path.
    ///
    /// # Errors
    /// Returns `GtsError::InvalidId` when a `@` is present but the path
    /// behind it is empty.
    pub fn split_at_path(gts_with_path: &str) -> Result<(String, Option<String>), GtsError> {
        let Some((id, path)) = gts_with_path.split_once('@') else {
            return Ok((gts_with_path.to_owned(), None));
        };

        if path.is_empty() {
            return Err(GtsError::InvalidId {
                id: gts_with_path.to_owned(),
                cause: "Attribute path cannot be empty".to_owned(),
            });
        }

        Ok((id.to_owned(), Some(path.to_owned())))
    }

    /// Check this identifier against a wildcard pattern.
    ///
    /// Exact patterns (no `*`) require the same number of segments; a pattern
    /// segment without a minor version matches any minor of the same major.
    /// A trailing bare `*` segment requires at least one more segment in the
    /// candidate; a partial wildcard (`prefix.*`) matches any candidate whose
    /// leading fields agree, including longer chains.
    #[must_use]
    pub fn wildcard_match(&self, pattern: &GtsWildcard) -> bool {
        let p = &pattern.segments;
        let c = &self.segments;

        if !pattern.id.contains('*') {
            return p.len() == c.len()
                && p.iter().zip(c.iter()).all(|(ps, cs)| segment_eq(ps, cs));
        }

        if p.len() > c.len() {
            return false;
        }

        let (last, exact) = p.split_last().map_or((None, &p[..]), |(l, e)| (Some(l), e));
        for (ps, cs) in exact.iter().zip(c.iter()) {
            if !segment_eq(ps, cs) {
                return false;
            }
        }

        match last {
            // A bare `*` segment stands for one or more further segments,
            // which p.len() <= c.len() already guarantees.
            Some(l) if l.raw == "*" => true,
            Some(l) => wildcard_segment_matches(l, &c[p.len() - 1]),
            None => false,
        }
    }
}

/// Exact segment comparison with minor-version flexibility on the pattern
/// side: a pattern segment without a minor matches any candidate minor.
fn segment_eq(pattern: &Segment, candidate: &Segment) -> bool {
    pattern.vendor == candidate.vendor
        && pattern.package == candidate.package
        && pattern.namespace == candidate.namespace
        && pattern.type_name == candidate.type_name
        && pattern.ver_major == candidate.ver_major
        && pattern
            .ver_minor
            .is_none_or(|minor| candidate.ver_minor == Some(minor))
        && pattern.is_type == candidate.is_type
}

/// Partial-wildcard segment comparison: only the tokens written before the
/// `*` constrain the candidate; everything after is free, as are any further
/// chain segments.
fn wildcard_segment_matches(pattern: &Segment, candidate: &Segment) -> bool {
    // Number of concrete tokens in front of the star.
    let filled = pattern.raw.trim_end_matches('~').split('.').count() - 1;

    let fields = [
        pattern.vendor == candidate.vendor,
        pattern.package == candidate.package,
        pattern.namespace == candidate.namespace,
        pattern.type_name == candidate.type_name,
        pattern.ver_major == candidate.ver_major,
        pattern.ver_minor == candidate.ver_minor,
    ];

    fields.iter().take(filled).all(|ok| *ok)
}

impl fmt::Display for GtsID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl FromStr for GtsID {
    type Err = GtsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for GtsID {
    fn as_ref(&self) -> &str {
        &self.id
    }
}

/// A validated GTS wildcard pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct GtsWildcard {
    pub id: String,
    pub segments: Vec<Segment>,
}

impl GtsWildcard {
    /// Parse a wildcard pattern (a GTS id with an optional trailing `*`).
    ///
    /// # Errors
    /// Returns `GtsError::InvalidWildcard` when the pattern is malformed or
    /// the `*` is misplaced.
    pub fn new(pattern: &str) -> Result<Self, GtsError> {
        let segments =
            gts_id::parse_chain(pattern, true).map_err(|e| GtsError::InvalidWildcard {
                pattern: pattern.to_owned(),
                cause: e.to_string(),
            })?;

        Ok(GtsWildcard {
            id: pattern.trim().to_owned(),
            segments,
        })
    }
}

impl fmt::Display for GtsWildcard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl FromStr for GtsWildcard {
    type Err = GtsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for GtsWildcard {
    fn as_ref(&self) -> &str {
        &self.id
    }
}

/// Strip the `gts://` URI prefix when present.
#[must_use]
pub fn strip_uri_prefix(value: &str) -> &str {
    value.strip_prefix(GTS_URI_PREFIX).unwrap_or(value)
}
