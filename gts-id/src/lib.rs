//! GTS identifier grammar.
//!
//! Single source of truth for the lexical rules of GTS identifiers: segment
//! tokens, version numbers, the `~` type marker, wildcard placement and the
//! chain structure. The `gts` runtime library builds its typed wrappers on
//! top of these primitives.

use thiserror::Error;

/// The required prefix for all GTS identifiers.
pub const GTS_PREFIX: &str = "gts.";

/// Maximum accepted length of an identifier string.
pub const GTS_MAX_LENGTH: usize = 1024;

/// Kinds of lexical failure an identifier can exhibit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdErrorKind {
    /// Empty or whitespace-only input.
    EmptyInput,
    /// Prefix, case, length or token-level violation.
    MalformedIdentifier,
    /// A `*` token in a position other than the final one.
    WildcardPlacement,
    /// A single instance-shaped segment with no type chain in front of it.
    SingleSegmentInstance,
}

/// Errors from identifier validation.
#[derive(Debug, Error)]
pub enum GtsIdError {
    /// A specific segment within the identifier is invalid.
    #[error("segment #{num} @ offset {offset} '{segment}': {cause}")]
    Segment {
        /// 1-based segment index within the chain.
        num: usize,
        /// Byte offset of the segment within the full identifier.
        offset: usize,
        /// The raw segment text.
        segment: String,
        /// What is wrong with it.
        cause: String,
        /// Failure classification.
        kind: IdErrorKind,
    },

    /// The identifier as a whole is invalid.
    #[error("invalid GTS identifier '{id}': {cause}")]
    Id {
        /// The raw identifier text.
        id: String,
        /// What is wrong with it.
        cause: String,
        /// Failure classification.
        kind: IdErrorKind,
    },
}

impl GtsIdError {
    /// Failure classification of this error.
    #[must_use]
    pub fn kind(&self) -> IdErrorKind {
        match self {
            GtsIdError::Segment { kind, .. } | GtsIdError::Id { kind, .. } => *kind,
        }
    }
}

/// One parsed element of a `~`-joined chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Segment {
    /// The raw segment text, trailing `~` included.
    pub raw: String,
    /// Byte offset within the full identifier.
    pub offset: usize,
    /// First dot-token.
    pub vendor: String,
    /// Second dot-token.
    pub package: String,
    /// Third dot-token.
    pub namespace: String,
    /// Fourth dot-token.
    pub type_name: String,
    /// Major version (the `vN` token).
    pub ver_major: u32,
    /// Minor version, when the segment carries one.
    pub ver_minor: Option<u32>,
    /// Whether the segment ends with the `~` type marker.
    pub is_type: bool,
    /// Whether the segment terminates in a `*` wildcard token.
    pub is_wildcard: bool,
}

/// True when `token` matches `[a-z_][a-z0-9_]*`.
#[inline]
#[must_use]
pub fn is_name_token(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Parse a version number, rejecting leading zeros (`"0"` alone is fine).
#[inline]
#[must_use]
pub fn parse_version_number(text: &str) -> Option<u32> {
    let value = text.parse::<u32>().ok()?;
    (value.to_string() == text).then_some(value)
}

fn format_hint(num: usize) -> &'static str {
    // Segment #1 is written with the gts. prefix; later segments follow a `~`.
    if num == 1 {
        "gts.vendor.package.namespace.type.vMAJOR[.MINOR]"
    } else {
        "vendor.package.namespace.type.vMAJOR[.MINOR]"
    }
}

const TOKEN_ROLES: [&str; 4] = ["vendor", "package", "namespace", "type"];

/// Parse a single chain segment.
///
/// `num` is the 1-based position in the chain (used in diagnostics). With
/// `allow_wildcards`, a `*` is accepted as the final token; everything in
/// front of it must still be lexically valid.
///
/// # Errors
/// Returns the failure cause and its [`IdErrorKind`] classification.
#[allow(clippy::too_many_lines)]
pub fn parse_segment(
    num: usize,
    raw: &str,
    allow_wildcards: bool,
) -> Result<Segment, (String, IdErrorKind)> {
    let mut body = raw;
    let mut is_type = false;

    match body.matches('~').count() {
        0 => {}
        1 if body.ends_with('~') => {
            is_type = true;
            body = &body[..body.len() - 1];
        }
        1 => return Err(("'~' must be at the end".to_owned(), IdErrorKind::MalformedIdentifier)),
        _ => {
            return Err((
                "too many '~' characters".to_owned(),
                IdErrorKind::MalformedIdentifier,
            ));
        }
    }

    let tokens: Vec<&str> = body.split('.').collect();
    let hint = format_hint(num);

    if tokens.len() > 6 {
        return Err((
            format!("too many tokens (got {}, max 6), expected {hint}", tokens.len()),
            IdErrorKind::MalformedIdentifier,
        ));
    }

    let star_at_end = allow_wildcards && body.ends_with('*');
    if !star_at_end && tokens.len() < 5 {
        return Err((
            format!("too few tokens (got {}, min 5), expected {hint}", tokens.len()),
            IdErrorKind::MalformedIdentifier,
        ));
    }

    let mut segment = Segment {
        raw: raw.to_owned(),
        offset: 0,
        vendor: String::new(),
        package: String::new(),
        namespace: String::new(),
        type_name: String::new(),
        ver_major: 0,
        ver_minor: None,
        is_type,
        is_wildcard: false,
    };

    for (i, token) in tokens.iter().enumerate() {
        if *token == "*" {
            if !allow_wildcards {
                return Err((
                    "wildcard '*' is not allowed here".to_owned(),
                    IdErrorKind::WildcardPlacement,
                ));
            }
            if i != tokens.len() - 1 {
                return Err((
                    "wildcard '*' is only allowed as the final token".to_owned(),
                    IdErrorKind::WildcardPlacement,
                ));
            }
            segment.is_wildcard = true;
            return Ok(segment);
        }

        match i {
            0..=3 => {
                if !is_name_token(token) {
                    return Err((
                        format!(
                            "invalid {} token '{token}': must start with [a-z_] and contain only [a-z0-9_]",
                            TOKEN_ROLES[i]
                        ),
                        IdErrorKind::MalformedIdentifier,
                    ));
                }
                let slot = match i {
                    0 => &mut segment.vendor,
                    1 => &mut segment.package,
                    2 => &mut segment.namespace,
                    _ => &mut segment.type_name,
                };
                (*token).clone_into(slot);
            }
            4 => {
                let Some(digits) = token.strip_prefix('v') else {
                    // A fifth name token means the author wrote an extra name
                    // before the version.
                    if is_name_token(token) && tokens.get(5).is_some_and(|t| t.starts_with('v')) {
                        return Err((
                            format!("too many name tokens before version, expected {hint}"),
                            IdErrorKind::MalformedIdentifier,
                        ));
                    }
                    return Err((
                        "major version must start with 'v'".to_owned(),
                        IdErrorKind::MalformedIdentifier,
                    ));
                };
                segment.ver_major = parse_version_number(digits).ok_or((
                    format!("major version must be an integer without leading zeros, got '{digits}'"),
                    IdErrorKind::MalformedIdentifier,
                ))?;
            }
            _ => {
                segment.ver_minor = Some(parse_version_number(token).ok_or((
                    format!("minor version must be an integer without leading zeros, got '{token}'"),
                    IdErrorKind::MalformedIdentifier,
                ))?);
            }
        }
    }

    Ok(segment)
}

fn split_chain(remainder: &str) -> Vec<String> {
    let pieces: Vec<&str> = remainder.split('~').collect();
    let mut raw_segments = Vec::new();

    for (i, piece) in pieces.iter().enumerate() {
        if i < pieces.len() - 1 {
            raw_segments.push(format!("{piece}~"));
            // A trailing empty piece is the suffix of a type id, not a segment.
            if i == pieces.len() - 2 && pieces[i + 1].is_empty() {
                break;
            }
        } else {
            raw_segments.push((*piece).to_owned());
        }
    }

    raw_segments
}

/// Validate a full identifier and return its parsed chain.
///
/// Checks the `gts.` prefix, lowercase, hyphen, length and emptiness rules,
/// then parses each `~`-separated segment. With `allow_wildcards` a trailing
/// `*` token is accepted (wildcard pattern form). Single-segment
/// instance-shaped identifiers are rejected.
///
/// # Errors
/// Returns [`GtsIdError`] describing the first violation found.
pub fn parse_chain(id: &str, allow_wildcards: bool) -> Result<Vec<Segment>, GtsIdError> {
    let raw = id.trim();

    if raw.is_empty() {
        return Err(GtsIdError::Id {
            id: id.to_owned(),
            cause: "empty input".to_owned(),
            kind: IdErrorKind::EmptyInput,
        });
    }

    let whole_id = |cause: String, kind: IdErrorKind| GtsIdError::Id {
        id: id.to_owned(),
        cause,
        kind,
    };

    if !raw.starts_with(GTS_PREFIX) {
        return Err(whole_id(
            format!("must start with '{GTS_PREFIX}'"),
            IdErrorKind::MalformedIdentifier,
        ));
    }
    if raw != raw.to_lowercase() {
        return Err(whole_id(
            "must be lowercase".to_owned(),
            IdErrorKind::MalformedIdentifier,
        ));
    }
    if raw.contains('-') {
        return Err(whole_id(
            "must not contain '-'".to_owned(),
            IdErrorKind::MalformedIdentifier,
        ));
    }
    if raw.len() > GTS_MAX_LENGTH {
        return Err(whole_id(
            format!("too long ({} chars, max {GTS_MAX_LENGTH})", raw.len()),
            IdErrorKind::MalformedIdentifier,
        ));
    }

    if allow_wildcards {
        let stars = raw.matches('*').count();
        if stars > 1 {
            return Err(whole_id(
                "the wildcard '*' token is allowed only once".to_owned(),
                IdErrorKind::WildcardPlacement,
            ));
        }
        if stars == 1 && !raw.ends_with('*') {
            return Err(whole_id(
                "the wildcard '*' token is allowed only at the end of the pattern".to_owned(),
                IdErrorKind::WildcardPlacement,
            ));
        }
    }

    let mut segments = Vec::new();
    let mut offset = GTS_PREFIX.len();

    for (i, seg_raw) in split_chain(&raw[GTS_PREFIX.len()..]).iter().enumerate() {
        if seg_raw.is_empty() || seg_raw == "~" {
            return Err(whole_id(
                format!("segment #{} @ offset {offset} is empty", i + 1),
                IdErrorKind::MalformedIdentifier,
            ));
        }

        let mut segment = parse_segment(i + 1, seg_raw, allow_wildcards).map_err(
            |(cause, kind)| GtsIdError::Segment {
                num: i + 1,
                offset,
                segment: seg_raw.clone(),
                cause,
                kind,
            },
        )?;
        segment.offset = offset;
        offset += seg_raw.len();
        segments.push(segment);
    }

    // An instance id must carry its type chain in front of it.
    if segments.len() == 1 && !segments[0].is_type && !segments[0].is_wildcard {
        return Err(whole_id(
            "single-segment instance identifiers are prohibited; instance ids must be \
             chained with at least one type segment (e.g. 'type~instance')"
                .to_owned(),
            IdErrorKind::SingleSegmentInstance,
        ));
    }

    Ok(segments)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_name_tokens() {
        assert!(is_name_token("abc"));
        assert!(is_name_token("_"));
        assert!(is_name_token("a1_b2"));
        assert!(!is_name_token(""));
        assert!(!is_name_token("1abc"));
        assert!(!is_name_token("Abc"));
        assert!(!is_name_token("a-b"));
    }

    #[test]
    fn test_version_numbers() {
        assert_eq!(parse_version_number("0"), Some(0));
        assert_eq!(parse_version_number("42"), Some(42));
        assert_eq!(parse_version_number("01"), None);
        assert_eq!(parse_version_number("007"), None);
        assert_eq!(parse_version_number("x"), None);
    }

    #[test]
    fn test_parse_segment_type() {
        let seg = parse_segment(1, "x.core.events.event.v1~", false).unwrap();
        assert_eq!(seg.vendor, "x");
        assert_eq!(seg.package, "core");
        assert_eq!(seg.namespace, "events");
        assert_eq!(seg.type_name, "event");
        assert_eq!(seg.ver_major, 1);
        assert_eq!(seg.ver_minor, None);
        assert!(seg.is_type);
    }

    #[test]
    fn test_parse_segment_instance_shaped() {
        let seg = parse_segment(2, "a.b.c.d.v2.7", false).unwrap();
        assert_eq!(seg.ver_major, 2);
        assert_eq!(seg.ver_minor, Some(7));
        assert!(!seg.is_type);
    }

    #[test]
    fn test_parse_segment_rejects_double_tilde() {
        let (cause, _) = parse_segment(1, "x.core.events.event.v1~~", false).unwrap_err();
        assert!(cause.contains("too many '~'"), "got: {cause}");
    }

    #[test]
    fn test_parse_segment_rejects_inner_tilde() {
        let (cause, _) = parse_segment(1, "x.co~re.events.event.v1", false).unwrap_err();
        assert!(cause.contains("'~' must be at the end"), "got: {cause}");
    }

    #[test]
    fn test_parse_segment_token_counts() {
        let (cause, _) = parse_segment(1, "x.core.events.event.v1.2.3~", false).unwrap_err();
        assert!(cause.contains("too many tokens"), "got: {cause}");
        let (cause, _) = parse_segment(1, "x.core.events.v1~", false).unwrap_err();
        assert!(cause.contains("too few tokens"), "got: {cause}");
    }

    #[test]
    fn test_parse_segment_extra_name_token() {
        let (cause, _) = parse_segment(2, "x.core.ns.type.extra.v1~", false).unwrap_err();
        assert!(cause.contains("too many name tokens"), "got: {cause}");
    }

    #[test]
    fn test_parse_segment_version_errors() {
        let (cause, _) = parse_segment(1, "x.core.events.event.1~", false).unwrap_err();
        assert!(cause.contains("must start with 'v'"), "got: {cause}");
        let (cause, _) = parse_segment(1, "x.core.events.event.v01~", false).unwrap_err();
        assert!(cause.contains("leading zeros"), "got: {cause}");
        let (cause, _) = parse_segment(1, "x.core.events.event.v1.01~", false).unwrap_err();
        assert!(cause.contains("leading zeros"), "got: {cause}");
    }

    #[test]
    fn test_parse_segment_bad_name() {
        let (cause, kind) = parse_segment(1, "1bad.core.events.event.v1~", false).unwrap_err();
        assert!(cause.contains("invalid vendor token"), "got: {cause}");
        assert_eq!(kind, IdErrorKind::MalformedIdentifier);
    }

    #[test]
    fn test_parse_segment_wildcards() {
        assert!(parse_segment(1, "*", true).unwrap().is_wildcard);
        let seg = parse_segment(1, "x.core.*", true).unwrap();
        assert!(seg.is_wildcard);
        assert_eq!(seg.vendor, "x");
        assert_eq!(seg.package, "core");

        let (_, kind) = parse_segment(1, "x.*.ns.type.v1", true).unwrap_err();
        assert_eq!(kind, IdErrorKind::WildcardPlacement);
        // Without the wildcard flag the star never reaches token validation.
        assert!(parse_segment(1, "x.*", false).is_err());
    }

    #[test]
    fn test_parse_segment_wildcard_validates_prefix_tokens() {
        let (cause, _) = parse_segment(1, "1bad.*", true).unwrap_err();
        assert!(cause.contains("invalid vendor token"), "got: {cause}");
    }

    #[test]
    fn test_parse_chain_basic() {
        let segments = parse_chain("gts.x.core.events.event.v1~", false).unwrap();
        assert_eq!(segments.len(), 1);
        assert!(segments[0].is_type);
    }

    #[test]
    fn test_parse_chain_instance() {
        let segments = parse_chain("gts.x.core.events.event.v1~a.b.c.d.v1.0", false).unwrap();
        assert_eq!(segments.len(), 2);
        assert!(segments[0].is_type);
        assert!(!segments[1].is_type);
        assert_eq!(segments[1].ver_minor, Some(0));
    }

    #[test]
    fn test_parse_chain_long() {
        let segments = parse_chain("gts.a.b.c.d.v1~e.f.g.h.v2~i.j.k.l.v3~", false).unwrap();
        assert_eq!(segments.len(), 3);
        assert!(segments.iter().all(|s| s.is_type));
    }

    #[test]
    fn test_parse_chain_rejects_single_segment_instance() {
        let err = parse_chain("gts.x.core.events.event.v1.0", false).unwrap_err();
        assert_eq!(err.kind(), IdErrorKind::SingleSegmentInstance);
    }

    #[test]
    fn test_parse_chain_whole_id_rules() {
        assert_eq!(
            parse_chain("", false).unwrap_err().kind(),
            IdErrorKind::EmptyInput
        );
        assert!(parse_chain("x.core.events.event.v1~", false).is_err());
        assert!(parse_chain("gts.X.core.events.event.v1~", false).is_err());
        assert!(parse_chain("gts.x.core-events.ns.event.v1~", false).is_err());
    }

    #[test]
    fn test_parse_chain_too_long() {
        let id = format!("gts.{}", "a.b.c.d.v1~".repeat(120));
        assert!(parse_chain(&id, false).is_err());
    }

    #[test]
    fn test_parse_chain_empty_segment() {
        assert!(parse_chain("gts.x..events.event.v1~", false).is_err());
    }

    #[test]
    fn test_parse_chain_offsets() {
        let segments =
            parse_chain("gts.x.core.events.type.v1~abc.app._.custom.v1~", false).unwrap();
        assert_eq!(segments[0].offset, GTS_PREFIX.len());
        assert_eq!(segments[1].offset, GTS_PREFIX.len() + "x.core.events.type.v1~".len());
    }

    #[test]
    fn test_parse_chain_wildcard_rules() {
        assert!(parse_chain("gts.x.core.events.*", true).is_ok());
        assert!(parse_chain("gts.x.core.events.type.v1~*", true).is_ok());
        assert_eq!(
            parse_chain("gts.*.*.*.*", true).unwrap_err().kind(),
            IdErrorKind::WildcardPlacement
        );
        assert_eq!(
            parse_chain("gts.*.core.events.type.v1~", true).unwrap_err().kind(),
            IdErrorKind::WildcardPlacement
        );
        assert!(parse_chain("gts.x.core.events.*", false).is_err());
    }

    #[test]
    fn test_parse_chain_trims_whitespace() {
        let segments = parse_chain("  gts.x.core.events.event.v1~  ", false).unwrap();
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn test_parse_chain_numeric_heavy_segment() {
        let segments = parse_chain("gts.v123.p456.n789.t000.v999.888~", false).unwrap();
        assert_eq!(segments[0].ver_major, 999);
        assert_eq!(segments[0].ver_minor, Some(888));
        assert!(segments[0].is_type);
    }
}
