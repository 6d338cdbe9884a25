//! Zone name normalization and validation.
//!
//! A zone is a lowercase DNS name of at least two labels, each label
//! `[0-9a-zA-Z]+` with internal hyphens, no trailing dot. This is the
//! boundary between untrusted request input and everything downstream:
//! nothing past [`normalize`] ever sees an unvalidated name.

use std::sync::LazyLock;

use regex::Regex;

static ZONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-zA-Z]+(-[0-9a-zA-Z]+)*(\.[0-9a-zA-Z]+(-[0-9a-zA-Z])*)+$").unwrap()
});

/// A zone name known to satisfy the external grammar: lowercase, no
/// trailing dot, at least two labels.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ZoneName(String);

impl ZoneName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The zone's immediate parent, if it has one beyond the TLD label.
    pub fn parent(&self) -> Option<&str> {
        self.0.split_once('.').map(|(_, parent)| parent)
    }
}

impl std::fmt::Display for ZoneName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ZoneName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lowercase, strip a trailing dot, and validate against the zone grammar.
///
/// Returns `None` for anything that doesn't parse — the caller is expected
/// to turn that into an `ERROR` (or, pre-dispatch, an `INVALID`) outcome
/// rather than propagate a parse error.
pub fn normalize(raw: &str) -> Option<ZoneName> {
    let lowered = raw.to_ascii_lowercase();
    let stripped = lowered.strip_suffix('.').unwrap_or(&lowered);
    if ZONE_RE.is_match(stripped) {
        Some(ZoneName(stripped.to_string()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_two_labels() {
        assert!(normalize("example.org").is_some());
    }

    #[test]
    fn rejects_single_label() {
        assert!(normalize("org").is_none());
    }

    #[test]
    fn strips_trailing_dot() {
        let z = normalize("example.org.").unwrap();
        assert_eq!(z.as_str(), "example.org");
    }

    #[test]
    fn lowercases_mixed_case() {
        let z = normalize("ExAmPlE.ORG").unwrap();
        assert_eq!(z.as_str(), "example.org");
    }

    #[test]
    fn accepts_internal_hyphens() {
        assert!(normalize("my-zone.example-site.org").is_some());
    }

    #[test]
    fn parent_of_subdomain() {
        let z = normalize("www.example.org").unwrap();
        assert_eq!(z.parent(), Some("example.org"));
    }

    #[test]
    fn rejects_empty() {
        assert!(normalize("").is_none());
        assert!(normalize(".").is_none());
    }
}
