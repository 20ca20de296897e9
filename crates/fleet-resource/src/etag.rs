//! Entity tags for optimistic concurrency and conditional reads.
//!
//! A tag is a SHA-256 over the identity and the last-modification marker.
//! Both fields are length-prefixed before hashing so that no two distinct
//! (identity, marker) pairs can feed the hash the same bytes.

use sha2::{Digest, Sha256};
use std::fmt;

/// `Expires` value for tagged responses: a date long past, so only the tag
/// drives caching.
pub const EXPIRES_IN_THE_PAST: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// `Cache-Control` and `Pragma` value for tagged responses.
pub const NO_CACHE: &str = "no-cache";

/// Strong entity tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ETag(String);

impl ETag {
    /// Derive the tag for `identity` at modification marker `marker`.
    pub fn compute(identity: &str, marker: i64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((identity.len() as u64).to_be_bytes());
        hasher.update(identity.as_bytes());
        hasher.update(8u64.to_be_bytes());
        hasher.update(marker.to_be_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// The opaque tag without quotes.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The tag as sent in an `ETag` header: a quoted string.
    pub fn header_value(&self) -> String {
        format!("\"{}\"", self.0)
    }

    /// Whether a client-supplied precondition value names this tag.
    ///
    /// Accepts the quoted or bare form, a `W/` prefix, and comma-separated
    /// lists of tags.
    pub fn matches(&self, supplied: &str) -> bool {
        supplied
            .split(',')
            .map(normalize)
            .any(|candidate| candidate == self.0)
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0)
    }
}

fn normalize(raw: &str) -> &str {
    let raw = raw.trim();
    let raw = raw.strip_prefix("W/").unwrap_or(raw);
    raw.trim_matches('"')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_deterministic() {
        assert_eq!(ETag::compute("V1", 1_700_000_000_000), ETag::compute("V1", 1_700_000_000_000));
        assert_eq!(ETag::compute("V1", 42).as_str().len(), 64);
    }

    #[test]
    fn test_marker_change_changes_tag() {
        assert_ne!(ETag::compute("V1", 42), ETag::compute("V1", 43));
    }

    #[test]
    fn test_concatenation_ambiguity_does_not_collide() {
        // Each pair renders identically when the fields are simply joined.
        assert_ne!(ETag::compute("A.1", 23), ETag::compute("A.12", 3));
        assert_ne!(ETag::compute("A1", 23), ETag::compute("A", 123));
        assert_ne!(ETag::compute("", 0), ETag::compute("\0", 0));
    }

    #[test]
    fn test_header_value_is_quoted() {
        let tag = ETag::compute("V1", 7);
        assert_eq!(tag.header_value(), format!("\"{}\"", tag.as_str()));
        assert_eq!(tag.to_string(), tag.header_value());
    }

    #[test]
    fn test_matches_accepts_common_forms() {
        let tag = ETag::compute("V1", 7);
        assert!(tag.matches(&tag.header_value()));
        assert!(tag.matches(tag.as_str()));
        assert!(tag.matches(&format!("W/{}", tag.header_value())));
        assert!(tag.matches(&format!("\"stale\", {}", tag.header_value())));
        assert!(!tag.matches("\"stale\""));
        assert!(!tag.matches(""));
    }

    proptest! {
        #[test]
        fn prop_distinct_inputs_give_distinct_tags(
            a_id in ".{0,16}",
            a_marker in any::<i64>(),
            b_id in ".{0,16}",
            b_marker in any::<i64>(),
        ) {
            prop_assume!(a_id != b_id || a_marker != b_marker);
            prop_assert_ne!(ETag::compute(&a_id, a_marker), ETag::compute(&b_id, b_marker));
        }

        #[test]
        fn prop_tag_matches_its_own_header(id in "[A-Z0-9]{1,17}", marker in any::<i64>()) {
            let tag = ETag::compute(&id, marker);
            prop_assert!(tag.matches(&tag.header_value()));
        }
    }
}
