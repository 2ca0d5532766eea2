//! Canonical node names
//!
//! Node names double as host-file names on disk and as URL path segments in
//! the discovery protocol, so the only legal form is lowercase `[a-z0-9]+`.

use once_cell::sync::Lazy;
use regex::Regex;

static DISALLOWED: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid pattern"));

/// Reduce an arbitrary string to its canonical node-name form: lowercase,
/// with every run of characters outside `[a-z0-9]` removed.
pub fn canonical(name: &str) -> String {
    DISALLOWED.replace_all(&name.to_lowercase(), "").into_owned()
}

/// A name is canonical when it is non-empty and already in canonical form.
pub fn is_canonical(name: &str) -> bool {
    !name.is_empty() && canonical(name) == name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_strips_disallowed() {
        assert_eq!(canonical("paas.reddec.net"), "paasreddecnet");
        assert_eq!(canonical("Node-42_A"), "node42a");
        assert_eq!(canonical("  host name  "), "hostname");
        assert_eq!(canonical("___"), "");
    }

    #[test]
    fn test_canonical_idempotent() {
        for input in ["Alpha-1", "a b c", "ALL.CAPS", "plain42"] {
            let once = canonical(input);
            assert_eq!(canonical(&once), once);
        }
    }

    #[test]
    fn test_canonical_charset() {
        let out = canonical("Mixed.Case-42 with spaces!");
        assert!(out.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_is_canonical() {
        assert!(is_canonical("node42"));
        assert!(!is_canonical("Node42"));
        assert!(!is_canonical("node-42"));
        assert!(!is_canonical(""));
    }
}
