// cicd-fixer-rs/src/signature.rs
// Error-signature extraction: normalizes raw CI/CD error text into a compact,
// comparable fingerprint.
//
// Two logs of the same underlying defect that differ only in file paths,
// line numbers, timestamps or bare integers collapse onto one signature.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Hex characters kept from the digest.
pub const SIGNATURE_LEN: usize = 16;

const MATCHES_PER_PATTERN: usize = 3;
const MAX_FRAGMENTS: usize = 5;
const MIN_FRAGMENT_LEN: usize = 11;

static EXTRACTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"error:?\s*(.+?)(?:\n|$)",
        r"failed:?\s*(.+?)(?:\n|$)",
        r"exception:?\s*(.+?)(?:\n|$)",
        r"(\w+error\w*)",
        r"(\w+exception\w*)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static FILE_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"/[\w/.-]+\.\w+").expect("valid regex"));
static LINE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"line\s+\d+").expect("valid regex"));
static TIMESTAMP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}|\d{2}:\d{2}:\d{2}").expect("valid regex"));
// A trailing word boundary already rules out an adjoining letter.
static BARE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+\b").expect("valid regex"));

fn digest(text: &str) -> String {
    let hash = Sha256::digest(text.as_bytes());
    let mut hex = format!("{hash:x}");
    hex.truncate(SIGNATURE_LEN);
    hex
}

/// Replace path, line, time and numeric noise with placeholders.
pub fn clean_fragment(fragment: &str) -> String {
    let s = FILE_PATH.replace_all(fragment, "<file>");
    let s = LINE_NUMBER.replace_all(&s, "line <num>");
    let s = TIMESTAMP.replace_all(&s, "<time>");
    let s = BARE_NUMBER.replace_all(&s, "<num>");
    s.trim().to_string()
}

/// Cleaned fragments that make up the signature text, in extraction order.
pub fn signature_fragments(error_text: &str) -> Vec<String> {
    let normalized = error_text.to_lowercase();

    EXTRACTION_PATTERNS
        .iter()
        .flat_map(|re| {
            re.captures_iter(&normalized)
                .take(MATCHES_PER_PATTERN)
                .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
                .collect::<Vec<_>>()
        })
        .map(|fragment| clean_fragment(&fragment))
        .filter(|fragment| fragment.chars().count() >= MIN_FRAGMENT_LEN)
        .take(MAX_FRAGMENTS)
        .collect()
}

/// Extract the signature of an error log.
///
/// Empty or whitespace-only text yields the empty-string sentinel.
pub fn extract_signature(error_text: &str) -> String {
    if error_text.trim().is_empty() {
        return String::new();
    }
    digest(&signature_fragments(error_text).join(" | "))
}

/// Whether a signature can take part in the identical-signature shortcut.
///
/// Only the empty-text sentinel is excluded; a log with no surviving
/// fragments still hashes to an ordinary signature.
pub fn is_informative(signature: &str) -> bool {
    !signature.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_fixed_width_hex() {
        let sig = extract_signature("Error: Cannot find module 'express'");
        assert_eq!(sig.len(), SIGNATURE_LEN);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(is_informative(&sig));
    }

    #[test]
    fn empty_text_yields_sentinel() {
        assert_eq!(extract_signature(""), "");
        assert_eq!(extract_signature("   \n"), "");
        assert!(!is_informative(""));
    }

    #[test]
    fn noise_collapses_to_same_signature() {
        let a = "2024-03-01 10:15:22 Error: cannot read config /home/runner/work/app/src/config.yaml at line 42\n";
        let b = "2025-11-30 23:59:01 Error: cannot read config /srv/ci/build/other/settings.yaml at line 7\n";
        assert_eq!(extract_signature(a), extract_signature(b));
    }

    #[test]
    fn cleaning_replaces_placeholders() {
        let cleaned = clean_fragment("/usr/lib/x.py line 12 at 12:00:01 took 350 ms (v2)");
        assert_eq!(cleaned, "<file> line <num> at <time> took <num> ms (v2)");
    }

    #[test]
    fn short_fragments_are_discarded() {
        assert!(signature_fragments("error: boom").is_empty());
        // No fragments still hashes to a regular signature.
        let sig = extract_signature("error: boom");
        assert_eq!(sig.len(), SIGNATURE_LEN);
        assert!(is_informative(&sig));
        assert_eq!(
            signature_fragments("Error: connection refused by upstream"),
            vec!["connection refused by upstream".to_string()]
        );
    }

    #[test]
    fn at_most_five_fragments() {
        let log = (0..8)
            .map(|i| format!("error: distinct failure number {i} happened"))
            .collect::<Vec<_>>()
            .join("\n");
        assert!(signature_fragments(&log).len() <= MAX_FRAGMENTS);
    }

    #[test]
    fn different_defects_differ() {
        assert_ne!(
            extract_signature("Error: cannot find module 'express'"),
            extract_signature("Error: permission denied while writing cache")
        );
    }
}
