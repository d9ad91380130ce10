// src/tests/test_parser.rs

use crate::policy::parser::{load_policy_from_file, parse};
use std::io::Write;

#[test]
fn test_sections_and_normalization() {
    let doc = parse(
        b"# comment\nExample.COM\n*.wikipedia.org\nexample.com\n\n## blocked-subdomains\nAds.Example.com\n## BLOCKED-PATHS\nexample.com/Ads\n",
    );

    assert!(!doc.emergency_disabled);
    assert_eq!(doc.allowed, vec!["example.com", "wikipedia.org"]);
    assert_eq!(doc.blocked_subdomains, vec!["ads.example.com"]);
    // Paths are opaque: case is preserved.
    assert_eq!(doc.blocked_paths, vec!["example.com/Ads"]);
}

#[test]
fn test_whitelist_is_implicit_and_unknown_sections_are_dropped() {
    let doc = parse(b"example.com\n## NOTES\nnot-a-domain.org\n## WHITELIST\nexample.org\n");
    assert_eq!(doc.allowed, vec!["example.com", "example.org"]);
    assert!(doc.blocked_subdomains.is_empty());
}

#[test]
fn test_sentinel_must_be_first_non_blank_line() {
    let disabled = parse(b"\n\n  # Whitelist DESACTIVADO por el administrador\n## WHITELIST\nexample.com\n");
    assert!(disabled.emergency_disabled);
    // The rest is still parsed so reactivation only removes the sentinel.
    assert_eq!(disabled.allowed, vec!["example.com"]);

    let lowercase = parse(b"# desactivado\nexample.com\n");
    assert!(lowercase.emergency_disabled);

    let later = parse(b"## WHITELIST\n# DESACTIVADO\nexample.com\n");
    assert!(!later.emergency_disabled);
    assert_eq!(later.allowed, vec!["example.com"]);
}

#[test]
fn test_sentinel_written_as_header_keeps_whitelist() {
    let doc = parse(b"## DESACTIVADO\nexample.com\n");
    assert!(doc.emergency_disabled);
    assert_eq!(doc.allowed, vec!["example.com"]);
}

#[test]
fn test_documents_without_domains_are_unusable() {
    let doc = parse(b"## WHITELIST\n# nothing here yet\n## BLOCKED-PATHS\n/ads\n");
    assert!(!doc.is_usable());
    assert_eq!(doc.blocked_paths, vec!["/ads"]);

    let empty = parse(b"");
    assert!(!empty.is_usable());
    assert!(!empty.emergency_disabled);
}

#[test]
fn test_invalid_utf8_does_not_panic() {
    let doc = parse(&[b'o', b'k', b'.', b'o', b'r', b'g', b'\n', 0xff, b'\n']);
    assert_eq!(doc.allowed[0], "ok.org");
}

#[test]
fn test_crlf_and_bom() {
    let doc = parse("\u{feff}## WHITELIST\r\nexample.com\r\n".as_bytes());
    assert_eq!(doc.allowed, vec!["example.com"]);
}

#[test]
fn test_load_policy_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "## WHITELIST\nexample.com").unwrap();
    let doc = load_policy_from_file(file.path()).unwrap();
    assert_eq!(doc.allowed, vec!["example.com"]);

    assert!(load_policy_from_file(std::path::Path::new("/nonexistent/whitelist.txt")).is_err());
}
