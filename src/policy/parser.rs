// src/policy/parser.rs

use super::{PolicyDocument, normalize_domain, push_unique};
use crate::error::Result;
use std::fs;
use std::path::Path;

/// Marker that, on the first non-blank line, remotely disables enforcement.
pub const DISABLE_SENTINEL: &str = "DESACTIVADO";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Whitelist,
    BlockedSubdomains,
    BlockedPaths,
    Unknown,
}

impl Section {
    fn from_header(name: &str) -> Self {
        match name.trim().to_uppercase().as_str() {
            "WHITELIST" => Section::Whitelist,
            "BLOCKED-SUBDOMAINS" => Section::BlockedSubdomains,
            "BLOCKED-PATHS" => Section::BlockedPaths,
            _ => Section::Unknown,
        }
    }
}

/// Parses raw whitelist text.
///
/// Never fails: unknown sections are skipped and invalid UTF-8 is replaced,
/// so the worst case is a document with an empty `allowed` set.
pub fn parse(bytes: &[u8]) -> PolicyDocument {
    let text = String::from_utf8_lossy(bytes);
    let mut doc = PolicyDocument::default();
    let mut section = Section::Whitelist;
    let mut seen_content = false;

    for raw_line in text.lines() {
        let line = raw_line.trim().trim_start_matches('\u{feff}');
        if line.is_empty() {
            continue;
        }

        let first_line = !seen_content;
        seen_content = true;

        // The sentinel line is a comment even when written with "##".
        if first_line && line.starts_with('#') && line.to_uppercase().contains(DISABLE_SENTINEL) {
            doc.emergency_disabled = true;
            continue;
        }

        if let Some(header) = line.strip_prefix("##") {
            section = Section::from_header(header);
            if section == Section::Unknown {
                log::debug!("Ignoring unknown policy section '{}'", header.trim());
            }
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        match section {
            Section::Whitelist => {
                let domain = normalize_domain(line);
                if !domain.is_empty() {
                    push_unique(&mut doc.allowed, domain);
                }
            }
            Section::BlockedSubdomains => {
                let domain = normalize_domain(line);
                if !domain.is_empty() {
                    push_unique(&mut doc.blocked_subdomains, domain);
                }
            }
            Section::BlockedPaths => push_unique(&mut doc.blocked_paths, line.to_string()),
            Section::Unknown => {}
        }
    }

    doc
}

/// Loads and parses a policy document from a local file.
pub fn load_policy_from_file(path: &Path) -> Result<PolicyDocument> {
    let contents = fs::read(path)?;
    Ok(parse(&contents))
}
