// src/policy/mod.rs

use serde::{Deserialize, Serialize};

pub mod compiler;
pub mod parser;
pub mod render;

/// Structured whitelist policy as fetched from the policy source.
///
/// Entries keep first-seen order; duplicates are dropped on insertion and
/// domains are lowercased. Once built by the parser it is never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// Domains that resolve (including their subdomains).
    pub allowed: Vec<String>,
    /// Domains blocked even when an ancestor domain is allowed.
    pub blocked_subdomains: Vec<String>,
    /// Opaque browser-level path rules, see `render::path_rule`.
    pub blocked_paths: Vec<String>,
    /// True when the first non-blank line is the emergency-disable sentinel.
    pub emergency_disabled: bool,
}

impl PolicyDocument {
    /// A document without allowed domains cannot be enforced.
    pub fn is_usable(&self) -> bool {
        !self.allowed.is_empty()
    }

    /// Whether `domain` resolves under this policy.
    ///
    /// A domain is allowed when it or one of its ancestors is in `allowed`,
    /// unless it or one of its ancestors is in `blocked_subdomains`.
    pub fn allows(&self, domain: &str) -> bool {
        let domain = normalize_domain(domain);
        if domain.is_empty() {
            return false;
        }
        let blocked = self
            .blocked_subdomains
            .iter()
            .any(|entry| is_same_or_subdomain(&domain, entry));
        if blocked {
            return false;
        }
        self.allowed
            .iter()
            .any(|entry| is_same_or_subdomain(&domain, entry))
    }

    /// The allowed entry that grants `domain`, if any.
    pub fn matching_rule(&self, domain: &str) -> Option<&str> {
        let domain = normalize_domain(domain);
        self.allowed
            .iter()
            .find(|entry| is_same_or_subdomain(&domain, entry))
            .map(String::as_str)
    }
}

pub(crate) fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// Lowercases the first token of `raw`, dropping a `*.` wildcard prefix and
/// a trailing root dot. Anything after whitespace is treated as a comment.
pub fn normalize_domain(raw: &str) -> String {
    let token = raw.split_whitespace().next().unwrap_or("");
    let token = token.strip_prefix("*.").unwrap_or(token);
    token.trim_end_matches('.').to_lowercase()
}

/// `sub.example.com` is a subdomain of `example.com`; `badexample.com` is not.
pub fn is_same_or_subdomain(domain: &str, parent: &str) -> bool {
    domain == parent
        || (domain.len() > parent.len()
            && domain.ends_with(parent)
            && domain.as_bytes()[domain.len() - parent.len() - 1] == b'.')
}
