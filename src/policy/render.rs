// src/policy/render.rs
//!
//! Serializers for compiled artifacts.
//!
//! DNS text is rendered per resolver flavor (dnsmasq on Linux, Acrylic on
//! Windows); the firewall summary is a platform-neutral line format used for
//! hashing and display; browser payloads are JSON.
//!
//! Browser path rules are `host/path-prefix` rules and are never treated as
//! regular expressions:
//!
//! - `example.com/ads` blocks `/ads...` on `example.com` and its subdomains
//! - `/tracking` blocks `/tracking...` on every host
//! - `example.com` blocks the whole host and its subdomains
//!
//! A leading `http://`, `https://` or `*://` is ignored.

use super::compiler::{CompileTarget, DnsDirective, FirewallRule};
use crate::platform::PlatformKind;
use serde_json::json;

const HEADER: &str = "Generated by openpath-agent. Local edits are overwritten.";

/// Renders DNS directives in order for the target resolver.
pub fn render_dns(directives: &[DnsDirective], target: &CompileTarget) -> String {
    match target.platform {
        PlatformKind::Linux => render_dnsmasq(directives, &target.upstream_dns),
        PlatformKind::Windows => render_acrylic(directives, &target.upstream_dns),
    }
}

fn render_dnsmasq(directives: &[DnsDirective], upstream: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\n", HEADER));
    out.push_str("no-resolv\n");
    out.push_str("no-hosts\n");
    out.push_str("domain-needed\n");
    out.push_str("bogus-priv\n");
    out.push_str("listen-address=127.0.0.1\n");
    out.push_str("bind-interfaces\n");
    out.push_str("cache-size=1000\n");

    for directive in directives {
        match directive {
            DnsDirective::DenyAll => out.push_str("address=/#/\n"),
            DnsDirective::Allow(domain) => {
                out.push_str(&format!("server=/{}/{}\n", domain, upstream));
            }
            DnsDirective::Deny(domain) => out.push_str(&format!("address=/{}/\n", domain)),
        }
    }
    out
}

/// Acrylic reads its upstream from the configuration file, so the hosts
/// text only names it in a comment to keep the hash upstream-sensitive.
fn render_acrylic(directives: &[DnsDirective], upstream: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\r\n", HEADER));
    out.push_str(&format!("# upstream {}\r\n", upstream));
    for directive in directives {
        match directive {
            DnsDirective::DenyAll => out.push_str("NX *\r\n"),
            DnsDirective::Allow(domain) => out.push_str(&format!("FW >{}\r\n", domain)),
            DnsDirective::Deny(domain) => out.push_str(&format!("NX >{}\r\n", domain)),
        }
    }
    out
}

/// One line per rule; stable across platforms.
pub fn render_firewall_summary(rules: &[FirewallRule]) -> String {
    let mut out = String::new();
    for rule in rules {
        let line = match rule {
            FirewallRule::AllowLoopback => "allow out loopback".to_string(),
            FirewallRule::AllowEstablished => "allow out established,related".to_string(),
            FirewallRule::AllowUpstreamDns { server, protocol } => {
                format!("allow out {} {}:53", protocol.as_str(), server)
            }
            FirewallRule::BlockPort {
                protocol,
                port,
                reason,
            } => format!("block out {} any:{} ({})", protocol.as_str(), port, reason.as_str()),
        };
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// A parsed `blockedPaths` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    /// `None` means every host.
    pub host: Option<String>,
    /// Always starts with `/`.
    pub path: String,
}

/// Parses a path entry; returns `None` for entries with nothing to match.
pub fn path_rule(entry: &str) -> Option<PathRule> {
    let mut rest = entry.trim();
    for scheme in ["*://", "https://", "http://"] {
        if let Some(stripped) = rest.strip_prefix(scheme) {
            rest = stripped;
            break;
        }
    }
    let rest = rest.trim_end_matches('*');
    if rest.is_empty() || rest == "/" {
        return None;
    }

    if rest.starts_with('/') {
        return Some(PathRule {
            host: None,
            path: rest.to_string(),
        });
    }

    let (host, path) = match rest.find('/') {
        Some(index) => (&rest[..index], rest[index..].to_string()),
        None => (rest, "/".to_string()),
    };
    let host = host.trim_start_matches("*.").trim_start_matches('.');
    if host.is_empty() || host == "*" {
        // A host-less root would match every URL.
        return (path != "/").then_some(PathRule { host: None, path });
    }
    Some(PathRule {
        host: Some(host.to_lowercase()),
        path,
    })
}

/// Firefox `WebsiteFilter` match patterns for one rule.
pub fn firefox_patterns(rule: &PathRule) -> Vec<String> {
    match &rule.host {
        Some(host) => vec![
            format!("*://{}{}*", host, rule.path),
            format!("*://*.{}{}*", host, rule.path),
        ],
        None => vec![format!("*://*{}*", rule.path)],
    }
}

/// Chromium `URLBlocklist` filter for one rule (host matches subdomains,
/// path is a prefix).
pub fn chromium_filter(rule: &PathRule) -> String {
    match &rule.host {
        Some(host) if rule.path == "/" => host.clone(),
        Some(host) => format!("{}{}", host, rule.path),
        None => format!("*{}", rule.path),
    }
}

/// Firefox enterprise policy. DNS-over-HTTPS is locked off so the browser
/// cannot route around the local resolver.
pub fn render_firefox_policy(blocked_paths: &[String]) -> String {
    let block: Vec<String> = blocked_paths
        .iter()
        .filter_map(|entry| path_rule(entry))
        .flat_map(|rule| firefox_patterns(&rule))
        .collect();

    let payload = json!({
        "policies": {
            "DNSOverHTTPS": { "Enabled": false, "Locked": true },
            "WebsiteFilter": { "Block": block, "Exceptions": [] },
        }
    });
    serde_json::to_string_pretty(&payload).unwrap_or_default()
}

/// Chromium managed policy (Chrome, Chromium, Edge).
pub fn render_chromium_policy(blocked_paths: &[String]) -> String {
    let blocklist: Vec<String> = blocked_paths
        .iter()
        .filter_map(|entry| path_rule(entry))
        .map(|rule| chromium_filter(&rule))
        .collect();

    let payload = json!({
        "DnsOverHttpsMode": "off",
        "URLBlocklist": blocklist,
    });
    serde_json::to_string_pretty(&payload).unwrap_or_default()
}
