// src/policy/compiler.rs

use super::PolicyDocument;
use super::render;
use crate::platform::PlatformKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Outbound ports blocked so clients cannot bypass the local resolver.
pub const ALTERNATE_DNS_PORTS: &[(Protocol, u16)] = &[
    (Protocol::Udp, 53),
    (Protocol::Tcp, 53),
    (Protocol::Tcp, 853),
    (Protocol::Udp, 853),
];

/// Common VPN and tunnel ports (OpenVPN, PPTP, L2TP, IPsec, WireGuard).
pub const TUNNEL_PORTS: &[(Protocol, u16)] = &[
    (Protocol::Udp, 1194),
    (Protocol::Tcp, 1194),
    (Protocol::Tcp, 1723),
    (Protocol::Udp, 1701),
    (Protocol::Udp, 500),
    (Protocol::Udp, 4500),
    (Protocol::Udp, 51820),
];

/// Tor relay, directory, SOCKS and control ports.
pub const ANONYMITY_PORTS: &[(Protocol, u16)] = &[
    (Protocol::Tcp, 9001),
    (Protocol::Tcp, 9030),
    (Protocol::Tcp, 9040),
    (Protocol::Tcp, 9050),
    (Protocol::Tcp, 9051),
    (Protocol::Tcp, 9150),
];

/// Platform inputs the compiler depends on besides the document itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileTarget {
    pub platform: PlatformKind,
    pub upstream_dns: String,
}

/// The three kinds of enforcement artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Dns,
    Firewall,
    Browser,
}

/// One ordered directive of the DNS sinkhole configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "domain", rename_all = "snake_case")]
pub enum DnsDirective {
    /// Sinkhole every name not matched by a later, more specific rule.
    DenyAll,
    /// Forward the domain and its subdomains to the upstream resolver.
    Allow(String),
    /// Sinkhole the domain and its subdomains even if an ancestor is allowed.
    Deny(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// Why a port is blocked; carried into rule names and comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockReason {
    Dns,
    Tunnel,
    Anonymity,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::Dns => "dns",
            BlockReason::Tunnel => "vpn",
            BlockReason::Anonymity => "tor",
        }
    }
}

/// Outbound firewall rule, in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum FirewallRule {
    AllowLoopback,
    AllowEstablished,
    /// The resolver's own upstream connection.
    AllowUpstreamDns { server: String, protocol: Protocol },
    BlockPort {
        protocol: Protocol,
        port: u16,
        reason: BlockReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsArtifact {
    pub directives: Vec<DnsDirective>,
    /// Resolver configuration text exactly as written to disk.
    pub config: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallArtifact {
    pub rules: Vec<FirewallRule>,
    pub serialized: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserArtifact {
    /// Firefox enterprise `policies.json` payload.
    pub firefox: String,
    /// Chromium managed-policy payload.
    pub chromium: String,
    /// Blocked path entries as given by the document.
    pub blocked_paths: Vec<String>,
}

/// Content hash per artifact kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHashes {
    pub dns: String,
    pub firewall: String,
    pub browser: String,
}

/// Hashes of what is currently applied; `None` means "never applied".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedHashes {
    pub dns: Option<String>,
    pub firewall: Option<String>,
    pub browser: Option<String>,
}

/// Which artifacts differ from the applied ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub dns: bool,
    pub firewall: bool,
    pub browser: bool,
}

impl ChangeSet {
    pub fn any(&self) -> bool {
        self.dns || self.firewall || self.browser
    }
}

impl ArtifactHashes {
    /// Compares against the applied hashes without looking at content.
    pub fn changes_from(&self, applied: &AppliedHashes) -> ChangeSet {
        ChangeSet {
            dns: applied.dns.as_deref() != Some(self.dns.as_str()),
            firewall: applied.firewall.as_deref() != Some(self.firewall.as_str()),
            browser: applied.browser.as_deref() != Some(self.browser.as_str()),
        }
    }
}

impl AppliedHashes {
    pub fn record(&mut self, kind: ArtifactKind, hash: &str) {
        let slot = match kind {
            ArtifactKind::Dns => &mut self.dns,
            ArtifactKind::Firewall => &mut self.firewall,
            ArtifactKind::Browser => &mut self.browser,
        };
        *slot = Some(hash.to_string());
    }

    pub fn clear(&mut self, kind: ArtifactKind) {
        match kind {
            ArtifactKind::Dns => self.dns = None,
            ArtifactKind::Firewall => self.firewall = None,
            ArtifactKind::Browser => self.browser = None,
        }
    }
}

/// Platform-specific serialized form of a policy document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledArtifact {
    pub target: CompileTarget,
    pub dns: DnsArtifact,
    pub firewall: FirewallArtifact,
    pub browser: BrowserArtifact,
    pub hashes: ArtifactHashes,
}

/// Compiles a document for `target`. Pure and deterministic.
pub fn compile(doc: &PolicyDocument, target: &CompileTarget) -> CompiledArtifact {
    let directives = dns_directives(doc);
    let dns_config = render::render_dns(&directives, target);
    let rules = firewall_rules(&target.upstream_dns);
    let firewall_serialized = render::render_firewall_summary(&rules);
    let browser = BrowserArtifact {
        firefox: render::render_firefox_policy(&doc.blocked_paths),
        chromium: render::render_chromium_policy(&doc.blocked_paths),
        blocked_paths: doc.blocked_paths.clone(),
    };

    let hashes = ArtifactHashes {
        dns: sha256_hex(dns_config.as_bytes()),
        firewall: sha256_hex(firewall_serialized.as_bytes()),
        browser: sha256_hex(format!("{}\n{}", browser.firefox, browser.chromium).as_bytes()),
    };

    CompiledArtifact {
        target: target.clone(),
        dns: DnsArtifact {
            directives,
            config: dns_config,
        },
        firewall: FirewallArtifact {
            rules,
            serialized: firewall_serialized,
        },
        browser,
        hashes,
    }
}

impl PolicyDocument {
    /// Compiles this document, see [`compile`].
    pub fn compile(&self, target: &CompileTarget) -> CompiledArtifact {
        compile(self, target)
    }
}

/// Deny-all first, then every allow, then the blocked-subdomain overrides.
fn dns_directives(doc: &PolicyDocument) -> Vec<DnsDirective> {
    let mut directives = Vec::with_capacity(1 + doc.allowed.len() + doc.blocked_subdomains.len());
    directives.push(DnsDirective::DenyAll);
    directives.extend(doc.allowed.iter().cloned().map(DnsDirective::Allow));
    directives.extend(doc.blocked_subdomains.iter().cloned().map(DnsDirective::Deny));
    directives
}

fn firewall_rules(upstream_dns: &str) -> Vec<FirewallRule> {
    let mut rules = vec![FirewallRule::AllowLoopback, FirewallRule::AllowEstablished];
    for protocol in [Protocol::Udp, Protocol::Tcp] {
        rules.push(FirewallRule::AllowUpstreamDns {
            server: upstream_dns.to_string(),
            protocol,
        });
    }

    let groups = [
        (ALTERNATE_DNS_PORTS, BlockReason::Dns),
        (TUNNEL_PORTS, BlockReason::Tunnel),
        (ANONYMITY_PORTS, BlockReason::Anonymity),
    ];
    for (ports, reason) in groups {
        for (protocol, port) in ports {
            rules.push(FirewallRule::BlockPort {
                protocol: *protocol,
                port: *port,
                reason,
            });
        }
    }
    rules
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
