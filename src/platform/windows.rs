// src/platform/windows.rs
//!
//! Windows enforcement: Acrylic DNS Proxy as the sinkhole, Windows Firewall
//! rules grouped under `OpenPath`, Firefox `policies.json` and Chromium/Edge
//! policies in the registry.
//!
//! Windows Firewall block rules always win over allow rules, so the allow
//! entries of the ruleset are expressed by carving loopback and the upstream
//! resolver out of the DNS-port block rules' remote address ranges. Those
//! ranges span IPv4 and IPv6; the other block rules name no address and
//! already cover both.

use super::command::{first_ip, run_checked, stdout_of};
use super::{PlatformAdapter, PlatformKind};
use crate::error::{AgentError, Result};
use crate::persist::write_atomic;
use crate::policy::compiler::{BlockReason, BrowserArtifact, FirewallRule};
use std::fmt;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

const RULE_GROUP: &str = "OpenPath";
const RESOLVER_SERVICE: &str = "AcrylicDNSProxySvc";
const UPSTREAM_KEY: &str = "PrimaryServerAddress=";
const BROWSER_IMAGES: &[&str] = &["firefox.exe", "chrome.exe", "msedge.exe"];
const CHROMIUM_POLICY_KEYS: &[&str] = &[
    r"HKLM\SOFTWARE\Policies\Google\Chrome",
    r"HKLM\SOFTWARE\Policies\Microsoft\Edge",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowsPaths {
    pub acrylic_hosts: PathBuf,
    pub acrylic_config: PathBuf,
    pub firefox_policies: PathBuf,
}

impl Default for WindowsPaths {
    fn default() -> Self {
        let acrylic = PathBuf::from(r"C:\Program Files (x86)\Acrylic DNS Proxy");
        Self {
            acrylic_hosts: acrylic.join("AcrylicHosts.txt"),
            acrylic_config: acrylic.join("AcrylicConfiguration.ini"),
            firefox_policies: PathBuf::from(
                r"C:\Program Files\Mozilla Firefox\distribution\policies.json",
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WindowsAdapter {
    paths: WindowsPaths,
}

impl WindowsAdapter {
    pub fn with_paths(paths: WindowsPaths) -> Self {
        Self { paths }
    }

    fn powershell(script: &str) -> Result<String> {
        run_checked(
            "powershell",
            &["-NoProfile", "-NonInteractive", "-Command", script],
        )
        .map(|output| String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn reg(args: &[&str]) -> Result<()> {
        run_checked("reg", args).map(|_| ())
    }

    fn apply_chromium_registry(payload: &str) -> Result<()> {
        let value: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| AgentError::ApplyError(format!("Invalid Chromium payload: {}", e)))?;
        let blocklist: Vec<&str> = value
            .get("URLBlocklist")
            .and_then(|list| list.as_array())
            .map(|list| list.iter().filter_map(|entry| entry.as_str()).collect())
            .unwrap_or_default();

        for base in CHROMIUM_POLICY_KEYS {
            let list_key = format!(r"{}\URLBlocklist", base);
            let _ = run_checked("reg", &["delete", &list_key, "/f"]);
            Self::reg(&[
                "add",
                base,
                "/v",
                "DnsOverHttpsMode",
                "/t",
                "REG_SZ",
                "/d",
                "off",
                "/f",
            ])?;
            for (index, entry) in blocklist.iter().enumerate() {
                let name = (index + 1).to_string();
                Self::reg(&[
                    "add", &list_key, "/v", &name, "/t", "REG_SZ", "/d", entry, "/f",
                ])?;
            }
        }
        Ok(())
    }

    fn new_rule_script(rule: &FirewallRule, upstream: Option<IpAddr>) -> Option<String> {
        let FirewallRule::BlockPort {
            protocol,
            port,
            reason,
        } = rule
        else {
            return None;
        };

        let mut script = format!(
            "New-NetFirewallRule -DisplayName 'OpenPath-{}-{}-{}' -Group '{}' -Direction Outbound -Action Block -Protocol {} -RemotePort {}",
            reason.as_str(),
            protocol.as_str(),
            port,
            RULE_GROUP,
            protocol.as_str().to_uppercase(),
            port
        );
        if *reason == BlockReason::Dns {
            let ranges = dns_block_addresses(upstream);
            script.push_str(&format!(" -RemoteAddress {}", ranges.join(",")));
        }
        script.push_str(" | Out-Null");
        Some(script)
    }
}

impl PlatformAdapter for WindowsAdapter {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Windows
    }

    fn write_dns_config(&self, config: &str) -> Result<()> {
        write_atomic(&self.paths.acrylic_hosts, config.as_bytes()).map_err(|e| {
            AgentError::ApplyError(format!(
                "Failed to write {}: {}",
                self.paths.acrylic_hosts.display(),
                e
            ))
        })
    }

    fn restart_resolver(&self) -> Result<()> {
        Self::powershell(&format!(
            "Restart-Service -Name {} -Force -ErrorAction Stop",
            RESOLVER_SERVICE
        ))
        .map(|_| ())
        .map_err(|e| AgentError::ApplyError(format!("Acrylic restart failed: {}", e)))
    }

    fn resolver_running(&self) -> bool {
        stdout_of("sc", &["query", RESOLVER_SERVICE])
            .map(|out| out.contains("RUNNING"))
            .unwrap_or(false)
    }

    fn resolve(&self, domain: &str) -> Option<String> {
        let script = format!(
            "(Resolve-DnsName -Name '{}' -Server 127.0.0.1 -DnsOnly -QuickTimeout -ErrorAction Stop | Where-Object {{ $_.IPAddress }} | Select-Object -First 1).IPAddress",
            domain.replace('\'', "")
        );
        Self::powershell(&script).ok().and_then(|out| first_ip(&out))
    }

    fn upstream_configured(&self, upstream: &str) -> bool {
        fs::read_to_string(&self.paths.acrylic_config)
            .map(|content| configured_upstream(&content).as_deref() == Some(upstream))
            .unwrap_or(false)
    }

    fn write_upstream_config(&self, upstream: &str) -> Result<()> {
        let current = fs::read_to_string(&self.paths.acrylic_config).unwrap_or_default();
        let updated = with_upstream(&current, upstream);
        write_atomic(&self.paths.acrylic_config, updated.as_bytes())
            .map_err(|e| AgentError::ApplyError(format!("Failed to write Acrylic config: {}", e)))
    }

    fn activate_firewall(&self, rules: &[FirewallRule]) -> Result<()> {
        let upstream = rules.iter().find_map(|rule| match rule {
            FirewallRule::AllowUpstreamDns { server, .. } => server.parse::<IpAddr>().ok(),
            _ => None,
        });

        let mut script = format!(
            "Get-NetFirewallRule -Group '{}' -ErrorAction SilentlyContinue | Remove-NetFirewallRule; ",
            RULE_GROUP
        );
        for rule in rules {
            if let Some(line) = Self::new_rule_script(rule, upstream) {
                script.push_str(&line);
                script.push_str("; ");
            }
        }
        Self::powershell(&script)
            .map(|_| ())
            .map_err(|e| AgentError::ApplyError(format!("Firewall activation failed: {}", e)))
    }

    fn deactivate_firewall(&self) -> Result<()> {
        Self::powershell(&format!(
            "Get-NetFirewallRule -Group '{}' -ErrorAction SilentlyContinue | Remove-NetFirewallRule",
            RULE_GROUP
        ))
        .map(|_| ())
        .map_err(|e| AgentError::ApplyError(format!("Firewall removal failed: {}", e)))
    }

    fn write_browser_policies(&self, artifact: &BrowserArtifact) -> Result<()> {
        write_atomic(&self.paths.firefox_policies, artifact.firefox.as_bytes()).map_err(|e| {
            AgentError::ApplyError(format!("Failed to write Firefox policies: {}", e))
        })?;
        Self::apply_chromium_registry(&artifact.chromium)
    }

    fn clear_browser_policies(&self) -> Result<()> {
        remove_if_present(&self.paths.firefox_policies)?;
        for base in CHROMIUM_POLICY_KEYS {
            let list_key = format!(r"{}\URLBlocklist", base);
            let _ = run_checked("reg", &["delete", &list_key, "/f"]);
            let _ = run_checked("reg", &["delete", base, "/v", "DnsOverHttpsMode", "/f"]);
        }
        Ok(())
    }

    fn close_browsers(&self) -> Result<()> {
        for image in BROWSER_IMAGES {
            // taskkill fails when the process is not running
            let _ = run_checked("taskkill", &["/F", "/IM", image]);
        }
        Ok(())
    }

    fn detect_upstream_dns(&self) -> Option<String> {
        if let Ok(content) = fs::read_to_string(&self.paths.acrylic_config)
            && let Some(upstream) = configured_upstream(&content)
        {
            return Some(upstream);
        }
        Self::powershell(
            "Get-DnsClientServerAddress -AddressFamily IPv4 | Select-Object -ExpandProperty ServerAddresses",
        )
        .ok()
        .and_then(|out| {
            out.split_whitespace()
                .filter_map(|token| token.parse::<Ipv4Addr>().ok())
                .find(|ip| !ip.is_loopback())
                .map(|ip| ip.to_string())
        })
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AgentError::ApplyError(format!(
            "Failed to remove {}: {}",
            path.display(),
            e
        ))),
    }
}

fn configured_upstream(ini: &str) -> Option<String> {
    ini.lines()
        .filter_map(|line| line.trim().strip_prefix(UPSTREAM_KEY))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn with_upstream(ini: &str, upstream: &str) -> String {
    let mut replaced = false;
    let mut lines: Vec<String> = ini
        .lines()
        .map(|line| {
            if line.trim().starts_with(UPSTREAM_KEY) {
                replaced = true;
                format!("{}{}", UPSTREAM_KEY, upstream)
            } else {
                line.to_string()
            }
        })
        .collect();
    if !replaced {
        lines.push(format!("{}{}", UPSTREAM_KEY, upstream));
    }
    let mut out = lines.join("\r\n");
    out.push_str("\r\n");
    out
}

/// Remote addresses a DNS-port block covers: everything except loopback
/// and the upstream resolver, in both address families.
fn dns_block_addresses(upstream: Option<IpAddr>) -> Vec<String> {
    let mut v4: Vec<(u32, u32)> = vec![(
        Ipv4Addr::new(127, 0, 0, 0).into(),
        Ipv4Addr::new(127, 255, 255, 255).into(),
    )];
    let mut v6: Vec<(u128, u128)> = vec![(Ipv6Addr::LOCALHOST.into(), Ipv6Addr::LOCALHOST.into())];
    match upstream {
        Some(IpAddr::V4(ip)) => v4.push((ip.into(), ip.into())),
        Some(IpAddr::V6(ip)) => v6.push((ip.into(), ip.into())),
        None => {}
    }

    let v4 = ipv4_complement(&v4)
        .into_iter()
        .map(|(start, end)| address_range(Ipv4Addr::from(start), Ipv4Addr::from(end)));
    let v6 = ipv6_complement(&v6)
        .into_iter()
        .map(|(start, end)| address_range(Ipv6Addr::from(start), Ipv6Addr::from(end)));
    v4.chain(v6).collect()
}

fn address_range<A: PartialEq + fmt::Display>(start: A, end: A) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{}-{}", start, end)
    }
}

/// IPv4 ranges covering everything except the inclusive `excluded` ranges.
pub fn ipv4_complement(excluded: &[(u32, u32)]) -> Vec<(u32, u32)> {
    let wide: Vec<(u128, u128)> = excluded
        .iter()
        .map(|&(start, end)| (start.into(), end.into()))
        .collect();
    complement(&wide, u32::MAX.into())
        .into_iter()
        .map(|(start, end)| (start as u32, end as u32))
        .collect()
}

/// IPv6 counterpart of [`ipv4_complement`].
pub fn ipv6_complement(excluded: &[(u128, u128)]) -> Vec<(u128, u128)> {
    complement(excluded, u128::MAX)
}

fn complement(excluded: &[(u128, u128)], max: u128) -> Vec<(u128, u128)> {
    let mut sorted = excluded.to_vec();
    sorted.sort_unstable();

    let mut ranges = Vec::new();
    // `None` once an excluded range reaches the top of the address space.
    let mut next = Some(0u128);
    for (start, end) in sorted {
        let Some(from) = next else { break };
        if start > from {
            ranges.push((from, start - 1));
        }
        if end >= from {
            next = end.checked_add(1);
        }
    }
    if let Some(from) = next
        && from <= max
    {
        ranges.push((from, max));
    }
    ranges
}
