// src/platform/linux.rs
//!
//! Linux enforcement: dnsmasq as the DNS sinkhole, iptables for bypass
//! blocking, and managed-policy files for Firefox and Chromium browsers.
//!
//! All firewall rules live in a dedicated `OPENPATH_OUT` chain jumped to
//! from `OUTPUT`, so activation and removal never touch foreign rules. The
//! chain is programmed through both `iptables` and `ip6tables`; a host
//! without `ip6tables` gets IPv4 only, with a warning.

use super::command::{first_ip, run_checked, stdout_of, succeeds};
use super::{PlatformAdapter, PlatformKind};
use crate::error::{AgentError, Result};
use crate::persist::write_atomic;
use crate::policy::compiler::{BrowserArtifact, FirewallRule};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

const CHAIN: &str = "OPENPATH_OUT";
const RESOLVER_SERVICE: &str = "dnsmasq";
const BROWSERS: &[&str] = &["firefox", "firefox-esr", "chromium", "chrome", "google-chrome"];

/// Address family of one copy of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    /// Hostnames count as IPv4, which is all `iptables -d` resolves them to.
    fn carries(self, address: &str) -> bool {
        match address.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => self == IpFamily::V6,
            _ => self == IpFamily::V4,
        }
    }
}

/// Filesystem and binary locations used by the Linux adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinuxPaths {
    pub iptables: PathBuf,
    pub ip6tables: PathBuf,
    pub dnsmasq_conf: PathBuf,
    /// Upstream resolver the sinkhole forwards allowed names to.
    pub upstream_file: PathBuf,
    pub firefox_policies: Vec<PathBuf>,
    pub chromium_policies: Vec<PathBuf>,
    pub resolv_candidates: Vec<PathBuf>,
}

impl LinuxPaths {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            iptables: PathBuf::from("/usr/sbin/iptables"),
            ip6tables: PathBuf::from("/usr/sbin/ip6tables"),
            dnsmasq_conf: PathBuf::from("/etc/dnsmasq.d/openpath.conf"),
            upstream_file: state_dir.join("upstream-dns"),
            firefox_policies: vec![
                PathBuf::from("/etc/firefox/policies/policies.json"),
                PathBuf::from("/usr/lib/firefox/distribution/policies.json"),
            ],
            chromium_policies: vec![
                PathBuf::from("/etc/chromium/policies/managed/openpath.json"),
                PathBuf::from("/etc/opt/chrome/policies/managed/openpath.json"),
            ],
            resolv_candidates: vec![
                PathBuf::from("/run/systemd/resolve/resolv.conf"),
                PathBuf::from("/etc/resolv.conf"),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinuxAdapter {
    paths: LinuxPaths,
}

impl LinuxAdapter {
    pub fn new(state_dir: PathBuf) -> Self {
        Self {
            paths: LinuxPaths::new(&state_dir),
        }
    }

    pub fn with_paths(paths: LinuxPaths) -> Self {
        Self { paths }
    }

    fn binary(&self, family: IpFamily) -> &Path {
        match family {
            IpFamily::V4 => &self.paths.iptables,
            IpFamily::V6 => &self.paths.ip6tables,
        }
    }

    /// The binary for `family`, as long as it is installed.
    fn tool(&self, family: IpFamily) -> Result<String> {
        let binary = self.binary(family);
        if !binary.exists() {
            return Err(AgentError::ApplyError(format!(
                "{} not found. Firewall enforcement unavailable.",
                binary.display()
            )));
        }
        Ok(binary.to_string_lossy().into_owned())
    }

    /// Families to program: IPv4 always, IPv6 where `ip6tables` exists.
    fn families(&self) -> Vec<IpFamily> {
        if self.paths.ip6tables.exists() {
            vec![IpFamily::V4, IpFamily::V6]
        } else {
            log::warn!(
                "{} not found, IPv6 egress is not filtered",
                self.paths.ip6tables.display()
            );
            vec![IpFamily::V4]
        }
    }

    fn run_iptables(&self, family: IpFamily, args: &[&str]) -> Result<()> {
        let tool = self.tool(family)?;
        run_checked(&tool, args)
            .map(|_| ())
            .map_err(|e| AgentError::ApplyError(format!("{} command failed: {}", tool, e)))
    }

    fn iptables_ok(&self, family: IpFamily, args: &[&str]) -> bool {
        succeeds(&self.binary(family).to_string_lossy(), args)
    }

    /// Arguments appending `rule` to the chain for `family`; `None` when the
    /// rule names an address of the other family.
    fn rule_args(rule: &FirewallRule, family: IpFamily) -> Option<Vec<String>> {
        let mut args: Vec<String> = vec!["-A".into(), CHAIN.into()];
        match rule {
            FirewallRule::AllowLoopback => {
                args.extend(["-o", "lo", "-j", "ACCEPT"].map(String::from));
            }
            FirewallRule::AllowEstablished => {
                args.extend(
                    [
                        "-m",
                        "conntrack",
                        "--ctstate",
                        "ESTABLISHED,RELATED",
                        "-j",
                        "ACCEPT",
                    ]
                    .map(String::from),
                );
            }
            FirewallRule::AllowUpstreamDns { server, protocol } => {
                if !family.carries(server) {
                    return None;
                }
                args.extend([
                    "-p".to_string(),
                    protocol.as_str().to_string(),
                    "-d".to_string(),
                    server.clone(),
                    "--dport".to_string(),
                    "53".to_string(),
                    "-j".to_string(),
                    "ACCEPT".to_string(),
                ]);
            }
            FirewallRule::BlockPort {
                protocol,
                port,
                reason,
            } => {
                args.extend([
                    "-p".to_string(),
                    protocol.as_str().to_string(),
                    "--dport".to_string(),
                    port.to_string(),
                    "-m".to_string(),
                    "comment".to_string(),
                    "--comment".to_string(),
                    format!("openpath-{}", reason.as_str()),
                    "-j".to_string(),
                    "DROP".to_string(),
                ]);
            }
        }
        Some(args)
    }

    fn program_chain(&self, family: IpFamily, rules: &[FirewallRule]) -> Result<()> {
        if !self.iptables_ok(family, &["-n", "-L", CHAIN]) {
            self.run_iptables(family, &["-N", CHAIN])?;
        }
        self.run_iptables(family, &["-F", CHAIN])?;

        for args in rules.iter().filter_map(|rule| Self::rule_args(rule, family)) {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            self.run_iptables(family, &args)?;
        }

        if !self.iptables_ok(family, &["-C", "OUTPUT", "-j", CHAIN]) {
            self.run_iptables(family, &["-I", "OUTPUT", "1", "-j", CHAIN])?;
        }
        Ok(())
    }

    fn remove_chain(&self, family: IpFamily) -> Result<()> {
        // Remove every jump, in case an earlier run inserted duplicates.
        while self.iptables_ok(family, &["-C", "OUTPUT", "-j", CHAIN]) {
            self.run_iptables(family, &["-D", "OUTPUT", "-j", CHAIN])?;
        }
        if self.iptables_ok(family, &["-n", "-L", CHAIN]) {
            self.run_iptables(family, &["-F", CHAIN])?;
            self.run_iptables(family, &["-X", CHAIN])?;
        }
        Ok(())
    }

    fn write_policy_file(path: &Path, payload: &str) -> Result<()> {
        write_atomic(path, payload.as_bytes()).map_err(|e| {
            AgentError::ApplyError(format!(
                "Failed to write browser policy {}: {}",
                path.display(),
                e
            ))
        })
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
}

impl PlatformAdapter for LinuxAdapter {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Linux
    }

    fn write_dns_config(&self, config: &str) -> Result<()> {
        write_atomic(&self.paths.dnsmasq_conf, config.as_bytes()).map_err(|e| {
            AgentError::ApplyError(format!(
                "Failed to write {}: {}",
                self.paths.dnsmasq_conf.display(),
                e
            ))
        })
    }

    fn restart_resolver(&self) -> Result<()> {
        run_checked("systemctl", &["restart", RESOLVER_SERVICE])
            .map(|_| ())
            .map_err(|e| AgentError::ApplyError(format!("dnsmasq restart failed: {}", e)))
    }

    fn resolver_running(&self) -> bool {
        succeeds("systemctl", &["is-active", "--quiet", RESOLVER_SERVICE])
    }

    fn resolve(&self, domain: &str) -> Option<String> {
        let output = stdout_of(
            "dig",
            &["+short", "+time=2", "+tries=1", "@127.0.0.1", domain],
        )?;
        first_ip(&output)
    }

    fn upstream_configured(&self, upstream: &str) -> bool {
        let recorded = fs::read_to_string(&self.paths.upstream_file)
            .map(|content| content.trim() == upstream)
            .unwrap_or(false);
        let referenced = fs::read_to_string(&self.paths.dnsmasq_conf)
            .map(|content| content.contains(&format!("/{}\n", upstream)))
            .unwrap_or(false);
        recorded && referenced
    }

    fn write_upstream_config(&self, upstream: &str) -> Result<()> {
        write_atomic(&self.paths.upstream_file, format!("{}\n", upstream).as_bytes())
            .map_err(|e| AgentError::ApplyError(format!("Failed to record upstream DNS: {}", e)))
    }

    fn activate_firewall(&self, rules: &[FirewallRule]) -> Result<()> {
        log::info!("Applying firewall ruleset ({} rules)", rules.len());
        for family in self.families() {
            self.program_chain(family, rules)?;
        }
        log::info!("Firewall ruleset active");
        Ok(())
    }

    fn deactivate_firewall(&self) -> Result<()> {
        log::info!("Removing firewall ruleset...");
        for family in self.families() {
            self.remove_chain(family)?;
        }
        log::info!("Firewall ruleset removed");
        Ok(())
    }

    fn write_browser_policies(&self, artifact: &BrowserArtifact) -> Result<()> {
        for path in &self.paths.firefox_policies {
            Self::write_policy_file(path, &artifact.firefox)?;
        }
        for path in &self.paths.chromium_policies {
            Self::write_policy_file(path, &artifact.chromium)?;
        }
        Ok(())
    }

    fn clear_browser_policies(&self) -> Result<()> {
        for path in self
            .paths
            .firefox_policies
            .iter()
            .chain(self.paths.chromium_policies.iter())
        {
            Self::remove_if_present(path)?;
        }
        Ok(())
    }

    fn close_browsers(&self) -> Result<()> {
        for browser in BROWSERS {
            // pkill exits 1 when nothing matched
            let _ = std::process::Command::new("pkill")
                .args(["-x", browser])
                .output();
        }
        Ok(())
    }

    fn detect_upstream_dns(&self) -> Option<String> {
        if let Ok(recorded) = fs::read_to_string(&self.paths.upstream_file) {
            let recorded = recorded.trim();
            if !recorded.is_empty() {
                return Some(recorded.to_string());
            }
        }
        self.paths
            .resolv_candidates
            .iter()
            .filter_map(|path| fs::read_to_string(path).ok())
            .find_map(|content| first_external_nameserver(&content))
    }
}

/// First `nameserver` entry that is not a loopback address.
pub fn first_external_nameserver(resolv_conf: &str) -> Option<String> {
    resolv_conf
        .lines()
        .filter_map(|line| line.trim().strip_prefix("nameserver"))
        .map(str::trim)
        .filter_map(|value| value.parse::<std::net::IpAddr>().ok())
        .find(|ip| !ip.is_loopback())
        .map(|ip| ip.to_string())
}
