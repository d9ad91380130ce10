// src/platform/mod.rs
//!
//! OS capability layer.
//!
//! The state machine and compiler only talk to [`PlatformAdapter`]; the
//! Linux (dnsmasq + iptables) and Windows (Acrylic + Windows Firewall)
//! variants translate those calls into system commands and files.

use crate::config::AgentConfig;
use crate::error::Result;
use crate::policy::compiler::{BrowserArtifact, FirewallRule};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub mod command;
pub mod linux;
pub mod windows;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Linux,
    Windows,
}

impl PlatformKind {
    /// The platform this binary was built for.
    pub fn current() -> Self {
        if cfg!(windows) {
            PlatformKind::Windows
        } else {
            PlatformKind::Linux
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformKind::Linux => f.write_str("linux"),
            PlatformKind::Windows => f.write_str("windows"),
        }
    }
}

/// Capabilities the enforcement core needs from the operating system.
pub trait PlatformAdapter: Send + Sync {
    fn kind(&self) -> PlatformKind;

    /// Writes the resolver configuration; does not reload it.
    fn write_dns_config(&self, config: &str) -> Result<()>;

    /// Restarts or reloads the resolver service.
    fn restart_resolver(&self) -> Result<()>;

    fn resolver_running(&self) -> bool;

    /// Resolves `domain` through the local resolver; first address or `None`.
    fn resolve(&self, domain: &str) -> Option<String>;

    /// Whether the resolver is pointed at `upstream`.
    fn upstream_configured(&self, upstream: &str) -> bool;

    fn write_upstream_config(&self, upstream: &str) -> Result<()>;

    /// Replaces any previous agent ruleset with `rules`. Idempotent.
    fn activate_firewall(&self, rules: &[FirewallRule]) -> Result<()>;

    /// Removes the agent ruleset. Idempotent.
    fn deactivate_firewall(&self) -> Result<()>;

    fn write_browser_policies(&self, artifact: &BrowserArtifact) -> Result<()>;

    fn clear_browser_policies(&self) -> Result<()>;

    /// Terminates running browsers so they reload managed policy.
    fn close_browsers(&self) -> Result<()>;

    /// The system resolver's upstream before the agent took over, if known.
    fn detect_upstream_dns(&self) -> Option<String>;
}

/// Builds the adapter for the configured (or current) platform.
pub fn adapter_for(config: &AgentConfig) -> Arc<dyn PlatformAdapter> {
    match config.platform_kind() {
        PlatformKind::Linux => Arc::new(linux::LinuxAdapter::new(config.state_dir.clone())),
        PlatformKind::Windows => Arc::new(windows::WindowsAdapter::default()),
    }
}

/// Machine hostname as reported to the backend.
pub fn hostname() -> String {
    #[cfg(unix)]
    {
        if let Ok(name) = nix::unistd::gethostname() {
            return name.to_string_lossy().into_owned();
        }
    }
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
