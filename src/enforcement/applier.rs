// src/enforcement/applier.rs

use crate::enforce_log;
use crate::error::{AgentError, Result};
use crate::platform::PlatformAdapter;
use crate::policy::compiler::{BrowserArtifact, CompiledArtifact, FirewallArtifact};
use std::sync::Arc;

/// Outcome of a post-apply resolver check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyReport {
    pub service_up: bool,
    pub resolving: bool,
}

impl VerifyReport {
    pub fn healthy(&self) -> bool {
        self.service_up && self.resolving
    }
}

/// Pushes compiled artifacts into the OS through a [`PlatformAdapter`].
///
/// Callers must hold the enforcement lock.
#[derive(Clone)]
pub struct EnforcementApplier {
    adapter: Arc<dyn PlatformAdapter>,
    probe_domain: String,
}

impl EnforcementApplier {
    pub fn new(adapter: Arc<dyn PlatformAdapter>, probe_domain: impl Into<String>) -> Self {
        Self {
            adapter,
            probe_domain: probe_domain.into(),
        }
    }

    pub fn adapter(&self) -> &dyn PlatformAdapter {
        self.adapter.as_ref()
    }

    /// Writes the upstream and sinkhole configuration and restarts the
    /// resolver. A restart failure is a hard error.
    pub fn apply_dns(&self, artifact: &CompiledArtifact) -> Result<()> {
        self.adapter
            .write_upstream_config(&artifact.target.upstream_dns)?;
        self.adapter.write_dns_config(&artifact.dns.config)?;
        self.adapter.restart_resolver()?;
        enforce_log!(
            info,
            "DNS sinkhole applied ({} directives, upstream {})",
            artifact.dns.directives.len(),
            artifact.target.upstream_dns
        );
        Ok(())
    }

    /// Checks the resolver is up and an allowed domain resolves.
    pub fn verify(&self) -> VerifyReport {
        let service_up = self.adapter.resolver_running();
        let resolving = service_up && self.adapter.resolve(&self.probe_domain).is_some();
        if !resolving {
            enforce_log!(
                warn,
                "DNS verification failed (service_up={}, probe={})",
                service_up,
                self.probe_domain
            );
        }
        VerifyReport {
            service_up,
            resolving,
        }
    }

    /// [`verify`](Self::verify), with a non-resolving resolver as a
    /// [`AgentError::VerifyError`].
    pub fn require_resolving(&self) -> Result<VerifyReport> {
        let report = self.verify();
        if report.resolving {
            return Ok(report);
        }
        let service = if report.service_up { "up" } else { "down" };
        Err(AgentError::VerifyError(format!(
            "{} does not resolve (resolver {})",
            self.probe_domain, service
        )))
    }

    pub fn activate_firewall(&self, artifact: &FirewallArtifact) -> Result<()> {
        self.adapter.activate_firewall(&artifact.rules)?;
        enforce_log!(info, "Firewall active ({} rules)", artifact.rules.len());
        Ok(())
    }

    pub fn deactivate_firewall(&self) -> Result<()> {
        self.adapter.deactivate_firewall()?;
        enforce_log!(info, "Firewall deactivated");
        Ok(())
    }

    /// Writes browser policies; closes browsers when `close` is set so they
    /// reload them.
    pub fn apply_browser_policy(&self, artifact: &BrowserArtifact, close: bool) -> Result<()> {
        self.adapter.write_browser_policies(artifact)?;
        if close {
            enforce_log!(info, "Closing browsers to reload managed policy");
            self.adapter.close_browsers()?;
        }
        Ok(())
    }

    pub fn clear_browser_policy(&self) -> Result<()> {
        self.adapter.clear_browser_policies()
    }

    /// Re-applies a full artifact set, as used by checkpoint restore.
    pub fn apply_all(&self, artifact: &CompiledArtifact, firewall: bool) -> Result<VerifyReport> {
        self.apply_dns(artifact)?;
        let report = self.verify();
        if firewall && report.resolving {
            self.activate_firewall(&artifact.firewall)?;
        }
        self.apply_browser_policy(&artifact.browser, false)?;
        Ok(report)
    }
}
