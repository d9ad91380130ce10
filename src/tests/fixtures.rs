//! Test fixtures for the agent drivers
//!
//! A recording platform adapter with switchable failures, scripted policy
//! source and portal probe, a recording health sink, and a builder wiring
//! them to a temporary state directory.

use crate::agent::{
    AgentContext, CaptivePortalMonitor, HealthReport, HealthSink, PolicySource, PortalProbe,
    PortalStatus, UpdateCoordinator, Watchdog,
};
use crate::config::AgentConfig;
use crate::enforcement::AgentState;
use crate::error::{AgentError, Result};
use crate::platform::{PlatformAdapter, PlatformKind};
use crate::policy::compiler::{BrowserArtifact, FirewallRule};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const SAMPLE_POLICY: &str = "## WHITELIST\nexample.com\ngoogle.com\n## BLOCKED-SUBDOMAINS\nads.example.com\n## BLOCKED-PATHS\nexample.com/ads\n";

/// Calls made against [`FakeAdapter`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    WriteDns,
    RestartResolver,
    WriteUpstream(String),
    ActivateFirewall,
    DeactivateFirewall,
    WriteBrowser,
    ClearBrowser,
    CloseBrowsers,
}

#[derive(Debug, Clone)]
pub struct FakeBehavior {
    pub resolver_running: bool,
    pub resolving: bool,
    pub upstream_configured: bool,
    pub restart_fails: bool,
    /// A restart brings the resolver back fully.
    pub restart_heals: bool,
    /// Only the n-th restart from now heals.
    pub restarts_until_heal: Option<u32>,
    pub firewall_fails: bool,
    /// Wall-clock time a resolver restart takes.
    pub restart_delay: Option<Duration>,
}

impl Default for FakeBehavior {
    fn default() -> Self {
        Self {
            resolver_running: true,
            resolving: true,
            upstream_configured: true,
            restart_fails: false,
            restart_heals: false,
            restarts_until_heal: None,
            firewall_fails: false,
            restart_delay: None,
        }
    }
}

#[derive(Default)]
pub struct FakeAdapter {
    behavior: Mutex<FakeBehavior>,
    ops: Mutex<Vec<Op>>,
    firewall_on: Mutex<bool>,
    browser_policy: Mutex<Option<BrowserArtifact>>,
    dns_config: Mutex<Option<String>>,
}

impl FakeAdapter {
    pub fn set(&self, change: impl FnOnce(&mut FakeBehavior)) {
        change(&mut self.behavior.lock().unwrap());
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    pub fn count(&self, op: &Op) -> usize {
        self.ops.lock().unwrap().iter().filter(|o| *o == op).count()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().unwrap().clear();
    }

    pub fn firewall_on(&self) -> bool {
        *self.firewall_on.lock().unwrap()
    }

    pub fn browser_policy(&self) -> Option<BrowserArtifact> {
        self.browser_policy.lock().unwrap().clone()
    }

    pub fn dns_config(&self) -> Option<String> {
        self.dns_config.lock().unwrap().clone()
    }

    fn record(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
    }

    fn behavior(&self) -> FakeBehavior {
        self.behavior.lock().unwrap().clone()
    }
}

impl PlatformAdapter for FakeAdapter {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Linux
    }

    fn write_dns_config(&self, config: &str) -> Result<()> {
        self.record(Op::WriteDns);
        *self.dns_config.lock().unwrap() = Some(config.to_string());
        Ok(())
    }

    fn restart_resolver(&self) -> Result<()> {
        self.record(Op::RestartResolver);
        if let Some(delay) = self.behavior().restart_delay {
            std::thread::sleep(delay);
        }
        let mut behavior = self.behavior.lock().unwrap();
        if behavior.restart_fails {
            return Err(AgentError::ApplyError("dnsmasq failed to start".to_string()));
        }
        let heals = match behavior.restarts_until_heal.take() {
            Some(n) if n <= 1 => true,
            Some(n) => {
                behavior.restarts_until_heal = Some(n - 1);
                false
            }
            None => behavior.restart_heals,
        };
        if heals {
            behavior.resolver_running = true;
            behavior.resolving = true;
            behavior.upstream_configured = true;
        }
        Ok(())
    }

    fn resolver_running(&self) -> bool {
        self.behavior().resolver_running
    }

    fn resolve(&self, _domain: &str) -> Option<String> {
        let behavior = self.behavior();
        (behavior.resolver_running && behavior.resolving).then(|| "93.184.216.34".to_string())
    }

    fn upstream_configured(&self, _upstream: &str) -> bool {
        self.behavior().upstream_configured
    }

    fn write_upstream_config(&self, upstream: &str) -> Result<()> {
        self.record(Op::WriteUpstream(upstream.to_string()));
        Ok(())
    }

    fn activate_firewall(&self, _rules: &[FirewallRule]) -> Result<()> {
        self.record(Op::ActivateFirewall);
        if self.behavior().firewall_fails {
            return Err(AgentError::CommandError("iptables: permission denied".to_string()));
        }
        *self.firewall_on.lock().unwrap() = true;
        Ok(())
    }

    fn deactivate_firewall(&self) -> Result<()> {
        self.record(Op::DeactivateFirewall);
        *self.firewall_on.lock().unwrap() = false;
        Ok(())
    }

    fn write_browser_policies(&self, artifact: &BrowserArtifact) -> Result<()> {
        self.record(Op::WriteBrowser);
        *self.browser_policy.lock().unwrap() = Some(artifact.clone());
        Ok(())
    }

    fn clear_browser_policies(&self) -> Result<()> {
        self.record(Op::ClearBrowser);
        *self.browser_policy.lock().unwrap() = None;
        Ok(())
    }

    fn close_browsers(&self) -> Result<()> {
        self.record(Op::CloseBrowsers);
        Ok(())
    }

    fn detect_upstream_dns(&self) -> Option<String> {
        None
    }
}

/// Serves a fixed body until told to fail.
#[derive(Default)]
pub struct ScriptedSource {
    body: Mutex<Option<Vec<u8>>>,
    fetches: Mutex<usize>,
}

impl ScriptedSource {
    pub fn serve(&self, body: &str) {
        *self.body.lock().unwrap() = Some(body.as_bytes().to_vec());
    }

    pub fn fail(&self) {
        *self.body.lock().unwrap() = None;
    }

    pub fn fetches(&self) -> usize {
        *self.fetches.lock().unwrap()
    }
}

#[async_trait]
impl PolicySource for ScriptedSource {
    async fn fetch(&self) -> Result<Vec<u8>> {
        *self.fetches.lock().unwrap() += 1;
        self.body
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AgentError::FetchError("connection refused".to_string()))
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

pub struct ScriptedProbe {
    status: Mutex<PortalStatus>,
}

impl Default for ScriptedProbe {
    fn default() -> Self {
        Self {
            status: Mutex::new(PortalStatus::Authenticated),
        }
    }
}

impl ScriptedProbe {
    pub fn set(&self, status: PortalStatus) {
        *self.status.lock().unwrap() = status;
    }
}

#[async_trait]
impl PortalProbe for ScriptedProbe {
    async fn probe(&self) -> PortalStatus {
        *self.status.lock().unwrap()
    }
}

#[derive(Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<HealthReport>>,
}

impl RecordingSink {
    pub fn reports(&self) -> Vec<HealthReport> {
        self.reports.lock().unwrap().clone()
    }
}

impl HealthSink for RecordingSink {
    fn submit(&self, report: &HealthReport) {
        self.reports.lock().unwrap().push(report.clone());
    }
}

/// A full agent over fakes in a temporary state directory.
pub struct TestAgent {
    pub dir: TempDir,
    pub ctx: Arc<AgentContext>,
    pub adapter: Arc<FakeAdapter>,
    pub source: Arc<ScriptedSource>,
    pub portal: Arc<ScriptedProbe>,
    pub sink: Arc<RecordingSink>,
}

impl TestAgent {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut AgentConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AgentConfig {
            state_dir: dir.path().to_path_buf(),
            upstream_dns: Some("9.9.9.9".to_string()),
            platform: Some(PlatformKind::Linux),
            lock_wait_secs: 1,
            ..AgentConfig::default()
        };
        adjust(&mut config);

        let adapter = Arc::new(FakeAdapter::default());
        let ctx = Arc::new(AgentContext::new(config, adapter.clone()));
        let source = Arc::new(ScriptedSource::default());
        source.serve(SAMPLE_POLICY);
        Self {
            dir,
            ctx,
            adapter,
            source,
            portal: Arc::new(ScriptedProbe::default()),
            sink: Arc::new(RecordingSink::default()),
        }
    }

    pub fn coordinator(&self) -> UpdateCoordinator {
        UpdateCoordinator::new(self.ctx.clone(), self.source.clone(), self.portal.clone())
    }

    pub fn watchdog(&self) -> Watchdog {
        Watchdog::new(self.ctx.clone(), self.sink.clone())
    }

    pub fn monitor(&self) -> CaptivePortalMonitor {
        CaptivePortalMonitor::new(self.ctx.clone(), self.portal.clone())
    }

    pub fn state(&self) -> AgentState {
        self.ctx.store.load()
    }

    pub fn save_state(&self, state: &AgentState) {
        self.ctx.store.save(state).unwrap();
    }
}
