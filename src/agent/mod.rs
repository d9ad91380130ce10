// src/agent/mod.rs
//!
//! The three drivers (update coordinator, watchdog, captive-portal monitor)
//! and the shared context they mutate enforcement state through.

use crate::config::{AgentConfig, FALLBACK_UPSTREAM_DNS};
use crate::enforcement::{CheckpointStore, EnforcementApplier, EnforcementLock, StateStore};
use crate::error::{AgentError, Result};
use crate::platform::{self, PlatformAdapter};
use crate::policy::compiler::CompileTarget;
use std::sync::Arc;

pub mod captive;
pub mod control;
pub mod coordinator;
pub mod daemon;
pub mod fetch;
pub mod health;
pub mod registration;
pub mod watchdog;

pub use captive::{CaptivePortalMonitor, HttpPortalProbe, PortalAction, PortalProbe, PortalStatus};
pub use coordinator::{CycleOutcome, CycleReport, UpdateCoordinator};
pub use fetch::{HttpPolicySource, PolicySource};
pub use health::{HealthReport, HealthSink, HealthStatus, HttpHealthReporter};
pub use watchdog::{ProbeResult, Watchdog};

/// Everything the drivers share. Built once and handed out behind an `Arc`.
pub struct AgentContext {
    pub config: AgentConfig,
    pub applier: EnforcementApplier,
    pub lock: EnforcementLock,
    pub store: StateStore,
    pub checkpoints: CheckpointStore,
}

impl AgentContext {
    pub fn new(config: AgentConfig, adapter: Arc<dyn PlatformAdapter>) -> Self {
        let applier = EnforcementApplier::new(adapter, config.probe_domain.clone());
        Self {
            lock: EnforcementLock::new(config.lock_file()),
            store: StateStore::new(config.state_file()),
            checkpoints: CheckpointStore::new(config.checkpoint_dir()),
            applier,
            config,
        }
    }

    /// Context backed by the real adapter for the configured platform.
    pub fn for_platform(config: AgentConfig) -> Self {
        let adapter = platform::adapter_for(&config);
        Self::new(config, adapter)
    }

    pub fn adapter(&self) -> &dyn PlatformAdapter {
        self.applier.adapter()
    }

    /// Upstream resolver: configured, else detected, else a public fallback.
    pub fn upstream_dns(&self) -> String {
        self.config
            .upstream_dns
            .clone()
            .or_else(|| self.adapter().detect_upstream_dns())
            .unwrap_or_else(|| FALLBACK_UPSTREAM_DNS.to_string())
    }

    pub fn compile_target(&self) -> CompileTarget {
        CompileTarget {
            platform: self.adapter().kind(),
            upstream_dns: self.upstream_dns(),
        }
    }
}

/// Runs adapter work on tokio's blocking pool.
///
/// Adapter calls spawn processes (`systemctl`, `dig`, `iptables`,
/// PowerShell) and wait on them; the drivers never make them on a runtime
/// worker. Anything the closure must keep alive, such as a [`LockGuard`],
/// moves in with it.
///
/// [`LockGuard`]: crate::enforcement::LockGuard
pub(crate) async fn offload<T, F>(ctx: &Arc<AgentContext>, work: F) -> Result<T>
where
    F: FnOnce(&AgentContext) -> T + Send + 'static,
    T: Send + 'static,
{
    let ctx = Arc::clone(ctx);
    tokio::task::spawn_blocking(move || work(&ctx))
        .await
        .map_err(|e| AgentError::ApplyError(format!("blocking task did not complete: {}", e)))
}
