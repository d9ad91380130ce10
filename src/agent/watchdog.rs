// src/agent/watchdog.rs
//!
//! Periodic health prober.
//!
//! Each cycle probes the resolver, tries a targeted repair when something is
//! off, and escalates to a checkpoint rollback and finally fail-open once
//! `fail_threshold` consecutive repairs have failed. Escalation is sticky:
//! the failure counter stays at the threshold until an operator runs
//! `enable` or `restart`.

use super::{AgentContext, offload};
use super::health::{HealthReport, HealthSink, HealthStatus};
use crate::config::FALLBACK_UPSTREAM_DNS;
use crate::enforcement::{AgentState, EnforcementState};
use crate::error::Result;
use crate::platform;
use crate::policy::compiler::ArtifactKind;
use crate::watchdog_log;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Raw probe results of one watchdog pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub service_running: bool,
    pub dns_resolving: bool,
    pub upstream_configured: bool,
}

impl ProbeResult {
    pub fn all_ok(&self) -> bool {
        self.service_running && self.dns_resolving && self.upstream_configured
    }

    pub fn classify(&self) -> HealthStatus {
        if self.all_ok() {
            HealthStatus::Ok
        } else if !self.service_running {
            HealthStatus::Critical
        } else {
            HealthStatus::Warning
        }
    }
}

/// What a recovery attempt left behind.
struct Recovery {
    status: HealthStatus,
    state: AgentState,
    probes: ProbeResult,
    actions: Vec<String>,
}

pub struct Watchdog {
    ctx: Arc<AgentContext>,
    health: Arc<dyn HealthSink>,
}

impl Watchdog {
    pub fn new(ctx: Arc<AgentContext>, health: Arc<dyn HealthSink>) -> Self {
        Self { ctx, health }
    }

    /// One probe/recover/report pass. Always emits a report.
    pub async fn run_cycle(&self) -> HealthReport {
        let (upstream, mut probes) = self.observe().await;
        let mut actions = Vec::new();
        let snapshot = self.ctx.store.load();
        let threshold = self.ctx.config.fail_threshold;

        let (status, state) = match snapshot.state {
            EnforcementState::Disabled => (HealthStatus::Disabled, snapshot),
            _ if snapshot.locally_disabled() => (HealthStatus::Disabled, snapshot),
            EnforcementState::CaptivePortal => (HealthStatus::CaptivePortal, snapshot),
            EnforcementState::FailOpen if snapshot.escalated(threshold) => {
                actions.push("awaiting operator (enable/restart)".to_string());
                (HealthStatus::FailOpen, snapshot)
            }
            _ if snapshot.applied.is_none() => {
                actions.push("no policy applied yet".to_string());
                (probes.classify(), snapshot)
            }
            _ => {
                let status = probes.classify();
                if status == HealthStatus::Ok {
                    (status, self.clear_failures(snapshot))
                } else {
                    watchdog_log!(warn, "Health check {}: {:?}", status, probes);
                    match self.recover(upstream, probes, snapshot.clone()).await {
                        Ok(recovery) => {
                            probes = recovery.probes;
                            actions.extend(recovery.actions);
                            (recovery.status, recovery.state)
                        }
                        Err(e) => {
                            watchdog_log!(error, "Recovery aborted: {}", e);
                            actions.push(format!("recovery aborted: {}", e));
                            (HealthStatus::Failed, snapshot)
                        }
                    }
                }
            }
        };

        let report = HealthReport {
            hostname: platform::hostname(),
            status,
            enforcement_state: state.state,
            service_running: probes.service_running,
            dns_resolving: probes.dns_resolving,
            upstream_configured: probes.upstream_configured,
            fail_count: state.consecutive_failures,
            actions,
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
        };
        let health_file = self.ctx.config.health_file();
        if let Err(e) = report.save(&health_file) {
            watchdog_log!(warn, "Failed to persist {}: {}", health_file.display(), e);
        }
        self.health.submit(&report);
        report
    }

    /// Upstream and health results, gathered off the runtime. A task
    /// that dies counts as everything down.
    async fn observe(&self) -> (String, ProbeResult) {
        let observed = offload(&self.ctx, |ctx| {
            let upstream = ctx.upstream_dns();
            let probes = probe(ctx, &upstream);
            (upstream, probes)
        })
        .await;
        observed.unwrap_or_else(|e| {
            watchdog_log!(error, "Health checks did not complete: {}", e);
            let upstream = self
                .ctx
                .config
                .upstream_dns
                .clone()
                .unwrap_or_else(|| FALLBACK_UPSTREAM_DNS.to_string());
            let down = ProbeResult {
                service_running: false,
                dns_resolving: false,
                upstream_configured: false,
            };
            (upstream, down)
        })
    }

    /// A healthy pass below the threshold forgets earlier failures.
    fn clear_failures(&self, snapshot: AgentState) -> AgentState {
        if snapshot.consecutive_failures == 0 {
            return snapshot;
        }
        match self.ctx.lock.try_acquire() {
            Ok(Some(_guard)) => {
                let mut state = self.ctx.store.load();
                state.consecutive_failures = 0;
                if let Err(e) = self.ctx.store.save(&state) {
                    watchdog_log!(warn, "Failed to reset failure counter: {}", e);
                }
                state
            }
            _ => snapshot,
        }
    }

    async fn recover(
        &self,
        upstream: String,
        probes: ProbeResult,
        snapshot: AgentState,
    ) -> Result<Recovery> {
        let Some(guard) = self.ctx.lock.acquire_within(self.ctx.config.lock_wait()).await? else {
            watchdog_log!(info, "Enforcement lock busy, recovery deferred");
            return Ok(Recovery {
                status: probes.classify(),
                state: snapshot,
                probes,
                actions: vec!["recovery deferred (lock busy)".to_string()],
            });
        };
        offload(&self.ctx, move |ctx| {
            let _guard = guard;
            repair(ctx, &upstream)
        })
        .await?
    }

    /// Runs a cycle every `interval` until cancelled.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = self.run_cycle().await;
            watchdog_log!(debug, "Health {}", report.status);
        }
    }
}

fn probe(ctx: &AgentContext, upstream: &str) -> ProbeResult {
    let adapter = ctx.adapter();
    let service_running = adapter.resolver_running();
    ProbeResult {
        service_running,
        dns_resolving: service_running && adapter.resolve(&ctx.config.probe_domain).is_some(),
        upstream_configured: adapter.upstream_configured(upstream),
    }
}

/// Targeted repair, then rollback and fail-open once escalated. Runs with
/// the enforcement lock held.
fn repair(ctx: &AgentContext, upstream: &str) -> Result<Recovery> {
    let mut state = ctx.store.load();
    let mut actions = Vec::new();
    let adapter = ctx.adapter();

    match adapter.write_upstream_config(upstream) {
        Ok(()) => actions.push("rewrote upstream config".to_string()),
        Err(e) => actions.push(format!("upstream rewrite failed: {}", e)),
    }
    match adapter.restart_resolver() {
        Ok(()) => actions.push("restarted resolver".to_string()),
        Err(e) => actions.push(format!("resolver restart failed: {}", e)),
    }

    let mut probes = probe(ctx, upstream);
    if probes.all_ok() {
        watchdog_log!(info, "Recovered after targeted repair");
        state.consecutive_failures = 0;
        ctx.store.save(&state)?;
        return Ok(Recovery {
            status: HealthStatus::Recovered,
            state,
            probes,
            actions,
        });
    }

    state.consecutive_failures += 1;
    watchdog_log!(
        warn,
        "Repair failed ({}/{})",
        state.consecutive_failures,
        ctx.config.fail_threshold
    );
    if !state.escalated(ctx.config.fail_threshold) {
        ctx.store.save(&state)?;
        return Ok(Recovery {
            status: HealthStatus::Failed,
            state,
            probes,
            actions,
        });
    }

    if rollback(ctx, upstream, &mut probes, &mut actions, &mut state) {
        ctx.store.save(&state)?;
        return Ok(Recovery {
            status: HealthStatus::Recovered,
            state,
            probes,
            actions,
        });
    }

    watchdog_log!(
        error,
        "Failing open after {} consecutive failures",
        state.consecutive_failures
    );
    if let Err(e) = ctx.applier.deactivate_firewall() {
        watchdog_log!(error, "Failed to deactivate firewall: {}", e);
    }
    state.firewall_active = false;
    state.applied_hashes.clear(ArtifactKind::Firewall);
    state.transition(EnforcementState::FailOpen, "watchdog escalation");
    actions.push("firewall deactivated (fail-open)".to_string());
    ctx.store.save(&state)?;
    Ok(Recovery {
        status: HealthStatus::FailOpen,
        state,
        probes,
        actions,
    })
}

/// Restores the newest checkpoint; `true` when health came back.
fn rollback(
    ctx: &AgentContext,
    upstream: &str,
    probes: &mut ProbeResult,
    actions: &mut Vec<String>,
    state: &mut AgentState,
) -> bool {
    let id = match ctx.checkpoints.latest() {
        Ok(Some(id)) => id,
        Ok(None) => {
            actions.push("no checkpoint to roll back to".to_string());
            return false;
        }
        Err(e) => {
            actions.push(format!("checkpoint lookup failed: {}", e));
            return false;
        }
    };

    match ctx.checkpoints.restore(id, &ctx.applier) {
        Ok(true) => {}
        Ok(false) => {
            actions.push(format!("rollback to checkpoint {} did not verify", id));
            return false;
        }
        Err(e) => {
            actions.push(format!("rollback to checkpoint {} failed: {}", id, e));
            return false;
        }
    }

    *probes = probe(ctx, upstream);
    if !probes.all_ok() {
        actions.push(format!("rollback to checkpoint {} did not restore health", id));
        return false;
    }

    watchdog_log!(info, "Rolled back to checkpoint {}", id);
    actions.push(format!("rolled back to checkpoint {}", id));
    state.consecutive_failures = 0;
    if let Ok(checkpoint) = ctx.checkpoints.load(id)
        && let Some(artifact) = checkpoint.artifact
    {
        state.applied_hashes.record(ArtifactKind::Dns, &artifact.hashes.dns);
        state
            .applied_hashes
            .record(ArtifactKind::Browser, &artifact.hashes.browser);
        if checkpoint.firewall_active {
            state.firewall_active = true;
            state
                .applied_hashes
                .record(ArtifactKind::Firewall, &artifact.hashes.firewall);
            state.transition(EnforcementState::Enforcing, "checkpoint restored");
        }
        state.applied = Some(artifact);
    }
    true
}
