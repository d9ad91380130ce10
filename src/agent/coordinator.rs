// src/agent/coordinator.rs
//!
//! The update cycle: probe the portal, fetch, parse, checkpoint, compile,
//! apply what changed, verify, and settle the enforcement state.
//!
//! Every cycle runs under the enforcement lock. A cycle that finds the lock
//! held does nothing and reports [`CycleOutcome::Skipped`].

use super::{AgentContext, offload};
use super::captive::{PortalProbe, PortalStatus};
use super::fetch::PolicySource;
use crate::enforce_log;
use crate::enforcement::{AgentState, DisableOrigin, EnforcementState};
use crate::error::{AgentError, Result};
use crate::persist::write_atomic;
use crate::policy::PolicyDocument;
use crate::policy::compiler::{ArtifactKind, CompiledArtifact};
use crate::policy::parser;
use chrono::Utc;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another cycle held the enforcement lock.
    Skipped,
    /// Operator disable in effect; nothing touched.
    LocallyDisabled,
    CaptivePortal,
    /// The document carried the emergency sentinel.
    Disabled,
    FailOpen(String),
    /// Enforcement left off because the watchdog escalated.
    Escalated,
    Enforcing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub state: EnforcementState,
    /// The fetch failed and the cached document was used.
    pub stale_policy: bool,
    pub dns_applied: bool,
    pub browser_applied: bool,
    pub browsers_closed: bool,
}

impl CycleReport {
    fn new(outcome: CycleOutcome, state: EnforcementState) -> Self {
        Self {
            outcome,
            state,
            stale_policy: false,
            dns_applied: false,
            browser_applied: false,
            browsers_closed: false,
        }
    }
}

pub struct UpdateCoordinator {
    ctx: Arc<AgentContext>,
    source: Arc<dyn PolicySource>,
    portal: Arc<dyn PortalProbe>,
}

impl UpdateCoordinator {
    pub fn new(
        ctx: Arc<AgentContext>,
        source: Arc<dyn PolicySource>,
        portal: Arc<dyn PortalProbe>,
    ) -> Self {
        Self {
            ctx,
            source,
            portal,
        }
    }

    /// Checks the portal and fetches on the runtime, then applies on the
    /// blocking pool with the lock held throughout.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let Some(guard) = self.ctx.lock.try_acquire()? else {
            enforce_log!(info, "Another cycle holds the enforcement lock, skipping");
            let state = self.ctx.store.load().state;
            return Ok(CycleReport::new(CycleOutcome::Skipped, state));
        };

        let mut state = self.ctx.store.load();
        if state.locally_disabled() {
            enforce_log!(info, "Disabled by operator, skipping update");
            return Ok(CycleReport::new(CycleOutcome::LocallyDisabled, state.state));
        }

        let portal = self.portal.probe().await;
        let fetched = match portal {
            PortalStatus::Authenticated => self.fetch().await,
            PortalStatus::Unauthenticated => None,
        };

        offload(&self.ctx, move |ctx| {
            let _guard = guard;
            let report = apply_cycle(ctx, &mut state, portal, fetched);
            ctx.store.save(&state)?;
            report
        })
        .await?
    }

    /// Fetched bytes, or the cached copy on failure. `None` when neither.
    async fn fetch(&self) -> Option<(Vec<u8>, bool)> {
        let cache = self.ctx.config.policy_cache_file();
        match self.source.fetch().await {
            Ok(body) => {
                if let Err(e) = write_atomic(&cache, &body) {
                    enforce_log!(warn, "Failed to cache policy at {}: {}", cache.display(), e);
                }
                Some((body, false))
            }
            Err(e) => {
                enforce_log!(warn, "Fetch from {} failed: {}", self.source.describe(), e);
                match fs::read(&cache) {
                    Ok(cached) => {
                        enforce_log!(warn, "Using cached policy, enforcement may be stale");
                        Some((cached, true))
                    }
                    Err(_) => None,
                }
            }
        }
    }

    /// Runs a cycle immediately, then every `interval`, until cancelled.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.run_cycle().await {
                Ok(report) => enforce_log!(
                    info,
                    "Update cycle finished: {:?} (state {})",
                    report.outcome,
                    report.state
                ),
                Err(e) => enforce_log!(error, "Update cycle failed: {}", e),
            }
        }
    }
}

fn apply_cycle(
    ctx: &AgentContext,
    state: &mut AgentState,
    portal: PortalStatus,
    fetched: Option<(Vec<u8>, bool)>,
) -> Result<CycleReport> {
    if portal == PortalStatus::Unauthenticated {
        if state.state != EnforcementState::Disabled {
            suspend_firewall(ctx, state);
            state.transition(EnforcementState::CaptivePortal, "captive portal detected");
        }
        return Ok(CycleReport::new(CycleOutcome::CaptivePortal, state.state));
    }

    let Some((raw, stale)) = fetched else {
        let reason = "no policy document available".to_string();
        fail_open(ctx, state, &reason);
        return Ok(CycleReport::new(CycleOutcome::FailOpen(reason), state.state));
    };

    let doc = parser::parse(&raw);
    if doc.emergency_disabled {
        return Ok(disable_remotely(ctx, state));
    }

    let permissive_before = state.state.is_permissive();
    if state.disabled_by == Some(DisableOrigin::Remote) {
        enforce_log!(info, "Emergency disable lifted");
        state.disabled_by = None;
    }

    if !doc.is_usable() {
        let reason = "policy document has no allowed domains".to_string();
        fail_open(ctx, state, &reason);
        let mut report = CycleReport::new(CycleOutcome::FailOpen(reason), state.state);
        report.stale_policy = stale;
        return Ok(report);
    }

    match ctx.checkpoints.save("pre-update", state) {
        Ok(_) => {
            if let Err(e) = ctx.checkpoints.prune(ctx.config.max_checkpoints) {
                enforce_log!(warn, "Checkpoint pruning failed: {}", e);
            }
        }
        Err(e) => enforce_log!(warn, "Checkpoint not saved: {}", e),
    }

    let mut report = enforce(ctx, state, &doc, permissive_before)?;
    report.stale_policy = stale;
    Ok(report)
}

fn enforce(
    ctx: &AgentContext,
    state: &mut AgentState,
    doc: &PolicyDocument,
    permissive_before: bool,
) -> Result<CycleReport> {
    let artifact = doc.compile(&ctx.compile_target());
    let changes = artifact.hashes.changes_from(&state.applied_hashes);
    let escalated = state.escalated(ctx.config.fail_threshold);
    let mut report = CycleReport::new(CycleOutcome::Enforcing, state.state);
    if !changes.any() {
        enforce_log!(debug, "Compiled artifacts match the applied ones");
    }

    if changes.dns {
        if let Err(e) = ctx.applier.apply_dns(&artifact) {
            enforce_log!(error, "DNS apply failed: {}", e);
            report.outcome = fail_open_or_abort(ctx, state, "DNS apply failed", e)?;
            report.state = state.state;
            return Ok(report);
        }
        state
            .applied_hashes
            .record(ArtifactKind::Dns, &artifact.hashes.dns);
        report.dns_applied = true;
    }

    let needs_firewall = changes.dns || changes.firewall || !state.firewall_active;
    if state.state != EnforcementState::Enforcing || needs_firewall {
        report.outcome = settle(ctx, state, &artifact, escalated)?;
    }

    // Browser policy follows the latest document even when DNS is unchanged.
    let entered_enforcing = permissive_before && state.state == EnforcementState::Enforcing;
    let close = state.state == EnforcementState::Enforcing && (changes.browser || entered_enforcing);
    if changes.browser || close {
        match ctx.applier.apply_browser_policy(&artifact.browser, close) {
            Ok(()) => {
                state
                    .applied_hashes
                    .record(ArtifactKind::Browser, &artifact.hashes.browser);
                report.browser_applied = true;
                report.browsers_closed = close;
            }
            Err(e) => enforce_log!(error, "Browser policy apply failed: {}", e),
        }
    }

    state.applied = Some(artifact);
    state.last_update = Some(Utc::now());
    report.state = state.state;
    Ok(report)
}

/// Verifies the resolver and brings the firewall in line with the result.
fn settle(
    ctx: &AgentContext,
    state: &mut AgentState,
    artifact: &CompiledArtifact,
    escalated: bool,
) -> Result<CycleOutcome> {
    if let Err(e) = ctx.applier.require_resolving() {
        return fail_open_or_abort(ctx, state, "DNS verification failed", e);
    }
    if escalated {
        enforce_log!(
            warn,
            "Watchdog escalated after {} failures; firewall stays off until enable/restart",
            state.consecutive_failures
        );
        if state.firewall_active {
            suspend_firewall(ctx, state);
        }
        state.transition(EnforcementState::FailOpen, "watchdog escalated");
        return Ok(CycleOutcome::Escalated);
    }
    match ctx.applier.activate_firewall(&artifact.firewall) {
        Ok(()) => {
            state.firewall_active = true;
            state
                .applied_hashes
                .record(ArtifactKind::Firewall, &artifact.hashes.firewall);
            state.transition(EnforcementState::Enforcing, "policy applied and verified");
            Ok(CycleOutcome::Enforcing)
        }
        Err(e) => fail_open_or_abort(ctx, state, "firewall activation failed", e),
    }
}

/// Fails open on errors that leave the endpoint half-configured; any other
/// error aborts the cycle with state as it stands.
fn fail_open_or_abort(
    ctx: &AgentContext,
    state: &mut AgentState,
    context: &str,
    err: AgentError,
) -> Result<CycleOutcome> {
    if !err.forces_fail_open() {
        return Err(err);
    }
    let reason = format!("{}: {}", context, err);
    fail_open(ctx, state, &reason);
    Ok(CycleOutcome::FailOpen(reason))
}

fn disable_remotely(ctx: &AgentContext, state: &mut AgentState) -> CycleReport {
    if state.state == EnforcementState::Disabled {
        enforce_log!(debug, "Emergency disable still in effect");
        return CycleReport::new(CycleOutcome::Disabled, state.state);
    }
    enforce_log!(warn, "Emergency disable sentinel received, lifting enforcement");
    suspend_firewall(ctx, state);
    if let Err(e) = ctx.applier.clear_browser_policy() {
        enforce_log!(error, "Failed to clear browser policy: {}", e);
    }
    // Forces a full re-apply once the sentinel is removed.
    state.applied_hashes.clear(ArtifactKind::Dns);
    state.applied_hashes.clear(ArtifactKind::Browser);
    state.disabled_by = Some(DisableOrigin::Remote);
    state.transition(EnforcementState::Disabled, "emergency disable");
    CycleReport::new(CycleOutcome::Disabled, state.state)
}

fn fail_open(ctx: &AgentContext, state: &mut AgentState, reason: &str) {
    enforce_log!(error, "Failing open: {}", reason);
    suspend_firewall(ctx, state);
    state.transition(EnforcementState::FailOpen, reason);
}

/// Deactivation errors are logged; the state still records the firewall
/// as off so the next cycle retries activation from scratch.
fn suspend_firewall(ctx: &AgentContext, state: &mut AgentState) {
    if let Err(e) = ctx.applier.deactivate_firewall() {
        enforce_log!(error, "Failed to deactivate firewall: {}", e);
    }
    state.firewall_active = false;
    state.applied_hashes.clear(ArtifactKind::Firewall);
}
