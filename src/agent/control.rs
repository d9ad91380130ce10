// src/agent/control.rs
//!
//! Operator toggles behind `enable`, `disable` and `restart`.

use super::AgentContext;
use crate::enforce_log;
use crate::enforcement::{AgentState, DisableOrigin, EnforcementState, LockGuard};
use crate::error::{AgentError, Result};
use crate::policy::compiler::ArtifactKind;

fn lock(ctx: &AgentContext) -> Result<LockGuard> {
    ctx.lock.try_acquire()?.ok_or_else(|| {
        AgentError::StateError("Another cycle holds the enforcement lock, try again".to_string())
    })
}

/// Lifts enforcement until [`enable`] is run.
pub fn disable(ctx: &AgentContext) -> Result<AgentState> {
    let _guard = lock(ctx)?;
    let mut state = ctx.store.load();
    if let Err(e) = ctx.applier.deactivate_firewall() {
        enforce_log!(error, "Failed to deactivate firewall: {}", e);
    }
    if let Err(e) = ctx.applier.clear_browser_policy() {
        enforce_log!(error, "Failed to clear browser policy: {}", e);
    }
    state.firewall_active = false;
    state.applied_hashes.clear(ArtifactKind::Dns);
    state.applied_hashes.clear(ArtifactKind::Firewall);
    state.applied_hashes.clear(ArtifactKind::Browser);
    state.disabled_by = Some(DisableOrigin::Local);
    state.transition(EnforcementState::Disabled, "disabled by operator");
    ctx.store.save(&state)?;
    Ok(state)
}

/// Clears an operator disable and any watchdog escalation. The caller runs
/// an update cycle afterwards to re-apply the policy.
pub fn enable(ctx: &AgentContext) -> Result<AgentState> {
    let _guard = lock(ctx)?;
    let mut state = ctx.store.load();
    if state.locally_disabled() {
        state.disabled_by = None;
        state.transition(EnforcementState::FailOpen, "enabled by operator");
    }
    state.consecutive_failures = 0;
    ctx.store.save(&state)?;
    Ok(state)
}

/// Restarts the resolver and clears the failure counter.
pub fn restart(ctx: &AgentContext) -> Result<AgentState> {
    let _guard = lock(ctx)?;
    let mut state = ctx.store.load();
    ctx.adapter().write_upstream_config(&ctx.upstream_dns())?;
    ctx.adapter().restart_resolver()?;
    state.consecutive_failures = 0;
    ctx.store.save(&state)?;
    enforce_log!(info, "Resolver restarted by operator");
    Ok(state)
}
