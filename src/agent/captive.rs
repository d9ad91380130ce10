// src/agent/captive.rs
//!
//! Captive-portal detection.
//!
//! The monitor is edge-triggered: it only touches enforcement state when the
//! probe result changes, so a steady portal (or steady authenticated network)
//! costs one HTTP request per tick and nothing else. The one exception is a
//! persisted `CAPTIVE_PORTAL` seen on an authenticated network, which is
//! resumed whatever the monitor last observed.

use super::{AgentContext, offload};
use crate::enforcement::EnforcementState;
use crate::error::Result;
use crate::policy::compiler::ArtifactKind;
use crate::portal_log;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalStatus {
    Authenticated,
    /// Unexpected body, redirect to a login page, or no answer at all.
    Unauthenticated,
}

#[async_trait]
pub trait PortalProbe: Send + Sync {
    async fn probe(&self) -> PortalStatus;
}

/// Fetches a well-known URL and compares the trimmed body.
pub struct HttpPortalProbe {
    client: reqwest::Client,
    url: String,
    expected: String,
}

impl HttpPortalProbe {
    pub fn new(url: impl Into<String>, expected: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|e| {
                portal_log!(warn, "Probe client setup failed ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self {
            client,
            url: url.into(),
            expected: expected.into(),
        }
    }
}

#[async_trait]
impl PortalProbe for HttpPortalProbe {
    async fn probe(&self) -> PortalStatus {
        let body = match self.client.get(&self.url).send().await {
            Ok(response) if response.status().is_success() => response.text().await.ok(),
            Ok(response) => {
                portal_log!(debug, "Probe answered {}", response.status());
                None
            }
            Err(e) => {
                portal_log!(debug, "Probe failed: {}", e);
                None
            }
        };
        match body {
            Some(text) if text.trim() == self.expected => PortalStatus::Authenticated,
            _ => PortalStatus::Unauthenticated,
        }
    }
}

/// What one monitor tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalAction {
    /// No edge, or nothing to change.
    None,
    /// Firewall dropped, state is `CAPTIVE_PORTAL`.
    Suspended,
    /// Firewall back up, state is `ENFORCING`.
    Resumed,
    /// Edge seen but the lock was busy; retried next tick.
    Deferred,
}

pub struct CaptivePortalMonitor {
    ctx: Arc<AgentContext>,
    probe: Arc<dyn PortalProbe>,
    last: Option<PortalStatus>,
}

impl CaptivePortalMonitor {
    pub fn new(ctx: Arc<AgentContext>, probe: Arc<dyn PortalProbe>) -> Self {
        Self {
            ctx,
            probe,
            last: None,
        }
    }

    pub fn last_observed(&self) -> Option<PortalStatus> {
        self.last
    }

    /// Acts on a new observation, and on any `CAPTIVE_PORTAL` state left
    /// behind once the network is authenticated, whoever recorded it.
    pub async fn tick(&mut self) -> Result<PortalAction> {
        let observed = self.probe.probe().await;
        let persisted = self.ctx.store.load().state;

        match observed {
            PortalStatus::Authenticated if persisted != EnforcementState::CaptivePortal => {
                if self.last == Some(PortalStatus::Unauthenticated) {
                    portal_log!(info, "Network authenticated");
                }
                self.last = Some(observed);
                return Ok(PortalAction::None);
            }
            PortalStatus::Unauthenticated if self.last == Some(observed) => {
                return Ok(PortalAction::None);
            }
            _ => {}
        }

        let Some(guard) = self.ctx.lock.try_acquire()? else {
            portal_log!(debug, "Enforcement lock busy, deferring portal transition");
            return Ok(PortalAction::Deferred);
        };
        self.last = Some(observed);
        offload(&self.ctx, move |ctx| {
            let _guard = guard;
            apply_edge(ctx, observed)
        })
        .await?
    }

    /// Runs until the task is cancelled.
    pub async fn run(mut self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                portal_log!(error, "Portal check failed: {}", e);
            }
        }
    }
}

fn apply_edge(ctx: &AgentContext, observed: PortalStatus) -> Result<PortalAction> {
    let mut state = ctx.store.load();
    if matches!(state.state, EnforcementState::Disabled) || state.locally_disabled() {
        return Ok(PortalAction::None);
    }

    match observed {
        PortalStatus::Unauthenticated => {
            if state.state == EnforcementState::CaptivePortal && !state.firewall_active {
                return Ok(PortalAction::None);
            }
            portal_log!(warn, "Captive portal detected, suspending firewall");
            if let Err(e) = ctx.applier.deactivate_firewall() {
                portal_log!(error, "Failed to deactivate firewall: {}", e);
            }
            state.firewall_active = false;
            state.applied_hashes.clear(ArtifactKind::Firewall);
            state.transition(EnforcementState::CaptivePortal, "captive portal detected");
            ctx.store.save(&state)?;
            Ok(PortalAction::Suspended)
        }
        PortalStatus::Authenticated => {
            if state.state != EnforcementState::CaptivePortal {
                return Ok(PortalAction::None);
            }
            if state.escalated(ctx.config.fail_threshold) {
                state.transition(EnforcementState::FailOpen, "portal cleared, watchdog escalated");
                ctx.store.save(&state)?;
                return Ok(PortalAction::None);
            }
            let Some(applied) = state.applied.clone() else {
                state.transition(EnforcementState::FailOpen, "portal cleared, nothing applied yet");
                ctx.store.save(&state)?;
                return Ok(PortalAction::None);
            };
            if let Err(e) = ctx.applier.activate_firewall(&applied.firewall) {
                portal_log!(error, "Failed to restore firewall: {}", e);
                state.transition(EnforcementState::FailOpen, "firewall restore failed");
                ctx.store.save(&state)?;
                return Ok(PortalAction::None);
            }
            state.firewall_active = true;
            state
                .applied_hashes
                .record(ArtifactKind::Firewall, &applied.hashes.firewall);

            // Back to ENFORCING: browsers restart onto the managed policy.
            match ctx.applier.apply_browser_policy(&applied.browser, true) {
                Ok(()) => state
                    .applied_hashes
                    .record(ArtifactKind::Browser, &applied.hashes.browser),
                Err(e) => portal_log!(error, "Browser policy apply failed: {}", e),
            }
            state.transition(EnforcementState::Enforcing, "captive portal authenticated");
            ctx.store.save(&state)?;
            portal_log!(info, "Portal authenticated, firewall restored");
            Ok(PortalAction::Resumed)
        }
    }
}
