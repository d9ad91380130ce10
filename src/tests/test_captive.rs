// src/tests/test_captive.rs

use super::fixtures::{Op, TestAgent};
use crate::agent::{CycleOutcome, PortalAction, PortalStatus};
use crate::enforcement::{DisableOrigin, EnforcementState};

async fn enforcing_agent() -> TestAgent {
    let agent = TestAgent::new();
    let report = agent.coordinator().run_cycle().await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::Enforcing);
    agent.adapter.clear_ops();
    agent
}

#[tokio::test]
async fn test_first_authenticated_observation_is_a_no_op() {
    let agent = enforcing_agent().await;
    let mut monitor = agent.monitor();

    assert_eq!(monitor.tick().await.unwrap(), PortalAction::None);
    assert_eq!(monitor.last_observed(), Some(PortalStatus::Authenticated));
    assert!(agent.adapter.ops().is_empty());
}

#[tokio::test]
async fn test_portal_suspends_and_resumes_without_update_cycle() {
    let agent = enforcing_agent().await;
    let mut monitor = agent.monitor();
    monitor.tick().await.unwrap();

    agent.portal.set(PortalStatus::Unauthenticated);
    assert_eq!(monitor.tick().await.unwrap(), PortalAction::Suspended);
    assert!(!agent.adapter.firewall_on());
    let state = agent.state();
    assert_eq!(state.state, EnforcementState::CaptivePortal);
    assert!(!state.firewall_active);

    // Steady state: no further edges, no further work.
    assert_eq!(monitor.tick().await.unwrap(), PortalAction::None);
    assert_eq!(agent.adapter.count(&Op::DeactivateFirewall), 1);

    agent.portal.set(PortalStatus::Authenticated);
    assert_eq!(monitor.tick().await.unwrap(), PortalAction::Resumed);
    assert!(agent.adapter.firewall_on());
    assert_eq!(agent.state().state, EnforcementState::Enforcing);
    assert_eq!(agent.source.fetches(), 1);
    assert_eq!(agent.adapter.count(&Op::WriteDns), 0);
    // Entering ENFORCING restarts browsers onto the managed policy.
    assert_eq!(agent.adapter.count(&Op::CloseBrowsers), 1);
    assert!(agent.adapter.browser_policy().is_some());
    let state = agent.state();
    assert!(state.firewall_active);
    assert!(state.applied_hashes.firewall.is_some());
    assert!(state.applied_hashes.browser.is_some());
}

#[tokio::test]
async fn test_resume_after_coordinator_detected_portal() {
    let agent = enforcing_agent().await;
    let mut monitor = agent.monitor();
    assert_eq!(monitor.tick().await.unwrap(), PortalAction::None);

    // The update cycle sees the portal first; the monitor never does.
    agent.portal.set(PortalStatus::Unauthenticated);
    let report = agent.coordinator().run_cycle().await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::CaptivePortal);
    assert!(!agent.adapter.firewall_on());

    agent.portal.set(PortalStatus::Authenticated);
    assert_eq!(monitor.tick().await.unwrap(), PortalAction::Resumed);
    assert!(agent.adapter.firewall_on());
    assert_eq!(agent.state().state, EnforcementState::Enforcing);
    assert_eq!(agent.adapter.count(&Op::CloseBrowsers), 1);
    assert_eq!(agent.source.fetches(), 1);

    assert_eq!(monitor.tick().await.unwrap(), PortalAction::None);
}

#[tokio::test]
async fn test_busy_lock_defers_the_edge() {
    let agent = enforcing_agent().await;
    let mut monitor = agent.monitor();
    monitor.tick().await.unwrap();

    agent.portal.set(PortalStatus::Unauthenticated);
    {
        let _held = agent.ctx.lock.try_acquire().unwrap().unwrap();
        assert_eq!(monitor.tick().await.unwrap(), PortalAction::Deferred);
        assert_eq!(agent.state().state, EnforcementState::Enforcing);
    }

    // The edge is not lost.
    assert_eq!(monitor.tick().await.unwrap(), PortalAction::Suspended);
}

#[tokio::test]
async fn test_disabled_endpoint_is_left_alone() {
    let agent = enforcing_agent().await;
    let mut state = agent.state();
    state.disabled_by = Some(DisableOrigin::Local);
    state.state = EnforcementState::Disabled;
    state.firewall_active = false;
    agent.save_state(&state);

    let mut monitor = agent.monitor();
    agent.portal.set(PortalStatus::Unauthenticated);
    assert_eq!(monitor.tick().await.unwrap(), PortalAction::None);
    assert_eq!(agent.state().state, EnforcementState::Disabled);
    assert!(agent.adapter.ops().is_empty());
}

#[tokio::test]
async fn test_resume_after_escalation_stays_fail_open() {
    let agent = enforcing_agent().await;
    let mut monitor = agent.monitor();
    monitor.tick().await.unwrap();
    agent.portal.set(PortalStatus::Unauthenticated);
    monitor.tick().await.unwrap();

    let mut state = agent.state();
    state.consecutive_failures = agent.ctx.config.fail_threshold;
    agent.save_state(&state);

    agent.portal.set(PortalStatus::Authenticated);
    assert_eq!(monitor.tick().await.unwrap(), PortalAction::None);
    assert_eq!(agent.state().state, EnforcementState::FailOpen);
    assert!(!agent.adapter.firewall_on());
}
