// src/tests/test_watchdog.rs

use super::fixtures::{Op, TestAgent};
use crate::agent::{HealthReport, HealthStatus, ProbeResult};
use crate::enforcement::{DisableOrigin, EnforcementState};

fn probes(service_running: bool, dns_resolving: bool, upstream_configured: bool) -> ProbeResult {
    ProbeResult {
        service_running,
        dns_resolving,
        upstream_configured,
    }
}

#[test]
fn test_classification() {
    assert_eq!(probes(true, true, true).classify(), HealthStatus::Ok);
    assert_eq!(probes(false, false, true).classify(), HealthStatus::Critical);
    assert_eq!(probes(false, true, true).classify(), HealthStatus::Critical);
    assert_eq!(probes(true, false, true).classify(), HealthStatus::Warning);
    assert_eq!(probes(true, true, false).classify(), HealthStatus::Warning);
}

/// An agent that has applied the sample policy once.
async fn enforcing_agent() -> TestAgent {
    let agent = TestAgent::new();
    agent.coordinator().run_cycle().await.unwrap();
    assert_eq!(agent.state().state, EnforcementState::Enforcing);
    agent.adapter.clear_ops();
    agent
}

#[tokio::test]
async fn test_healthy_cycle_reports_ok() {
    let agent = enforcing_agent().await;

    let report = agent.watchdog().run_cycle().await;

    assert_eq!(report.status, HealthStatus::Ok);
    assert_eq!(report.fail_count, 0);
    assert!(agent.adapter.ops().is_empty());
    assert_eq!(agent.sink.reports().len(), 1);

    let persisted = HealthReport::load(&agent.ctx.config.health_file())
        .unwrap()
        .unwrap();
    assert_eq!(persisted.status, HealthStatus::Ok);
}

#[tokio::test]
async fn test_targeted_repair_recovers() {
    let agent = enforcing_agent().await;
    agent.adapter.set(|b| {
        b.resolver_running = false;
        b.restart_heals = true;
    });

    let report = agent.watchdog().run_cycle().await;

    assert_eq!(report.status, HealthStatus::Recovered);
    assert_eq!(report.fail_count, 0);
    assert_eq!(agent.adapter.count(&Op::RestartResolver), 1);
    assert_eq!(
        agent.adapter.count(&Op::WriteUpstream("9.9.9.9".to_string())),
        1
    );
    assert!(report.actions.iter().any(|a| a == "restarted resolver"));
}

#[tokio::test]
async fn test_failed_repairs_count_up() {
    let agent = enforcing_agent().await;
    agent.adapter.set(|b| b.resolving = false);
    let watchdog = agent.watchdog();

    let first = watchdog.run_cycle().await;
    let second = watchdog.run_cycle().await;

    assert_eq!(first.status, HealthStatus::Failed);
    assert_eq!(first.fail_count, 1);
    assert_eq!(second.status, HealthStatus::Failed);
    assert_eq!(second.fail_count, 2);
    assert_eq!(agent.state().state, EnforcementState::Enforcing);
    assert!(agent.adapter.firewall_on());
}

#[tokio::test]
async fn test_threshold_without_checkpoint_fails_open() {
    let agent = enforcing_agent().await;
    agent.ctx.checkpoints.prune(0).unwrap();
    agent.adapter.set(|b| b.resolving = false);
    let watchdog = agent.watchdog();

    let mut reports = Vec::new();
    for _ in 0..3 {
        reports.push(watchdog.run_cycle().await);
    }

    let last = reports.last().unwrap();
    assert_eq!(last.status, HealthStatus::FailOpen);
    assert_eq!(last.fail_count, 3);
    assert!(last.actions.iter().any(|a| a == "no checkpoint to roll back to"));
    assert_eq!(agent.state().state, EnforcementState::FailOpen);
    assert!(!agent.adapter.firewall_on());

    let sent = agent.sink.reports();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[2].status, HealthStatus::FailOpen);
    let persisted = HealthReport::load(&agent.ctx.config.health_file())
        .unwrap()
        .unwrap();
    assert_eq!(persisted.status, HealthStatus::FailOpen);
}

#[tokio::test]
async fn test_escalation_is_sticky() {
    let agent = enforcing_agent().await;
    agent.ctx.checkpoints.prune(0).unwrap();
    agent.adapter.set(|b| b.resolving = false);
    let watchdog = agent.watchdog();
    for _ in 0..3 {
        watchdog.run_cycle().await;
    }

    // Healthy again, but the counter stays until an operator acts.
    agent.adapter.set(|b| b.resolving = true);
    agent.adapter.clear_ops();
    let report = watchdog.run_cycle().await;
    assert_eq!(report.status, HealthStatus::FailOpen);
    assert_eq!(report.fail_count, 3);
    assert!(agent.adapter.ops().is_empty());

    let cycle = agent.coordinator().run_cycle().await.unwrap();
    assert_eq!(cycle.state, EnforcementState::FailOpen);
    assert!(!agent.adapter.firewall_on());

    crate::agent::control::enable(&agent.ctx).unwrap();
    let cycle = agent.coordinator().run_cycle().await.unwrap();
    assert_eq!(cycle.state, EnforcementState::Enforcing);
    assert!(agent.adapter.firewall_on());
}

#[tokio::test]
async fn test_rollback_to_valid_checkpoint_resets_counter() {
    let agent = enforcing_agent().await;
    // The second cycle checkpoints the enforcing artifact set.
    agent.coordinator().run_cycle().await.unwrap();
    agent.adapter.set(|b| b.resolving = false);
    let watchdog = agent.watchdog();
    watchdog.run_cycle().await;
    watchdog.run_cycle().await;

    // Third repair fails; the restart inside the rollback heals.
    agent.adapter.set(|b| b.restarts_until_heal = Some(2));
    agent.adapter.clear_ops();
    let report = watchdog.run_cycle().await;

    assert_eq!(report.status, HealthStatus::Recovered);
    assert_eq!(report.fail_count, 0);
    assert!(
        report
            .actions
            .iter()
            .any(|a| a.starts_with("rolled back to checkpoint"))
    );
    assert_eq!(agent.adapter.count(&Op::RestartResolver), 2);
    assert_eq!(agent.adapter.count(&Op::WriteDns), 1);
    let state = agent.state();
    assert_eq!(state.consecutive_failures, 0);
    assert_eq!(state.state, EnforcementState::Enforcing);
    assert!(agent.adapter.firewall_on());
}

#[tokio::test]
async fn test_disabled_state_reports_without_recovery() {
    let agent = enforcing_agent().await;
    let mut state = agent.state();
    state.state = EnforcementState::Disabled;
    state.disabled_by = Some(DisableOrigin::Local);
    agent.save_state(&state);
    agent.adapter.set(|b| b.resolver_running = false);

    let report = agent.watchdog().run_cycle().await;

    assert_eq!(report.status, HealthStatus::Disabled);
    assert!(agent.adapter.ops().is_empty());
    assert_eq!(agent.sink.reports().len(), 1);
}

#[tokio::test]
async fn test_busy_lock_defers_recovery() {
    let agent = enforcing_agent().await;
    agent.adapter.set(|b| b.resolver_running = false);
    let _held = agent.ctx.lock.try_acquire().unwrap().unwrap();

    let report = agent.watchdog().run_cycle().await;

    assert_eq!(report.status, HealthStatus::Critical);
    assert!(report.actions.iter().any(|a| a.contains("lock busy")));
    assert_eq!(agent.adapter.count(&Op::RestartResolver), 0);
    assert_eq!(agent.sink.reports().len(), 1);
}
