// src/commands/run.rs
// Long-running and one-shot driver commands

use crate::agent::daemon::{self, Drivers};
use crate::agent::{AgentContext, CycleOutcome};
use crate::error::Result;
use crate::native_host::NativeHost;
use std::sync::Arc;

pub async fn handle_daemon(ctx: Arc<AgentContext>) -> Result<()> {
    let drivers = Drivers::from_context(ctx.clone())?;
    daemon::run(ctx, drivers).await
}

pub async fn handle_update(ctx: Arc<AgentContext>) -> Result<()> {
    let drivers = Drivers::from_context(ctx)?;
    let report = drivers.coordinator.run_cycle().await?;

    match &report.outcome {
        CycleOutcome::Skipped => println!("⏳ Another update is in progress, skipped"),
        CycleOutcome::LocallyDisabled => println!("⏸️  Disabled by operator, run `openpath enable`"),
        CycleOutcome::CaptivePortal => println!("📶 Captive portal detected, firewall suspended"),
        CycleOutcome::Disabled => println!("⏸️  Remotely disabled by the policy document"),
        CycleOutcome::FailOpen(reason) => println!("⚠️  Fail-open: {}", reason),
        CycleOutcome::Escalated => {
            println!("⚠️  Policy refreshed, firewall held off after watchdog escalation")
        }
        CycleOutcome::Enforcing => println!("✅ Enforcing"),
    }
    if report.stale_policy {
        println!("⚠️  Policy source unreachable, cached policy was used");
    }
    if report.dns_applied {
        println!("   DNS configuration updated");
    }
    if report.browsers_closed {
        println!("   Browsers closed to reload policy");
    }
    println!("State: {}", report.state);
    Ok(())
}

pub async fn handle_watchdog(ctx: Arc<AgentContext>) -> Result<()> {
    let drivers = Drivers::from_context(ctx.clone())?;
    let report = drivers.watchdog.run_cycle().await;
    println!("Health: {}", report.status);
    println!(
        "  resolver running: {}  resolving: {}  upstream configured: {}",
        report.service_running, report.dns_resolving, report.upstream_configured
    );
    println!("  consecutive failures: {}", report.fail_count);
    for action in &report.actions {
        println!("  - {}", action);
    }
    if ctx.config.api_url.is_some() {
        // The report is sent on a detached task; give it its timeout to land.
        tokio::time::sleep(ctx.config.health_timeout()).await;
    }
    Ok(())
}

pub async fn handle_native_host(ctx: Arc<AgentContext>) -> Result<()> {
    let updater = Drivers::from_context(ctx.clone()).ok().map(|d| d.coordinator);
    let host = NativeHost::new(ctx, updater);
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    host.serve(&mut stdin, &mut stdout).await
}
