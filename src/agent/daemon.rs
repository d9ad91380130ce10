// src/agent/daemon.rs

use super::captive::{CaptivePortalMonitor, HttpPortalProbe, PortalProbe};
use super::coordinator::UpdateCoordinator;
use super::fetch::{HttpPolicySource, PolicySource, UnconfiguredSource};
use super::health::{HealthSink, HttpHealthReporter};
use super::watchdog::Watchdog;
use super::AgentContext;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;

/// The three drivers wired to one shared context.
pub struct Drivers {
    pub coordinator: Arc<UpdateCoordinator>,
    pub watchdog: Arc<Watchdog>,
    pub monitor: CaptivePortalMonitor,
}

impl Drivers {
    /// Real HTTP collaborators as configured.
    pub fn from_context(ctx: Arc<AgentContext>) -> Result<Self> {
        let config = &ctx.config;
        let source: Arc<dyn PolicySource> = match config.resolve_policy_url() {
            Some(url) => Arc::new(HttpPolicySource::new(url, config.fetch_timeout())?),
            None => {
                log::warn!("No policy URL configured; only the cached policy can be used");
                Arc::new(UnconfiguredSource)
            }
        };
        let portal: Arc<dyn PortalProbe> = Arc::new(HttpPortalProbe::new(
            config.captive_portal_url.clone(),
            config.captive_portal_expected.clone(),
            config.captive_timeout(),
        ));
        let health: Arc<dyn HealthSink> = Arc::new(HttpHealthReporter::new(
            config.api_url.as_deref(),
            config.shared_secret.clone(),
            ctx.adapter().kind(),
            config.health_timeout(),
        ));
        Ok(Self::new(ctx, source, portal, health))
    }

    pub fn new(
        ctx: Arc<AgentContext>,
        source: Arc<dyn PolicySource>,
        portal: Arc<dyn PortalProbe>,
        health: Arc<dyn HealthSink>,
    ) -> Self {
        Self {
            coordinator: Arc::new(UpdateCoordinator::new(
                ctx.clone(),
                source,
                portal.clone(),
            )),
            watchdog: Arc::new(Watchdog::new(ctx.clone(), health)),
            monitor: CaptivePortalMonitor::new(ctx, portal),
        }
    }
}

/// Runs all drivers until Ctrl-C. The update driver fires once at start.
pub async fn run(ctx: Arc<AgentContext>, drivers: Drivers) -> Result<()> {
    let config = &ctx.config;
    log::info!(
        "openpath-agent {} starting on {} (update {}s, watchdog {}s, portal {}s)",
        env!("CARGO_PKG_VERSION"),
        ctx.adapter().kind(),
        config.update_interval_secs,
        config.watchdog_interval_secs,
        config.captive_interval_secs
    );

    let update = tokio::spawn(
        drivers
            .coordinator
            .run(Duration::from_secs(config.update_interval_secs)),
    );
    let watchdog = tokio::spawn(
        drivers
            .watchdog
            .run(Duration::from_secs(config.watchdog_interval_secs)),
    );
    let portal = tokio::spawn(
        drivers
            .monitor
            .run(Duration::from_secs(config.captive_interval_secs)),
    );

    tokio::signal::ctrl_c().await?;
    log::info!("Shutdown requested, stopping drivers");
    for handle in [update, watchdog, portal] {
        handle.abort();
    }
    Ok(())
}
