// src/agent/health.rs
//!
//! Health reports: persisted locally on every watchdog cycle and sent to the
//! backend best-effort. Submission never blocks or fails the caller.

use crate::enforcement::EnforcementState;
use crate::persist::{read_json, write_json};
use crate::platform::PlatformKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Health classification of one watchdog cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Ok,
    Warning,
    Critical,
    Recovered,
    Failed,
    FailOpen,
    Disabled,
    CaptivePortal,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Ok => "OK",
            HealthStatus::Warning => "WARNING",
            HealthStatus::Critical => "CRITICAL",
            HealthStatus::Recovered => "RECOVERED",
            HealthStatus::Failed => "FAILED",
            HealthStatus::FailOpen => "FAIL_OPEN",
            HealthStatus::Disabled => "DISABLED",
            HealthStatus::CaptivePortal => "CAPTIVE_PORTAL",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub hostname: String,
    pub status: HealthStatus,
    pub enforcement_state: EnforcementState,
    pub service_running: bool,
    pub dns_resolving: bool,
    pub upstream_configured: bool,
    pub fail_count: u32,
    pub actions: Vec<String>,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    /// Wire body for `POST /api/health-reports`.
    ///
    /// The service flag is named after the resolver the backend knows per
    /// platform, and actions travel as one comma-separated string.
    pub fn payload(&self, platform: PlatformKind) -> Value {
        let service_key = match platform {
            PlatformKind::Linux => "dnsmasqRunning",
            PlatformKind::Windows => "serviceRunning",
        };
        let mut body = json!({
            "hostname": self.hostname,
            "status": self.status,
            "dnsResolving": self.dns_resolving,
            "failCount": self.fail_count,
            "actions": self.actions.join(", "),
            "version": self.version,
        });
        body[service_key] = Value::Bool(self.service_running);
        body
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        write_json(path, self)
    }

    pub fn load(path: &Path) -> std::io::Result<Option<Self>> {
        read_json(path)
    }
}

/// Destination for health reports. Implementations must not block.
pub trait HealthSink: Send + Sync {
    fn submit(&self, report: &HealthReport);
}

/// Posts reports to the backend on a detached task.
pub struct HttpHealthReporter {
    client: reqwest::Client,
    endpoint: Option<String>,
    token: Option<String>,
    platform: PlatformKind,
}

impl HttpHealthReporter {
    /// `api_url` of `None` disables remote submission.
    pub fn new(
        api_url: Option<&str>,
        token: Option<String>,
        platform: PlatformKind,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Health client setup failed ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self {
            client,
            endpoint: api_url.map(|base| format!("{}/api/health-reports", base.trim_end_matches('/'))),
            token,
            platform,
        }
    }
}

impl HealthSink for HttpHealthReporter {
    fn submit(&self, report: &HealthReport) {
        let Some(endpoint) = self.endpoint.clone() else {
            log::debug!("No api_url configured, health report kept local");
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::debug!("No async runtime, health report kept local");
            return;
        };

        let mut request = self.client.post(endpoint).json(&report.payload(self.platform));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        runtime.spawn(async move {
            match request.send().await.and_then(|r| r.error_for_status()) {
                Ok(_) => log::debug!("Health report delivered"),
                Err(e) => log::debug!("Health report not delivered: {}", e),
            }
        });
    }
}
