// src/config.rs
//!
//! Agent configuration.
//!
//! Loaded from YAML (default `/etc/openpath/agent.yaml`); every field has a
//! default so a missing file yields a working configuration as long as a
//! policy URL was persisted by `register`.

use crate::error::{AgentError, Result};
use crate::platform::PlatformKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/openpath/agent.yaml";
pub const FALLBACK_UPSTREAM_DNS: &str = "8.8.8.8";

/// Agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Policy source; falls back to the URL persisted by registration.
    pub policy_url: Option<String>,
    /// Backend base URL for health reports and registration.
    pub api_url: Option<String>,
    /// Shared secret sent as a bearer token to the backend.
    pub shared_secret: Option<String>,
    pub state_dir: PathBuf,
    pub update_interval_secs: u64,
    pub watchdog_interval_secs: u64,
    pub captive_interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub health_timeout_secs: u64,
    pub captive_timeout_secs: u64,
    /// How long the watchdog may wait for the enforcement lock.
    pub lock_wait_secs: u64,
    /// Consecutive watchdog failures before rollback / fail-open.
    pub fail_threshold: u32,
    pub max_checkpoints: usize,
    /// Upstream resolver; detected from the system when unset.
    pub upstream_dns: Option<String>,
    /// Allowed domain used for resolution probes.
    pub probe_domain: String,
    pub captive_portal_url: String,
    pub captive_portal_expected: String,
    /// Overrides the build target's platform.
    pub platform: Option<PlatformKind>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            policy_url: None,
            api_url: None,
            shared_secret: None,
            state_dir: default_state_dir(),
            update_interval_secs: 300,
            watchdog_interval_secs: 60,
            captive_interval_secs: 30,
            fetch_timeout_secs: 15,
            health_timeout_secs: 5,
            captive_timeout_secs: 5,
            lock_wait_secs: 10,
            fail_threshold: 3,
            max_checkpoints: 5,
            upstream_dns: None,
            probe_domain: "google.com".to_string(),
            captive_portal_url: "http://detectportal.firefox.com/success.txt".to_string(),
            captive_portal_expected: "success".to_string(),
            platform: None,
        }
    }
}

fn default_state_dir() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\OpenPath\data")
    } else {
        PathBuf::from("/var/lib/openpath")
    }
}

impl AgentConfig {
    /// Loads `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let config = match fs::read_to_string(path) {
            Ok(contents) => serde_yaml::from_str::<AgentConfig>(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                AgentConfig::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("update_interval_secs", self.update_interval_secs),
            ("watchdog_interval_secs", self.watchdog_interval_secs),
            ("captive_interval_secs", self.captive_interval_secs),
            ("fetch_timeout_secs", self.fetch_timeout_secs),
            ("health_timeout_secs", self.health_timeout_secs),
            ("captive_timeout_secs", self.captive_timeout_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(AgentError::ConfigError(format!("{} must be greater than 0", name)));
            }
        }
        if self.fail_threshold == 0 {
            return Err(AgentError::ConfigError(
                "fail_threshold must be at least 1".to_string(),
            ));
        }
        if self.max_checkpoints == 0 {
            return Err(AgentError::ConfigError(
                "max_checkpoints must be at least 1".to_string(),
            ));
        }
        if self.probe_domain.trim().is_empty() {
            return Err(AgentError::ConfigError("probe_domain must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn platform_kind(&self) -> PlatformKind {
        self.platform.unwrap_or_else(PlatformKind::current)
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join("state.json")
    }

    pub fn policy_cache_file(&self) -> PathBuf {
        self.state_dir.join("whitelist.txt")
    }

    pub fn health_file(&self) -> PathBuf {
        self.state_dir.join("health.json")
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.state_dir.join("checkpoints")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.state_dir.join("openpath.lock")
    }

    pub fn policy_url_file(&self) -> PathBuf {
        self.state_dir.join("whitelist-url")
    }

    /// Configured policy URL, else the one persisted by registration.
    pub fn resolve_policy_url(&self) -> Option<String> {
        if let Some(url) = self.policy_url.as_deref().map(str::trim)
            && !url.is_empty()
        {
            return Some(url.to_string());
        }
        fs::read_to_string(self.policy_url_file())
            .ok()
            .map(|content| content.trim().to_string())
            .filter(|url| !url.is_empty())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    pub fn captive_timeout(&self) -> Duration {
        Duration::from_secs(self.captive_timeout_secs)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }
}
