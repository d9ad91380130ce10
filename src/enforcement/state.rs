// src/enforcement/state.rs

use crate::error::{AgentError, Result};
use crate::persist::{read_json, write_json};
use crate::policy::compiler::{AppliedHashes, CompiledArtifact};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Process-wide enforcement state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnforcementState {
    Enforcing,
    /// Nothing enforced yet counts as fail-open.
    #[default]
    FailOpen,
    CaptivePortal,
    Disabled,
}

impl EnforcementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnforcementState::Enforcing => "ENFORCING",
            EnforcementState::FailOpen => "FAIL_OPEN",
            EnforcementState::CaptivePortal => "CAPTIVE_PORTAL",
            EnforcementState::Disabled => "DISABLED",
        }
    }

    /// Any state in which traffic is not fully restricted.
    pub fn is_permissive(&self) -> bool {
        !matches!(self, EnforcementState::Enforcing)
    }
}

impl fmt::Display for EnforcementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who put the agent into `DISABLED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisableOrigin {
    /// Emergency sentinel in the policy document.
    Remote,
    /// Operator ran `disable`; only `enable` clears it.
    Local,
}

/// Everything the drivers share, persisted between cycles and processes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub state: EnforcementState,
    pub consecutive_failures: u32,
    pub firewall_active: bool,
    pub disabled_by: Option<DisableOrigin>,
    /// `lastAppliedHash` per artifact kind.
    pub applied_hashes: AppliedHashes,
    /// The artifact set currently on the system, captured by checkpoints.
    pub applied: Option<CompiledArtifact>,
    pub last_transition: Option<DateTime<Utc>>,
    pub last_reason: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
}

impl AgentState {
    /// Moves to `next`, logging real changes. Returns whether it changed.
    pub fn transition(&mut self, next: EnforcementState, reason: &str) -> bool {
        if self.state == next {
            return false;
        }
        log::info!("State {} -> {} ({})", self.state, next, reason);
        self.state = next;
        self.last_transition = Some(Utc::now());
        self.last_reason = Some(reason.to_string());
        true
    }

    pub fn locally_disabled(&self) -> bool {
        self.disabled_by == Some(DisableOrigin::Local)
    }

    /// The watchdog gave up; enforcement stays off until an operator acts.
    pub fn escalated(&self, threshold: u32) -> bool {
        self.consecutive_failures >= threshold
    }
}

/// JSON-file persistence for [`AgentState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Loads the state; a missing file is the default state.
    ///
    /// A corrupt file is also treated as default (fail-open) so that a bad
    /// write can never wedge the agent.
    pub fn load(&self) -> AgentState {
        match read_json::<AgentState>(&self.path) {
            Ok(Some(state)) => state,
            Ok(None) => AgentState::default(),
            Err(e) => {
                log::error!(
                    "Unreadable state file {}: {}; starting from defaults",
                    self.path.display(),
                    e
                );
                AgentState::default()
            }
        }
    }

    pub fn save(&self, state: &AgentState) -> Result<()> {
        write_json(&self.path, state).map_err(|e| {
            AgentError::StateError(format!("Failed to write {}: {}", self.path.display(), e))
        })
    }
}
