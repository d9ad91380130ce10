// src/error.rs

use std::fmt;
use std::io;

/// Error type for enforcement agent operations.
///
/// None of these are fatal to the daemon: each driver resolves them into a
/// state transition or a logged warning at the end of its cycle.
#[derive(Debug)]
#[allow(clippy::enum_variant_names)]
pub enum AgentError {
    /// IO-related errors
    IoError(io::Error),
    /// Policy source unreachable, timed out, or answered with an error status
    FetchError(String),
    /// Malformed input that could not be degraded into something usable
    ParseError(String),
    /// OS-level failure to write configuration or restart a service
    ApplyError(String),
    /// Resolver applied but a real resolution probe still fails
    VerifyError(String),
    /// Configuration errors
    ConfigError(String),
    /// Checkpoint store errors
    CheckpointError(String),
    /// Persisted agent state could not be read or written
    StateError(String),
    /// External command execution errors
    CommandError(String),
    /// Backend registration errors
    RegistrationError(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::IoError(e) => write!(f, "IO error: {}", e),
            AgentError::FetchError(e) => write!(f, "Fetch error: {}", e),
            AgentError::ParseError(e) => write!(f, "Parse error: {}", e),
            AgentError::ApplyError(e) => write!(f, "Apply error: {}", e),
            AgentError::VerifyError(e) => write!(f, "Verify error: {}", e),
            AgentError::ConfigError(e) => write!(f, "Config error: {}", e),
            AgentError::CheckpointError(e) => write!(f, "Checkpoint error: {}", e),
            AgentError::StateError(e) => write!(f, "State error: {}", e),
            AgentError::CommandError(e) => write!(f, "Command error: {}", e),
            AgentError::RegistrationError(e) => write!(f, "Registration error: {}", e),
        }
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AgentError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl AgentError {
    /// Whether this error, raised while applying or verifying, leaves the
    /// endpoint in a state that must fail open.
    ///
    /// Anything else aborts the cycle and leaves enforcement as it was.
    pub fn forces_fail_open(&self) -> bool {
        matches!(
            self,
            AgentError::IoError(_)
                | AgentError::ApplyError(_)
                | AgentError::VerifyError(_)
                | AgentError::CommandError(_)
        )
    }
}

impl From<io::Error> for AgentError {
    fn from(err: io::Error) -> Self {
        AgentError::IoError(err)
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::StateError(format!("JSON error: {}", err))
    }
}

impl From<serde_yaml::Error> for AgentError {
    fn from(err: serde_yaml::Error) -> Self {
        AgentError::ConfigError(format!("YAML parsing error: {}", err))
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AgentError::FetchError(format!("request timed out: {}", err))
        } else if let Some(status) = err.status() {
            AgentError::FetchError(format!("HTTP {}: {}", status, err))
        } else {
            AgentError::FetchError(err.to_string())
        }
    }
}

/// Result type for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;
