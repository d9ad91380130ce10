// src/agent/registration.rs
//!
//! Machine registration with the backend, which answers with the policy
//! URL for this machine's classroom.

use crate::error::{AgentError, Result};
use crate::persist::write_atomic;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classroom_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub success: bool,
    #[serde(default)]
    pub whitelist_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Registers and returns the policy URL.
pub async fn register(
    api_url: &str,
    secret: &str,
    request: &RegistrationRequest,
    timeout: Duration,
) -> Result<String> {
    let endpoint = format!("{}/api/machines/register", api_url.trim_end_matches('/'));
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AgentError::RegistrationError(format!("HTTP client: {}", e)))?;

    let response = client
        .post(&endpoint)
        .bearer_auth(secret)
        .json(request)
        .send()
        .await?;
    let status = response.status();
    let body: RegistrationResponse = response.json().await.map_err(|e| {
        AgentError::RegistrationError(format!("Unexpected response ({}): {}", status, e))
    })?;

    if !status.is_success() || !body.success {
        return Err(AgentError::RegistrationError(
            body.error
                .unwrap_or_else(|| format!("Backend rejected registration ({})", status)),
        ));
    }
    body.whitelist_url
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .ok_or_else(|| AgentError::RegistrationError("Response carried no whitelistUrl".to_string()))
}

/// Persists the policy URL for later runs.
pub fn save_policy_url(path: &Path, url: &str) -> Result<()> {
    write_atomic(path, format!("{}\n", url).as_bytes())?;
    log::info!("Policy URL saved to {}", path.display());
    Ok(())
}
