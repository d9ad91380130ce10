// src/agent/fetch.rs

use crate::error::{AgentError, Result};
use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, HeaderValue};
use std::time::Duration;

/// Where policy documents come from.
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Raw document bytes. Transport failures are `FetchError`s.
    async fn fetch(&self) -> Result<Vec<u8>>;

    fn describe(&self) -> String;
}

/// Fetches the policy document over HTTP(S).
pub struct HttpPolicySource {
    client: reqwest::Client,
    url: String,
}

impl HttpPolicySource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("openpath-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AgentError::FetchError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PolicySource for HttpPolicySource {
    async fn fetch(&self) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(&self.url)
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;
        log::debug!("Fetched {} bytes from {}", body.len(), self.url);
        Ok(body.to_vec())
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// A source that always fails; used when no policy URL is configured so the
/// coordinator falls back to the cached document.
pub struct UnconfiguredSource;

#[async_trait]
impl PolicySource for UnconfiguredSource {
    async fn fetch(&self) -> Result<Vec<u8>> {
        Err(AgentError::FetchError(
            "No policy URL configured; run `openpath register` or set policy_url".to_string(),
        ))
    }

    fn describe(&self) -> String {
        "<unconfigured>".to_string()
    }
}
