// src/native_host.rs
//!
//! Browser native-messaging bridge.
//!
//! The browser extension starts `openpath native-host` and exchanges frames
//! over stdio: a 4-byte length in native byte order followed by that many
//! bytes of UTF-8 JSON. Stdout carries only frames; logs go to stderr.

use crate::agent::{AgentContext, UpdateCoordinator, offload};
use crate::enforcement::EnforcementState;
use crate::error::{AgentError, Result};
use crate::platform;
use crate::policy::{PolicyDocument, parser};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames larger than this end the session.
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;
/// Domains considered per `check` request.
pub const MAX_DOMAINS: usize = 50;

/// Reads one frame. `Ok(None)` on a clean end of input.
///
/// A body that is not JSON yields `Value::Null`, which [`NativeHost::handle`]
/// answers with an error instead of ending the session.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Value>> {
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_ne_bytes(prefix) as usize;
    if len > MAX_MESSAGE_BYTES {
        return Err(AgentError::ParseError(format!(
            "Native message of {} bytes exceeds the {} byte limit",
            len, MAX_MESSAGE_BYTES
        )));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body).unwrap_or(Value::Null)))
}

pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Value) -> Result<()> {
    let body = serde_json::to_vec(message)?;
    let len = u32::try_from(body.len())
        .map_err(|_| AgentError::ParseError("Native reply too large".to_string()))?;
    writer.write_all(&len.to_ne_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Trims and lowercases requested domains, dropping anything that is not a
/// plain hostname. At most [`MAX_DOMAINS`] entries are considered.
pub fn sanitize_domains(raw: &[Value]) -> Vec<String> {
    raw.iter()
        .take(MAX_DOMAINS)
        .filter_map(Value::as_str)
        .map(|domain| domain.trim().to_lowercase())
        .filter(|domain| {
            !domain.is_empty()
                && domain
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        })
        .collect()
}

pub struct NativeHost {
    ctx: Arc<AgentContext>,
    updater: Option<Arc<UpdateCoordinator>>,
}

impl NativeHost {
    /// `updater` of `None` makes `update-whitelist` report an error.
    pub fn new(ctx: Arc<AgentContext>, updater: Option<Arc<UpdateCoordinator>>) -> Self {
        Self { ctx, updater }
    }

    /// Answers frames until the peer closes the stream.
    pub async fn serve<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        log::debug!("Native host started");
        while let Some(message) = read_message(reader).await? {
            log::debug!("Native request: {}", message);
            let response = self.handle(&message).await;
            write_message(writer, &response).await?;
        }
        log::debug!("Native host input closed");
        Ok(())
    }

    pub async fn handle(&self, message: &Value) -> Value {
        let Some(request) = message.as_object() else {
            return json!({"success": false, "error": "Invalid message format"});
        };
        let action = request.get("action").and_then(Value::as_str).unwrap_or("");

        match action {
            "ping" => json!({"success": true, "action": "ping", "message": "pong"}),
            "check" => {
                let requested = request
                    .get("domains")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                if requested.is_empty() {
                    return json!({"success": false, "error": "No domains provided"});
                }
                let doc = self.cached_policy();
                let domains = sanitize_domains(requested);
                let checked = offload(&self.ctx, move |ctx| {
                    domains
                        .iter()
                        .map(|domain| check_domain(ctx, &doc, domain))
                        .collect::<Vec<Value>>()
                })
                .await;
                match checked {
                    Ok(results) => json!({"success": true, "action": "check", "results": results}),
                    Err(e) => json!({"success": false, "error": e.to_string()}),
                }
            }
            "list" => {
                let doc = self.cached_policy();
                json!({"success": true, "action": "list", "domains": doc.allowed})
            }
            "status" => {
                let state = self.ctx.store.load();
                json!({
                    "success": true,
                    "action": "status",
                    "status": {
                        "state": state.state,
                        "active": state.state == EnforcementState::Enforcing,
                        "firewallActive": state.firewall_active,
                        "failCount": state.consecutive_failures,
                    }
                })
            }
            "get-hostname" => json!({
                "success": true,
                "action": "get-hostname",
                "hostname": platform::hostname(),
            }),
            "update-whitelist" => self.update().await,
            other => json!({"success": false, "error": format!("Unknown action: {}", other)}),
        }
    }

    fn cached_policy(&self) -> PolicyDocument {
        parser::load_policy_from_file(&self.ctx.config.policy_cache_file()).unwrap_or_else(|e| {
            log::debug!("No cached policy: {}", e);
            PolicyDocument::default()
        })
    }

    async fn update(&self) -> Value {
        let Some(updater) = &self.updater else {
            return json!({
                "success": false,
                "action": "update-whitelist",
                "error": "Updates are not available from this host",
            });
        };
        match updater.run_cycle().await {
            Ok(report) => json!({
                "success": true,
                "action": "update-whitelist",
                "output": format!("{:?}", report.outcome),
                "state": report.state,
            }),
            Err(e) => json!({
                "success": false,
                "action": "update-whitelist",
                "error": e.to_string(),
            }),
        }
    }
}

/// Resolves through the local sinkhole; blocks on the resolver query.
fn check_domain(ctx: &AgentContext, doc: &PolicyDocument, domain: &str) -> Value {
    let resolved_ip = ctx.adapter().resolve(domain);
    json!({
        "domain": domain,
        "in_whitelist": doc.allows(domain),
        "resolves": resolved_ip.is_some(),
        "resolved_ip": resolved_ip,
    })
}
