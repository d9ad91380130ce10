// src/commands/control.rs
// Operator enable / disable / restart

use super::run::handle_update;
use crate::agent::{AgentContext, control, offload};
use crate::error::Result;
use std::sync::Arc;

pub async fn handle_disable(ctx: Arc<AgentContext>) -> Result<()> {
    let state = offload(&ctx, control::disable).await??;
    println!("⏸️  Enforcement disabled ({}). Run `openpath enable` to resume.", state.state);
    Ok(())
}

pub async fn handle_enable(ctx: Arc<AgentContext>) -> Result<()> {
    offload(&ctx, control::enable).await??;
    println!("▶️  Enforcement re-enabled, applying policy...");
    handle_update(ctx).await
}

pub async fn handle_restart(ctx: Arc<AgentContext>) -> Result<()> {
    offload(&ctx, control::restart).await??;
    println!("🔄 Resolver restarted, failure counter cleared");
    handle_update(ctx).await
}
