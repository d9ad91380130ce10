// src/commands/inspect.rs
// Read-only commands: status, check, domains, health, preview

use crate::agent::{AgentContext, HealthReport};
use crate::cli::PreviewArgs;
use crate::error::{AgentError, Result};
use crate::platform::PlatformKind;
use crate::policy::compiler::CompileTarget;
use crate::policy::{PolicyDocument, parser};

fn cached_policy(ctx: &AgentContext) -> Result<PolicyDocument> {
    let path = ctx.config.policy_cache_file();
    parser::load_policy_from_file(&path).map_err(|e| {
        AgentError::StateError(format!(
            "No cached policy at {} ({}); run `openpath update` first",
            path.display(),
            e
        ))
    })
}

pub fn handle_status(ctx: &AgentContext) -> Result<()> {
    let state = ctx.store.load();
    println!("State:                {}", state.state);
    if let Some(origin) = state.disabled_by {
        println!("Disabled by:          {:?}", origin);
    }
    println!("Firewall active:      {}", state.firewall_active);
    println!("Consecutive failures: {}", state.consecutive_failures);
    if let Some(reason) = &state.last_reason {
        println!("Last transition:      {}", reason);
    }
    if let Some(at) = state.last_update {
        println!("Last update:          {}", at.to_rfc3339());
    }
    let short = |hash: &Option<String>| {
        hash.as_deref()
            .map(|h| h.chars().take(12).collect::<String>())
            .unwrap_or_else(|| "-".to_string())
    };
    println!(
        "Applied hashes:       dns {}  firewall {}  browser {}",
        short(&state.applied_hashes.dns),
        short(&state.applied_hashes.firewall),
        short(&state.applied_hashes.browser)
    );
    match ctx.config.resolve_policy_url() {
        Some(url) => println!("Policy URL:           {}", url),
        None => println!("Policy URL:           (not configured)"),
    }
    Ok(())
}

pub fn handle_check(ctx: &AgentContext, domain: &str) -> Result<()> {
    let doc = cached_policy(ctx)?;
    let allowed = doc.allows(domain);
    if allowed {
        let rule = doc.matching_rule(domain).unwrap_or(domain);
        println!("✅ {} is allowed (rule: {})", domain, rule);
    } else {
        println!("🚫 {} is not allowed", domain);
    }
    match ctx.adapter().resolve(domain) {
        Some(ip) => println!("   resolves → {}", ip),
        None => println!("   does not resolve"),
    }
    Ok(())
}

pub fn handle_domains(ctx: &AgentContext) -> Result<()> {
    let doc = cached_policy(ctx)?;
    for domain in &doc.allowed {
        println!("{}", domain);
    }
    log::debug!(
        "{} allowed, {} blocked subdomains, {} blocked paths",
        doc.allowed.len(),
        doc.blocked_subdomains.len(),
        doc.blocked_paths.len()
    );
    Ok(())
}

pub fn handle_health(ctx: &AgentContext) -> Result<()> {
    let path = ctx.config.health_file();
    match HealthReport::load(&path)? {
        Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
        None => println!("No health report yet (run `openpath watchdog`)"),
    }
    Ok(())
}

pub fn handle_preview(args: &PreviewArgs) -> Result<()> {
    let platform = match args.platform.as_deref() {
        None => PlatformKind::current(),
        Some(raw) => parse_platform(raw)?,
    };
    let doc = parser::load_policy_from_file(&args.file)?;
    let target = CompileTarget {
        platform,
        upstream_dns: args.upstream.clone(),
    };
    let artifact = doc.compile(&target);

    if doc.emergency_disabled {
        println!("⚠️  Document carries the emergency-disable sentinel");
    }
    if !doc.is_usable() {
        println!("⚠️  No allowed domains: the agent would fail open");
    }
    println!(
        "# {} allowed, {} blocked subdomains, {} blocked paths ({})",
        doc.allowed.len(),
        doc.blocked_subdomains.len(),
        doc.blocked_paths.len(),
        platform
    );
    println!("\n## DNS ({})\n{}", artifact.hashes.dns, artifact.dns.config);
    println!("## Firewall ({})\n{}", artifact.hashes.firewall, artifact.firewall.serialized);
    println!("## Browser ({})", artifact.hashes.browser);
    println!("{}", artifact.browser.firefox);
    println!("{}", artifact.browser.chromium);
    Ok(())
}

fn parse_platform(raw: &str) -> Result<PlatformKind> {
    match raw.to_lowercase().as_str() {
        "linux" => Ok(PlatformKind::Linux),
        "windows" => Ok(PlatformKind::Windows),
        other => Err(AgentError::ConfigError(format!("Unknown platform '{}'", other))),
    }
}
