// src/commands/mod.rs
// Handlers behind each CLI subcommand

pub mod control;
pub mod inspect;
pub mod register;
pub mod run;

use crate::agent::AgentContext;
use crate::cli::{Cli, Commands};
use crate::config::AgentConfig;
use crate::error::Result;
use std::sync::Arc;

pub async fn dispatch(cli: &Cli) -> Result<()> {
    // Preview never touches the machine, so it does not need a config.
    if let Commands::Preview(args) = &cli.command {
        return inspect::handle_preview(args);
    }

    let config = AgentConfig::load(&cli.config)?;
    log::debug!("Loaded configuration from {}", cli.config.display());

    match &cli.command {
        Commands::Register(args) => register::handle_register(&config, args).await,
        command => {
            let ctx = Arc::new(AgentContext::for_platform(config));
            match command {
                Commands::Daemon => run::handle_daemon(ctx).await,
                Commands::Update => run::handle_update(ctx).await,
                Commands::Watchdog => run::handle_watchdog(ctx).await,
                Commands::NativeHost => run::handle_native_host(ctx).await,
                Commands::Status => inspect::handle_status(&ctx),
                Commands::Check { domain } => inspect::handle_check(&ctx, domain),
                Commands::Domains => inspect::handle_domains(&ctx),
                Commands::Health => inspect::handle_health(&ctx),
                Commands::Enable => control::handle_enable(ctx).await,
                Commands::Disable => control::handle_disable(ctx).await,
                Commands::Restart => control::handle_restart(ctx).await,
                Commands::Preview(_) | Commands::Register(_) => Ok(()),
            }
        }
    }
}
