// src/cli.rs

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "openpath", author, version, about, long_about = None)]
pub struct Cli {
    /// Set the logging level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    pub log_level: String,

    /// Agent configuration file
    #[arg(short, long, global = true, default_value = crate::config::DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the update, watchdog and captive-portal drivers until Ctrl-C
    Daemon,
    /// Run one update cycle now
    Update,
    /// Run one watchdog cycle now
    Watchdog,
    /// Show enforcement state
    Status,
    /// Check whether a domain is allowed and resolves
    Check {
        /// Domain to check
        domain: String,
    },
    /// List the allowed domains of the cached policy
    Domains,
    /// Show the last health report
    Health,
    /// Re-enable enforcement after `disable` or a watchdog escalation
    Enable,
    /// Lift enforcement until `enable`
    Disable,
    /// Restart the resolver, reset the failure counter and update
    Restart,
    /// Compile a local policy file and print the artifacts
    Preview(PreviewArgs),
    /// Register this machine and store its policy URL
    Register(RegisterArgs),
    /// Serve the browser native-messaging protocol on stdio
    NativeHost,
}

#[derive(Parser, Debug)]
pub struct PreviewArgs {
    /// Policy document to compile
    #[arg(short, long)]
    pub file: PathBuf,
    /// Target platform (linux or windows); defaults to this machine
    #[arg(long)]
    pub platform: Option<String>,
    /// Upstream resolver to compile against
    #[arg(long, default_value = crate::config::FALLBACK_UPSTREAM_DNS)]
    pub upstream: String,
}

#[derive(Parser, Debug)]
pub struct RegisterArgs {
    /// Backend base URL; defaults to `api_url` from the config
    #[arg(long)]
    pub api_url: Option<String>,
    /// Shared secret; defaults to `shared_secret` from the config
    #[arg(long)]
    pub secret: Option<String>,
    /// Classroom this machine belongs to
    #[arg(long)]
    pub classroom: Option<String>,
}
