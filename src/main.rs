// src/main.rs

use clap::Parser;
use log::LevelFilter;
use openpath_agent::cli::{Cli, Commands};
use openpath_agent::commands;
use openpath_agent::logging::{init_logging, parse_level};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging based on CLI argument
    let log_level = parse_level(&cli.log_level).unwrap_or_else(|| {
        eprintln!(
            "Invalid log level '{}', defaulting to 'info'",
            cli.log_level
        );
        LevelFilter::Info
    });
    // Browsers surface native-host stderr in their console.
    let log_level = match cli.command {
        Commands::NativeHost => log_level.min(LevelFilter::Warn),
        _ => log_level,
    };

    if let Err(e) = init_logging(log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    log::debug!("openpath started with log level: {}", cli.log_level);

    if let Err(e) = commands::dispatch(&cli).await {
        log::error!("{}", e);
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }
}
