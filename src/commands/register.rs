// src/commands/register.rs

use crate::agent::registration::{self, RegistrationRequest};
use crate::cli::RegisterArgs;
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::platform;

pub async fn handle_register(config: &AgentConfig, args: &RegisterArgs) -> Result<()> {
    let api_url = args
        .api_url
        .clone()
        .or_else(|| config.api_url.clone())
        .ok_or_else(|| AgentError::ConfigError("No API URL: pass --api-url or set api_url".to_string()))?;
    let secret = args
        .secret
        .clone()
        .or_else(|| config.shared_secret.clone())
        .ok_or_else(|| {
            AgentError::ConfigError("No shared secret: pass --secret or set shared_secret".to_string())
        })?;

    let request = RegistrationRequest {
        hostname: platform::hostname(),
        classroom_name: args.classroom.clone(),
    };
    println!("📝 Registering {} with {}...", request.hostname, api_url);
    let url = registration::register(&api_url, &secret, &request, config.fetch_timeout()).await?;
    registration::save_policy_url(&config.policy_url_file(), &url)?;
    println!("✅ Registered. Policy URL: {}", url);
    Ok(())
}
