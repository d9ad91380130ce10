// src/platform/command.rs

use crate::error::{AgentError, Result};
use std::process::{Command, Output};

/// Runs a command and fails on spawn errors or a non-zero exit status.
pub fn run_checked(program: &str, args: &[&str]) -> Result<Output> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| AgentError::CommandError(format!("Failed to execute {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AgentError::CommandError(format!(
            "{} {} failed ({}): {}",
            program,
            args.join(" "),
            output.status,
            stderr.trim()
        )));
    }

    log::debug!("{} {} succeeded", program, args.join(" "));
    Ok(output)
}

/// True when the command ran and exited zero.
pub fn succeeds(program: &str, args: &[&str]) -> bool {
    Command::new(program)
        .args(args)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Stdout of a successful command, or `None`.
pub fn stdout_of(program: &str, args: &[&str]) -> Option<String> {
    run_checked(program, args)
        .ok()
        .map(|output| String::from_utf8_lossy(&output.stdout).into_owned())
}

/// First token of `text` that parses as an IP address.
pub fn first_ip(text: &str) -> Option<String> {
    text.split_whitespace()
        .find(|token| token.parse::<std::net::IpAddr>().is_ok())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_ip_skips_cnames() {
        assert_eq!(
            first_ip("www.example.com.\nexample.com.\n93.184.216.34\n"),
            Some("93.184.216.34".to_string())
        );
        assert_eq!(first_ip(";; connection timed out"), None);
    }
}
