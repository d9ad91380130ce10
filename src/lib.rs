// src/lib.rs
//!
//! OpenPath endpoint agent.
//!
//! Turns a remotely published domain whitelist into local enforcement: a
//! DNS sinkhole that only resolves allowed names, an outbound firewall that
//! stops resolver bypass, and browser policies for path-level blocks. Three
//! drivers keep it converged and fail open when enforcement would otherwise
//! leave the machine without a network.

#[macro_use]
pub mod logging;

pub mod agent;
pub mod cli;
pub mod commands;
pub mod config;
pub mod enforcement;
pub mod error;
pub mod native_host;
pub mod persist;
pub mod platform;
pub mod policy;

#[cfg(test)]
mod tests;

pub use error::{AgentError, Result};
