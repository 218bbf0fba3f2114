//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Rotates short-lived cloud credentials for LLM gateway backends
#[derive(Parser, Debug)]
#[command(name = "credential-rotator")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "CREDENTIAL_ROTATOR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "CREDENTIAL_ROTATOR_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "CREDENTIAL_ROTATOR_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to `run`)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Keep every configured policy rotated until interrupted (default)
    Run,

    /// Rotate one policy now, regardless of its expiry
    Rotate {
        /// Policy as `namespace/name`
        #[arg(required = true)]
        policy: String,
    },

    /// Show the stored expiry and pre-rotation time of every policy
    Status,

    /// Validate the configuration and exit
    Validate,
}

/// Split `namespace/name`.
///
/// # Errors
///
/// Returns a message when either half is missing.
pub fn parse_policy_ref(s: &str) -> Result<(&str, &str), String> {
    match s.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((ns, name))
        }
        _ => Err(format!("expected namespace/name, got '{s}'")),
    }
}
