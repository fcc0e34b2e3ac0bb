use clap::Parser;
use std::path::PathBuf;

pub const COMMAND_VAR: &str = "ENTRYPOINT_COMMAND";
pub const PORT_VAR: &str = "ENTRYPOINT_PORT";
pub const STOPFILE_VAR: &str = "ENTRYPOINT_STOPFILE";

/// Supervise a single child process and stop it on request: a stop file, an
/// HTTP `/quit`, the child exiting, or SIGINT/SIGTERM.
#[derive(Parser, Debug, Default)]
#[command(name = "sidecar-entrypoint", version, about)]
pub struct Cli {
    /// Command line for the child process (split on whitespace)
    #[arg(long, env = COMMAND_VAR)]
    pub command: Option<String>,

    /// Port for the shutdown HTTP listener
    #[arg(long, env = PORT_VAR)]
    pub port: Option<String>,

    /// Path whose appearance triggers shutdown
    #[arg(long = "stop-file", env = STOPFILE_VAR)]
    pub stop_file: Option<PathBuf>,

    /// Debug-level logging (poll ticks, signal delivery details)
    #[arg(short, long)]
    pub verbose: bool,
}

/// Resolved entrypoint settings. All three values are required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub command: String,
    pub port: String,
    pub stop_file: PathBuf,
}

/// Errors raised while resolving the configuration.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A required value was neither passed as a flag nor set in the environment.
    Missing { var: &'static str },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing { var } => {
                write!(f, "{var} environment variable is required")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Validate parsed CLI/env values. Empty strings count as missing.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let command = required(cli.command.as_deref(), COMMAND_VAR)?;
        let port = required(cli.port.as_deref(), PORT_VAR)?;
        let stop_file = cli
            .stop_file
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
            .cloned()
            .ok_or(ConfigError::Missing { var: STOPFILE_VAR })?;

        Ok(Self {
            command: command.to_string(),
            port: port.to_string(),
            stop_file,
        })
    }
}

fn required<'a>(value: Option<&'a str>, var: &'static str) -> Result<&'a str, ConfigError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigError::Missing { var }),
    }
}
