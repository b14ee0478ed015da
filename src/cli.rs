//! Command-line interface for the demo server binary.
//!
//! Flags override values read from the configuration file, which in turn
//! override the built-in defaults.

use std::path::PathBuf;

use clap::Parser;

use crate::config::ServerConfig;
use crate::error::ConfigError;

/// TCP server core demo: accepts HTTP/1.x connections, echoes every parsed
/// request back as JSON and exposes an interactive console.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Args {
    /// Path to a key=value configuration file
    #[arg(short = 'f', long)]
    pub config: Option<PathBuf>,

    /// IPv4 address to bind, or "ANY" for all interfaces
    #[arg(short, long)]
    pub address: Option<String>,

    /// TCP port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Number of assembler worker tasks
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress stdout logging
    #[arg(short, long)]
    pub quiet: bool,

    /// Write detailed logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl Args {
    /// Resolve the effective server configuration: defaults, then the file,
    /// then explicit flags.
    pub fn resolve_config(&self) -> Result<ServerConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };
        if let Some(address) = &self.address {
            config.address = address.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from(["tcpframe", "-a", "127.0.0.1", "-p", "9000", "-w", "4"]);
        let config = args.resolve_config().unwrap();
        assert_eq!(config.address, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.workers, 4);
    }

    #[test]
    fn defaults_apply_without_flags() {
        let args = Args::parse_from(["tcpframe"]);
        let config = args.resolve_config().unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn invalid_flag_values_are_rejected() {
        let args = Args::parse_from(["tcpframe", "-w", "0"]);
        assert!(args.resolve_config().is_err());
    }
}
