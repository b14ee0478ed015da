//! Server configuration and the configuration-file reader.
//!
//! The file format is one `key = value` pair per line, `#` starts a comment,
//! blank lines and surrounding whitespace are ignored. Unknown keys are
//! logged and skipped so a shared file can carry settings for other tools.

use std::net::Ipv4Addr;
use std::path::Path;

use tracing::warn;

use crate::defaults::{ANY_IP, DEFAULT_WORKERS};
use crate::error::ConfigError;

/// Address, port and worker count for a server instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// IPv4 address to bind, or the sentinel [`ANY_IP`] for all interfaces.
    pub address: String,
    /// Listening port, 1..=65535.
    pub port: u16,
    /// Number of assembler worker tasks, at least 1.
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ANY_IP.to_string(),
            port: 8080,
            workers: DEFAULT_WORKERS,
        }
    }
}

impl ServerConfig {
    pub fn new(
        address: impl Into<String>,
        port: u16,
        workers: usize,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            address: address.into(),
            port,
            workers,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort("0".to_string()));
        }
        if self.workers < 1 {
            return Err(ConfigError::InvalidWorkers(self.workers.to_string()));
        }
        if self.address != ANY_IP && self.address.parse::<Ipv4Addr>().is_err() {
            return Err(ConfigError::InvalidAddress(self.address.clone()));
        }
        Ok(())
    }

    /// Read a configuration file, starting from the defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::default();

        for (idx, raw) in text.lines().enumerate() {
            let line = match raw.find('#') {
                Some(pos) => &raw[..pos],
                None => raw,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::Malformed {
                line: idx + 1,
                text: raw.to_string(),
            })?;
            let key = key.trim();
            let value = value.trim();
            match key {
                "address" => config.address = value.to_string(),
                "port" => {
                    config.port = value
                        .parse()
                        .map_err(|_| ConfigError::InvalidPort(value.to_string()))?;
                }
                "workers" => {
                    config.workers = value
                        .parse()
                        .map_err(|_| ConfigError::InvalidWorkers(value.to_string()))?;
                }
                other => warn!("ignoring unknown configuration key {:?}", other),
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// The bind address as an IPv4 value; validated beforehand.
    pub(crate) fn ipv4(&self) -> Ipv4Addr {
        if self.address == ANY_IP {
            Ipv4Addr::UNSPECIFIED
        } else {
            self.address.parse().unwrap_or(Ipv4Addr::UNSPECIFIED)
        }
    }
}
