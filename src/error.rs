//! Error types for server setup and configuration.

use std::net::SocketAddr;
use thiserror::Error;

/// Fatal errors raised by [`crate::server::Server::start`].
///
/// Setup errors are the only errors surfaced to the caller; runtime I/O and
/// protocol failures are confined to the affected client and logged.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be created or configured.
    #[error("failed to initialize listening socket: {source}")]
    SocketInit {
        #[source]
        source: std::io::Error,
    },

    /// The configured address/port could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The bound socket refused to enter the listening state.
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The server was constructed with an invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors produced while reading or validating a [`crate::config::ServerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed configuration line {line}: {text:?}")]
    Malformed { line: usize, text: String },

    #[error("invalid port {0:?}: expected a number in 1..=65535")]
    InvalidPort(String),

    #[error("invalid worker count {0:?}: expected a number of at least 1")]
    InvalidWorkers(String),

    #[error("invalid address {0:?}: expected an IPv4 address or \"ANY\"")]
    InvalidAddress(String),
}
