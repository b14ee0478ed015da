//! # tcpframe
//!
//! A TCP server core that accepts many concurrent connections, streams their
//! bytes through a pluggable stream-to-message assembler and hands fully
//! framed messages to the application over a blocking queue. An HTTP/1.x
//! assembler ships as the reference implementation.

pub mod assembler;
pub mod cli;
pub mod client;
pub mod config;
pub mod console;
pub mod engine;
pub mod error;
pub mod logging;
pub mod queue;
pub mod server;

pub use assembler::http::{HttpAssembler, HttpLimits, HttpMessage, HttpMethod, HttpStatus, HttpVersion};
pub use assembler::{AssembleError, DefaultAssembler, MessageAssembler};
pub use client::{ClientId, ClientInfo, RecvBuffer};
pub use config::ServerConfig;
pub use error::{ConfigError, ServerError};
pub use queue::RequestEnvelope;
pub use server::Server;

/// The current crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values and protocol constants.
pub mod defaults {
    /// Per-connection receive buffer capacity and outbound message cap.
    pub const MAX_BUFFER_LENGTH_FOR_REQUESTS: usize = 8192;

    /// Listen backlog handed to the kernel.
    pub const MAX_CONNECTION_QUEUE: i32 = 5;

    /// Address sentinel meaning all interfaces.
    pub const ANY_IP: &str = "ANY";

    /// Default number of assembler worker tasks.
    pub const DEFAULT_WORKERS: usize = 2;
}
