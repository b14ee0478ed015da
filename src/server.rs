//! The public server facade.

use std::io;
use std::net::SocketAddr;

use crate::assembler::MessageAssembler;
use crate::client::ClientId;
use crate::config::ServerConfig;
use crate::engine::ConnectionEngine;
use crate::error::ServerError;
use crate::queue::RequestEnvelope;

/// A TCP server that frames incoming bytes through the assembler `A` and
/// hands fully assembled messages to the application.
///
/// ```no_run
/// use tcpframe::{HttpAssembler, Server, ServerConfig};
///
/// # async fn run() -> anyhow::Result<()> {
/// let config = ServerConfig::new("ANY", 8080, 2)?;
/// let server = Server::new(config, HttpAssembler::new())?;
/// server.start().await?;
///
/// loop {
///     let request = server.next().await;
///     // ... build a reply ...
///     server.send(request.client.id, b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n".to_vec());
/// }
/// # }
/// ```
pub struct Server<A: MessageAssembler> {
    engine: ConnectionEngine<A>,
}

impl<A: MessageAssembler> Server<A> {
    /// Validate the configuration and build an idle server.
    pub fn new(config: ServerConfig, assembler: A) -> Result<Self, ServerError> {
        config.validate()?;
        Ok(Self {
            engine: ConnectionEngine::new(config, assembler),
        })
    }

    /// Bind the configured endpoint and begin serving. Idempotent while
    /// running.
    pub async fn start(&self) -> Result<(), ServerError> {
        self.engine.start().await
    }

    /// Stop accepting, drain pending I/O and destroy every client.
    pub async fn stop(&self) {
        self.engine.stop().await
    }

    /// Queue a complete outbound message for the named client.
    pub fn send(&self, id: ClientId, bytes: Vec<u8>) {
        self.engine.send(id, bytes)
    }

    /// Wait for the next fully assembled request envelope.
    pub async fn next(&self) -> RequestEnvelope<A::Message> {
        self.engine.next().await
    }

    /// Write a human-readable table of the live clients.
    pub fn show_clients(&self, out: &mut dyn io::Write) -> io::Result<()> {
        self.engine.show_clients(out)
    }

    /// The configured address string (possibly the `"ANY"` sentinel).
    pub fn ip(&self) -> &str {
        self.engine.ip()
    }

    /// The configured port.
    pub fn port(&self) -> u16 {
        self.engine.port()
    }

    /// The address actually bound, available once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.engine.local_addr()
    }

    /// Number of currently connected clients.
    pub fn client_count(&self) -> usize {
        self.engine.client_count()
    }
}
