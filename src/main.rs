//! Demo server binary: wires the core to its collaborators.
//!
//! Parses flags and an optional configuration file, initializes logging,
//! starts an HTTP server that echoes every parsed request back as JSON and
//! runs the interactive console until `quit`.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use tracing::{debug, info};

use tcpframe::assembler::http::StartLine;
use tcpframe::cli::Args;
use tcpframe::console::Console;
use tcpframe::{logging, HttpAssembler, HttpMessage, HttpStatus, HttpVersion, Server};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = logging::init(args.verbose, args.quiet, args.log_file.as_deref());

    let config = args.resolve_config()?;
    info!(
        "tcpframe {} starting on {}:{}",
        tcpframe::VERSION,
        config.address,
        config.port
    );

    let server = Arc::new(Server::new(config, HttpAssembler::new())?);
    server.start().await?;

    let handler = tokio::spawn(handle_requests(server.clone()));

    let mut console = Console::new();
    {
        let server = server.clone();
        console.register("clients", move |_args| {
            let mut out = std::io::stdout();
            let _ = server.show_clients(&mut out);
        });
    }
    console.run().await;

    handler.abort();
    server.stop().await;
    Ok(())
}

/// What the sample handler answers with: a JSON echo of the parsed request.
#[derive(Serialize)]
struct EchoReply<'a> {
    method: &'a str,
    uri: &'a str,
    body_bytes: usize,
}

/// Sample request handler: answers every request with a JSON echo of what
/// was parsed.
async fn handle_requests(server: Arc<Server<HttpAssembler>>) {
    loop {
        let request = server.next().await;
        let client = request.client;
        match &request.message.start {
            StartLine::Request { method, uri } => {
                debug!(
                    "request from client {}: {} {}",
                    client.id,
                    method.as_str(),
                    uri
                );
                let reply = EchoReply {
                    method: method.as_str(),
                    uri,
                    body_bytes: request.message.body.len(),
                };
                let body = serde_json::to_string(&reply).unwrap_or_default();
                let response =
                    HttpMessage::response(HttpVersion::Http11, HttpStatus::Ok, body.into_bytes());
                server.send(client.id, response.serialize());
            }
            StartLine::Response { status, .. } => {
                debug!(
                    "ignoring response message (status {}) from client {}",
                    status, client.id
                );
            }
        }
    }
}
