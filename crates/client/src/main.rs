//! NetSession Client
//!
//! Connects to the configured server over TCP and reads commands from stdin.
//! `/echo [Message]` sends a chat line; everything else is a built-in client
//! command.

use anyhow::{Context, Result};
use netsession_config::{NetConfig, DEFAULT_CONFIG_PATH};
use netsession_core::{Reliability, DEFAULT_PORT};
use netsession_network::{runtime, ClientSession, SessionConfig, TcpTransport};
use netsession_protocol::{build_text_message, decode_text_message, MessageId};
use std::io::{self, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Chat line exchanged with the server
const TEXT_MESSAGE: MessageId = MessageId::application(1);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 NetSession client starting up...");

    let config = match NetConfig::load_default() {
        Ok(config) => config,
        Err(e) => {
            warn!("⚠️  Failed to load {}: {}", DEFAULT_CONFIG_PATH, e);
            warn!("   Using default configuration (port {})", DEFAULT_PORT);
            NetConfig::default()
        }
    };
    config.display();

    let transport = TcpTransport::new().context("failed to start TCP transport")?;
    let mut client = ClientSession::new(transport, session_config(&config))
        .context("invalid session configuration")?;

    client.set_connected_callback(|state| {
        state.output().info("Type /echo [Message] to chat, /quit to leave.");
    });
    client.set_disconnected_callback(|_, reason| {
        if reason.is_connect_failure() {
            warn!("Use /connect [IP] [Port] to try again");
        }
    });

    client.set_packet_callback(|state, message| match decode_text_message(&message) {
        Ok((id, text)) if id == TEXT_MESSAGE => state.output().info(text),
        Ok((id, _)) => warn!("Ignoring message {} from server", id),
        Err(e) => warn!("Malformed message from server: {}", e),
    });

    client.register_command("/echo", |state, parameters| {
        if !state.is_connected() {
            state.output().warn("Warning: Client is not connected to a server.");
            return Ok(());
        }
        if parameters.is_empty() {
            state.output().info("Command usage: ");
            state.output().info("\t/echo [Message]");
            return Ok(());
        }

        let message = build_text_message(TEXT_MESSAGE, parameters)?;
        state.send_to_server(message.as_slice(), Reliability::Reliable)
    });

    client.push_input(format!("/connect {} {}", config.address, config.port));

    let handle = runtime::start_with_input(client, BufReader::new(io::stdin()))
        .context("failed to start client session")?;

    handle.join()?;
    info!("👋 Client stopped");
    Ok(())
}

fn session_config(config: &NetConfig) -> SessionConfig {
    SessionConfig {
        address: config.address.clone(),
        port: config.port,
        poll_interval: config.poll_interval(),
        output_log_capacity: config.output_log_capacity,
        ..SessionConfig::default()
    }
}
