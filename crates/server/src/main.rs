//! NetSession Server
//!
//! Accepts clients over TCP, relays chat lines between them and reads admin
//! commands (`/kick`, `/echo`, `/online`, `/quit`) from stdin.

use anyhow::{Context, Result};
use netsession_config::{NetConfig, DEFAULT_CONFIG_PATH};
use netsession_core::{Reliability, DEFAULT_PORT};
use netsession_network::{runtime, ServerSession, SessionConfig, TcpTransport};
use netsession_protocol::{build_text_message, decode_text_message, peek_message_id, MessageId};
use std::io::{self, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Chat line, relayed to every client as `"[nick]: text"`
const TEXT_MESSAGE: MessageId = MessageId::application(1);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 NetSession server starting up...");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = match NetConfig::load_default() {
        Ok(config) => {
            info!("✓ Configuration loaded from {}", DEFAULT_CONFIG_PATH);
            config
        }
        Err(e) => {
            warn!("⚠️  Failed to load {}: {}", DEFAULT_CONFIG_PATH, e);
            warn!("   Using default configuration (port {})", DEFAULT_PORT);
            NetConfig::default()
        }
    };
    config.display();
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let transport = TcpTransport::new().context("failed to start TCP transport")?;
    let mut server = ServerSession::new(transport, session_config(&config))
        .context("invalid session configuration")?;

    server.set_connected_callback(|_, client| {
        info!("Client {} joined as \"{}\"", client.handle, client.nickname);
    });
    server.set_disconnected_callback(|state, client| {
        info!("Client \"{}\" left, {} remaining", client.nickname, state.client_count());
    });

    server.set_packet_callback(|state, sender, message| {
        match peek_message_id(&message) {
            Ok(id) if id == TEXT_MESSAGE => {}
            Ok(id) => {
                warn!("Ignoring message {} from {}", id, sender.nickname);
                return;
            }
            Err(e) => {
                warn!("Malformed message from {}: {}", sender.nickname, e);
                return;
            }
        }

        let text = match decode_text_message(&message) {
            Ok((_, text)) => text,
            Err(e) => {
                warn!("Malformed chat line from {}: {}", sender.nickname, e);
                return;
            }
        };

        let line = format!("[{}]: {}", sender.nickname, text);
        match build_text_message(TEXT_MESSAGE, &line) {
            Ok(relay) => {
                state.broadcast(relay.as_slice(), None, Reliability::Reliable);
            }
            Err(e) => warn!("Failed to relay chat line: {}", e),
        }
        state.output().info(line);
    });

    server.register_command("/echo", |state, parameters| {
        if parameters.is_empty() {
            state.output().info("Command usage: ");
            state.output().info("\t/echo [Message]");
            return Ok(());
        }

        let line = format!("[Server]: {}", parameters);
        let message = build_text_message(TEXT_MESSAGE, &line)?;
        state.broadcast(message.as_slice(), None, Reliability::Reliable);
        state.output().info(line);
        Ok(())
    });

    server.register_command("/online", |state, _| {
        let listing = state.connected_users();
        state.output().info(listing);
        Ok(())
    });

    let handle = runtime::start_with_input(server, BufReader::new(io::stdin()))
        .context("failed to start server session")?;
    info!("🎮 Server is running, type /quit to stop");

    handle.join()?;
    info!("👋 Server stopped");
    Ok(())
}

fn session_config(config: &NetConfig) -> SessionConfig {
    SessionConfig {
        address: config.address.clone(),
        port: config.port,
        poll_interval: config.poll_interval(),
        max_clients: config.max_clients,
        output_log_capacity: config.output_log_capacity,
        ..SessionConfig::default()
    }
}
