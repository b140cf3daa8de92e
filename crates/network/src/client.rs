//! # Client Session
//!
//! A client session owns one outbound connection and drives it through a small
//! state machine:
//!
//! ```text
//! Disconnected ──connect──→ Connecting ──accepted──→ Connected
//!      ↑                        │                       │
//!      │                        └──failed──→ Failed     │
//!      └──────────── local close / peer close / fault ──┘
//! ```
//!
//! Everything runs on the session's network thread: [`ClientSession::poll`]
//! drains received messages, then transport state changes, then queued
//! command lines. Callbacks receive `&mut ClientState` so they can send
//! replies or close the connection from inside the handler.
//!
//! # Built-in Messages
//!
//! `SERVER_NOTICE` messages are written to the session's [`OutputLog`]; every
//! other message is passed to the packet callback.

use crate::config::SessionConfig;
use crate::output::OutputLog;
use crate::runtime::Session;
use crate::transport::{StateChange, Transport, TransportState};
use netsession_commands::{
    is_number, parse_parameters, CommandQueue, CommandRouter, Dispatch,
};
use netsession_core::{
    ConnectionHandle, NetError, Reliability, Result, SessionRole, DEFAULT_PORT, LOOPBACK_ADDRESS,
};
use netsession_protocol::{
    build_nickname_set, build_presence_query, decode_server_notice, peek_message_id, BufferView,
    MessageId,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Close reason sent to the server on a local disconnect
pub const CLIENT_CLOSE_REASON: &str = "Closed by Client";

/// Connection status of a client session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }
}

/// Why a client connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Closed by this client
    Local,
    /// The server closed the connection
    ClosedByPeer(String),
    /// The transport detected a fault
    ProblemDetected(String),
    /// The connection never got established
    ConnectFailed(String),
}

impl DisconnectReason {
    /// Whether the session never reached `Connected`
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, Self::ConnectFailed(_))
    }

    /// Transport-supplied detail, empty for a local close
    pub fn detail(&self) -> &str {
        match self {
            Self::Local => "",
            Self::ClosedByPeer(detail) | Self::ProblemDetected(detail) | Self::ConnectFailed(detail) => {
                detail
            }
        }
    }
}

/// Lifecycle events waiting to be handed to callbacks
#[derive(Debug)]
enum ClientEvent {
    Connected,
    Disconnected(DisconnectReason),
}

/// Callback fired when the connection reaches `Connected`
pub type ClientConnectedCallback = Box<dyn FnMut(&mut ClientState) + Send>;

/// Callback fired when the connection ends or fails to establish
pub type ClientDisconnectedCallback = Box<dyn FnMut(&mut ClientState, &DisconnectReason) + Send>;

/// Callback fired for every message not handled by the session itself
pub type ClientPacketCallback = Box<dyn FnMut(&mut ClientState, BufferView<'_>) + Send>;

/// Mutable state of a client session
///
/// Handed to command handlers and callbacks.
pub struct ClientState {
    transport: Box<dyn Transport>,
    status: ConnectionStatus,
    connection: Option<ConnectionHandle>,
    output: OutputLog,
    stop: Arc<AtomicBool>,
    events: Vec<ClientEvent>,
}

impl ClientState {
    fn new(transport: Box<dyn Transport>, output: OutputLog) -> Self {
        Self {
            transport,
            status: ConnectionStatus::Disconnected,
            connection: None,
            output,
            stop: Arc::new(AtomicBool::new(false)),
            events: Vec::new(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Handle of the current connection, if one is open or opening
    pub fn connection(&self) -> Option<ConnectionHandle> {
        self.connection
    }

    pub fn output(&self) -> &OutputLog {
        &self.output
    }

    /// Ask the session loop to stop after the current iteration
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Start connecting to a server
    ///
    /// Ignored while a connection is already opening or open. A port of 0
    /// means [`DEFAULT_PORT`].
    ///
    /// # Returns
    /// - `Ok(())` - The attempt started (or was ignored)
    /// - `Err(NetError::Usage)` - `address` is blank
    /// - `Err(e)` - The transport refused the attempt; status moves through
    ///   `Connecting` to `Failed` and a disconnected event is queued
    pub fn connect(&mut self, address: &str, port: u16) -> Result<()> {
        if matches!(self.status, ConnectionStatus::Connecting | ConnectionStatus::Connected) {
            debug!("Ignoring connect request while {}", self.status.as_str());
            return Ok(());
        }

        let address = address.trim();
        if address.is_empty() {
            return Err(NetError::Usage("No server address given".into()));
        }
        let port = if port == 0 { DEFAULT_PORT } else { port };

        self.output.info(format!("Connecting to server {}:{}", address, port));
        self.status = ConnectionStatus::Connecting;
        match self.transport.connect(address, port) {
            Ok(handle) => {
                self.connection = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.status = ConnectionStatus::Failed;
                self.output.error("Error: Failed to connect to server.");
                self.events
                    .push(ClientEvent::Disconnected(DisconnectReason::ConnectFailed(e.to_string())));
                Err(e)
            }
        }
    }

    /// Close the current connection
    ///
    /// # Returns
    /// `true` if a connection was open or opening
    pub fn close_connection(&mut self) -> bool {
        let Some(handle) = self.connection.take() else {
            return false;
        };
        self.transport.close(handle, CLIENT_CLOSE_REASON);

        let was_connected = self.status == ConnectionStatus::Connected;
        self.status = ConnectionStatus::Disconnected;
        if was_connected {
            self.events.push(ClientEvent::Disconnected(DisconnectReason::Local));
        }
        true
    }

    /// Send one message to the server
    pub fn send_to_server(&mut self, payload: &[u8], reliability: Reliability) -> Result<()> {
        match self.connection {
            Some(handle) if self.is_connected() => self.transport.send(handle, payload, reliability),
            _ => Err(NetError::Usage("Client is not connected to a server".into())),
        }
    }

    /// Drive the status machine with one transport state change
    pub fn handle_state_change(&mut self, change: &StateChange) {
        if self.connection != Some(change.handle) {
            debug!("Ignoring state change for stale connection {}", change.handle);
            return;
        }

        match change.new_state {
            TransportState::Connected => {
                if self.status == ConnectionStatus::Connecting {
                    self.status = ConnectionStatus::Connected;
                    self.output.info("Connected to server");
                    self.events.push(ClientEvent::Connected);
                }
            }
            TransportState::ClosedByPeer | TransportState::ProblemDetectedLocally => {
                let detail = change.end_reason.clone();
                let reason = if self.status == ConnectionStatus::Connecting {
                    self.output.warn(with_detail("Failed to connect to server.", &detail));
                    DisconnectReason::ConnectFailed(detail)
                } else if change.new_state == TransportState::ProblemDetectedLocally {
                    self.output.warn(with_detail("Lost connection with server.", &detail));
                    DisconnectReason::ProblemDetected(detail)
                } else {
                    self.output.info(with_detail("Disconnected from server.", &detail));
                    DisconnectReason::ClosedByPeer(detail)
                };

                self.transport.close(change.handle, "");
                self.connection = None;
                self.status = if reason.is_connect_failure() {
                    ConnectionStatus::Failed
                } else {
                    ConnectionStatus::Disconnected
                };
                self.events.push(ClientEvent::Disconnected(reason));
            }
            TransportState::None | TransportState::Connecting => {}
        }
    }
}

fn with_detail(message: &str, detail: &str) -> String {
    if detail.is_empty() {
        message.to_string()
    } else {
        format!("{} {}", message, detail)
    }
}

/// A client endpoint: one connection, a command table and callbacks
pub struct ClientSession {
    state: ClientState,
    router: CommandRouter<ClientState>,
    queue: CommandQueue,
    config: SessionConfig,
    on_connected: Option<ClientConnectedCallback>,
    on_disconnected: Option<ClientDisconnectedCallback>,
    on_packet: Option<ClientPacketCallback>,
}

impl ClientSession {
    /// Create a client session over `transport` with the built-in commands
    /// registered
    pub fn new(transport: impl Transport + 'static, config: SessionConfig) -> Result<Self> {
        config.validate().map_err(NetError::Config)?;

        let output = OutputLog::new(config.output_log_capacity);
        let mut router = CommandRouter::new();
        register_builtin_commands(&mut router);

        Ok(Self {
            state: ClientState::new(Box::new(transport), output),
            router,
            queue: CommandQueue::new(),
            config,
            on_connected: None,
            on_disconnected: None,
            on_packet: None,
        })
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ClientState {
        &mut self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn output(&self) -> &OutputLog {
        &self.state.output
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start connecting to `address:port`
    ///
    /// A synchronous failure fires the disconnected callback before returning.
    pub fn connect(&mut self, address: &str, port: u16) -> Result<()> {
        let result = self.state.connect(address, port);
        self.fire_events();
        result
    }

    /// Close the connection, firing the disconnected callback if it was open
    pub fn close_connection(&mut self) -> bool {
        let closed = self.state.close_connection();
        self.fire_events();
        closed
    }

    pub fn send_to_server(&mut self, payload: &[u8], reliability: Reliability) -> Result<()> {
        self.state.send_to_server(payload, reliability)
    }

    /// Register (or replace) a command handler
    pub fn register_command<F>(&mut self, keyword: impl Into<String>, handler: F)
    where
        F: FnMut(&mut ClientState, &str) -> Result<()> + Send + 'static,
    {
        self.router.register(keyword, handler);
    }

    pub fn set_connected_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut ClientState) + Send + 'static,
    {
        self.on_connected = Some(Box::new(callback));
    }

    pub fn set_disconnected_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut ClientState, &DisconnectReason) + Send + 'static,
    {
        self.on_disconnected = Some(Box::new(callback));
    }

    pub fn set_packet_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut ClientState, BufferView<'_>) + Send + 'static,
    {
        self.on_packet = Some(Box::new(callback));
    }

    /// Queue a command line as if it had been typed
    pub fn push_input(&self, line: impl Into<String>) {
        self.queue.push(line);
    }

    pub fn command_queue(&self) -> CommandQueue {
        self.queue.clone()
    }

    /// `"Commands: \n\t/a, /b, ..."`
    pub fn command_list(&self) -> String {
        self.router.command_list()
    }

    /// Run one iteration of the session loop
    ///
    /// # Purpose
    /// Drains received messages, then state changes, then queued commands.
    /// Per-message and per-command failures are logged; only fatal errors
    /// are returned.
    pub fn poll(&mut self) -> Result<()> {
        if self.state.connection.is_some() {
            self.poll_messages()?;
            self.poll_state_changes();
        }
        self.handle_commands()
    }

    fn poll_messages(&mut self) -> Result<()> {
        let batch = self.config.receive_batch;
        loop {
            let messages = self.state.transport.receive(batch)?;
            let count = messages.len();

            for message in messages {
                self.handle_message(&message.payload);
            }

            if count < batch {
                return Ok(());
            }
        }
    }

    fn handle_message(&mut self, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }

        match peek_message_id(payload) {
            Ok(MessageId::SERVER_NOTICE) => match decode_server_notice(payload) {
                Ok(text) => self.state.output.info(text),
                Err(e) => warn!("Dropping malformed server notice: {}", e),
            },
            Ok(_) => {
                if let Some(callback) = self.on_packet.as_mut() {
                    callback(&mut self.state, BufferView::from(payload));
                }
            }
            Err(e) => warn!("Dropping message without an identifier: {}", e),
        }
        self.fire_events();
    }

    fn poll_state_changes(&mut self) {
        for change in self.state.transport.poll_state_changes() {
            self.state.handle_state_change(&change);
            self.fire_events();
        }
    }

    fn handle_commands(&mut self) -> Result<()> {
        while !self.state.stop_requested() {
            let Some(line) = self.queue.next() else {
                break;
            };

            match self.router.dispatch(&mut self.state, &line) {
                Ok(Dispatch::Unknown(keyword)) => {
                    debug!("No handler for command: {}", keyword);
                    self.state.output.warn("Invalid command entered.");
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => self.state.output.error(format!("Error: {}", e)),
            }
            self.fire_events();
        }
        Ok(())
    }

    fn fire_events(&mut self) {
        while !self.state.events.is_empty() {
            let events = std::mem::take(&mut self.state.events);
            for event in events {
                match event {
                    ClientEvent::Connected => {
                        if let Some(callback) = self.on_connected.as_mut() {
                            callback(&mut self.state);
                        }
                    }
                    ClientEvent::Disconnected(reason) => {
                        if let Some(callback) = self.on_disconnected.as_mut() {
                            callback(&mut self.state, &reason);
                        }
                    }
                }
            }
        }
    }
}

impl Session for ClientSession {
    fn role(&self) -> SessionRole {
        SessionRole::Client
    }

    fn start(&mut self) -> Result<()> {
        self.state.output.info("Client started.");
        let commands = self.command_list();
        self.state.output.info(commands);
        Ok(())
    }

    fn poll(&mut self) -> Result<()> {
        ClientSession::poll(self)
    }

    fn shutdown(&mut self) {
        self.close_connection();
        self.state.output.info("Client stopped.");
    }

    fn command_queue(&self) -> CommandQueue {
        self.queue.clone()
    }

    fn output_log(&self) -> OutputLog {
        self.state.output.clone()
    }

    fn stop_flag(&self) -> Arc<AtomicBool> {
        self.state.stop.clone()
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval
    }
}

fn register_builtin_commands(router: &mut CommandRouter<ClientState>) {
    router.register("/quit", quit_command);
    router.register("/exit", quit_command);
    router.register("/connect", connect_command);
    router.register("/join", connect_command);
    router.register("/disconnect", disconnect_command);
    router.register("/nickname", nickname_command);
    router.register("/nick", nickname_command);
    router.register("/whosonline", online_command);
    router.register("/online", online_command);
}

fn ignore_parameters(state: &ClientState, parameters: &str) {
    if !parameters.is_empty() {
        state.output.warn("Warning: Ignoring parameters.");
    }
}

/// Warn and return `false` when there is no established connection
fn require_connection(state: &ClientState) -> bool {
    if !state.is_connected() {
        state.output.warn("Warning: Client is not connected to a server.");
        return false;
    }
    true
}

fn quit_command(state: &mut ClientState, parameters: &str) -> Result<()> {
    ignore_parameters(state, parameters);
    state.request_stop();
    Ok(())
}

fn connect_command(state: &mut ClientState, parameters: &str) -> Result<()> {
    if state.is_connected() {
        state.output.warn("Warning: Client is already connected to a server.");
        return Ok(());
    }

    let params = parse_parameters(parameters);
    let Some(address) = params.first().filter(|address| !address.trim().is_empty()) else {
        state.output.info("Command usage: ");
        state.output.info("\t/connect [IP] [Port]");
        state.output.info("\t/join [IP] [Port]");
        return Ok(());
    };

    let address = if address == "default" {
        LOOPBACK_ADDRESS
    } else {
        address.as_str()
    };
    let port = params
        .get(1)
        .filter(|port| is_number(port))
        .and_then(|port| port.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);

    match state.connect(address, port) {
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            // Already reported through the output log and the disconnected event
            debug!("Connect attempt failed: {}", e);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

fn disconnect_command(state: &mut ClientState, parameters: &str) -> Result<()> {
    if !require_connection(state) {
        return Ok(());
    }
    ignore_parameters(state, parameters);
    state.output.info("Closing Connection..");
    state.close_connection();
    Ok(())
}

fn nickname_command(state: &mut ClientState, parameters: &str) -> Result<()> {
    if !require_connection(state) {
        return Ok(());
    }

    let params = parse_parameters(parameters);
    let Some(nickname) = params.first().filter(|nickname| !nickname.trim().is_empty()) else {
        state.output.info("Command usage: ");
        state.output.info("\t/nick [Nickname]");
        return Ok(());
    };

    let message = build_nickname_set(nickname)?;
    state.send_to_server(message.as_slice(), Reliability::Reliable)
}

fn online_command(state: &mut ClientState, parameters: &str) -> Result<()> {
    if !require_connection(state) {
        return Ok(());
    }
    ignore_parameters(state, parameters);

    let message = build_presence_query()?;
    state.send_to_server(message.as_slice(), Reliability::Reliable)
}
