//! # Server Session
//!
//! A server session listens on one port and tracks every accepted client in a
//! [`ClientRegistry`]. Like the client it is polled from a single network
//! thread: received messages first, then transport state changes, then queued
//! command lines.
//!
//! # Client Lifecycle
//!
//! | Transport event               | Server reaction                                   |
//! |-------------------------------|---------------------------------------------------|
//! | `Connecting`                  | enforce `max_clients`, accept, record `User {n}`  |
//! | `Connected`                   | send the user listing, announce to everyone else  |
//! | closed, previously `Connected`| announce departure, fire disconnected, forget     |
//! | closed, never `Connected`     | drop any half-created record                      |
//!
//! # Built-in Messages
//!
//! - `NICKNAME_SET` - rename the sender if the nickname is free
//! - `PRESENCE_QUERY` - reply with the user listing
//!
//! Every other message goes to the packet callback together with the
//! sender's [`ClientRecord`].

use crate::config::SessionConfig;
use crate::output::OutputLog;
use crate::registry::{ClientRecord, ClientRegistry};
use crate::runtime::Session;
use crate::transport::{StateChange, Transport, TransportState};
use netsession_commands::{is_number, parse_parameters, CommandQueue, CommandRouter, Dispatch};
use netsession_core::{ConnectionHandle, NetError, Reliability, Result, SessionRole};
use netsession_protocol::{build_server_notice, decode_text_message, peek_message_id, BufferView, MessageId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Close reason sent to kicked clients
pub const KICK_REASON: &str = "Kicked by server";

/// Close reason sent to every client when the server stops
pub const SHUTDOWN_REASON: &str = "Server Shutdown";

/// Close reason sent when `max_clients` is reached
pub const SERVER_FULL_REASON: &str = "Server Full";

/// Notice sent when a nickname-set message carries a blank nickname
pub const NICKNAME_MISSING_NOTICE: &str = "Set Nickname Failed: No Nickname Provided.";

/// Notice sent when the requested nickname is taken
pub const NICKNAME_TAKEN_NOTICE: &str = "Set Nickname Failed: Another user already has this nickname!";

#[derive(Debug)]
enum ServerEvent {
    Connected(ClientRecord),
    Disconnected(ClientRecord),
}

/// Callback fired when a client is accepted
pub type ServerConnectedCallback = Box<dyn FnMut(&mut ServerState, &ClientRecord) + Send>;

/// Callback fired when a client leaves or is kicked
pub type ServerDisconnectedCallback = Box<dyn FnMut(&mut ServerState, &ClientRecord) + Send>;

/// Callback fired for every message not handled by the session itself
pub type ServerPacketCallback = Box<dyn FnMut(&mut ServerState, &ClientRecord, BufferView<'_>) + Send>;

/// Mutable state of a server session
///
/// Handed to command handlers and callbacks.
pub struct ServerState {
    transport: Box<dyn Transport>,
    registry: ClientRegistry,
    output: OutputLog,
    stop: Arc<AtomicBool>,
    max_clients: usize,
    port: Option<u16>,
    events: Vec<ServerEvent>,
}

impl ServerState {
    fn new(transport: Box<dyn Transport>, output: OutputLog, max_clients: usize) -> Self {
        Self {
            transport,
            registry: ClientRegistry::new(),
            output,
            stop: Arc::new(AtomicBool::new(false)),
            max_clients,
            port: None,
            events: Vec::new(),
        }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    pub fn output(&self) -> &OutputLog {
        &self.output
    }

    /// Port the server is listening on, once started
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Start accepting clients on `port` (0 picks a free port)
    pub fn listen(&mut self, port: u16) -> Result<u16> {
        let bound = self.transport.listen(port)?;
        self.port = Some(bound);
        self.output.info(format!("Server listening on port {}", bound));
        Ok(bound)
    }

    /// `"Current Users [N]: \n{a}, {b}, ..."`
    pub fn connected_users(&self) -> String {
        format!(
            "Current Users [{}]: \n{}",
            self.registry.len(),
            self.registry.nicknames().join(", ")
        )
    }

    /// Rename a client without checking uniqueness
    ///
    /// # Returns
    /// The previous nickname
    pub fn set_nickname(&mut self, handle: ConnectionHandle, nickname: &str) -> Result<String> {
        let record = self
            .registry
            .get_mut(handle)
            .ok_or_else(|| NetError::NotFound(format!("No client with ID [{}]", handle)))?;
        let old = std::mem::replace(&mut record.nickname, nickname.to_string());
        self.transport.set_connection_name(handle, nickname);
        Ok(old)
    }

    /// Send one message to one client
    pub fn send_to(&mut self, handle: ConnectionHandle, payload: &[u8], reliability: Reliability) -> Result<()> {
        if !self.registry.contains(handle) {
            return Err(NetError::NotFound(format!("No client with ID [{}]", handle)));
        }
        self.transport.send(handle, payload, reliability)
    }

    /// Send one message to every client except `exclude`
    ///
    /// Failed sends are logged and skipped.
    ///
    /// # Returns
    /// Number of clients the message was handed to
    pub fn broadcast(&mut self, payload: &[u8], exclude: Option<ConnectionHandle>, reliability: Reliability) -> usize {
        let mut sent = 0;
        for handle in self.registry.handles() {
            if Some(handle) == exclude {
                continue;
            }
            match self.transport.send(handle, payload, reliability) {
                Ok(()) => sent += 1,
                Err(e) => warn!("Failed to send to connection {}: {}", handle, e),
            }
        }
        debug!("Broadcast {} bytes to {} clients", payload.len(), sent);
        sent
    }

    /// Send a server notice to one client
    pub fn send_notice(&mut self, handle: ConnectionHandle, text: &str) -> Result<()> {
        let notice = build_server_notice(text)?;
        self.send_to(handle, notice.as_slice(), Reliability::Reliable)
    }

    /// Send a server notice to every client except `exclude`
    pub fn broadcast_notice(&mut self, text: &str, exclude: Option<ConnectionHandle>) -> Result<usize> {
        let notice = build_server_notice(text)?;
        Ok(self.broadcast(notice.as_slice(), exclude, Reliability::Reliable))
    }

    /// Disconnect a client by handle
    ///
    /// # Returns
    /// - `Ok(record)` - The client was removed
    /// - `Err(NetError::NotFound)` - No such client; nothing changed
    pub fn kick(&mut self, handle: ConnectionHandle) -> Result<ClientRecord> {
        let record = self.registry.remove(handle).ok_or_else(|| {
            NetError::NotFound(format!(
                "Could not kick client because ID [{}] is not connected!",
                handle
            ))
        })?;

        self.transport.close(handle, KICK_REASON);
        self.output.info(format!("Kicked {} [{}]", record.nickname, handle));
        self.events.push(ServerEvent::Disconnected(record.clone()));
        Ok(record)
    }

    /// Disconnect a client by exact nickname
    pub fn kick_by_nickname(&mut self, nickname: &str) -> Result<ClientRecord> {
        let handle = self
            .registry
            .find_by_nickname(nickname)
            .map(|record| record.handle)
            .ok_or_else(|| {
                NetError::NotFound(format!(
                    "Could not kick client because User [{}] is not connected!",
                    nickname
                ))
            })?;
        self.kick(handle)
    }

    /// Close every connection and forget all clients
    pub fn shutdown(&mut self) {
        self.output.info("Closing all connections...");
        for handle in self.registry.handles() {
            self.transport.close(handle, SHUTDOWN_REASON);
        }
        self.registry.clear();
        self.output.info("Server Shutting down..");
    }

    /// Apply one transport state change to the registry
    ///
    /// # Returns
    /// `Err(NetError::Consistency)` when the registry and the transport
    /// disagree about a connection
    pub fn handle_state_change(&mut self, change: &StateChange) -> Result<()> {
        match change.new_state {
            TransportState::Connecting => self.on_incoming(change),
            TransportState::Connected => self.on_connected(change),
            TransportState::ClosedByPeer | TransportState::ProblemDetectedLocally => self.on_closed(change),
            TransportState::None => Ok(()),
        }
    }

    fn on_incoming(&mut self, change: &StateChange) -> Result<()> {
        let handle = change.handle;
        if self.registry.contains(handle) {
            return Err(NetError::Consistency(format!(
                "Incoming connection {} already has a client record",
                handle
            )));
        }

        self.output.info(format!("Incoming connection {}", change.description));

        if self.max_clients > 0 && self.registry.len() >= self.max_clients {
            self.output
                .warn(format!("Rejected connection {}: server is full", change.description));
            self.transport.close(handle, SERVER_FULL_REASON);
            return Ok(());
        }

        if let Err(e) = self.transport.accept(handle) {
            debug!("Accept failed for {}: {}", handle, e);
            self.transport.close(handle, "");
            self.output.warn("Incoming connection failed. (was it already closed?)");
            return Ok(());
        }

        let record = ClientRecord::new(handle, self.registry.default_nickname());
        self.transport.set_connection_name(handle, &record.nickname);
        self.registry.insert(record.clone());
        self.events.push(ServerEvent::Connected(record));
        Ok(())
    }

    fn on_connected(&mut self, change: &StateChange) -> Result<()> {
        let handle = change.handle;
        let record = self.registry.get(handle).cloned().ok_or_else(|| {
            NetError::Consistency(format!("Connection {} is connected but has no client record", handle))
        })?;

        self.output.info(format!("Client connected. {}", change.description));

        let listing = self.connected_users();
        if let Err(e) = self.send_notice(handle, &listing) {
            warn!("Failed to send user listing to {}: {}", handle, e);
        }
        self.broadcast_notice(&format!("{} has connected!", record.nickname), Some(handle))?;
        Ok(())
    }

    fn on_closed(&mut self, change: &StateChange) -> Result<()> {
        let handle = change.handle;

        if change.old_state == TransportState::Connected {
            let record = self.registry.remove(handle).ok_or_else(|| {
                NetError::Consistency(format!("Closed connection {} has no client record", handle))
            })?;

            self.output.info(format!(
                "Connection {} {}, {}",
                change.description, change.new_state, change.end_reason
            ));
            self.broadcast_notice(&format!("{} has left.", record.nickname), Some(handle))?;
            self.events.push(ServerEvent::Disconnected(record));
        } else if self.registry.remove(handle).is_some() {
            debug!("Dropped half-open connection {}", handle);
        }

        self.transport.close(handle, "");
        Ok(())
    }

    /// Handle the session's own message types
    ///
    /// # Returns
    /// `Ok(true)` if the message was consumed, `Ok(false)` if it belongs to
    /// the application
    fn handle_builtin(&mut self, sender: &ClientRecord, payload: &[u8]) -> Result<bool> {
        match peek_message_id(payload)? {
            MessageId::NICKNAME_SET => {
                let (_, nickname) = decode_text_message(payload)?;
                self.handle_nickname_set(sender.handle, &nickname)?;
                Ok(true)
            }
            MessageId::PRESENCE_QUERY => {
                let listing = self.connected_users();
                self.send_notice(sender.handle, &listing)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn handle_nickname_set(&mut self, handle: ConnectionHandle, nickname: &str) -> Result<()> {
        if nickname.trim().is_empty() {
            return self.send_notice(handle, NICKNAME_MISSING_NOTICE);
        }
        if self.registry.find_by_nickname(nickname).is_some() {
            return self.send_notice(handle, NICKNAME_TAKEN_NOTICE);
        }

        let old = self.set_nickname(handle, nickname)?;
        let announcement = format!("{} is now {}", old, nickname);
        self.output.info(announcement.clone());
        self.broadcast_notice(&announcement, None)?;
        Ok(())
    }
}

/// A server endpoint: a listening port, a client registry and callbacks
pub struct ServerSession {
    state: ServerState,
    router: CommandRouter<ServerState>,
    queue: CommandQueue,
    config: SessionConfig,
    on_connected: Option<ServerConnectedCallback>,
    on_disconnected: Option<ServerDisconnectedCallback>,
    on_packet: Option<ServerPacketCallback>,
}

impl ServerSession {
    /// Create a server session over `transport` with the built-in commands
    /// registered
    ///
    /// The session does not listen until [`ServerSession::listen`] (or
    /// `Session::start`) is called.
    pub fn new(transport: impl Transport + 'static, config: SessionConfig) -> Result<Self> {
        config.validate().map_err(NetError::Config)?;

        let output = OutputLog::new(config.output_log_capacity);
        let mut router = CommandRouter::new();
        register_builtin_commands(&mut router);

        Ok(Self {
            state: ServerState::new(Box::new(transport), output, config.max_clients),
            router,
            queue: CommandQueue::new(),
            config,
            on_connected: None,
            on_disconnected: None,
            on_packet: None,
        })
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ServerState {
        &mut self.state
    }

    pub fn output(&self) -> &OutputLog {
        &self.state.output
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn client_count(&self) -> usize {
        self.state.client_count()
    }

    pub fn connected_users(&self) -> String {
        self.state.connected_users()
    }

    /// Listen on the configured port
    pub fn listen(&mut self) -> Result<u16> {
        self.state.listen(self.config.port)
    }

    /// Disconnect a client, firing the disconnected callback
    pub fn kick(&mut self, handle: ConnectionHandle) -> Result<ClientRecord> {
        let result = self.state.kick(handle);
        self.fire_events();
        result
    }

    pub fn kick_by_nickname(&mut self, nickname: &str) -> Result<ClientRecord> {
        let result = self.state.kick_by_nickname(nickname);
        self.fire_events();
        result
    }

    pub fn broadcast(&mut self, payload: &[u8], exclude: Option<ConnectionHandle>, reliability: Reliability) -> usize {
        self.state.broadcast(payload, exclude, reliability)
    }

    pub fn send_to(&mut self, handle: ConnectionHandle, payload: &[u8], reliability: Reliability) -> Result<()> {
        self.state.send_to(handle, payload, reliability)
    }

    /// Register (or replace) a command handler
    pub fn register_command<F>(&mut self, keyword: impl Into<String>, handler: F)
    where
        F: FnMut(&mut ServerState, &str) -> Result<()> + Send + 'static,
    {
        self.router.register(keyword, handler);
    }

    pub fn set_connected_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut ServerState, &ClientRecord) + Send + 'static,
    {
        self.on_connected = Some(Box::new(callback));
    }

    pub fn set_disconnected_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut ServerState, &ClientRecord) + Send + 'static,
    {
        self.on_disconnected = Some(Box::new(callback));
    }

    pub fn set_packet_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut ServerState, &ClientRecord, BufferView<'_>) + Send + 'static,
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

    pub fn command_list(&self) -> String {
        self.router.command_list()
    }

    /// Run one iteration of the session loop
    ///
    /// # Returns
    /// `Err` only for failures that make the session unusable, such as a
    /// registry that disagrees with the transport
    pub fn poll(&mut self) -> Result<()> {
        self.poll_messages()?;
        self.poll_state_changes()?;
        self.handle_commands()
    }

    fn poll_messages(&mut self) -> Result<()> {
        let batch = self.config.receive_batch;
        loop {
            let messages = self.state.transport.receive(batch)?;
            let count = messages.len();

            for message in messages {
                if message.payload.is_empty() {
                    continue;
                }
                let Some(record) = self.state.registry.get(message.sender).cloned() else {
                    warn!("Dropping message from unknown connection {}", message.sender);
                    continue;
                };

                match self.state.handle_builtin(&record, &message.payload) {
                    Ok(true) => {}
                    Ok(false) => {
                        if let Some(callback) = self.on_packet.as_mut() {
                            callback(&mut self.state, &record, BufferView::from(&message.payload));
                        }
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => warn!("Dropping message from {}: {}", record.nickname, e),
                }
                self.fire_events();
            }

            if count < batch {
                return Ok(());
            }
        }
    }

    fn poll_state_changes(&mut self) -> Result<()> {
        for change in self.state.transport.poll_state_changes() {
            match self.state.handle_state_change(&change) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("Failed to handle state change for {}: {}", change.handle, e),
            }
            self.fire_events();
        }
        Ok(())
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
                    ServerEvent::Connected(record) => {
                        if let Some(callback) = self.on_connected.as_mut() {
                            callback(&mut self.state, &record);
                        }
                    }
                    ServerEvent::Disconnected(record) => {
                        if let Some(callback) = self.on_disconnected.as_mut() {
                            callback(&mut self.state, &record);
                        }
                    }
                }
            }
        }
    }
}

impl Session for ServerSession {
    fn role(&self) -> SessionRole {
        SessionRole::Server
    }

    fn start(&mut self) -> Result<()> {
        if self.state.port.is_none() {
            if let Err(e) = self.listen() {
                self.state
                    .output
                    .error(format!("Error: Failed to listen on port {}: {}", self.config.port, e));
                return Err(e);
            }
        }
        let commands = self.command_list();
        self.state.output.info(commands);
        Ok(())
    }

    fn poll(&mut self) -> Result<()> {
        ServerSession::poll(self)
    }

    fn shutdown(&mut self) {
        self.state.shutdown();
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

fn register_builtin_commands(router: &mut CommandRouter<ServerState>) {
    router.register("/quit", quit_command);
    router.register("/exit", quit_command);
    router.register("/kick", kick_command);
}

fn quit_command(state: &mut ServerState, parameters: &str) -> Result<()> {
    if !parameters.is_empty() {
        state.output.warn("Warning: Ignoring parameters.");
    }
    state.request_stop();
    Ok(())
}

fn kick_command(state: &mut ServerState, parameters: &str) -> Result<()> {
    let params = parse_parameters(parameters);
    if params.is_empty() {
        state.output.info("Command usage: ");
        state.output.info("\t/kick -id [ID]");
        state.output.info("\t/kick -user [User Name]");
        return Ok(());
    }

    let has_flag = |flag: &str| params.iter().any(|param| param == flag);
    if has_flag("-user") && has_flag("-id") {
        state.output.error("Error: Cannot use both parameters (-user & -id) at once!");
        return Ok(());
    }

    let mut tokens = params.iter();
    while let Some(token) = tokens.next() {
        match token.as_str() {
            "-user" => {
                let Some(nickname) = tokens.next() else {
                    state.output.error("Error: No user name given after -user");
                    continue;
                };
                let result = state.kick_by_nickname(nickname);
                report_kick(state, result)?;
            }
            "-id" => {
                let Some(id) = tokens.next() else {
                    state.output.error("Error: No ID given after -id");
                    continue;
                };
                let parsed = if is_number(id) { id.parse::<u32>().ok() } else { None };
                match parsed {
                    Some(id) => {
                        let result = state.kick(ConnectionHandle::new(id));
                        report_kick(state, result)?;
                    }
                    None => state.output.error(format!("Error: Invalid client ID \"{}\"", id)),
                }
            }
            other => state
                .output
                .warn(format!("Warning: Unknown parameter specified \"{}\"", other)),
        }
    }
    Ok(())
}

fn report_kick(state: &mut ServerState, result: Result<ClientRecord>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(NetError::NotFound(message)) => {
            state.output.error(format!("Error: {}", message));
            Ok(())
        }
        Err(e) => Err(e),
    }
}
