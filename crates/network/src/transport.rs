//! # Transport Boundary
//!
//! Sessions never touch sockets directly. They talk to a [`Transport`], a
//! polled message-oriented connection manager:
//!
//! - messages are delivered whole (the transport does its own framing)
//! - connection lifecycle is reported as [`StateChange`] events that the
//!   session drains on its own thread
//! - closing a connection locally never produces a state change for it
//!
//! # Connection Lifecycle
//!
//! ```text
//! None → Connecting → Connected → ClosedByPeer
//!            │            └──────→ ProblemDetectedLocally
//!            └──────────────────→ ClosedByPeer / ProblemDetectedLocally
//! ```
//!
//! On the listening side a `Connecting` event means a peer is waiting to be
//! accepted with [`Transport::accept`].

use bytes::Bytes;
use netsession_core::{ConnectionHandle, Reliability, Result};
use std::fmt;

/// Transport-level connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    None,
    Connecting,
    Connected,
    ClosedByPeer,
    ProblemDetectedLocally,
}

impl TransportState {
    /// Whether the connection has ended
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ClosedByPeer | Self::ProblemDetectedLocally)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ClosedByPeer => "closed by peer",
            Self::ProblemDetectedLocally => "problem detected locally",
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One connection-state transition reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub handle: ConnectionHandle,
    pub old_state: TransportState,
    pub new_state: TransportState,
    /// Human-readable description of the connection (peer address, name)
    pub description: String,
    /// Why the connection ended, empty while it is alive
    pub end_reason: String,
}

impl StateChange {
    pub fn new(
        handle: ConnectionHandle,
        old_state: TransportState,
        new_state: TransportState,
        description: impl Into<String>,
    ) -> Self {
        Self {
            handle,
            old_state,
            new_state,
            description: description.into(),
            end_reason: String::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.end_reason = reason.into();
        self
    }
}

/// A message received on one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// The receiver's handle for the connection the message arrived on
    pub sender: ConnectionHandle,
    pub payload: Bytes,
}

/// Polled, message-oriented transport
///
/// Implementations are owned by exactly one session and driven from that
/// session's network thread.
pub trait Transport: Send {
    /// Start accepting connections on `port`
    ///
    /// # Returns
    /// The port actually bound (relevant when `port` is 0)
    fn listen(&mut self, port: u16) -> Result<u16>;

    /// Begin connecting to `address:port`
    ///
    /// The returned handle is in the `Connecting` state; the outcome arrives
    /// later as a [`StateChange`].
    fn connect(&mut self, address: &str, port: u16) -> Result<ConnectionHandle>;

    /// Accept a connection reported as `Connecting` on a listening transport
    fn accept(&mut self, handle: ConnectionHandle) -> Result<()>;

    /// Close a connection, telling the peer `reason`
    ///
    /// Closing an unknown handle is a no-op.
    fn close(&mut self, handle: ConnectionHandle, reason: &str);

    /// Send one message on an established connection
    fn send(&mut self, handle: ConnectionHandle, payload: &[u8], reliability: Reliability) -> Result<()>;

    /// Take up to `max` received messages
    fn receive(&mut self, max: usize) -> Result<Vec<IncomingMessage>>;

    /// Take all pending state changes, oldest first
    fn poll_state_changes(&mut self) -> Vec<StateChange>;

    /// Attach a display name to a connection
    fn set_connection_name(&mut self, handle: ConnectionHandle, name: &str);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn listen(&mut self, port: u16) -> Result<u16> {
        (**self).listen(port)
    }

    fn connect(&mut self, address: &str, port: u16) -> Result<ConnectionHandle> {
        (**self).connect(address, port)
    }

    fn accept(&mut self, handle: ConnectionHandle) -> Result<()> {
        (**self).accept(handle)
    }

    fn close(&mut self, handle: ConnectionHandle, reason: &str) {
        (**self).close(handle, reason)
    }

    fn send(&mut self, handle: ConnectionHandle, payload: &[u8], reliability: Reliability) -> Result<()> {
        (**self).send(handle, payload, reliability)
    }

    fn receive(&mut self, max: usize) -> Result<Vec<IncomingMessage>> {
        (**self).receive(max)
    }

    fn poll_state_changes(&mut self) -> Vec<StateChange> {
        (**self).poll_state_changes()
    }

    fn set_connection_name(&mut self, handle: ConnectionHandle, name: &str) {
        (**self).set_connection_name(handle, name)
    }
}
