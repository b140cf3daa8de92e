//! # In-Process Loopback Transport
//!
//! A deterministic [`Transport`] for tests and single-process setups. All
//! endpoints created from one [`LoopbackNetwork`] share a hub; a message sent
//! on one endpoint is immediately available to the peer endpoint's next
//! `receive` call, and every lifecycle step is queued as a [`StateChange`]
//! exactly like a real transport would report it.
//!
//! # Example
//!
//! ```rust
//! use netsession_network::{LoopbackNetwork, Transport, TransportState};
//!
//! let network = LoopbackNetwork::new();
//! let mut server = network.endpoint();
//! let mut client = network.endpoint();
//!
//! let port = server.listen(5456).unwrap();
//! let handle = client.connect("127.0.0.1", port).unwrap();
//!
//! let incoming = server.poll_state_changes();
//! assert_eq!(incoming[0].new_state, TransportState::Connecting);
//! server.accept(incoming[0].handle).unwrap();
//!
//! let changes = client.poll_state_changes();
//! assert_eq!(changes[0].handle, handle);
//! assert_eq!(changes[0].new_state, TransportState::Connected);
//! ```

use crate::transport::{IncomingMessage, StateChange, Transport, TransportState};
use bytes::Bytes;
use netsession_core::{ConnectionHandle, HandleGenerator, NetError, Reliability, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// First port handed out when listening on port 0
const EPHEMERAL_PORT_START: u16 = 49152;

type EndpointId = u32;

/// One side of a loopback connection
#[derive(Debug)]
struct Link {
    owner: EndpointId,
    peer: ConnectionHandle,
    state: TransportState,
    name: String,
    description: String,
}

#[derive(Debug, Default)]
struct Mailbox {
    messages: VecDeque<IncomingMessage>,
    changes: VecDeque<StateChange>,
}

#[derive(Debug, Default)]
struct Hub {
    handles: HandleGenerator,
    next_endpoint: EndpointId,
    listeners: HashMap<u16, EndpointId>,
    links: HashMap<ConnectionHandle, Link>,
    mailboxes: HashMap<EndpointId, Mailbox>,
}

impl Hub {
    /// Move a link to `new_state` and tell its owner
    fn transition(&mut self, handle: ConnectionHandle, new_state: TransportState, reason: &str) {
        let Some(link) = self.links.get_mut(&handle) else {
            return;
        };
        let old_state = link.state;
        link.state = new_state;

        let change = StateChange::new(handle, old_state, new_state, link.description.clone())
            .with_reason(reason);
        self.mailboxes.entry(link.owner).or_default().changes.push_back(change);
    }

    fn owned_link(&self, owner: EndpointId, handle: ConnectionHandle) -> Result<&Link> {
        self.links
            .get(&handle)
            .filter(|link| link.owner == owner)
            .ok_or_else(|| NetError::Transport(format!("Unknown connection {}", handle)))
    }

    fn free_port(&self) -> Result<u16> {
        (EPHEMERAL_PORT_START..=u16::MAX)
            .find(|port| !self.listeners.contains_key(port))
            .ok_or_else(|| NetError::Transport("No free loopback port".into()))
    }
}

/// Shared in-process network
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new endpoint attached to this network
    pub fn endpoint(&self) -> LoopbackEndpoint {
        let mut hub = self.hub.lock();
        let id = hub.next_endpoint;
        hub.next_endpoint += 1;
        hub.mailboxes.insert(id, Mailbox::default());
        LoopbackEndpoint {
            id,
            hub: self.hub.clone(),
        }
    }

    /// Number of live connection ends across all endpoints
    pub fn link_count(&self) -> usize {
        self.hub.lock().links.len()
    }

    /// Name attached to a connection with `set_connection_name`
    pub fn connection_name(&self, handle: ConnectionHandle) -> Option<String> {
        self.hub.lock().links.get(&handle).map(|link| link.name.clone())
    }

    /// Simulate a local fault on `handle`
    ///
    /// The owner sees `ProblemDetectedLocally`, the peer sees `ClosedByPeer`.
    ///
    /// # Returns
    /// `true` if the connection existed and was still alive
    pub fn fail_connection(&self, handle: ConnectionHandle, reason: &str) -> bool {
        let mut hub = self.hub.lock();
        let Some(link) = hub.links.get(&handle) else {
            return false;
        };
        if link.state.is_closed() {
            return false;
        }
        let peer = link.peer;

        hub.transition(handle, TransportState::ProblemDetectedLocally, reason);
        if hub.links.get(&peer).is_some_and(|link| !link.state.is_closed()) {
            hub.transition(peer, TransportState::ClosedByPeer, reason);
        }
        true
    }
}

/// One participant on a [`LoopbackNetwork`]
#[derive(Debug)]
pub struct LoopbackEndpoint {
    id: EndpointId,
    hub: Arc<Mutex<Hub>>,
}

impl Transport for LoopbackEndpoint {
    fn listen(&mut self, port: u16) -> Result<u16> {
        let mut hub = self.hub.lock();
        let port = if port == 0 { hub.free_port()? } else { port };
        if hub.listeners.contains_key(&port) {
            return Err(NetError::Transport(format!("Port {} is already in use", port)));
        }
        hub.listeners.insert(port, self.id);
        tracing::debug!("Loopback endpoint {} listening on port {}", self.id, port);
        Ok(port)
    }

    fn connect(&mut self, address: &str, port: u16) -> Result<ConnectionHandle> {
        if address.trim().is_empty() {
            return Err(NetError::Transport("Invalid address".into()));
        }

        let mut hub = self.hub.lock();
        let local = hub.handles.next_handle();
        let description = format!("loopback {}:{}", address, port);

        let Some(&server) = hub.listeners.get(&port) else {
            hub.links.insert(
                local,
                Link {
                    owner: self.id,
                    peer: ConnectionHandle::INVALID,
                    state: TransportState::Connecting,
                    name: String::new(),
                    description,
                },
            );
            hub.transition(
                local,
                TransportState::ProblemDetectedLocally,
                &format!("No listener on port {}", port),
            );
            return Ok(local);
        };

        let remote = hub.handles.next_handle();
        hub.links.insert(
            local,
            Link {
                owner: self.id,
                peer: remote,
                state: TransportState::Connecting,
                name: String::new(),
                description,
            },
        );
        hub.links.insert(
            remote,
            Link {
                owner: server,
                peer: local,
                state: TransportState::None,
                name: String::new(),
                description: format!("loopback peer #{}", local),
            },
        );
        hub.transition(remote, TransportState::Connecting, "");
        Ok(local)
    }

    fn accept(&mut self, handle: ConnectionHandle) -> Result<()> {
        let mut hub = self.hub.lock();
        let link = hub.owned_link(self.id, handle)?;
        if link.state != TransportState::Connecting {
            return Err(NetError::Transport(format!(
                "Connection {} is {}, not connecting",
                handle, link.state
            )));
        }
        let peer = link.peer;
        if !hub.links.get(&peer).is_some_and(|link| link.state == TransportState::Connecting) {
            return Err(NetError::Transport(format!("Connection {} was already closed", handle)));
        }

        hub.transition(handle, TransportState::Connected, "");
        hub.transition(peer, TransportState::Connected, "");
        Ok(())
    }

    fn close(&mut self, handle: ConnectionHandle, reason: &str) {
        let mut hub = self.hub.lock();
        if hub.owned_link(self.id, handle).is_err() {
            return;
        }
        let Some(link) = hub.links.remove(&handle) else {
            return;
        };

        if hub.links.get(&link.peer).is_some_and(|peer| !peer.state.is_closed()) {
            let reason = if reason.is_empty() { "Closed by peer" } else { reason };
            hub.transition(link.peer, TransportState::ClosedByPeer, reason);
        }
    }

    fn send(&mut self, handle: ConnectionHandle, payload: &[u8], _reliability: Reliability) -> Result<()> {
        let mut hub = self.hub.lock();
        let link = hub.owned_link(self.id, handle)?;
        if link.state != TransportState::Connected {
            return Err(NetError::Transport(format!(
                "Connection {} is {}, cannot send",
                handle, link.state
            )));
        }

        let peer = link.peer;
        let peer_owner = hub
            .links
            .get(&peer)
            .filter(|link| link.state == TransportState::Connected)
            .map(|link| link.owner)
            .ok_or_else(|| NetError::Transport(format!("Peer of connection {} is gone", handle)))?;

        hub.mailboxes
            .entry(peer_owner)
            .or_default()
            .messages
            .push_back(IncomingMessage {
                sender: peer,
                payload: Bytes::copy_from_slice(payload),
            });
        Ok(())
    }

    fn receive(&mut self, max: usize) -> Result<Vec<IncomingMessage>> {
        let mut hub = self.hub.lock();
        let Hub { links, mailboxes, .. } = &mut *hub;
        let Some(mailbox) = mailboxes.get_mut(&self.id) else {
            return Ok(Vec::new());
        };

        let mut received = Vec::new();
        while received.len() < max {
            let Some(message) = mailbox.messages.pop_front() else {
                break;
            };
            if links.contains_key(&message.sender) {
                received.push(message);
            }
        }
        Ok(received)
    }

    fn poll_state_changes(&mut self) -> Vec<StateChange> {
        let mut hub = self.hub.lock();
        let Hub { links, mailboxes, .. } = &mut *hub;
        let Some(mailbox) = mailboxes.get_mut(&self.id) else {
            return Vec::new();
        };

        mailbox
            .changes
            .drain(..)
            .filter(|change| links.contains_key(&change.handle))
            .collect()
    }

    fn set_connection_name(&mut self, handle: ConnectionHandle, name: &str) {
        let mut hub = self.hub.lock();
        if let Some(link) = hub.links.get_mut(&handle).filter(|link| link.owner == self.id) {
            link.name = name.to_string();
        }
    }
}

impl Drop for LoopbackEndpoint {
    fn drop(&mut self) {
        let owned: Vec<ConnectionHandle> = {
            let mut hub = self.hub.lock();
            hub.listeners.retain(|_, owner| *owner != self.id);
            hub.links
                .iter()
                .filter(|(_, link)| link.owner == self.id)
                .map(|(handle, _)| *handle)
                .collect()
        };
        for handle in owned {
            self.close(handle, "Endpoint dropped");
        }
        self.hub.lock().mailboxes.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_pair(network: &LoopbackNetwork) -> (LoopbackEndpoint, LoopbackEndpoint, ConnectionHandle, ConnectionHandle) {
        let mut server = network.endpoint();
        let mut client = network.endpoint();
        let port = server.listen(0).unwrap();
        let client_handle = client.connect("127.0.0.1", port).unwrap();
        let server_handle = server.poll_state_changes()[0].handle;
        server.accept(server_handle).unwrap();
        (server, client, server_handle, client_handle)
    }

    #[test]
    fn test_connect_accept_lifecycle() {
        let network = LoopbackNetwork::new();
        let (mut server, mut client, server_handle, client_handle) = connected_pair(&network);

        let server_changes = server.poll_state_changes();
        assert_eq!(server_changes.len(), 1);
        assert_eq!(server_changes[0].handle, server_handle);
        assert_eq!(server_changes[0].old_state, TransportState::Connecting);
        assert_eq!(server_changes[0].new_state, TransportState::Connected);

        let client_changes = client.poll_state_changes();
        assert_eq!(client_changes.len(), 1);
        assert_eq!(client_changes[0].handle, client_handle);
        assert_eq!(client_changes[0].new_state, TransportState::Connected);
    }

    #[test]
    fn test_connect_without_listener_fails() {
        let network = LoopbackNetwork::new();
        let mut client = network.endpoint();
        let handle = client.connect("127.0.0.1", 7000).unwrap();

        let changes = client.poll_state_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].handle, handle);
        assert_eq!(changes[0].old_state, TransportState::Connecting);
        assert_eq!(changes[0].new_state, TransportState::ProblemDetectedLocally);
        assert!(changes[0].end_reason.contains("7000"));
    }

    #[test]
    fn test_messages_flow_both_ways() {
        let network = LoopbackNetwork::new();
        let (mut server, mut client, server_handle, client_handle) = connected_pair(&network);

        client.send(client_handle, b"ping", Reliability::Reliable).unwrap();
        server.send(server_handle, b"pong", Reliability::Unreliable).unwrap();

        let at_server = server.receive(16).unwrap();
        assert_eq!(at_server.len(), 1);
        assert_eq!(at_server[0].sender, server_handle);
        assert_eq!(&at_server[0].payload[..], b"ping");

        let at_client = client.receive(16).unwrap();
        assert_eq!(at_client[0].sender, client_handle);
        assert_eq!(&at_client[0].payload[..], b"pong");
    }

    #[test]
    fn test_receive_respects_max() {
        let network = LoopbackNetwork::new();
        let (mut server, mut client, _, client_handle) = connected_pair(&network);
        for i in 0..5u8 {
            client.send(client_handle, &[i], Reliability::Reliable).unwrap();
        }
        assert_eq!(server.receive(2).unwrap().len(), 2);
        assert_eq!(server.receive(10).unwrap().len(), 3);
        assert!(server.receive(10).unwrap().is_empty());
    }

    #[test]
    fn test_send_before_accept_rejected() {
        let network = LoopbackNetwork::new();
        let mut server = network.endpoint();
        let mut client = network.endpoint();
        let port = server.listen(0).unwrap();
        let handle = client.connect("127.0.0.1", port).unwrap();
        assert!(client.send(handle, b"early", Reliability::Reliable).is_err());
    }

    #[test]
    fn test_local_close_notifies_only_peer() {
        let network = LoopbackNetwork::new();
        let (mut server, mut client, server_handle, client_handle) = connected_pair(&network);
        server.poll_state_changes();
        client.poll_state_changes();

        client.close(client_handle, "Closed by Client");
        assert!(client.poll_state_changes().is_empty());

        let changes = server.poll_state_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].handle, server_handle);
        assert_eq!(changes[0].old_state, TransportState::Connected);
        assert_eq!(changes[0].new_state, TransportState::ClosedByPeer);
        assert_eq!(changes[0].end_reason, "Closed by Client");

        server.close(server_handle, "");
        assert_eq!(network.link_count(), 0);
    }

    #[test]
    fn test_reject_while_connecting() {
        let network = LoopbackNetwork::new();
        let mut server = network.endpoint();
        let mut client = network.endpoint();
        let port = server.listen(0).unwrap();
        let handle = client.connect("127.0.0.1", port).unwrap();
        let pending = server.poll_state_changes()[0].handle;

        server.close(pending, "Server Full");
        let changes = client.poll_state_changes();
        assert_eq!(changes[0].handle, handle);
        assert_eq!(changes[0].old_state, TransportState::Connecting);
        assert_eq!(changes[0].new_state, TransportState::ClosedByPeer);
        assert_eq!(changes[0].end_reason, "Server Full");
    }

    #[test]
    fn test_changes_for_locally_closed_handles_are_dropped() {
        let network = LoopbackNetwork::new();
        let (mut server, mut client, server_handle, client_handle) = connected_pair(&network);
        client.send(client_handle, b"late", Reliability::Reliable).unwrap();

        server.close(server_handle, "bye");
        assert!(server.poll_state_changes().is_empty());
        assert!(server.receive(10).unwrap().is_empty());
    }

    #[test]
    fn test_fail_connection() {
        let network = LoopbackNetwork::new();
        let (mut server, mut client, server_handle, client_handle) = connected_pair(&network);
        server.poll_state_changes();
        client.poll_state_changes();

        assert!(network.fail_connection(client_handle, "cable cut"));
        assert_eq!(
            client.poll_state_changes()[0].new_state,
            TransportState::ProblemDetectedLocally
        );
        let changes = server.poll_state_changes();
        assert_eq!(changes[0].handle, server_handle);
        assert_eq!(changes[0].new_state, TransportState::ClosedByPeer);
        assert!(!network.fail_connection(client_handle, "again"));
    }

    #[test]
    fn test_listen_port_conflict() {
        let network = LoopbackNetwork::new();
        let mut first = network.endpoint();
        let mut second = network.endpoint();
        first.listen(6000).unwrap();
        assert!(second.listen(6000).is_err());
        drop(first);
        assert_eq!(second.listen(6000).unwrap(), 6000);
    }

    #[test]
    fn test_connection_name() {
        let network = LoopbackNetwork::new();
        let (mut server, _client, server_handle, _) = connected_pair(&network);
        server.set_connection_name(server_handle, "User 0");
        assert_eq!(network.connection_name(server_handle).as_deref(), Some("User 0"));
    }

    #[test]
    fn test_endpoint_drop_closes_connections() {
        let network = LoopbackNetwork::new();
        let (mut server, client, server_handle, _) = connected_pair(&network);
        server.poll_state_changes();
        drop(client);

        let changes = server.poll_state_changes();
        assert_eq!(changes[0].handle, server_handle);
        assert_eq!(changes[0].new_state, TransportState::ClosedByPeer);
        assert_eq!(changes[0].end_reason, "Endpoint dropped");
    }
}
