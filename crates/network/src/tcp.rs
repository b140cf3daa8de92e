//! # TCP Transport
//!
//! A [`Transport`] over plain TCP, driven by a private Tokio runtime.
//!
//! # Architecture
//!
//! ```text
//! session thread ──send()──► mpsc ──► connection task ──► Framed<TcpStream>
//! session thread ◄─receive()─ Shared ◄── connection task ◄─┘
//! ```
//!
//! Each connection runs in its own task. Inbound messages and lifecycle
//! changes are pushed into a mutex-guarded table that the owning session
//! drains from its own thread, so the session never awaits anything.
//!
//! # Framing
//!
//! Every frame is length-delimited (`LengthDelimitedCodec`) and starts with
//! one kind byte:
//!
//! ```text
//! {u8 kind}{body}
//!   0 = data    body is one application message
//!   1 = accept  sent by the listening side once the session accepts
//!   2 = close   body is the UTF-8 close reason
//! ```
//!
//! The connecting side stays `Connecting` until it sees the accept frame, so a
//! server that rejects a connection is reported to the client as a failed
//! connect rather than as a dropped session.
//!
//! # Reliability
//!
//! TCP delivers everything in order; the unreliable flag is accepted and the
//! message is delivered reliably.

use crate::transport::{IncomingMessage, StateChange, Transport, TransportState};
use bytes::{BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use netsession_core::{ConnectionHandle, HandleGenerator, NetError, Reliability, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

const FRAME_DATA: u8 = 0;
const FRAME_ACCEPT: u8 = 1;
const FRAME_CLOSE: u8 = 2;

/// How long dropping the transport waits for close frames to flush
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Work queued for a connection task
#[derive(Debug)]
enum Outbound {
    Frame(Bytes),
    Close(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Listening,
    Connecting,
}

#[derive(Debug)]
struct TcpLink {
    state: TransportState,
    description: String,
    name: String,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    /// Socket accepted by the listener but not yet accepted by the session
    pending: Option<TcpStream>,
}

impl TcpLink {
    fn new(description: String) -> Self {
        Self {
            state: TransportState::None,
            description,
            name: String::new(),
            outbound: None,
            pending: None,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    links: HashMap<ConnectionHandle, TcpLink>,
    messages: VecDeque<IncomingMessage>,
    changes: VecDeque<StateChange>,
}

impl Shared {
    /// Move a live link to `new_state`; ignored for links that are gone or closed
    fn transition(&mut self, handle: ConnectionHandle, new_state: TransportState, reason: &str) {
        let Some(link) = self.links.get_mut(&handle) else {
            return;
        };
        if link.state.is_closed() {
            return;
        }
        let old_state = link.state;
        link.state = new_state;
        self.changes.push_back(
            StateChange::new(handle, old_state, new_state, link.description.clone()).with_reason(reason),
        );
    }

    fn state_of(&self, handle: ConnectionHandle) -> Option<TransportState> {
        self.links.get(&handle).map(|link| link.state)
    }
}

fn frame(kind: u8, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + body.len());
    buf.put_u8(kind);
    buf.put_slice(body);
    buf.freeze()
}

/// TCP implementation of [`Transport`]
pub struct TcpTransport {
    runtime: Option<Runtime>,
    shared: Arc<Mutex<Shared>>,
    handles: Arc<HandleGenerator>,
    listener: Option<JoinHandle<()>>,
}

impl TcpTransport {
    /// Create a transport with its own runtime
    ///
    /// # Errors
    /// Returns an error if the Tokio runtime cannot be built.
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("netsession-tcp")
            .enable_all()
            .build()?;

        Ok(Self {
            runtime: Some(runtime),
            shared: Arc::new(Mutex::new(Shared::default())),
            handles: Arc::new(HandleGenerator::new()),
            listener: None,
        })
    }

    fn runtime(&self) -> Result<&Runtime> {
        self.runtime
            .as_ref()
            .ok_or_else(|| NetError::Transport("Transport runtime is shut down".into()))
    }

    /// Name attached to a connection with `set_connection_name`
    pub fn connection_name(&self, handle: ConnectionHandle) -> Option<String> {
        self.shared.lock().links.get(&handle).map(|link| link.name.clone())
    }
}

/// Accept sockets forever, announcing each one as `Connecting`
async fn accept_loop(listener: TcpListener, shared: Arc<Mutex<Shared>>, handles: Arc<HandleGenerator>) {
    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                if let Err(e) = socket.set_nodelay(true) {
                    tracing::debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                }
                let handle = handles.next_handle();
                tracing::debug!("Incoming TCP connection {} from {}", handle, addr);

                let mut link = TcpLink::new(addr.to_string());
                link.pending = Some(socket);
                let mut shared = shared.lock();
                shared.links.insert(handle, link);
                shared.transition(handle, TransportState::Connecting, "");
            }
            Err(e) => {
                tracing::error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Per-connection task: pump outbound frames and publish inbound ones
async fn run_connection(
    handle: ConnectionHandle,
    socket: TcpStream,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    shared: Arc<Mutex<Shared>>,
    side: Side,
) {
    let mut framed = Framed::new(socket, LengthDelimitedCodec::new());

    if side == Side::Listening {
        if let Err(e) = framed.send(frame(FRAME_ACCEPT, &[])).await {
            shared
                .lock()
                .transition(handle, TransportState::ProblemDetectedLocally, &e.to_string());
            return;
        }
    }

    loop {
        tokio::select! {
            queued = outbound.recv() => match queued {
                Some(Outbound::Frame(bytes)) => {
                    if let Err(e) = framed.send(bytes).await {
                        shared.lock().transition(handle, TransportState::ProblemDetectedLocally, &e.to_string());
                        break;
                    }
                }
                Some(Outbound::Close(reason)) => {
                    if let Err(e) = framed.send(frame(FRAME_CLOSE, reason.as_bytes())).await {
                        tracing::debug!("Connection {} close frame not delivered: {}", handle, e);
                    }
                    break;
                }
                // Closed locally; the link is already gone.
                None => break,
            },
            inbound = framed.next() => match inbound {
                Some(Ok(bytes)) => {
                    if !publish_frame(handle, bytes.freeze(), &shared) {
                        break;
                    }
                }
                Some(Err(e)) => {
                    shared.lock().transition(handle, TransportState::ProblemDetectedLocally, &e.to_string());
                    break;
                }
                None => {
                    shared.lock().transition(handle, TransportState::ClosedByPeer, "Connection closed");
                    break;
                }
            },
        }
    }

    tracing::debug!("Connection {} task finished", handle);
}

/// Route one inbound frame; returns `false` when the connection is over
fn publish_frame(handle: ConnectionHandle, bytes: Bytes, shared: &Mutex<Shared>) -> bool {
    let Some(&kind) = bytes.first() else {
        tracing::warn!("Connection {} sent an empty frame", handle);
        return true;
    };
    let body = bytes.slice(1..);
    let mut shared = shared.lock();

    match kind {
        FRAME_DATA => {
            if shared.state_of(handle) == Some(TransportState::Connected) {
                shared.messages.push_back(IncomingMessage {
                    sender: handle,
                    payload: body,
                });
            }
            true
        }
        FRAME_ACCEPT => {
            if shared.state_of(handle) == Some(TransportState::Connecting) {
                shared.transition(handle, TransportState::Connected, "");
            }
            true
        }
        FRAME_CLOSE => {
            let reason = String::from_utf8_lossy(&body).into_owned();
            shared.transition(handle, TransportState::ClosedByPeer, &reason);
            false
        }
        other => {
            tracing::warn!("Connection {} sent unknown frame kind {}", handle, other);
            true
        }
    }
}

impl Transport for TcpTransport {
    fn listen(&mut self, port: u16) -> Result<u16> {
        if self.listener.is_some() {
            return Err(NetError::Transport("Transport is already listening".into()));
        }

        let runtime = self.runtime()?;
        let listener = runtime.block_on(TcpListener::bind(("0.0.0.0", port))).map_err(|e| {
            NetError::Transport(format!("Failed to listen on port {}: {}", port, e))
        })?;
        let bound = listener.local_addr()?.port();

        let task = runtime.spawn(accept_loop(listener, self.shared.clone(), self.handles.clone()));
        self.listener = Some(task);

        tracing::info!("Listening on port {}", bound);
        Ok(bound)
    }

    fn connect(&mut self, address: &str, port: u16) -> Result<ConnectionHandle> {
        if address.trim().is_empty() {
            return Err(NetError::Transport("Invalid address".into()));
        }

        let handle = self.handles.next_handle();
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut link = TcpLink::new(format!("{}:{}", address, port));
            link.state = TransportState::Connecting;
            link.outbound = Some(tx);
            self.shared.lock().links.insert(handle, link);
        }

        let shared = self.shared.clone();
        let address = address.to_string();
        self.runtime()?.spawn(async move {
            match TcpStream::connect((address.as_str(), port)).await {
                Ok(socket) => {
                    if let Err(e) = socket.set_nodelay(true) {
                        tracing::debug!("Failed to set TCP_NODELAY: {}", e);
                    }
                    run_connection(handle, socket, rx, shared, Side::Connecting).await;
                }
                Err(e) => {
                    shared
                        .lock()
                        .transition(handle, TransportState::ProblemDetectedLocally, &e.to_string());
                }
            }
        });

        Ok(handle)
    }

    fn accept(&mut self, handle: ConnectionHandle) -> Result<()> {
        let socket = {
            let mut shared = self.shared.lock();
            let link = shared
                .links
                .get_mut(&handle)
                .ok_or_else(|| NetError::Transport(format!("Unknown connection {}", handle)))?;
            if link.state != TransportState::Connecting {
                return Err(NetError::Transport(format!(
                    "Connection {} is {}, not connecting",
                    handle, link.state
                )));
            }
            link.pending
                .take()
                .ok_or_else(|| NetError::Transport(format!("Connection {} is not an incoming connection", handle)))?
        };

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut shared = self.shared.lock();
            if let Some(link) = shared.links.get_mut(&handle) {
                link.outbound = Some(tx);
            }
            shared.transition(handle, TransportState::Connected, "");
        }

        self.runtime()?
            .spawn(run_connection(handle, socket, rx, self.shared.clone(), Side::Listening));
        Ok(())
    }

    fn close(&mut self, handle: ConnectionHandle, reason: &str) {
        let Some(link) = self.shared.lock().links.remove(&handle) else {
            return;
        };

        if let Some(tx) = link.outbound {
            if tx.send(Outbound::Close(reason.to_string())).is_err() {
                tracing::debug!("Connection {} already finished", handle);
            }
        }

        // Never accepted: tell the peer why before dropping the socket.
        if let (Some(socket), Some(runtime)) = (link.pending, self.runtime.as_ref()) {
            let close = frame(FRAME_CLOSE, reason.as_bytes());
            runtime.spawn(async move {
                let mut framed = Framed::new(socket, LengthDelimitedCodec::new());
                if let Err(e) = framed.send(close).await {
                    tracing::debug!("Rejected connection {} not notified: {}", handle, e);
                }
            });
        }
    }

    fn send(&mut self, handle: ConnectionHandle, payload: &[u8], _reliability: Reliability) -> Result<()> {
        let shared = self.shared.lock();
        let link = shared
            .links
            .get(&handle)
            .ok_or_else(|| NetError::Transport(format!("Unknown connection {}", handle)))?;
        if link.state != TransportState::Connected {
            return Err(NetError::Transport(format!(
                "Connection {} is {}, cannot send",
                handle, link.state
            )));
        }

        link.outbound
            .as_ref()
            .ok_or_else(|| NetError::Transport(format!("Connection {} has no writer", handle)))?
            .send(Outbound::Frame(frame(FRAME_DATA, payload)))
            .map_err(|_| NetError::Transport(format!("Connection {} writer is gone", handle)))
    }

    fn receive(&mut self, max: usize) -> Result<Vec<IncomingMessage>> {
        let mut shared = self.shared.lock();
        let Shared { links, messages, .. } = &mut *shared;

        let mut received = Vec::new();
        while received.len() < max {
            let Some(message) = messages.pop_front() else {
                break;
            };
            if links.contains_key(&message.sender) {
                received.push(message);
            }
        }
        Ok(received)
    }

    fn poll_state_changes(&mut self) -> Vec<StateChange> {
        let mut shared = self.shared.lock();
        let Shared { links, changes, .. } = &mut *shared;
        changes
            .drain(..)
            .filter(|change| links.contains_key(&change.handle))
            .collect()
    }

    fn set_connection_name(&mut self, handle: ConnectionHandle, name: &str) {
        if let Some(link) = self.shared.lock().links.get_mut(&handle) {
            link.name = name.to_string();
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }

        let open: Vec<ConnectionHandle> = self.shared.lock().links.keys().copied().collect();
        for handle in open {
            self.close(handle, "Transport shutdown");
        }

        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(SHUTDOWN_GRACE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn wait_for<T>(mut poll: impl FnMut() -> Option<T>) -> T {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(value) = poll() {
                return value;
            }
            assert!(Instant::now() < deadline, "timed out waiting for transport");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn next_change(transport: &mut TcpTransport) -> StateChange {
        wait_for(|| transport.poll_state_changes().into_iter().next())
    }

    #[test]
    fn test_frame_layout() {
        let bytes = frame(FRAME_CLOSE, b"bye");
        assert_eq!(&bytes[..], &[FRAME_CLOSE, b'b', b'y', b'e']);
    }

    #[test]
    fn test_accept_and_exchange() {
        let mut server = TcpTransport::new().unwrap();
        let mut client = TcpTransport::new().unwrap();
        let port = server.listen(0).unwrap();
        let client_handle = client.connect("127.0.0.1", port).unwrap();

        let incoming = next_change(&mut server);
        assert_eq!(incoming.new_state, TransportState::Connecting);
        server.accept(incoming.handle).unwrap();
        assert_eq!(next_change(&mut server).new_state, TransportState::Connected);

        let connected = next_change(&mut client);
        assert_eq!(connected.handle, client_handle);
        assert_eq!(connected.old_state, TransportState::Connecting);
        assert_eq!(connected.new_state, TransportState::Connected);

        client.send(client_handle, b"hello", Reliability::Unreliable).unwrap();
        let received = wait_for(|| client_receive_one(&mut server));
        assert_eq!(received.sender, incoming.handle);
        assert_eq!(&received.payload[..], b"hello");

        server.close(incoming.handle, "Kicked by server");
        let closed = next_change(&mut client);
        assert_eq!(closed.new_state, TransportState::ClosedByPeer);
        assert_eq!(closed.end_reason, "Kicked by server");
    }

    fn client_receive_one(transport: &mut TcpTransport) -> Option<IncomingMessage> {
        transport.receive(1).ok().and_then(|mut messages| messages.pop())
    }

    #[test]
    fn test_rejected_connection_fails_to_connect() {
        let mut server = TcpTransport::new().unwrap();
        let mut client = TcpTransport::new().unwrap();
        let port = server.listen(0).unwrap();
        let client_handle = client.connect("127.0.0.1", port).unwrap();

        let incoming = next_change(&mut server);
        server.close(incoming.handle, "Server Full");

        let change = next_change(&mut client);
        assert_eq!(change.handle, client_handle);
        assert_eq!(change.old_state, TransportState::Connecting);
        assert_eq!(change.new_state, TransportState::ClosedByPeer);
        assert_eq!(change.end_reason, "Server Full");
    }

    #[test]
    fn test_send_requires_connected() {
        let mut client = TcpTransport::new().unwrap();
        assert!(client
            .send(ConnectionHandle::new(42), b"x", Reliability::Reliable)
            .is_err());
        assert!(client.connect("  ", 5456).is_err());
    }
}
