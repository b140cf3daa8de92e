//! # NetSession Networking Layer
//!
//! Client and server sessions on top of a polled, message-oriented transport.
//!
//! ## Modules
//!
//! - [`config`] - Session runtime options
//! - [`transport`] - The transport boundary and connection lifecycle events
//! - [`loopback`] - Deterministic in-process transport
//! - [`tcp`] - Tokio TCP transport with length-delimited framing
//! - [`output`] - Bounded user-facing output history
//! - [`registry`] - Server-side client records
//! - [`client`] - Client session state machine and commands
//! - [`server`] - Server session, built-in messages and admin operations
//! - [`runtime`] - Network and command-input threads

pub mod config;
pub mod transport;
pub mod loopback;
pub mod tcp;
pub mod output;
pub mod registry;
pub mod client;
pub mod server;
pub mod runtime;

// Re-export commonly used items
pub use config::SessionConfig;
pub use transport::{IncomingMessage, StateChange, Transport, TransportState};
pub use loopback::{LoopbackEndpoint, LoopbackNetwork};
pub use tcp::TcpTransport;
pub use output::{OutputCallback, OutputLevel, OutputLog};
pub use registry::{ClientRecord, ClientRegistry};
pub use client::{ClientSession, ClientState, ConnectionStatus, DisconnectReason};
pub use server::{ServerSession, ServerState};
pub use runtime::{Session, SessionHandle};
