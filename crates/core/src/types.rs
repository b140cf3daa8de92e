//! Core type definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Port used whenever no explicit port is supplied to connect or listen.
pub const DEFAULT_PORT: u16 = 5456;

/// Address the `default` connect keyword resolves to.
pub const LOOPBACK_ADDRESS: &str = "127.0.0.1";

/// Opaque transport-assigned connection identifier
///
/// Stable for the lifetime of the connection and unique within a session.
/// The value `0` is never assigned to a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionHandle(pub u32);

impl ConnectionHandle {
    pub const INVALID: ConnectionHandle = ConnectionHandle(0);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl From<u32> for ConnectionHandle {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery guarantee requested for an outgoing message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Reliability {
    #[default]
    Reliable,
    Unreliable,
}

impl Reliability {
    pub fn from_flag(reliable: bool) -> Self {
        if reliable {
            Self::Reliable
        } else {
            Self::Unreliable
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reliable => "reliable",
            Self::Unreliable => "unreliable",
        }
    }
}

/// Which side of a connection a session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Client = 0,
    Server = 1,
}

impl SessionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}
