//! # Client Registry
//!
//! Server-side bookkeeping of connected clients, keyed by transport handle.
//!
//! Records are kept in handle order, and handles are handed out in increasing
//! order, so iteration follows connection order.

use netsession_core::ConnectionHandle;
use std::collections::BTreeMap;

/// One connected client as seen by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub handle: ConnectionHandle,
    pub nickname: String,
}

impl ClientRecord {
    pub fn new(handle: ConnectionHandle, nickname: impl Into<String>) -> Self {
        Self {
            handle,
            nickname: nickname.into(),
        }
    }
}

/// Map of connected clients
#[derive(Debug, Default)]
pub struct ClientRegistry {
    records: BTreeMap<ConnectionHandle, ClientRecord>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nickname given to the next client: `"User {count}"`
    pub fn default_nickname(&self) -> String {
        format!("User {}", self.records.len())
    }

    /// Insert a record, returning any record it replaced
    pub fn insert(&mut self, record: ClientRecord) -> Option<ClientRecord> {
        self.records.insert(record.handle, record)
    }

    pub fn remove(&mut self, handle: ConnectionHandle) -> Option<ClientRecord> {
        self.records.remove(&handle)
    }

    pub fn get(&self, handle: ConnectionHandle) -> Option<&ClientRecord> {
        self.records.get(&handle)
    }

    pub fn get_mut(&mut self, handle: ConnectionHandle) -> Option<&mut ClientRecord> {
        self.records.get_mut(&handle)
    }

    pub fn contains(&self, handle: ConnectionHandle) -> bool {
        self.records.contains_key(&handle)
    }

    /// Exact, case-sensitive nickname lookup
    pub fn find_by_nickname(&self, nickname: &str) -> Option<&ClientRecord> {
        self.records.values().find(|record| record.nickname == nickname)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientRecord> {
        self.records.values()
    }

    pub fn handles(&self) -> Vec<ConnectionHandle> {
        self.records.keys().copied().collect()
    }

    pub fn nicknames(&self) -> Vec<&str> {
        self.records.values().map(|record| record.nickname.as_str()).collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
