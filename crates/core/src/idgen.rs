//! Connection handle generation

use crate::ConnectionHandle;
use std::sync::atomic::{self, AtomicU32};

/// Thread-safe generator of connection handles
///
/// Handles start at 1 and are never reused for the lifetime of the
/// generator; 0 is reserved for [`ConnectionHandle::INVALID`].
#[derive(Debug)]
pub struct HandleGenerator {
    next_id: AtomicU32,
}

impl HandleGenerator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
        }
    }

    /// Get the next available handle
    pub fn next_handle(&self) -> ConnectionHandle {
        loop {
            let id = self.next_id.fetch_add(1, atomic::Ordering::Relaxed);
            if id != 0 {
                return ConnectionHandle::new(id);
            }
        }
    }
}

impl Default for HandleGenerator {
    fn default() -> Self {
        Self::new()
    }
}
