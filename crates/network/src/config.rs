//! # Session Configuration
//!
//! Runtime options shared by client and server sessions.
//!
//! # Example
//!
//! ```rust
//! use netsession_network::SessionConfig;
//! use std::time::Duration;
//!
//! let config = SessionConfig {
//!     port: 6000,
//!     max_clients: 16,
//!     poll_interval: Duration::from_millis(5),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use netsession_core::{DEFAULT_PORT, LOOPBACK_ADDRESS};
use std::time::Duration;

/// Session configuration options
///
/// # Fields
///
/// - `address`: Server address a client connects to
/// - `port`: Port a server listens on, or a client connects to
/// - `poll_interval`: Sleep between poll loop iterations
/// - `max_clients`: Maximum simultaneous clients on a server (0 = unlimited)
/// - `output_log_capacity`: Output lines kept in history
/// - `receive_batch`: Maximum messages taken from the transport per receive call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Server address for client sessions
    ///
    /// # Default
    /// `127.0.0.1`
    pub address: String,

    /// Listen or connect port
    ///
    /// # Default
    /// 5456
    pub port: u16,

    /// Poll loop sleep
    ///
    /// # Default
    /// 10 milliseconds
    ///
    /// # Notes
    /// - Each iteration drains every pending message, state change and command,
    ///   so this only bounds latency, not throughput
    pub poll_interval: Duration,

    /// Maximum simultaneous clients accepted by a server
    ///
    /// # Default
    /// 0 (unlimited)
    pub max_clients: usize,

    /// Number of output lines kept in history
    ///
    /// # Default
    /// 64 lines
    pub output_log_capacity: usize,

    /// Messages requested from the transport per receive call
    ///
    /// # Default
    /// 64 messages
    pub receive_batch: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: LOOPBACK_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            poll_interval: Duration::from_millis(10),
            max_clients: 0,
            output_log_capacity: 64,
            receive_batch: 64,
        }
    }
}

impl SessionConfig {
    /// Validate the configuration
    ///
    /// # Returns
    /// `Ok(())` if configuration is valid, `Err(String)` otherwise
    ///
    /// # Checks
    /// - `output_log_capacity` must be > 0
    /// - `receive_batch` must be > 0
    /// - `address` must not be blank
    pub fn validate(&self) -> Result<(), String> {
        if self.output_log_capacity == 0 {
            return Err("output_log_capacity must be > 0".to_string());
        }

        if self.receive_batch == 0 {
            return Err("receive_batch must be > 0".to_string());
        }

        if self.address.trim().is_empty() {
            return Err("address must not be empty".to_string());
        }

        if self.poll_interval > Duration::from_secs(1) {
            tracing::warn!("poll_interval above one second makes sessions sluggish");
        }

        Ok(())
    }
}
