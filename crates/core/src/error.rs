//! Core error types for NetSession

/// Cursor failures raised by the stream reader/writer.
///
/// A framing error never mutates the buffer or the cursor: the failed
/// operation is aborted as a whole.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("Write of {requested} bytes overflows buffer ({remaining} bytes remaining)")]
    Overflow { requested: usize, remaining: usize },

    #[error("Read of {requested} bytes underflows buffer ({remaining} bytes remaining)")]
    Underflow { requested: usize, remaining: usize },

    #[error("String field is not valid UTF-8")]
    InvalidUtf8,

    #[error("Buffer has no storage")]
    NoStorage,
}

#[derive(thiserror::Error, Debug)]
pub enum NetError {
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Failed to allocate {size} bytes")]
    Allocation { size: usize },

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The session registry and the transport's connection set disagree.
    #[error("Internal consistency violation: {0}")]
    Consistency(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Usage error: {0}")]
    Usage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl NetError {
    /// Whether this error must terminate the session's poll loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, NetError::Allocation { .. } | NetError::Consistency(_))
    }
}

pub type Result<T> = std::result::Result<T, NetError>;
