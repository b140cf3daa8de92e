//! Session output log
//!
//! User-facing session output (connection notices, command feedback, server
//! notices) is recorded in a bounded history that a host application can
//! display. Every line is also emitted as a `tracing` event.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Callback fired with each new output line
pub type OutputCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Severity of an output line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLevel {
    Info,
    Warn,
    Error,
}

struct OutputInner {
    lines: VecDeque<String>,
    capacity: usize,
    callback: Option<OutputCallback>,
}

/// Bounded, shareable history of session output
///
/// Clones share the same history.
#[derive(Clone)]
pub struct OutputLog {
    inner: Arc<Mutex<OutputInner>>,
}

impl OutputLog {
    /// Create a log keeping at most `capacity` lines (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(OutputInner {
                lines: VecDeque::with_capacity(capacity),
                capacity,
                callback: None,
            })),
        }
    }

    /// Register the callback fired for every new line, replacing any previous one
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.lock().callback = Some(Arc::new(callback));
    }

    pub fn clear_callback(&self) {
        self.inner.lock().callback = None;
    }

    /// Record a line at `level`
    pub fn log(&self, level: OutputLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            OutputLevel::Info => tracing::info!("{}", message),
            OutputLevel::Warn => tracing::warn!("{}", message),
            OutputLevel::Error => tracing::error!("{}", message),
        }

        let callback = {
            let mut inner = self.inner.lock();
            if inner.lines.len() >= inner.capacity {
                inner.lines.pop_front();
            }
            inner.lines.push_back(message.clone());
            inner.callback.clone()
        };

        // Called without the lock so the callback may read the log.
        if let Some(callback) = callback {
            callback(&message);
        }
    }

    #[inline]
    pub fn info(&self, message: impl Into<String>) {
        self.log(OutputLevel::Info, message);
    }

    #[inline]
    pub fn warn(&self, message: impl Into<String>) {
        self.log(OutputLevel::Warn, message);
    }

    #[inline]
    pub fn error(&self, message: impl Into<String>) {
        self.log(OutputLevel::Error, message);
    }

    /// Most recent line, if any
    pub fn latest(&self) -> Option<String> {
        self.inner.lock().lines.back().cloned()
    }

    /// All retained lines, oldest first
    pub fn entries(&self) -> Vec<String> {
        self.inner.lock().lines.iter().cloned().collect()
    }

    /// Whether any retained line contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.inner.lock().lines.iter().any(|line| line.contains(needle))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn clear(&self) {
        self.inner.lock().lines.clear();
    }
}

impl Default for OutputLog {
    fn default() -> Self {
        Self::new(64)
    }
}

impl std::fmt::Debug for OutputLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("OutputLog")
            .field("lines", &inner.lines.len())
            .field("capacity", &inner.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_bounded_history() {
        let log = OutputLog::new(3);
        for i in 0..5 {
            log.info(format!("line {}", i));
        }
        assert_eq!(log.entries(), vec!["line 2", "line 3", "line 4"]);
        assert_eq!(log.latest().as_deref(), Some("line 4"));
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_empty_log() {
        let log = OutputLog::new(0);
        assert_eq!(log.capacity(), 1);
        assert!(log.latest().is_none());
        assert!(log.is_empty());
    }

    #[test]
    fn test_callback_can_read_log() {
        let log = OutputLog::new(8);
        let seen = Arc::new(AtomicUsize::new(0));
        let reader = log.clone();
        let counter = seen.clone();
        log.set_callback(move |line| {
            assert_eq!(reader.latest().as_deref(), Some(line));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        log.warn("Warning: Ignoring parameters.");
        log.error("Error: boom");
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(log.contains("Ignoring"));

        log.clear_callback();
        log.info("quiet");
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
