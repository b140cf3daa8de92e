//! Mutex-guarded queue of pending command lines
//!
//! The input thread is the producer and the session's network thread is the
//! only consumer. Lines are stored raw and trimmed when taken.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Shared FIFO of command lines
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw line
    pub fn push(&self, line: impl Into<String>) {
        self.lines.lock().push_back(line.into());
    }

    /// Pop the next non-blank line, trimmed; blank lines are discarded
    pub fn next(&self) -> Option<String> {
        let mut lines = self.lines.lock();
        while let Some(line) = lines.pop_front() {
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        None
    }

    /// Take every queued line at once, trimmed, blank lines discarded
    pub fn drain(&self) -> Vec<String> {
        let lines: Vec<String> = self.lines.lock().drain(..).collect();
        lines
            .into_iter()
            .filter_map(|line| {
                let trimmed = line.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}
