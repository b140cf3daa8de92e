//! # Command Router
//!
//! Maps command keywords to handlers. Client and server sessions use the same
//! router, parameterized over the state the handlers operate on.
//!
//! # Matching
//!
//! Keywords match exactly and case-sensitively, including the leading `/`.
//! There is no prefix or fuzzy matching. Registering a keyword twice replaces
//! the earlier handler.
//!
//! # Example
//!
//! ```
//! use netsession_commands::{CommandRouter, Dispatch};
//!
//! let mut router: CommandRouter<Vec<String>> = CommandRouter::new();
//! router.register("/say", |said: &mut Vec<String>, params: &str| {
//!     said.push(params.to_string());
//!     Ok(())
//! });
//!
//! let mut said = Vec::new();
//! let outcome = router.dispatch(&mut said, "/say hello").unwrap();
//! assert_eq!(outcome, Dispatch::Handled);
//! assert_eq!(said, vec!["hello"]);
//! ```

use crate::parser::parse_command_line;
use netsession_core::Result;
use std::collections::BTreeMap;

/// Type for command handler functions
///
/// # Purpose
/// Receives the session state and the parameter remainder of the line.
pub type CommandHandler<C> = Box<dyn FnMut(&mut C, &str) -> Result<()> + Send>;

/// Result of routing one command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler matched and ran
    Handled,
    /// No handler is registered for the keyword
    Unknown(String),
    /// The line was blank
    Empty,
}

/// Registry of command handlers
pub struct CommandRouter<C> {
    handlers: BTreeMap<String, CommandHandler<C>>,
}

impl<C> CommandRouter<C> {
    /// Create an empty router
    #[inline]
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Register a handler for `keyword`, replacing any previous one
    ///
    /// # Arguments
    /// * `keyword` - Full keyword including the leading `/`
    /// * `handler` - Function to call with the parameter remainder
    pub fn register<F>(&mut self, keyword: impl Into<String>, handler: F)
    where
        F: FnMut(&mut C, &str) -> Result<()> + Send + 'static,
    {
        let keyword = keyword.into();
        if self.handlers.insert(keyword.clone(), Box::new(handler)).is_some() {
            tracing::debug!("Replaced handler for command: {}", keyword);
        } else {
            tracing::debug!("Registered handler for command: {}", keyword);
        }
    }

    /// Route a command line to its handler
    ///
    /// # Returns
    /// - `Ok(Dispatch::Handled)` - The handler ran successfully
    /// - `Ok(Dispatch::Unknown(keyword))` - Nothing is registered for the keyword
    /// - `Ok(Dispatch::Empty)` - The line was blank
    /// - `Err(e)` - The handler itself failed
    pub fn dispatch(&mut self, context: &mut C, line: &str) -> Result<Dispatch> {
        let (keyword, parameters) = parse_command_line(line);
        if keyword.is_empty() {
            return Ok(Dispatch::Empty);
        }

        match self.handlers.get_mut(&keyword) {
            Some(handler) => {
                handler(context, &parameters)?;
                Ok(Dispatch::Handled)
            }
            None => Ok(Dispatch::Unknown(keyword)),
        }
    }

    pub fn has_command(&self, keyword: &str) -> bool {
        self.handlers.contains_key(keyword)
    }

    pub fn command_count(&self) -> usize {
        self.handlers.len()
    }

    /// Registered keywords in sorted order
    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Human-readable listing: `"Commands: \n\t/a, /b, ..."`
    pub fn command_list(&self) -> String {
        let keywords: Vec<&str> = self.keywords().collect();
        format!("Commands: \n\t{}", keywords.join(", "))
    }
}

impl<C> Default for CommandRouter<C> {
    fn default() -> Self {
        Self::new()
    }
}
