//! # NetSession Command Layer
//!
//! Text commands drive a running session: connecting, changing nicknames,
//! querying presence, kicking clients.
//!
//! ## Modules
//!
//! - [`parser`] - Keyword/parameter splitting with quote support
//! - [`router`] - Keyword → handler registry shared by client and server
//! - [`queue`] - Mutex-guarded line queue fed by the input thread

pub mod parser;
pub mod queue;
pub mod router;

pub use parser::{is_number, parse_command_line, parse_parameters, MAX_PARAMETERS};
pub use queue::CommandQueue;
pub use router::{CommandHandler, CommandRouter, Dispatch};
