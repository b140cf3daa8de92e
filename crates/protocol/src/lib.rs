//! # NetSession Protocol Library
//!
//! Byte-level framing for messages exchanged between a session client and a
//! session server.
//!
//! ## Architecture
//!
//! ### 1. Buffers ([`buffer`])
//! An owned, explicitly sized byte region ([`Buffer`]) and a borrowed,
//! non-owning view of someone else's bytes ([`BufferView`]).
//!
//! ### 2. Wire Values ([`wire`])
//! Fixed-width, little-endian encoding for integers, floats and booleans.
//!
//! ### 3. Streams ([`stream`])
//! [`StreamWriter`] and [`StreamReader`] move a cursor over a buffer and
//! serialize values, length-prefixed strings and sub-buffers. Every operation
//! is all-or-nothing.
//!
//! ### 4. Messages ([`message`], [`builder`])
//! Every message starts with a [`MessageId`]. Identifiers up to
//! [`RESERVED_MESSAGE_IDS`] belong to the session layer; the builders produce
//! exactly sized buffers for its built-in messages.
//!
//! ## Usage Example
//!
//! ```rust
//! use netsession_protocol::{Buffer, MessageId, StreamReader, StreamWriter};
//!
//! let mut buffer = Buffer::with_size(32).unwrap();
//! let mut writer = StreamWriter::new(&mut buffer);
//! writer.write_value(MessageId::application(1)).unwrap();
//! writer.write_string("hello").unwrap();
//! let view = writer.into_view();
//!
//! let mut reader = StreamReader::new(view);
//! assert_eq!(reader.read_value::<MessageId>().unwrap(), MessageId::new(101));
//! assert_eq!(reader.read_string().unwrap(), "hello");
//! ```

pub mod buffer;
pub mod builder;
pub mod message;
pub mod stream;
pub mod wire;

pub use buffer::*;
pub use builder::*;
pub use message::*;
pub use stream::*;
pub use wire::*;
