//! # Message Identifiers
//!
//! Every framed message starts with exactly one [`MessageId`], encoded as a
//! little-endian `i32`, followed by identifier-specific payload.
//!
//! ## Reserved Range
//!
//! | Id  | Message          | Payload            | Direction        |
//! |-----|------------------|--------------------|------------------|
//! | 0   | Invalid          | -                  | -                |
//! | 97  | Presence query   | -                  | client → server  |
//! | 98  | Nickname set     | `{STRING nick}`    | client → server  |
//! | 99  | Server notice    | `{STRING text}`    | server → client  |
//!
//! Identifiers `0..=100` are reserved for the session layer. Applications use
//! identifiers above [`RESERVED_MESSAGE_IDS`], conventionally built with
//! [`MessageId::application`].

use crate::wire::WireValue;
use bytes::{Buf, BufMut};
use netsession_core::FramingError;
use std::fmt;

/// Upper bound (inclusive) of the identifier range reserved for built-ins
pub const RESERVED_MESSAGE_IDS: i32 = 100;

/// Width of an encoded message identifier
pub const MESSAGE_ID_WIDTH: usize = 4;

/// Fixed-width message tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub i32);

impl MessageId {
    pub const INVALID: MessageId = MessageId(0);
    pub const PRESENCE_QUERY: MessageId = MessageId(97);
    pub const NICKNAME_SET: MessageId = MessageId(98);
    pub const SERVER_NOTICE: MessageId = MessageId(99);

    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// The `offset`-th application identifier (`offset` starts at 1)
    pub const fn application(offset: i32) -> Self {
        Self(RESERVED_MESSAGE_IDS + offset)
    }

    pub fn get(&self) -> i32 {
        self.0
    }

    pub fn is_reserved(&self) -> bool {
        (0..=RESERVED_MESSAGE_IDS).contains(&self.0)
    }

    pub fn is_application(&self) -> bool {
        self.0 > RESERVED_MESSAGE_IDS
    }

    /// The built-in message this identifier names, if any
    pub fn builtin(&self) -> Option<BuiltinMessage> {
        match *self {
            Self::INVALID => Some(BuiltinMessage::Invalid),
            Self::PRESENCE_QUERY => Some(BuiltinMessage::PresenceQuery),
            Self::NICKNAME_SET => Some(BuiltinMessage::NicknameSet),
            Self::SERVER_NOTICE => Some(BuiltinMessage::ServerNotice),
            _ => None,
        }
    }
}

impl From<i32> for MessageId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.builtin() {
            Some(builtin) => write!(f, "{} ({})", self.0, builtin.as_str()),
            None => write!(f, "{}", self.0),
        }
    }
}

impl WireValue for MessageId {
    const WIDTH: usize = MESSAGE_ID_WIDTH;

    #[inline]
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.0.encode(buf);
    }

    #[inline]
    fn decode<B: Buf>(buf: &mut B) -> Self {
        Self(i32::decode(buf))
    }
}

/// Messages the session layer handles itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinMessage {
    Invalid,
    PresenceQuery,
    NicknameSet,
    ServerNotice,
}

impl BuiltinMessage {
    pub fn id(&self) -> MessageId {
        match self {
            Self::Invalid => MessageId::INVALID,
            Self::PresenceQuery => MessageId::PRESENCE_QUERY,
            Self::NicknameSet => MessageId::NICKNAME_SET,
            Self::ServerNotice => MessageId::SERVER_NOTICE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::PresenceQuery => "presence-query",
            Self::NicknameSet => "nickname-set",
            Self::ServerNotice => "server-notice",
        }
    }
}

/// Read the identifier at the front of a framed message without consuming it
pub fn peek_message_id(message: &[u8]) -> Result<MessageId, FramingError> {
    if message.len() < MESSAGE_ID_WIDTH {
        return Err(FramingError::Underflow {
            requested: MESSAGE_ID_WIDTH,
            remaining: message.len(),
        });
    }
    let mut head = message;
    Ok(MessageId::decode(&mut head))
}
