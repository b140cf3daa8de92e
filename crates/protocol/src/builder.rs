//! # Message Builder
//!
//! Builder functions for the session layer's own messages plus a couple of
//! generic helpers for application messages.
//!
//! Every builder sizes its buffer to the exact encoded length, so a long
//! presence listing can never overflow a fixed-size scratch buffer.
//!
//! ## Usage
//!
//! ```rust
//! use netsession_protocol::builder::*;
//!
//! let notice = build_server_notice("User 0 has connected!").unwrap();
//! assert_eq!(notice.size(), 4 + 8 + 21);
//! ```

use super::{
    buffer::Buffer,
    message::{MessageId, MESSAGE_ID_WIDTH},
    stream::{StreamReader, StreamWriter},
    wire::{WireValue, SIZE_FIELD_WIDTH},
};
use netsession_core::{NetError, Result};

/// Encoded size of a length-prefixed string field
#[inline]
pub fn encoded_string_len(text: &str) -> usize {
    SIZE_FIELD_WIDTH + text.len()
}

/// Build a message consisting of an identifier and one string field
///
/// # Packet Format
/// ```text
/// {i32 id}{u64 len}{bytes}
/// ```
pub fn build_text_message(id: MessageId, text: &str) -> Result<Buffer> {
    let mut buffer = Buffer::with_size(MESSAGE_ID_WIDTH + encoded_string_len(text))?;
    let mut writer = StreamWriter::new(&mut buffer);
    writer.write_value(id)?;
    writer.write_string(text)?;
    Ok(buffer)
}

/// Build a message consisting of an identifier and one fixed-width value
///
/// # Packet Format
/// ```text
/// {i32 id}{T value}
/// ```
pub fn build_value_message<T: WireValue>(id: MessageId, value: T) -> Result<Buffer> {
    let mut buffer = Buffer::with_size(MESSAGE_ID_WIDTH + T::WIDTH)?;
    let mut writer = StreamWriter::new(&mut buffer);
    writer.write_value(id)?;
    writer.write_value(value)?;
    Ok(buffer)
}

/// Build a server notice (SERVER_NOTICE = 99)
///
/// # Purpose
/// Human-readable text from the server: join/leave announcements, nickname
/// changes, presence listings and failure notices.
///
/// # Packet Format
/// ```text
/// {99}{STRING text}
/// ```
pub fn build_server_notice(text: &str) -> Result<Buffer> {
    build_text_message(MessageId::SERVER_NOTICE, text)
}

/// Build a nickname-set request (NICKNAME_SET = 98)
///
/// # Packet Format
/// ```text
/// {98}{STRING nickname}
/// ```
pub fn build_nickname_set(nickname: &str) -> Result<Buffer> {
    build_text_message(MessageId::NICKNAME_SET, nickname)
}

/// Build a presence query (PRESENCE_QUERY = 97)
///
/// # Packet Format
/// ```text
/// {97}
/// ```
pub fn build_presence_query() -> Result<Buffer> {
    let mut buffer = Buffer::with_size(MESSAGE_ID_WIDTH)?;
    StreamWriter::new(&mut buffer).write_value(MessageId::PRESENCE_QUERY)?;
    Ok(buffer)
}

/// Decode a message built by [`build_text_message`]
pub fn decode_text_message(message: &[u8]) -> Result<(MessageId, String)> {
    let mut reader = StreamReader::new(message);
    let id = reader.read_value::<MessageId>()?;
    let text = reader.read_string()?;
    Ok((id, text))
}

/// Decode a server notice, rejecting any other identifier
pub fn decode_server_notice(message: &[u8]) -> Result<String> {
    let (id, text) = decode_text_message(message)?;
    if id != MessageId::SERVER_NOTICE {
        return Err(NetError::Protocol(format!("Expected server notice, got message {}", id)));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_notice_layout() {
        let notice = build_server_notice("hi").unwrap();
        let bytes = notice.as_slice();
        assert_eq!(&bytes[..4], &[99, 0, 0, 0]);
        assert_eq!(&bytes[4..12], &2u64.to_le_bytes());
        assert_eq!(&bytes[12..], b"hi");
        assert_eq!(decode_server_notice(bytes).unwrap(), "hi");
    }

    #[test]
    fn test_nickname_set() {
        let request = build_nickname_set("Alice").unwrap();
        let (id, nick) = decode_text_message(request.as_slice()).unwrap();
        assert_eq!(id, MessageId::NICKNAME_SET);
        assert_eq!(nick, "Alice");
        assert!(decode_server_notice(request.as_slice()).is_err());
    }

    #[test]
    fn test_presence_query_has_no_payload() {
        let query = build_presence_query().unwrap();
        assert_eq!(query.as_slice(), &97i32.to_le_bytes());
    }

    #[test]
    fn test_value_message() {
        let message = build_value_message(MessageId::application(3), 0.25f64).unwrap();
        let mut reader = StreamReader::new(&message);
        assert_eq!(reader.read_value::<MessageId>().unwrap(), MessageId::new(103));
        assert_eq!(reader.read_value::<f64>().unwrap(), 0.25);
    }

    #[test]
    fn test_long_listing_fits() {
        let text = "x".repeat(4096);
        let notice = build_server_notice(&text).unwrap();
        assert_eq!(decode_server_notice(notice.as_slice()).unwrap().len(), 4096);
    }
}
