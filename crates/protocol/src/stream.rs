//! # Stream Framing
//!
//! Cursor-based writer and reader over a single buffer.
//!
//! ## Field Encodings
//!
//! ```text
//! value:      {WIDTH bytes, little-endian}
//! string:     {u64 length}{raw UTF-8 bytes, no terminator}
//! sub-buffer: [{u64 length}]{raw bytes}
//! ```
//!
//! ## Failure Contract
//!
//! Every operation is all-or-nothing. A write that would run past the end of
//! the buffer, or a read that would run past the end of the data, returns a
//! [`FramingError`] and leaves both the bytes and the cursor untouched, so the
//! framing of subsequent fields is never corrupted by a partial operation.

use crate::buffer::{Buffer, BufferView};
use crate::wire::{WireValue, SIZE_FIELD_WIDTH};
use bytes::{Buf, BufMut};
use netsession_core::FramingError;

type FrameResult<T> = std::result::Result<T, FramingError>;

/// Serializing cursor over an owned buffer
///
/// The writer borrows the buffer for the duration of one serialize pass.
pub struct StreamWriter<'a> {
    buffer: &'a mut Buffer,
    position: usize,
}

impl<'a> StreamWriter<'a> {
    pub fn new(buffer: &'a mut Buffer) -> Self {
        Self { buffer, position: 0 }
    }

    /// Bytes left between the cursor and the end of the buffer
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buffer.size() - self.position
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Move the cursor; positions past the end of the buffer are rejected
    pub fn set_position(&mut self, position: usize) -> FrameResult<()> {
        if position > self.buffer.size() {
            return Err(FramingError::Overflow {
                requested: position - self.position.min(position),
                remaining: self.remaining(),
            });
        }
        self.position = position;
        Ok(())
    }

    /// Whether the underlying buffer owns storage
    #[inline]
    pub fn is_good(&self) -> bool {
        self.buffer.is_good()
    }

    fn reserve(&self, len: usize) -> FrameResult<()> {
        if len == 0 {
            return Ok(());
        }
        if !self.buffer.is_good() {
            return Err(FramingError::NoStorage);
        }
        let remaining = self.remaining();
        if len > remaining {
            return Err(FramingError::Overflow {
                requested: len,
                remaining,
            });
        }
        Ok(())
    }

    /// Unwritten part of the buffer; only valid after a successful `reserve`
    #[inline]
    fn tail(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut_slice()[self.position..]
    }

    #[inline]
    fn put(&mut self, bytes: &[u8]) {
        let mut tail = self.tail();
        tail.put_slice(bytes);
        self.position += bytes.len();
    }

    #[inline]
    fn put_value<T: WireValue>(&mut self, value: &T) {
        let mut tail = self.tail();
        value.encode(&mut tail);
        self.position += T::WIDTH;
    }

    /// Copy raw bytes at the cursor
    pub fn write_raw(&mut self, bytes: &[u8]) -> FrameResult<()> {
        self.reserve(bytes.len())?;
        self.put(bytes);
        Ok(())
    }

    /// Write a fixed-width value
    pub fn write_value<T: WireValue>(&mut self, value: T) -> FrameResult<()> {
        self.reserve(T::WIDTH)?;
        self.put_value(&value);
        Ok(())
    }

    /// Write a length-prefixed string
    pub fn write_string(&mut self, string: &str) -> FrameResult<()> {
        self.write_buffer(string.as_bytes(), true)
    }

    /// Write a sub-buffer, optionally preceded by its size
    pub fn write_buffer(&mut self, bytes: &[u8], write_size: bool) -> FrameResult<()> {
        let prefix = if write_size { SIZE_FIELD_WIDTH } else { 0 };
        self.reserve(prefix + bytes.len())?;
        if write_size {
            self.put_value(&(bytes.len() as u64));
        }
        self.put(bytes);
        Ok(())
    }

    /// Write `count` zero bytes
    pub fn write_zero(&mut self, count: usize) -> FrameResult<()> {
        self.reserve(count)?;
        let mut tail = self.tail();
        tail.put_bytes(0, count);
        self.position += count;
        Ok(())
    }

    /// The written region `[0, position)`
    #[inline]
    pub fn written(&self) -> &[u8] {
        &self.buffer.as_slice()[..self.position]
    }

    /// View of the written region; borrows the underlying buffer
    #[inline]
    pub fn view(&self) -> BufferView<'_> {
        BufferView::new(self.written())
    }

    /// Finish the pass and keep a view of the written region
    pub fn into_view(self) -> BufferView<'a> {
        let Self { buffer, position } = self;
        let buffer: &'a Buffer = buffer;
        BufferView::new(&buffer.as_slice()[..position])
    }
}

/// Deserializing cursor over borrowed bytes
pub struct StreamReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> StreamReader<'a> {
    pub fn new(data: impl Into<BufferView<'a>>) -> Self {
        Self {
            data: data.into().as_slice(),
            position: 0,
        }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn set_position(&mut self, position: usize) -> FrameResult<()> {
        if position > self.data.len() {
            return Err(FramingError::Underflow {
                requested: position - self.position.min(position),
                remaining: self.remaining(),
            });
        }
        self.position = position;
        Ok(())
    }

    /// Whether the reader has any bytes to read from
    #[inline]
    pub fn is_good(&self) -> bool {
        !self.data.is_empty()
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn check(&self, len: usize) -> FrameResult<()> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(FramingError::Underflow {
                requested: len,
                remaining,
            });
        }
        Ok(())
    }

    /// Unread part of the data
    #[inline]
    fn tail(&self) -> &'a [u8] {
        let data = self.data;
        &data[self.position..]
    }

    fn take(&mut self, len: usize) -> &'a [u8] {
        let data = self.data;
        let start = self.position;
        self.position += len;
        &data[start..self.position]
    }

    /// Borrow the next `len` bytes without copying
    pub fn read_bytes(&mut self, len: usize) -> FrameResult<&'a [u8]> {
        self.check(len)?;
        Ok(self.take(len))
    }

    /// Fill `dest` from the stream
    pub fn read_raw(&mut self, dest: &mut [u8]) -> FrameResult<()> {
        self.check(dest.len())?;
        self.tail().copy_to_slice(dest);
        self.position += dest.len();
        Ok(())
    }

    pub fn read_value<T: WireValue>(&mut self) -> FrameResult<T> {
        self.check(T::WIDTH)?;
        let mut tail = self.tail();
        let value = T::decode(&mut tail);
        self.position += T::WIDTH;
        Ok(value)
    }

    /// Read a size prefix and the bytes it announces, as one unit
    fn read_sized(&mut self) -> FrameResult<&'a [u8]> {
        self.check(SIZE_FIELD_WIDTH)?;
        let size = self.tail().get_u64_le();
        let remaining = self.remaining();
        let total = usize::try_from(size)
            .ok()
            .and_then(|size| size.checked_add(SIZE_FIELD_WIDTH))
            .filter(|&total| total <= remaining)
            .ok_or(FramingError::Underflow {
                requested: usize::try_from(size).unwrap_or(usize::MAX),
                remaining: remaining - SIZE_FIELD_WIDTH,
            })?;
        let bytes = self.take(total);
        Ok(&bytes[SIZE_FIELD_WIDTH..])
    }

    /// Read a length-prefixed string
    pub fn read_string(&mut self) -> FrameResult<String> {
        let start = self.position;
        let bytes = self.read_sized()?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_owned()),
            Err(_) => {
                self.position = start;
                Err(FramingError::InvalidUtf8)
            }
        }
    }

    /// Read a sub-buffer into a freshly allocated, owned buffer
    ///
    /// With `size == 0` the size is itself read from the stream, mirroring
    /// [`StreamWriter::write_buffer`] with `write_size = true`.
    pub fn read_buffer(&mut self, size: usize) -> netsession_core::Result<Buffer> {
        let start = self.position;
        let bytes = if size == 0 {
            self.read_sized()?
        } else {
            self.read_bytes(size)?
        };
        Buffer::copy(bytes).map_err(|e| {
            self.position = start;
            e
        })
    }

    /// Skip `len` bytes without copying
    pub fn ignore(&mut self, len: usize) -> FrameResult<()> {
        self.check(len)?;
        self.position += len;
        Ok(())
    }

    /// Everything from the cursor to the end
    pub fn rest(&self) -> &'a [u8] {
        self.tail()
    }
}
