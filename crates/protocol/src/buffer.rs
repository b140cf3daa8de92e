//! # Owned Buffers and Borrowed Views
//!
//! A [`Buffer`] is the unit of data moved across the transport boundary. It
//! exclusively owns its storage: cloning performs a deep copy and dropping
//! releases it. A [`BufferView`] references bytes owned by somebody else and
//! can never release them; its lifetime is tied to the owner.
//!
//! ## Storage Invariant
//!
//! `size() == 0` if and only if the buffer owns no storage. Allocating zero
//! bytes is the same as releasing.

use bytes::Bytes;
use netsession_core::{FramingError, NetError, Result};
use std::fmt;
use std::ops::{Deref, Index, IndexMut};

/// Owned, explicitly sized byte region
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Buffer {
    data: Option<Box<[u8]>>,
}

impl Buffer {
    /// Create an empty buffer with no storage
    #[inline]
    pub const fn new() -> Self {
        Self { data: None }
    }

    /// Create a buffer owning `size` zeroed bytes
    pub fn with_size(size: usize) -> Result<Self> {
        let mut buffer = Self::new();
        buffer.allocate(size)?;
        Ok(buffer)
    }

    /// Create a new buffer holding a deep copy of `source`
    pub fn copy(source: &[u8]) -> Result<Self> {
        let mut buffer = Self::with_size(source.len())?;
        if let Some(data) = buffer.data.as_mut() {
            data.copy_from_slice(source);
        }
        Ok(buffer)
    }

    /// Release any held storage, then allocate exactly `size` bytes
    ///
    /// The new storage is zero-filled. `size == 0` leaves the buffer empty.
    ///
    /// # Errors
    /// Returns [`NetError::Allocation`] if the allocator refuses the request;
    /// the buffer is left empty in that case.
    pub fn allocate(&mut self, size: usize) -> Result<()> {
        self.release();
        if size == 0 {
            return Ok(());
        }

        let mut storage: Vec<u8> = Vec::new();
        storage
            .try_reserve_exact(size)
            .map_err(|_| NetError::Allocation { size })?;
        storage.resize(size, 0);
        self.data = Some(storage.into_boxed_slice());
        Ok(())
    }

    /// Free storage and reset to empty. Idempotent.
    #[inline]
    pub fn release(&mut self) {
        self.data = None;
    }

    /// Overwrite owned storage with zeros; no-op when empty
    pub fn zero(&mut self) {
        if let Some(data) = self.data.as_mut() {
            data.fill(0);
        }
    }

    /// Number of owned bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.data.as_ref().map_or(0, |data| data.len())
    }

    /// Whether the buffer currently owns storage
    #[inline]
    pub fn is_good(&self) -> bool {
        self.data.is_some()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }

    /// Borrow the whole buffer as a view
    #[inline]
    pub fn view(&self) -> BufferView<'_> {
        BufferView::new(self.as_slice())
    }

    /// Copy `bytes` into this buffer's own storage at `offset`
    ///
    /// Nothing is written unless the whole range fits.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> std::result::Result<(), FramingError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let size = self.size();
        let data = self.data.as_mut().ok_or(FramingError::NoStorage)?;
        let remaining = size.saturating_sub(offset);
        if bytes.len() > remaining {
            return Err(FramingError::Overflow {
                requested: bytes.len(),
                remaining,
            });
        }
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Copy `size` bytes starting at `offset` out of the buffer
    pub fn read_at(&self, offset: usize, size: usize) -> std::result::Result<Vec<u8>, FramingError> {
        let remaining = self.size().saturating_sub(offset);
        if size > remaining {
            return Err(FramingError::Underflow {
                requested: size,
                remaining,
            });
        }
        Ok(self.as_slice()[offset..offset + size].to_vec())
    }

    /// Convert into a shared, immutable byte payload for the transport
    pub fn into_bytes(self) -> Bytes {
        match self.data {
            Some(data) => Bytes::from(data.into_vec()),
            None => Bytes::new(),
        }
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        if data.is_empty() {
            Self::new()
        } else {
            Self {
                data: Some(data.into_boxed_slice()),
            }
        }
    }
}

impl Index<usize> for Buffer {
    type Output = u8;

    #[inline]
    fn index(&self, index: usize) -> &u8 {
        &self.as_slice()[index]
    }
}

impl IndexMut<usize> for Buffer {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut u8 {
        &mut self.as_mut_slice()[index]
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.size())
            .field("good", &self.is_good())
            .finish()
    }
}

/// Non-owning view of bytes held by another owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferView<'a> {
    data: &'a [u8],
}

impl<'a> BufferView<'a> {
    #[inline]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Whether the view references any bytes
    #[inline]
    pub fn is_good(&self) -> bool {
        !self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &'a [u8] {
        self.data
    }

    /// Deep-copy the viewed bytes into a new owned buffer
    pub fn to_buffer(&self) -> Result<Buffer> {
        Buffer::copy(self.data)
    }
}

impl Deref for BufferView<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.data
    }
}

impl<'a> From<&'a [u8]> for BufferView<'a> {
    fn from(data: &'a [u8]) -> Self {
        Self::new(data)
    }
}

impl<'a> From<&'a Buffer> for BufferView<'a> {
    fn from(buffer: &'a Buffer) -> Self {
        buffer.view()
    }
}

impl<'a> From<&'a Bytes> for BufferView<'a> {
    fn from(bytes: &'a Bytes) -> Self {
        Self::new(bytes.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_release() {
        let mut buffer = Buffer::new();
        assert!(!buffer.is_good());
        assert_eq!(buffer.size(), 0);

        buffer.allocate(32).unwrap();
        assert!(buffer.is_good());
        assert_eq!(buffer.size(), 32);
        assert!(buffer.as_slice().iter().all(|&b| b == 0));

        buffer.release();
        buffer.release();
        assert!(!buffer.is_good());
        assert_eq!(buffer.size(), 0);
    }

    #[test]
    fn test_allocate_zero_matches_release() {
        let mut buffer = Buffer::with_size(8).unwrap();
        buffer.allocate(0).unwrap();
        assert_eq!(buffer, Buffer::new());
    }

    #[test]
    fn test_reallocate_replaces_storage() {
        let mut buffer = Buffer::copy(b"abc").unwrap();
        buffer.allocate(5).unwrap();
        assert_eq!(buffer.as_slice(), &[0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_zero_overwrites() {
        let mut buffer = Buffer::copy(b"hello").unwrap();
        buffer.zero();
        assert_eq!(buffer.as_slice(), &[0; 5]);

        let mut empty = Buffer::new();
        empty.zero();
        assert!(!empty.is_good());
    }

    #[test]
    fn test_clone_is_deep_copy() {
        let original = Buffer::copy(b"data").unwrap();
        let mut copy = original.clone();
        copy[0] = b'D';
        assert_eq!(original.as_slice(), b"data");
        assert_eq!(copy.as_slice(), b"Data");
    }

    #[test]
    fn test_write_at_targets_own_storage() {
        let mut buffer = Buffer::with_size(6).unwrap();
        buffer.write_at(2, b"xy").unwrap();
        assert_eq!(buffer.as_slice(), &[0, 0, b'x', b'y', 0, 0]);
    }

    #[test]
    fn test_write_at_rejects_overflow_without_writing() {
        let mut buffer = Buffer::with_size(4).unwrap();
        let err = buffer.write_at(3, b"ab").unwrap_err();
        assert_eq!(err, FramingError::Overflow { requested: 2, remaining: 1 });
        assert_eq!(buffer.as_slice(), &[0; 4]);

        let mut empty = Buffer::new();
        assert_eq!(empty.write_at(0, b"a"), Err(FramingError::NoStorage));
    }

    #[test]
    fn test_read_at_bounds() {
        let buffer = Buffer::copy(b"abcdef").unwrap();
        assert_eq!(buffer.read_at(1, 3).unwrap(), b"bcd".to_vec());
        assert!(buffer.read_at(4, 3).is_err());
    }

    #[test]
    fn test_view_borrows_without_owning() {
        let buffer = Buffer::copy(b"view me").unwrap();
        let view = buffer.view();
        assert_eq!(view.size(), 7);
        assert_eq!(&view[..4], b"view");

        let owned = view.to_buffer().unwrap();
        assert_eq!(owned, buffer);
    }

    #[test]
    fn test_into_bytes() {
        let bytes = Buffer::copy(b"xyz").unwrap().into_bytes();
        assert_eq!(&bytes[..], b"xyz");
        assert!(Buffer::new().into_bytes().is_empty());
    }
}
