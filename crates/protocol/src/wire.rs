//! Fixed-width value encoding
//!
//! Every primitive that crosses the wire is written with an explicit width and
//! an explicit byte order (little-endian), so both ends agree without relying
//! on the host representation.

use bytes::{Buf, BufMut};

/// Width of the size prefix written before strings and sub-buffers.
pub const SIZE_FIELD_WIDTH: usize = 8;

/// Trait for fixed-width values that can be written by the stream writer
/// and read back by the stream reader
///
/// Callers check `remaining()` against [`WireValue::WIDTH`] first; the
/// `bytes` accessors panic on a short buffer.
pub trait WireValue: Sized {
    /// Number of bytes the encoded value occupies
    const WIDTH: usize;

    /// Append the encoded value, advancing `buf` by `WIDTH` bytes
    fn encode<B: BufMut>(&self, buf: &mut B);

    /// Consume `WIDTH` bytes from `buf`
    fn decode<B: Buf>(buf: &mut B) -> Self;
}

macro_rules! impl_wire_value {
    ($($ty:ty => $put:ident, $get:ident);* $(;)?) => {
        $(
            impl WireValue for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn encode<B: BufMut>(&self, buf: &mut B) {
                    buf.$put(*self);
                }

                #[inline]
                fn decode<B: Buf>(buf: &mut B) -> Self {
                    buf.$get()
                }
            }
        )*
    };
}

impl_wire_value! {
    u8 => put_u8, get_u8;
    u16 => put_u16_le, get_u16_le;
    u32 => put_u32_le, get_u32_le;
    u64 => put_u64_le, get_u64_le;
    i8 => put_i8, get_i8;
    i16 => put_i16_le, get_i16_le;
    i32 => put_i32_le, get_i32_le;
    i64 => put_i64_le, get_i64_le;
    f32 => put_f32_le, get_f32_le;
    f64 => put_f64_le, get_f64_le;
}

impl WireValue for bool {
    const WIDTH: usize = 1;

    #[inline]
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(u8::from(*self));
    }

    #[inline]
    fn decode<B: Buf>(buf: &mut B) -> Self {
        buf.get_u8() != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn encode_vec<T: WireValue>(value: T) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(T::WIDTH);
        value.encode(&mut buf);
        assert_eq!(buf.len(), T::WIDTH);
        buf.to_vec()
    }

    #[test]
    fn test_little_endian_layout() {
        assert_eq!(encode_vec(0x0102_0304u32), vec![0x04, 0x03, 0x02, 0x01]);
        assert_eq!(encode_vec(-2i16), vec![0xFE, 0xFF]);
        assert_eq!(encode_vec(5u64).len(), SIZE_FIELD_WIDTH);
    }

    #[test]
    fn test_float_bit_pattern_preserved() {
        let value = f64::from_bits(0x7FF8_0000_0000_0001);
        let encoded = encode_vec(value);
        let decoded = f64::decode(&mut &encoded[..]);
        assert_eq!(decoded.to_bits(), value.to_bits());
    }

    #[test]
    fn test_bool_encoding() {
        assert_eq!(encode_vec(true), vec![1]);
        assert!(!bool::decode(&mut &[0u8][..]));
        assert!(bool::decode(&mut &[7u8][..]));
    }

    #[test]
    fn test_decode_advances_by_width() {
        let data = [0x34u8, 0x12, 0xFF];
        let mut buf = &data[..];
        assert_eq!(u16::decode(&mut buf), 0x1234);
        assert_eq!(buf.remaining(), 1);
        assert_eq!(i8::decode(&mut buf), -1);
    }

    #[test]
    fn test_encode_into_slice_tail() {
        let mut storage = [0u8; 6];
        let mut tail = &mut storage[1..];
        7u32.encode(&mut tail);
        assert_eq!(tail.len(), 1);
        assert_eq!(storage, [0, 7, 0, 0, 0, 0]);
    }
}
