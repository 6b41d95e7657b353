//! Little-endian binary codec primitives.
//!
//! Every payload on the wire is built from the same handful of shapes:
//! fixed-width numbers, fixed-length arrays, length-prefixed arrays and
//! length-prefixed UTF-8 strings.  This module provides:
//! - [`Reader`] - a bounds-checked cursor over a borrowed byte slice.
//! - [`Writer`] - an append-only output buffer.
//! - Size-accounting helpers ([`farray_size`], [`varray_size`],
//!   [`string_size`]) so callers can compute lengths before allocating.
//!
//! All multi-byte values are **little-endian**.  No I/O happens here.

use thiserror::Error;

/// Errors raised while encoding or decoding primitive values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A read needed more bytes than the buffer had left.
    #[error("buffer too short: needed {needed} byte(s), {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    /// A fixed-length array was written with the wrong number of elements.
    #[error("fixed array expects {expected} element(s), got {actual}")]
    ArrayLength { expected: usize, actual: usize },
    /// A variable-length array or string is too long for its length field.
    #[error("length {len} does not fit a {format} length field")]
    LengthOverflow { len: usize, format: LengthFormat },
    /// A length-prefixed string did not hold valid UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    /// Bytes were left over after a record was fully decoded.
    #[error("{0} trailing byte(s) after record")]
    TrailingBytes(usize),
}

// ---------------------------------------------------------------------------
// Primitive
// ---------------------------------------------------------------------------

/// A fixed-width value with a little-endian wire representation.
pub trait Primitive: Copy {
    /// Encoded width in bytes.
    const SIZE: usize;

    /// Decode from exactly [`Self::SIZE`] bytes.
    fn read_le(bytes: &[u8]) -> Self;

    /// Append the encoded value to `out`.
    fn write_le(self, out: &mut Vec<u8>);
}

macro_rules! impl_primitive {
    ($($t:ty),* $(,)?) => {$(
        impl Primitive for $t {
            const SIZE: usize = std::mem::size_of::<$t>();

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_le_bytes(raw)
            }

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
        }
    )*};
}

impl_primitive!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl Primitive for bool {
    const SIZE: usize = 1;

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(u8::from(self));
    }
}

// ---------------------------------------------------------------------------
// LengthFormat
// ---------------------------------------------------------------------------

/// Width of the length field that prefixes a variable-length array or string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthFormat {
    U8,
    U16,
    U32,
}

impl LengthFormat {
    /// Width of the length field itself.
    pub fn size(self) -> usize {
        match self {
            LengthFormat::U8 => 1,
            LengthFormat::U16 => 2,
            LengthFormat::U32 => 4,
        }
    }

    /// Largest element count the field can express.
    pub fn max_len(self) -> usize {
        match self {
            LengthFormat::U8 => u8::MAX as usize,
            LengthFormat::U16 => u16::MAX as usize,
            LengthFormat::U32 => u32::MAX as usize,
        }
    }

    /// Fail unless `len` fits this length field.
    ///
    /// Record constructors call this so oversized values are rejected when
    /// the record is built rather than when it is encoded.
    pub fn check(self, len: usize) -> Result<(), CodecError> {
        if len > self.max_len() {
            return Err(CodecError::LengthOverflow { len, format: self });
        }
        Ok(())
    }
}

impl std::fmt::Display for LengthFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LengthFormat::U8 => write!(f, "u8"),
            LengthFormat::U16 => write!(f, "u16"),
            LengthFormat::U32 => write!(f, "u32"),
        }
    }
}

// ---------------------------------------------------------------------------
// Size accounting
// ---------------------------------------------------------------------------

/// Encoded size of a fixed array of `n` elements.
pub fn farray_size<T: Primitive>(n: usize) -> usize {
    T::SIZE * n
}

/// Encoded size of a variable array of `len` elements, including its length field.
pub fn varray_size<T: Primitive>(len: usize, length: LengthFormat) -> usize {
    length.size() + T::SIZE * len
}

/// Encoded size of a length-prefixed UTF-8 string.
pub fn string_size(value: &str, length: LengthFormat) -> usize {
    length.size() + value.len()
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Bounds-checked little-endian cursor over a borrowed buffer.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Take the next `n` bytes verbatim.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if n > self.remaining() {
            return Err(CodecError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Take everything that is left.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    /// Read a single primitive value.
    pub fn read<T: Primitive>(&mut self) -> Result<T, CodecError> {
        self.read_bytes(T::SIZE).map(T::read_le)
    }

    /// Read exactly `n` elements.
    pub fn read_farray<T: Primitive>(&mut self, n: usize) -> Result<Vec<T>, CodecError> {
        let needed = T::SIZE.checked_mul(n).unwrap_or(usize::MAX);
        let raw = self.read_bytes(needed)?;
        Ok(raw.chunks_exact(T::SIZE).map(T::read_le).collect())
    }

    /// Read a length field, then that many elements.
    pub fn read_varray<T: Primitive>(&mut self, length: LengthFormat) -> Result<Vec<T>, CodecError> {
        let n = self.read_len(length)?;
        self.read_farray(n)
    }

    /// Read a length field, then that many bytes of UTF-8.
    pub fn read_string(&mut self, length: LengthFormat) -> Result<String, CodecError> {
        let n = self.read_len(length)?;
        let raw = self.read_bytes(n)?;
        String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Fail unless the whole buffer has been consumed.
    pub fn finish(&self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }

    fn read_len(&mut self, length: LengthFormat) -> Result<usize, CodecError> {
        Ok(match length {
            LengthFormat::U8 => self.read::<u8>()? as usize,
            LengthFormat::U16 => self.read::<u16>()? as usize,
            LengthFormat::U32 => self.read::<u32>()? as usize,
        })
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Append-only little-endian output buffer.
#[derive(Debug, Clone, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size the buffer, typically from a size-accounting helper.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write<T: Primitive>(&mut self, value: T) {
        value.write_le(&mut self.buf);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write exactly `n` elements; `values` must hold exactly `n`.
    pub fn write_farray<T: Primitive>(&mut self, values: &[T], n: usize) -> Result<(), CodecError> {
        if values.len() != n {
            return Err(CodecError::ArrayLength {
                expected: n,
                actual: values.len(),
            });
        }
        for v in values {
            self.write(*v);
        }
        Ok(())
    }

    /// Write the element count, then the elements.
    pub fn write_varray<T: Primitive>(
        &mut self,
        values: &[T],
        length: LengthFormat,
    ) -> Result<(), CodecError> {
        self.write_len(values.len(), length)?;
        for v in values {
            self.write(*v);
        }
        Ok(())
    }

    /// Write the byte length, then the UTF-8 bytes.
    pub fn write_string(&mut self, value: &str, length: LengthFormat) -> Result<(), CodecError> {
        self.write_len(value.len(), length)?;
        self.write_bytes(value.as_bytes());
        Ok(())
    }

    fn write_len(&mut self, len: usize, length: LengthFormat) -> Result<(), CodecError> {
        length.check(len)?;
        match length {
            LengthFormat::U8 => self.write(len as u8),
            LengthFormat::U16 => self.write(len as u16),
            LengthFormat::U32 => self.write(len as u32),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_little_endian() {
        let mut w = Writer::new();
        w.write(0x0102u16);
        w.write(-2i32);
        w.write(true);
        assert_eq!(w.as_bytes(), &[0x02, 0x01, 0xfe, 0xff, 0xff, 0xff, 0x01]);

        let mut r = Reader::new(w.as_bytes());
        assert_eq!(r.read::<u16>().unwrap(), 0x0102);
        assert_eq!(r.read::<i32>().unwrap(), -2);
        assert!(r.read::<bool>().unwrap());
        assert!(r.is_empty());
    }

    #[test]
    fn float_roundtrip_is_bit_exact() {
        let mut w = Writer::new();
        w.write(1234.5678f64);
        w.write(-0.25f32);
        let mut r = Reader::new(w.as_bytes());
        assert_eq!(r.read::<f64>().unwrap().to_bits(), 1234.5678f64.to_bits());
        assert_eq!(r.read::<f32>().unwrap(), -0.25);
    }

    #[test]
    fn read_past_end_is_truncated() {
        let mut r = Reader::new(&[0x01]);
        assert_eq!(
            r.read::<u16>(),
            Err(CodecError::Truncated {
                needed: 2,
                remaining: 1
            })
        );
        // A failed read does not move the cursor.
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn farray_short_buffer_fails() {
        let mut r = Reader::new(&[1, 0, 2, 0, 3]);
        assert!(matches!(
            r.read_farray::<u16>(3),
            Err(CodecError::Truncated { needed: 6, remaining: 5 })
        ));
        assert_eq!(r.read_farray::<u16>(2).unwrap(), vec![1, 2]);
    }

    #[test]
    fn farray_write_requires_exact_count() {
        let mut w = Writer::new();
        assert_eq!(
            w.write_farray(&[1u8, 2], 3),
            Err(CodecError::ArrayLength {
                expected: 3,
                actual: 2
            })
        );
        w.write_farray(&[1u8, 2, 3], 3).unwrap();
        assert_eq!(w.len(), farray_size::<u8>(3));
    }

    #[test]
    fn varray_writes_length_first() {
        let mut w = Writer::new();
        w.write_varray(&[10u16, 20, 30], LengthFormat::U8).unwrap();
        assert_eq!(w.as_bytes(), &[3, 10, 0, 20, 0, 30, 0]);
        assert_eq!(w.len(), varray_size::<u16>(3, LengthFormat::U8));

        let mut r = Reader::new(w.as_bytes());
        assert_eq!(r.read_varray::<u16>(LengthFormat::U8).unwrap(), vec![10, 20, 30]);
    }

    #[test]
    fn varray_length_is_bounded_by_field_width() {
        let values = vec![0u8; 256];
        let mut w = Writer::new();
        assert_eq!(
            w.write_varray(&values, LengthFormat::U8),
            Err(CodecError::LengthOverflow {
                len: 256,
                format: LengthFormat::U8
            })
        );
        assert!(w.is_empty());
        w.write_varray(&values, LengthFormat::U16).unwrap();
        assert_eq!(w.len(), 258);
    }

    #[test]
    fn varray_claiming_more_than_available_fails() {
        // Length field says 4 elements, only 2 present.
        let mut r = Reader::new(&[4, 0, 7, 8]);
        assert!(matches!(
            r.read_varray::<u8>(LengthFormat::U16),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn string_roundtrip() {
        let mut w = Writer::new();
        w.write_string("héllo", LengthFormat::U16).unwrap();
        assert_eq!(w.len(), string_size("héllo", LengthFormat::U16));

        let mut r = Reader::new(w.as_bytes());
        assert_eq!(r.read_string(LengthFormat::U16).unwrap(), "héllo");
    }

    #[test]
    fn string_rejects_invalid_utf8() {
        let mut r = Reader::new(&[2, 0xc3, 0x28]);
        assert_eq!(r.read_string(LengthFormat::U8), Err(CodecError::InvalidUtf8));
    }

    #[test]
    fn finish_reports_trailing_bytes() {
        let mut r = Reader::new(&[1, 2, 3]);
        r.read::<u8>().unwrap();
        assert_eq!(r.finish(), Err(CodecError::TrailingBytes(2)));
        r.read_rest();
        assert_eq!(r.finish(), Ok(()));
    }
}
