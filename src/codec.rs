//! Fixed-width big-endian integer helpers.
//!
//! Every multi-byte integer in a metapack (and in the git pack index) is
//! stored big-endian. Decoding goes through [`ByteCursor`], which checks the
//! remaining length before every read so that a truncated or corrupt file
//! surfaces as `None` instead of an out-of-bounds access.

use std::io::{self, Write};

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

/// Append a big-endian u16.
pub fn put_u16<W: Write>(out: &mut W, v: u16) -> io::Result<()> {
    out.write_u16::<BigEndian>(v)
}

/// Append a big-endian u32.
pub fn put_u32<W: Write>(out: &mut W, v: u32) -> io::Result<()> {
    out.write_u32::<BigEndian>(v)
}

/// Append a big-endian u64.
pub fn put_u64<W: Write>(out: &mut W, v: u64) -> io::Result<()> {
    out.write_u64::<BigEndian>(v)
}

/// Decode a big-endian u16 from the first two bytes of `buf`.
///
/// Panics if `buf` is shorter than two bytes; callers check the length first.
pub fn get_u16(buf: &[u8]) -> u16 {
    BigEndian::read_u16(buf)
}

/// Decode a big-endian u32 from the first four bytes of `buf`.
///
/// Panics if `buf` is shorter than four bytes; callers check the length first.
pub fn get_u32(buf: &[u8]) -> u32 {
    BigEndian::read_u32(buf)
}

/// Decode a big-endian u64 from the first eight bytes of `buf`.
pub fn get_u64(buf: &[u8]) -> u64 {
    BigEndian::read_u64(buf)
}

/// Bounds-checked forward reader over a byte slice.
#[derive(Debug, Clone, Copy)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Cursor over `buf` starting at `pos`; `None` if `pos` is past the end.
    pub fn at(buf: &'a [u8], pos: usize) -> Option<Self> {
        (pos <= buf.len()).then_some(Self { buf, pos })
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Some(out)
    }

    pub fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }

    pub fn u16(&mut self) -> Option<u16> {
        self.take(2).map(get_u16)
    }

    pub fn u32(&mut self) -> Option<u32> {
        self.take(4).map(get_u32)
    }

    /// Fixed-size array, e.g. a 20-byte object id.
    pub fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Some(out)
    }

    /// Bytes up to (not including) the next NUL; the NUL is consumed.
    pub fn c_str(&mut self) -> Option<&'a [u8]> {
        let rest = &self.buf[self.pos..];
        let len = rest.iter().position(|&b| b == 0)?;
        self.pos += len + 1;
        Some(&rest[..len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get() {
        let mut buf = Vec::new();
        put_u32(&mut buf, 0xdead_beef).unwrap();
        put_u16(&mut buf, 0o100644).unwrap();

        assert_eq!(buf, [0xde, 0xad, 0xbe, 0xef, 0x81, 0xa4]);
        assert_eq!(get_u32(&buf), 0xdead_beef);
        assert_eq!(get_u16(&buf[4..]), 0o100644);
    }

    #[test]
    fn test_cursor_refuses_short_reads() {
        let buf = [0u8, 0, 0, 7, 1, 2];
        let mut cursor = ByteCursor::new(&buf);

        assert_eq!(cursor.u32(), Some(7));
        assert_eq!(cursor.u32(), None);
        // A failed read does not move the cursor.
        assert_eq!(cursor.position(), 4);
        assert_eq!(cursor.u16(), Some(0x0102));
        assert_eq!(cursor.position(), buf.len());
        assert_eq!(cursor.take(1), None);
    }

    #[test]
    fn test_cursor_c_str() {
        let buf = b"a/b\0c\0tail";
        let mut cursor = ByteCursor::new(buf);

        assert_eq!(cursor.c_str(), Some(&b"a/b"[..]));
        assert_eq!(cursor.c_str(), Some(&b"c"[..]));
        // No terminator left.
        assert_eq!(cursor.c_str(), None);
        assert_eq!(cursor.position(), 6);
    }

    #[test]
    fn test_cursor_at() {
        let buf = [1u8, 2, 3];
        assert!(ByteCursor::at(&buf, 3).is_some());
        assert!(ByteCursor::at(&buf, 4).is_none());

        let mut cursor = ByteCursor::at(&buf, 1).unwrap();
        assert_eq!(cursor.array::<2>(), Some([2, 3]));
    }
}
