use std::fmt;

/// A parse failure produced by [`Reader`].
///
/// Carries the byte offset at which parsing failed so that callers can
/// build diagnostics without re-walking the buffer themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("decode error at offset {offset}: {reason}")]
pub struct DecodeError {
    pub reason: &'static str,
    pub offset: usize,
}

impl DecodeError {
    fn new(reason: &'static str, offset: usize) -> Self {
        Self { reason, offset }
    }
}

/// A positional, bounds-checked reader over a borrowed byte slice.
///
/// Every read either succeeds and advances the cursor, or fails with a
/// [`DecodeError`] and leaves the cursor where it was. Readers are cheap to
/// construct and are typically nested: a length-prefixed vector is read by
/// carving out a sub-`Reader` over exactly its bytes via [`Reader::sub`],
/// so that trailing-byte checks are local to the vector rather than to the
/// whole message.
#[derive(Clone, Copy)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> fmt::Debug for Reader<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("pos", &self.pos)
            .field("len", &self.buf.len())
            .finish()
    }
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// The offset of the cursor within the original buffer, for error
    /// reporting by callers that wrap this reader.
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Remaining bytes, without consuming them.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Consume and return exactly `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::new("unexpected end of buffer", self.pos));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Read a big-endian unsigned integer of `width` bytes (1..=8).
    pub fn read_uint(&mut self, width: usize) -> Result<u64, DecodeError> {
        debug_assert!(width >= 1 && width <= 8);
        let bytes = self.take(width)?;
        let mut acc = 0u64;
        for &b in bytes {
            acc = (acc << 8) | (b as u64);
        }
        Ok(acc)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_uint(1)? as u8)
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(self.read_uint(2)? as u16)
    }

    /// A 24-bit big-endian integer, as used for handshake message lengths.
    pub fn read_u24(&mut self) -> Result<u32, DecodeError> {
        Ok(self.read_uint(3)? as u32)
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(self.read_uint(4)? as u32)
    }

    /// A 48-bit big-endian integer, as used for DTLS sequence numbers.
    pub fn read_u48(&mut self) -> Result<u64, DecodeError> {
        self.read_uint(6)
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        self.read_uint(8)
    }

    /// Read a length-prefixed byte vector where the prefix is `prefix_width`
    /// bytes wide, and the inner byte length must fall within
    /// `[min, max]` inclusive.
    pub fn read_vec(
        &mut self,
        prefix_width: usize,
        min: usize,
        max: usize,
    ) -> Result<&'a [u8], DecodeError> {
        let len = self.read_uint(prefix_width)? as usize;
        if len < min || len > max {
            return Err(DecodeError::new(
                "vector length outside declared bounds",
                self.pos,
            ));
        }
        self.take(len)
    }

    pub fn read_vec_u8(&mut self, min: usize, max: usize) -> Result<&'a [u8], DecodeError> {
        self.read_vec(1, min, max)
    }

    pub fn read_vec_u16(&mut self, min: usize, max: usize) -> Result<&'a [u8], DecodeError> {
        self.read_vec(2, min, max)
    }

    pub fn read_vec_u24(&mut self, min: usize, max: usize) -> Result<&'a [u8], DecodeError> {
        self.read_vec(3, min, max)
    }

    /// Read a vector of fixed-`element_width` elements, itself preceded by
    /// a `prefix_width`-byte *total byte length* (not element count). The
    /// total length must be a multiple of `element_width`.
    pub fn read_vec_of(
        &mut self,
        prefix_width: usize,
        element_width: usize,
    ) -> Result<&'a [u8], DecodeError> {
        let len = self.read_uint(prefix_width)? as usize;
        if element_width != 0 && len % element_width != 0 {
            return Err(DecodeError::new(
                "vector byte length not a multiple of element width",
                self.pos,
            ));
        }
        self.take(len)
    }

    /// Carve out a sub-reader over exactly the next `n` bytes.
    pub fn sub(&mut self, n: usize) -> Result<Reader<'a>, DecodeError> {
        Ok(Reader::new(self.take(n)?))
    }

    /// Assert there are no trailing bytes left. `context` names the
    /// message/extension being validated, for the error reason.
    pub fn expect_empty(&self, context: &'static str) -> Result<(), DecodeError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::new(context, self.pos))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian_integers() {
        let buf = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        let mut r = Reader::new(&buf);
        assert_eq!(r.read_u8().unwrap(), 0x01);
        assert_eq!(r.read_u16().unwrap(), 0x0203);
        assert_eq!(r.read_u24().unwrap(), 0x040506);
        assert!(r.is_empty());
    }

    #[test]
    fn bounds_checked_on_underrun() {
        let buf = [0x00, 0x01];
        let mut r = Reader::new(&buf);
        assert!(r.read_u24().is_err());
    }

    #[test]
    fn length_prefixed_vector_enforces_bounds() {
        let buf = [0x00, 0x02, 0xAA, 0xBB];
        let mut r = Reader::new(&buf);
        let v = r.read_vec_u16(1, 4).unwrap();
        assert_eq!(v, &[0xAA, 0xBB]);
        assert!(r.is_empty());

        let buf = [0x00, 0x00]; // zero-length, min 1
        let mut r = Reader::new(&buf);
        assert!(r.read_vec_u16(1, 4).is_err());
    }

    #[test]
    fn trailing_bytes_rejected_when_asserted() {
        let buf = [0xAA, 0xBB];
        let mut r = Reader::new(&buf);
        r.read_u8().unwrap();
        assert!(r.expect_empty("trailing bytes after field").is_err());
    }

    #[test]
    fn sub_reader_is_independently_bounded() {
        let buf = [0x00, 0x00, 0x00, 0x01, 0x02, 0x03];
        let mut r = Reader::new(&buf);
        r.take(4).unwrap();
        let mut sub = r.sub(2).unwrap();
        assert_eq!(sub.read_u16().unwrap(), 0x0203);
        assert!(sub.read_u8().is_err());
    }
}
