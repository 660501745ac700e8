//! Bit-granular reading and writing over byte buffers.
//!
//! The container stores several sub-structures at sub-byte granularity
//! (4-bit action-class cells, the entropy-coded payloads), so reads are
//! not byte-aligned: after consuming four bits, a byte read returns the
//! low nibble of the current byte followed by the high nibble of the
//! next one. Bits are consumed MSB-first within each byte.

/// Reads an arbitrary-width bit sequence from a byte slice.
///
/// End of input is reported as `None` instead of an error so scanning
/// loops can probe past the end without ceremony; fixed-layout parsers
/// lift `None` into [`Error::Truncated`](crate::Error::Truncated).
pub struct BitReader<'a> {
    data: &'a [u8],
    /// Next bit to read, counted from the start of `data`.
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Starts reading at a byte offset into the underlying slice.
    pub fn at(data: &'a [u8], byte_offset: usize) -> Self {
        Self {
            data,
            pos: byte_offset * 8,
        }
    }

    /// Byte offset of the next read, rounded down.
    pub fn byte_position(&self) -> usize {
        self.pos / 8
    }

    pub fn read_bit(&mut self) -> Option<u8> {
        let byte = *self.data.get(self.pos / 8)?;
        let bit = (byte >> (7 - self.pos % 8)) & 1;
        self.pos += 1;
        Some(bit)
    }

    pub fn read_bits(&mut self, count: u32) -> Option<u32> {
        let mut value = 0u32;
        for _ in 0..count {
            value = value << 1 | self.read_bit()? as u32;
        }
        Some(value)
    }

    pub fn read_byte(&mut self) -> Option<u8> {
        if self.pos % 8 == 0 {
            // Aligned fast path.
            let byte = *self.data.get(self.pos / 8)?;
            self.pos += 8;
            Some(byte)
        } else {
            Some(self.read_bits(8)? as u8)
        }
    }

    pub fn read_signed_byte(&mut self) -> Option<i8> {
        Some(self.read_byte()? as i8)
    }

    /// 16-bit little-endian word.
    pub fn read_word(&mut self) -> Option<u16> {
        let lo = self.read_byte()? as u16;
        let hi = self.read_byte()? as u16;
        Some(hi << 8 | lo)
    }

    /// 24-bit little-endian value.
    pub fn read_u24(&mut self) -> Option<u32> {
        let lo = self.read_word()? as u32;
        let hi = self.read_byte()? as u32;
        Some(hi << 16 | lo)
    }

    /// 32-bit little-endian value.
    pub fn read_u32(&mut self) -> Option<u32> {
        let lo = self.read_word()? as u32;
        let hi = self.read_word()? as u32;
        Some(hi << 16 | lo)
    }

    pub fn read_bytes(&mut self, count: usize) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.read_byte()?);
        }
        Some(out)
    }
}

/// Writes an arbitrary-width bit sequence into an owned buffer.
pub struct BitWriter {
    out: Vec<u8>,
    current: u8,
    /// Bits already occupied in `current`, filled MSB-first.
    filled: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            out: Vec::new(),
            current: 0,
            filled: 0,
        }
    }

    pub fn write_bit(&mut self, bit: u8) {
        self.current = self.current << 1 | (bit & 1);
        self.filled += 1;
        if self.filled == 8 {
            self.out.push(self.current);
            self.current = 0;
            self.filled = 0;
        }
    }

    pub fn write_bits(&mut self, value: u32, count: u32) {
        for i in (0..count).rev() {
            self.write_bit((value >> i) as u8 & 1);
        }
    }

    pub fn write_byte(&mut self, byte: u8) {
        if self.filled == 0 {
            self.out.push(byte);
        } else {
            self.write_bits(byte as u32, 8);
        }
    }

    pub fn write_word(&mut self, word: u16) {
        self.write_byte(word as u8);
        self.write_byte((word >> 8) as u8);
    }

    pub fn write_u24(&mut self, value: u32) {
        self.write_word(value as u16);
        self.write_byte((value >> 16) as u8);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_word(value as u16);
        self.write_word((value >> 16) as u16);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_byte(b);
        }
    }

    /// Pads any partial byte with zero bits on the low end. Without the
    /// flush, trailing bits never reach the output buffer.
    pub fn flush(&mut self) {
        if self.filled > 0 {
            self.out.push(self.current << (8 - self.filled));
            self.current = 0;
            self.filled = 0;
        }
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.flush();
        self.out
    }
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unaligned_byte_read_spans_two_bytes() {
        // 0xA5 0x3C: after 4 bits (0b1010), a byte read should yield
        // 0b0101_0011 = 0x53.
        let mut r = BitReader::new(&[0xA5, 0x3C]);
        assert_eq!(r.read_bits(4), Some(0b1010));
        assert_eq!(r.read_byte(), Some(0x53));
        assert_eq!(r.read_bits(4), Some(0xC));
        assert_eq!(r.read_bit(), None);
    }

    #[test]
    fn words_are_little_endian() {
        let mut r = BitReader::new(&[0x34, 0x12, 0x78, 0x56, 0xBC, 0x9A, 0xF0, 0xDE]);
        assert_eq!(r.read_word(), Some(0x1234));
        assert_eq!(r.read_u24(), Some(0xBC5678));
        assert_eq!(r.read_u24(), Some(0xDEF09A));
        // All eight bytes are consumed; a third read hits the end.
        assert_eq!(r.read_u24(), None);
    }

    #[test]
    fn read_u32_little_endian() {
        let mut r = BitReader::new(&[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(r.read_u32(), Some(0x12345678));
    }

    #[test]
    fn signed_byte() {
        let mut r = BitReader::new(&[0xFF, 0x01]);
        assert_eq!(r.read_signed_byte(), Some(-1));
        assert_eq!(r.read_signed_byte(), Some(1));
    }

    #[test]
    fn end_of_stream_is_none_not_panic() {
        let mut r = BitReader::new(&[0xAB]);
        assert_eq!(r.read_byte(), Some(0xAB));
        assert_eq!(r.read_byte(), None);
        assert_eq!(r.read_bit(), None);
        assert_eq!(r.read_word(), None);
    }

    #[test]
    fn writer_pads_low_bits_on_flush() {
        let mut w = BitWriter::new();
        w.write_bits(0b101, 3);
        let bytes = w.into_bytes();
        assert_eq!(bytes, vec![0b1010_0000]);
    }

    #[test]
    fn writer_reader_round_trip_unaligned() {
        let mut w = BitWriter::new();
        w.write_bit(1);
        w.write_byte(0x5A);
        w.write_word(0xBEEF);
        w.write_u32(0x0102_0304);
        let bytes = w.into_bytes();

        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read_bit(), Some(1));
        assert_eq!(r.read_byte(), Some(0x5A));
        assert_eq!(r.read_word(), Some(0xBEEF));
        assert_eq!(r.read_u32(), Some(0x0102_0304));
    }

    #[test]
    fn flush_is_idempotent() {
        let mut w = BitWriter::new();
        w.write_bit(1);
        w.flush();
        w.flush();
        assert_eq!(w.into_bytes(), vec![0x80]);
    }
}
