//! Bit-addressable buffers for RAW coding.
//!
//! Positions are stream positions: bit `p` lives in octet `p / 8`. The bit order of a call
//! decides which physical bit of that octet it is (`Msb`: bit 7 first, `Lsb`: bit 0 first)
//! and in which order the bits of a numeric value are emitted (most or least significant
//! first). With octet-aligned values both orders produce the same octets for 8-bit values.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitOrder {
    #[default]
    Lsb,
    Msb,
}

fn locate(pos: usize, order: BitOrder) -> (usize, u8) {
    let shift = match order {
        BitOrder::Lsb => pos % 8,
        BitOrder::Msb => 7 - pos % 8,
    };
    (pos / 8, 1u8 << shift)
}

fn value_bit(value: u64, n: u32, k: u32, order: BitOrder) -> bool {
    let idx = match order {
        BitOrder::Lsb => k,
        BitOrder::Msb => n - 1 - k,
    };
    (value >> idx) & 1 != 0
}

#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    data: Vec<u8>,
    pos: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Move the cursor; the buffer grows with zero bits when moved past the end.
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
        self.reserve(pos);
    }

    fn reserve(&mut self, end: usize) {
        let octets = end.div_ceil(8);
        if self.data.len() < octets {
            self.data.resize(octets, 0);
        }
    }

    fn put_bit(&mut self, pos: usize, bit: bool, order: BitOrder) {
        self.reserve(pos + 1);
        let (octet, mask) = locate(pos, order);
        if bit {
            self.data[octet] |= mask;
        } else {
            self.data[octet] &= !mask;
        }
    }

    /// Write the low `n` bits of `value` (n <= 64).
    pub fn write_bits(&mut self, value: u64, n: u32, order: BitOrder) {
        debug_assert!(n <= 64);
        for k in 0..n {
            let bit = value_bit(value, n, k, order);
            self.put_bit(self.pos + k as usize, bit, order);
        }
        self.pos += n as usize;
    }

    pub fn write_zeros(&mut self, n: usize) {
        for k in 0..n {
            self.put_bit(self.pos + k, false, BitOrder::Lsb);
        }
        self.pos += n;
    }

    /// Advance to the next multiple of `unit` bits, writing zeros. Returns the bits added.
    pub fn pad_to(&mut self, unit: u32) -> usize {
        let add = padding_for(self.pos, unit);
        self.write_zeros(add);
        add
    }

    /// Set the first bit (in `order`) of octet `octet`: the extension bit position.
    pub fn set_octet_flag(&mut self, octet: usize, order: BitOrder, value: bool) {
        self.put_bit(octet * 8, value, order);
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.reserve(self.pos);
        self.data
    }
}

/// Bits needed to move `pos` to a multiple of `unit` (0 or 1 means no alignment).
pub fn padding_for(pos: usize, unit: u32) -> usize {
    let unit = unit as usize;
    if unit <= 1 {
        return 0;
    }
    (unit - pos % unit) % unit
}

#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitReader { data, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn len_bits(&self) -> usize {
        self.data.len() * 8
    }

    pub fn remaining(&self) -> usize {
        self.len_bits().saturating_sub(self.pos)
    }

    fn get_bit(&self, pos: usize, order: BitOrder) -> Option<bool> {
        let (octet, mask) = locate(pos, order);
        self.data.get(octet).map(|b| b & mask != 0)
    }

    /// Read `n` bits (n <= 64) at `pos` without moving the cursor.
    pub fn peek_bits_at(&self, pos: usize, n: u32, order: BitOrder) -> Option<u64> {
        if n > 64 || pos + n as usize > self.len_bits() {
            return None;
        }
        let mut out = 0u64;
        for k in 0..n {
            if self.get_bit(pos + k as usize, order)? {
                let idx = match order {
                    BitOrder::Lsb => k,
                    BitOrder::Msb => n - 1 - k,
                };
                out |= 1u64 << idx;
            }
        }
        Some(out)
    }

    /// Read `n` bits and advance; `None` when the buffer is exhausted (cursor unchanged).
    pub fn read_bits(&mut self, n: u32, order: BitOrder) -> Option<u64> {
        let v = self.peek_bits_at(self.pos, n, order)?;
        self.pos += n as usize;
        Some(v)
    }

    /// Skip to the next multiple of `unit` bits. Returns the bits skipped.
    pub fn skip_padding(&mut self, unit: u32) -> usize {
        let add = padding_for(self.pos, unit);
        self.pos += add;
        add
    }

    /// The extension bit of octet `octet` (its first bit in `order`).
    pub fn octet_flag(&self, octet: usize, order: BitOrder) -> Option<bool> {
        self.get_bit(octet * 8, order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msb_first_is_big_endian() {
        let mut w = BitWriter::new();
        w.write_bits(0x1234, 16, BitOrder::Msb);
        assert_eq!(w.into_bytes(), vec![0x12, 0x34]);
    }

    #[test]
    fn lsb_first_is_little_endian() {
        let mut w = BitWriter::new();
        w.write_bits(0x1234, 16, BitOrder::Lsb);
        assert_eq!(w.into_bytes(), vec![0x34, 0x12]);
    }

    #[test]
    fn sub_octet_fields_pack_from_first_bit() {
        let mut w = BitWriter::new();
        w.write_bits(0b1, 1, BitOrder::Msb);
        w.write_bits(0b0000011, 7, BitOrder::Msb);
        assert_eq!(w.into_bytes(), vec![0x83]);

        let mut w = BitWriter::new();
        w.write_bits(0b1, 1, BitOrder::Lsb);
        w.write_bits(0b0000011, 7, BitOrder::Lsb);
        assert_eq!(w.into_bytes(), vec![0x07]);
    }

    #[test]
    fn reader_mirrors_writer_and_rejects_overrun() {
        let mut w = BitWriter::new();
        w.write_bits(5, 3, BitOrder::Msb);
        w.write_bits(300, 13, BitOrder::Msb);
        let bytes = w.into_bytes();
        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read_bits(3, BitOrder::Msb), Some(5));
        assert_eq!(r.read_bits(13, BitOrder::Msb), Some(300));
        assert_eq!(r.read_bits(1, BitOrder::Msb), None);
        assert_eq!(r.pos(), 16);
    }

    #[test]
    fn padding_and_overwrite() {
        let mut w = BitWriter::new();
        w.write_bits(1, 3, BitOrder::Lsb);
        assert_eq!(w.pad_to(8), 5);
        w.set_octet_flag(0, BitOrder::Msb, true);
        w.set_pos(0);
        w.write_bits(0, 1, BitOrder::Lsb);
        w.set_pos(8);
        assert_eq!(w.into_bytes(), vec![0x80]);
    }
}
