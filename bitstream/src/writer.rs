//! Bit-level writer for encoding packed binary data.

use crate::error::{BitError, BitResult};

/// Maximum encoded length of a `u32` varint, in 8-bit groups.
pub(crate) const VARINT_MAX_GROUPS: usize = 5;

/// A position in the stream that can be rolled back to.
///
/// Obtained from [`BitWriter::checkpoint`]. Used to undo a partially written
/// item when it turns out not to fit a size budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    bit_len: usize,
}

impl Checkpoint {
    /// Bits written at the time the checkpoint was taken.
    #[must_use]
    pub const fn bits(self) -> usize {
        self.bit_len
    }
}

/// A reserved fixed-width region that is written later.
///
/// Used for counts that are only known after the items they describe have
/// been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    bit_position: usize,
    bits: u8,
}

/// A growable bit-level writer (MSB-first within each byte).
///
/// Writes are accumulated in an internal buffer. Call [`finish`](Self::finish)
/// to get the final byte buffer.
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    /// Creates a new empty `BitWriter`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `BitWriter` with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bytes),
            bit_len: 0,
        }
    }

    /// Returns the number of bits written so far.
    #[must_use]
    pub const fn bits_written(&self) -> usize {
        self.bit_len
    }

    /// Returns the number of bytes the output occupies, counting a partial
    /// trailing byte as a full byte.
    #[must_use]
    pub const fn bytes_written(&self) -> usize {
        self.bit_len.div_ceil(8)
    }

    /// Writes a single bit.
    pub fn write_bool(&mut self, value: bool) {
        let bit_idx = self.bit_len % 8;
        if bit_idx == 0 {
            self.bytes.push(0);
        }
        if value {
            let last = self.bytes.len() - 1;
            self.bytes[last] |= 1 << (7 - bit_idx);
        }
        self.bit_len += 1;
    }

    /// Writes up to 64 bits from an unsigned integer.
    ///
    /// # Errors
    ///
    /// Returns [`BitError::InvalidBitCount`] if `bits > 64`.
    /// Returns [`BitError::ValueOutOfRange`] if `value` doesn't fit in `bits`.
    pub fn write_bits(&mut self, value: u64, bits: u8) -> BitResult<()> {
        if bits > 64 {
            return Err(BitError::InvalidBitCount { bits, max_bits: 64 });
        }
        if bits == 0 {
            return Ok(());
        }
        if bits < 64 && value >= (1u64 << bits) {
            return Err(BitError::ValueOutOfRange { value, bits });
        }
        for i in (0..bits).rev() {
            self.write_bool((value >> i) & 1 == 1);
        }
        Ok(())
    }

    /// Pads with zero bits up to the next byte boundary.
    pub fn align_to_byte(&mut self) {
        while self.bit_len % 8 != 0 {
            self.write_bool(false);
        }
    }

    /// Writes a byte-aligned `u8`.
    pub fn write_u8_aligned(&mut self, value: u8) -> BitResult<()> {
        self.ensure_aligned()?;
        self.bytes.push(value);
        self.bit_len += 8;
        Ok(())
    }

    /// Writes a byte-aligned `u16` (little-endian).
    pub fn write_u16_aligned(&mut self, value: u16) -> BitResult<()> {
        self.write_aligned_bytes(&value.to_le_bytes())
    }

    /// Writes a byte-aligned `u32` (little-endian).
    pub fn write_u32_aligned(&mut self, value: u32) -> BitResult<()> {
        self.write_aligned_bytes(&value.to_le_bytes())
    }

    /// Writes a byte-aligned `u64` (little-endian).
    pub fn write_u64_aligned(&mut self, value: u64) -> BitResult<()> {
        self.write_aligned_bytes(&value.to_le_bytes())
    }

    /// Writes a varint `u32` as 8-bit groups (continuation bit + 7 payload
    /// bits). Does not require byte alignment.
    pub fn write_varu32(&mut self, mut value: u32) -> BitResult<()> {
        loop {
            let mut group = u64::from(value & 0x7F);
            value >>= 7;
            if value != 0 {
                group |= 0x80;
            }
            self.write_bits(group, 8)?;
            if value == 0 {
                return Ok(());
            }
        }
    }

    /// Writes a zigzag varint `i32`.
    pub fn write_vars32(&mut self, value: i32) -> BitResult<()> {
        let encoded = ((value << 1) ^ (value >> 31)) as u32;
        self.write_varu32(encoded)
    }

    /// Writes the raw IEEE-754 bits of an `f32`.
    pub fn write_f32(&mut self, value: f32) -> BitResult<()> {
        self.write_bits(u64::from(value.to_bits()), 32)
    }

    /// Returns a checkpoint at the current write position.
    #[must_use]
    pub const fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            bit_len: self.bit_len,
        }
    }

    /// Discards everything written after `checkpoint`.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        if checkpoint.bit_len >= self.bit_len {
            return;
        }
        self.bit_len = checkpoint.bit_len;
        self.bytes.truncate(self.bit_len.div_ceil(8));
        let rem = self.bit_len % 8;
        if rem != 0 {
            let last = self.bytes.len() - 1;
            self.bytes[last] &= 0xFFu8 << (8 - rem);
        }
    }

    /// Reserves `bits` zero bits to be filled in later with [`fill_slot`](Self::fill_slot).
    pub fn reserve(&mut self, bits: u8) -> BitResult<Slot> {
        let bit_position = self.bit_len;
        self.write_bits(0, bits)?;
        Ok(Slot { bit_position, bits })
    }

    /// Overwrites a previously reserved slot.
    pub fn fill_slot(&mut self, slot: Slot, value: u64) -> BitResult<()> {
        if slot.bits < 64 && value >= (1u64 << slot.bits) {
            return Err(BitError::ValueOutOfRange {
                value,
                bits: slot.bits,
            });
        }
        let end = slot.bit_position + slot.bits as usize;
        if end > self.bit_len {
            return Err(BitError::SlotOutOfRange {
                bit_position: slot.bit_position,
                bits_written: self.bit_len,
            });
        }
        for i in 0..slot.bits as usize {
            let bit = (value >> (slot.bits as usize - 1 - i)) & 1 == 1;
            let pos = slot.bit_position + i;
            let mask = 1u8 << (7 - pos % 8);
            if bit {
                self.bytes[pos / 8] |= mask;
            } else {
                self.bytes[pos / 8] &= !mask;
            }
        }
        Ok(())
    }

    /// Appends all bits of another writer.
    pub fn append(&mut self, other: &Self) {
        if self.bit_len % 8 == 0 && other.bit_len % 8 == 0 {
            self.bytes.extend_from_slice(&other.bytes);
            self.bit_len += other.bit_len;
            return;
        }
        for pos in 0..other.bit_len {
            let bit = (other.bytes[pos / 8] >> (7 - pos % 8)) & 1 == 1;
            self.write_bool(bit);
        }
    }

    /// Clears the writer, keeping its allocation.
    pub fn clear(&mut self) {
        self.bytes.clear();
        self.bit_len = 0;
    }

    /// Finishes writing and returns the byte buffer.
    ///
    /// If the last byte is incomplete, it is padded with zeros on the right.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }

    /// Returns the bytes written so far without consuming the writer.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn ensure_aligned(&self) -> BitResult<()> {
        if self.bit_len % 8 != 0 {
            return Err(BitError::MisalignedAccess {
                bit_position: self.bit_len,
            });
        }
        Ok(())
    }

    fn write_aligned_bytes(&mut self, bytes: &[u8]) -> BitResult<()> {
        self.ensure_aligned()?;
        self.bytes.extend_from_slice(bytes);
        self.bit_len += bytes.len() * 8;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_writer() {
        let writer = BitWriter::new();
        assert_eq!(writer.bits_written(), 0);
        assert!(writer.finish().is_empty());
    }

    #[test]
    fn write_single_bit_true() {
        let mut writer = BitWriter::new();
        writer.write_bool(true);
        assert_eq!(writer.bits_written(), 1);
        assert_eq!(writer.bytes_written(), 1);
        // Single bit 1, padded with 7 zeros = 0b1000_0000
        assert_eq!(writer.finish(), vec![0b1000_0000]);
    }

    #[test]
    fn write_partial_byte_with_padding() {
        let mut writer = BitWriter::new();
        for bit in [true, true, false, true, false] {
            writer.write_bool(bit);
        }
        // 11010 + 000 padding = 0b1101_0000
        assert_eq!(writer.finish(), vec![0b1101_0000]);
    }

    #[test]
    fn write_bits_across_byte_boundary() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b1111, 4).unwrap();
        writer.write_bits(0b1010_1010, 8).unwrap();
        // 1111 + 10101010 = 1111_1010 1010_0000
        assert_eq!(writer.finish(), vec![0b1111_1010, 0b1010_0000]);
    }

    #[test]
    fn write_bits_invalid_count() {
        let mut writer = BitWriter::new();
        let result = writer.write_bits(0, 65);
        assert!(matches!(
            result,
            Err(BitError::InvalidBitCount {
                bits: 65,
                max_bits: 64
            })
        ));
    }

    #[test]
    fn write_bits_value_out_of_range() {
        let mut writer = BitWriter::new();
        let result = writer.write_bits(256, 8);
        assert!(matches!(
            result,
            Err(BitError::ValueOutOfRange {
                value: 256,
                bits: 8
            })
        ));
    }

    #[test]
    fn write_bits_64_bits() {
        let mut writer = BitWriter::new();
        writer.write_bits(u64::MAX, 64).unwrap();
        assert_eq!(writer.finish(), vec![0xFF; 8]);
    }

    #[test]
    fn aligned_write_requires_alignment() {
        let mut writer = BitWriter::new();
        writer.write_bool(true);
        let err = writer.write_u8_aligned(1).unwrap_err();
        assert!(matches!(err, BitError::MisalignedAccess { bit_position: 1 }));
        writer.align_to_byte();
        writer.write_u16_aligned(0xBEEF).unwrap();
        assert_eq!(writer.finish(), vec![0b1000_0000, 0xEF, 0xBE]);
    }

    #[test]
    fn varint_unaligned() {
        let mut writer = BitWriter::new();
        writer.write_bool(true);
        writer.write_varu32(300).unwrap();
        assert_eq!(writer.bits_written(), 17);
    }

    #[test]
    fn rollback_discards_bits() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b101, 3).unwrap();
        let cp = writer.checkpoint();
        writer.write_bits(0xFFFF, 16).unwrap();
        writer.rollback(cp);
        assert_eq!(writer.bits_written(), 3);
        writer.write_bits(0b11, 2).unwrap();
        assert_eq!(writer.finish(), vec![0b1011_1000]);
    }

    #[test]
    fn rollback_to_future_checkpoint_is_noop() {
        let mut writer = BitWriter::new();
        writer.write_bits(0xAB, 8).unwrap();
        let cp = writer.checkpoint();
        let mut other = writer.clone();
        other.rollback(Checkpoint { bit_len: 0 });
        writer.rollback(cp);
        assert_eq!(writer.bits_written(), 8);
        assert_eq!(other.bits_written(), 0);
    }

    #[test]
    fn reserve_and_fill_slot() {
        let mut writer = BitWriter::new();
        writer.write_bool(true);
        let slot = writer.reserve(8).unwrap();
        writer.write_bits(0b1111, 4).unwrap();
        writer.fill_slot(slot, 0xA5).unwrap();
        // 1 + 10100101 + 1111 = 1101_0010 1111_1000
        assert_eq!(writer.finish(), vec![0b1101_0010, 0b1111_1000]);
    }

    #[test]
    fn fill_slot_rejects_wide_value() {
        let mut writer = BitWriter::new();
        let slot = writer.reserve(4).unwrap();
        assert!(matches!(
            writer.fill_slot(slot, 16),
            Err(BitError::ValueOutOfRange { value: 16, bits: 4 })
        ));
    }

    #[test]
    fn fill_slot_after_rollback_fails() {
        let mut writer = BitWriter::new();
        let cp = writer.checkpoint();
        let slot = writer.reserve(8).unwrap();
        writer.rollback(cp);
        assert!(matches!(
            writer.fill_slot(slot, 1),
            Err(BitError::SlotOutOfRange { .. })
        ));
    }

    #[test]
    fn append_unaligned() {
        let mut a = BitWriter::new();
        a.write_bits(0b1, 1).unwrap();
        let mut b = BitWriter::new();
        b.write_bits(0b0110, 4).unwrap();
        a.append(&b);
        assert_eq!(a.bits_written(), 5);
        assert_eq!(a.finish(), vec![0b1011_0000]);
    }
}
