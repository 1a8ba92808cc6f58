//! Bit-level reader for decoding packed binary data.

use crate::error::{BitError, BitResult};
use crate::writer::VARINT_MAX_GROUPS;

/// A bit-level reader for decoding packed binary data.
///
/// Reads bits MSB-first from a byte slice. All operations are bounds-checked
/// and return errors on insufficient data; the reader never panics on
/// malformed input.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    /// Creates a new `BitReader` from a byte slice.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    /// Returns the number of bits remaining to be read.
    #[must_use]
    pub const fn bits_remaining(&self) -> usize {
        self.data.len() * 8 - self.bit_pos
    }

    /// Returns `true` if all bits have been read.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bits_remaining() == 0
    }

    /// Returns the current bit position.
    #[must_use]
    pub const fn bit_position(&self) -> usize {
        self.bit_pos
    }

    /// Reads a single bit as a boolean.
    pub fn read_bool(&mut self) -> BitResult<bool> {
        self.ensure_bits(1)?;
        let byte = self.data[self.bit_pos / 8];
        let bit = (byte >> (7 - self.bit_pos % 8)) & 1 == 1;
        self.bit_pos += 1;
        Ok(bit)
    }

    /// Reads up to 64 bits as an unsigned integer.
    ///
    /// # Errors
    ///
    /// Returns [`BitError::InvalidBitCount`] if `bits > 64`.
    /// Returns [`BitError::UnexpectedEof`] if not enough bits remain.
    pub fn read_bits(&mut self, bits: u8) -> BitResult<u64> {
        if bits > 64 {
            return Err(BitError::InvalidBitCount { bits, max_bits: 64 });
        }
        self.ensure_bits(bits as usize)?;
        let mut value = 0u64;
        for _ in 0..bits {
            value = (value << 1) | u64::from(self.read_bool()?);
        }
        Ok(value)
    }

    /// Skips to the next byte boundary.
    ///
    /// # Errors
    ///
    /// Returns [`BitError::UnexpectedEof`] if the padding lies past the end.
    pub fn align_to_byte(&mut self) -> BitResult<()> {
        let pad = (8 - self.bit_pos % 8) % 8;
        self.ensure_bits(pad)?;
        self.bit_pos += pad;
        Ok(())
    }

    /// Reads a byte-aligned `u8`.
    pub fn read_u8_aligned(&mut self) -> BitResult<u8> {
        let [b] = self.read_aligned_bytes::<1>()?;
        Ok(b)
    }

    /// Reads a byte-aligned `u16` (little-endian).
    pub fn read_u16_aligned(&mut self) -> BitResult<u16> {
        Ok(u16::from_le_bytes(self.read_aligned_bytes::<2>()?))
    }

    /// Reads a byte-aligned `u32` (little-endian).
    pub fn read_u32_aligned(&mut self) -> BitResult<u32> {
        Ok(u32::from_le_bytes(self.read_aligned_bytes::<4>()?))
    }

    /// Reads a byte-aligned `u64` (little-endian).
    pub fn read_u64_aligned(&mut self) -> BitResult<u64> {
        Ok(u64::from_le_bytes(self.read_aligned_bytes::<8>()?))
    }

    /// Reads a varint `u32` written by [`BitWriter::write_varu32`](crate::BitWriter::write_varu32).
    ///
    /// # Errors
    ///
    /// Returns [`BitError::InvalidVarint`] if the encoding is longer than five
    /// groups or overflows 32 bits.
    pub fn read_varu32(&mut self) -> BitResult<u32> {
        let mut value: u64 = 0;
        for group_idx in 0..VARINT_MAX_GROUPS {
            let group = self.read_bits(8)?;
            value |= (group & 0x7F) << (7 * group_idx);
            if group & 0x80 == 0 {
                return u32::try_from(value).map_err(|_| BitError::InvalidVarint);
            }
        }
        Err(BitError::InvalidVarint)
    }

    /// Reads a zigzag varint `i32`.
    pub fn read_vars32(&mut self) -> BitResult<i32> {
        let raw = self.read_varu32()?;
        Ok(((raw >> 1) as i32) ^ -((raw & 1) as i32))
    }

    /// Reads the raw IEEE-754 bits of an `f32`.
    pub fn read_f32(&mut self) -> BitResult<f32> {
        #[allow(clippy::cast_possible_truncation)]
        let raw = self.read_bits(32)? as u32;
        Ok(f32::from_bits(raw))
    }

    /// Verifies that the stream has been consumed.
    ///
    /// Fewer than 8 trailing bits are accepted as padding only when they are
    /// all zero; anything else is trailing garbage.
    ///
    /// # Errors
    ///
    /// Returns [`BitError::TrailingData`] if unread data remains.
    pub fn finish(&self) -> BitResult<()> {
        let remaining = self.bits_remaining();
        if remaining == 0 {
            return Ok(());
        }
        if remaining < 8 {
            let last = self.data[self.data.len() - 1];
            let mask = (1u8 << remaining) - 1;
            if last & mask == 0 {
                return Ok(());
            }
        }
        Err(BitError::TrailingData {
            remaining_bits: remaining,
        })
    }

    fn ensure_bits(&self, bits: usize) -> BitResult<()> {
        let available = self.bits_remaining();
        if bits > available {
            return Err(BitError::UnexpectedEof {
                requested: bits,
                available,
            });
        }
        Ok(())
    }

    fn ensure_aligned(&self) -> BitResult<()> {
        if self.bit_pos % 8 != 0 {
            return Err(BitError::MisalignedAccess {
                bit_position: self.bit_pos,
            });
        }
        Ok(())
    }

    fn read_aligned_bytes<const N: usize>(&mut self) -> BitResult<[u8; N]> {
        self.ensure_aligned()?;
        self.ensure_bits(N * 8)?;
        let start = self.bit_pos / 8;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[start..start + N]);
        self.bit_pos += N * 8;
        Ok(out)
    }
}
