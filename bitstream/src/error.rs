//! Error types for bitstream operations.

use thiserror::Error;

/// Result type for bitstream operations.
pub type BitResult<T> = Result<T, BitError>;

/// Bit-level encode and decode failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BitError {
    /// A read ran past the end of the buffer.
    #[error("attempted to read {requested} bits but only {available} bits available")]
    UnexpectedEof {
        requested: usize,
        available: usize,
    },

    #[error("invalid bit count {bits}, maximum allowed is {max_bits}")]
    InvalidBitCount { bits: u8, max_bits: u8 },

    /// The value needs more than `bits` bits.
    #[error("value {value} does not fit in {bits} bits")]
    ValueOutOfRange { value: u64, bits: u8 },

    /// Byte-aligned access attempted at a non-aligned position.
    #[error("misaligned access at bit position {bit_position}")]
    MisalignedAccess { bit_position: usize },

    /// Varint ran past its maximum encoded length.
    #[error("invalid varint encoding")]
    InvalidVarint,

    /// Bits were left over after a complete decode.
    #[error("{remaining_bits} trailing bits after decode")]
    TrailingData { remaining_bits: usize },

    /// A reserved slot was patched outside the written range.
    #[error("slot at bit {bit_position} lies outside the {bits_written} bits written")]
    SlotOutOfRange {
        bit_position: usize,
        bits_written: usize,
    },
}
