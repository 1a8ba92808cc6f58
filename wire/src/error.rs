//! Error types for wire format operations.

use bitstream::BitError;
use thiserror::Error;

/// Result type for wire format operations.
pub type WireResult<T> = Result<T, DecodeError>;

/// Reasons a received packet is rejected as corrupt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// Low-level bit read failure (truncation, bad varint, trailing bits).
    #[error(transparent)]
    Bits(#[from] BitError),

    /// Packet is larger than the protocol allows.
    #[error("packet of {actual} bytes exceeds limit of {limit}")]
    PacketTooLarge { actual: usize, limit: usize },

    /// A tick field that must be valid carried the invalid sentinel.
    #[error("invalid tick in field `{field}`")]
    InvalidTick { field: &'static str },

    /// An entity id field carried the reserved zero id.
    #[error("invalid entity id")]
    InvalidEntityId,

    /// A list announced more items than allowed.
    #[error("list of {count} items exceeds limit of {limit}")]
    ListTooLong { count: usize, limit: usize },

    /// A single list item was larger than its cap.
    #[error("list item of {bits} bits exceeds cap of {limit_bits} bits")]
    ItemTooLarge { bits: usize, limit_bits: usize },

    /// A section ran past its byte budget.
    #[error("section ends at byte {end}, past budget of {limit}")]
    SectionOverBudget { end: usize, limit: usize },
}

/// Errors that can occur during encoding.
///
/// Encoding only fails on programmer error (e.g. a value wider than its
/// declared bit width); budget exhaustion is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error(transparent)]
    Bits(#[from] BitError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_too_large() {
        let err = DecodeError::PacketTooLarge {
            actual: 2000,
            limit: 1200,
        };
        let msg = err.to_string();
        assert!(msg.contains("2000"));
        assert!(msg.contains("1200"));
    }

    #[test]
    fn error_from_bits_is_transparent() {
        let bits = BitError::InvalidVarint;
        let err: DecodeError = bits.clone().into();
        assert_eq!(err.to_string(), bits.to_string());
    }

    #[test]
    fn error_display_invalid_tick_names_field() {
        let err = DecodeError::InvalidTick {
            field: "sender_tick",
        };
        assert!(err.to_string().contains("sender_tick"));
    }

    #[test]
    fn errors_are_std_errors() {
        fn assert_error<E: std::error::Error + Send + Sync + 'static>() {}
        assert_error::<DecodeError>();
        assert_error::<EncodeError>();
    }
}
