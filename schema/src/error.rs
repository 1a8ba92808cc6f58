//! Schema validation and field value errors.

use bitstream::BitError;
use thiserror::Error;

use crate::field::{FieldCodec, ValueKind};

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur when building a schema or encoding field values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SchemaError {
    /// Two fields of one schema share a name.
    #[error("duplicate field name `{name}` in `{schema}`")]
    DuplicateFieldName {
        schema: &'static str,
        name: &'static str,
    },

    /// More mutable fields than fit in a [`FieldMask`](crate::FieldMask).
    #[error("`{schema}` declares {count} mutable fields, maximum is {max}")]
    TooManyMutableFields {
        schema: &'static str,
        count: usize,
        max: usize,
    },

    /// Invalid bit width for fixed-width integers.
    #[error("invalid bit width {bits} for field `{field}`")]
    InvalidBitWidth { field: &'static str, bits: u8 },

    /// Fixed-point scale must be non-zero.
    #[error("fixed-point scale must be non-zero for field `{field}`")]
    InvalidFixedPointScale { field: &'static str },

    /// Fixed-point min/max range is invalid.
    #[error("fixed-point range [{min_q}, {max_q}] is invalid for field `{field}`")]
    InvalidFixedPointRange {
        field: &'static str,
        min_q: i64,
        max_q: i64,
    },

    /// The Rust type bound to a field does not match its codec.
    #[error("field `{field}` holds {kind:?} values but uses codec {codec:?}")]
    CodecMismatch {
        field: &'static str,
        codec: FieldCodec,
        kind: ValueKind,
    },

    /// A value of the wrong kind was handed to a codec.
    #[error("{kind:?} value cannot be written with codec {codec:?}")]
    ValueKindMismatch { codec: FieldCodec, kind: ValueKind },

    /// Thresholds only apply to integer-quantized codecs.
    #[error("field `{field}` uses a change threshold on a raw float codec")]
    ThresholdOnRawFloat { field: &'static str },

    /// A value does not fit its codec.
    #[error("value {value} does not fit codec {codec:?}")]
    ValueOutOfRange { codec: FieldCodec, value: i128 },

    /// A decoded value cannot be stored in the bound Rust type.
    #[error("decoded value for field `{field}` does not fit its type")]
    Unrepresentable { field: &'static str },

    /// Low-level bit failure while encoding or decoding.
    #[error(transparent)]
    Bits(#[from] BitError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_field() {
        let err = SchemaError::InvalidBitWidth {
            field: "health",
            bits: 0,
        };
        assert!(err.to_string().contains("health"));
    }

    #[test]
    fn bit_errors_convert() {
        let err: SchemaError = BitError::InvalidVarint.into();
        assert!(matches!(err, SchemaError::Bits(BitError::InvalidVarint)));
    }
}
