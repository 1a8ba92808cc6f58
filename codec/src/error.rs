//! Error types for codec operations.

use bitstream::BitError;
use schema::SchemaError;
use thiserror::Error;
use wire::{DecodeError, EncodeError};

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding codec structures.
///
/// Any error produced while decoding a received packet means the packet is
/// corrupt and must be discarded as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// Structural wire error (bit underflow, list caps, invalid ids).
    #[error(transparent)]
    Wire(#[from] DecodeError),

    /// A field value could not be encoded or decoded.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A wire type index does not name a registered type.
    #[error("unknown {kind} type index {index}")]
    UnknownType { kind: TypeKind, index: u32 },

    /// A packet carried commands but no command type is registered.
    #[error("no command type registered")]
    NoCommandType,
}

impl From<BitError> for CodecError {
    fn from(err: BitError) -> Self {
        Self::Wire(DecodeError::from(err))
    }
}

impl From<EncodeError> for CodecError {
    fn from(err: EncodeError) -> Self {
        match err {
            EncodeError::Bits(bits) => bits.into(),
        }
    }
}

/// Which registry table a type index refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    State,
    Event,
}

impl std::fmt::Display for TypeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::State => write!(f, "state"),
            Self::Event => write!(f, "event"),
        }
    }
}
