//! Deterministic schema hashing.

use blake3::Hasher;

use crate::field::{ChangePolicy, FieldCodec, FixedPoint};

/// Accumulates a deterministic fingerprint of one or more schemas.
///
/// Two sides that registered the same types, in the same order, with the same
/// field layouts produce the same value from [`finish`](Self::finish).
#[derive(Debug, Clone, Default)]
pub struct SchemaHasher {
    inner: Hasher,
}

impl SchemaHasher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.inner.update(&[value]);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.inner.update(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.inner.update(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.inner.update(&value.to_le_bytes());
    }

    /// Writes a length as a fixed-width `u64`.
    pub fn write_len(&mut self, len: usize) {
        self.inner.update(&(len as u64).to_le_bytes());
    }

    /// Writes a length-prefixed string.
    pub fn write_str(&mut self, value: &str) {
        self.write_len(value.len());
        self.inner.update(value.as_bytes());
    }

    pub fn write_codec(&mut self, codec: FieldCodec) {
        match codec {
            FieldCodec::Bool => self.write_u8(0),
            FieldCodec::UInt { bits } => {
                self.write_u8(1);
                self.write_u8(bits);
            }
            FieldCodec::SInt { bits } => {
                self.write_u8(2);
                self.write_u8(bits);
            }
            FieldCodec::VarUInt => self.write_u8(3),
            FieldCodec::VarSInt => self.write_u8(4),
            FieldCodec::FixedPoint(fp) => {
                self.write_u8(5);
                self.write_fixed_point(fp);
            }
            FieldCodec::Float => self.write_u8(6),
        }
    }

    pub fn write_change_policy(&mut self, policy: ChangePolicy) {
        match policy {
            ChangePolicy::Always => self.write_u8(0),
            ChangePolicy::Threshold { threshold_q } => {
                self.write_u8(1);
                self.write_u32(threshold_q);
            }
        }
    }

    fn write_fixed_point(&mut self, fp: FixedPoint) {
        self.write_i64(fp.min_q);
        self.write_i64(fp.max_q);
        self.write_u32(fp.scale);
    }

    /// Returns the first eight bytes of the digest as a little-endian `u64`.
    #[must_use]
    pub fn finish(&self) -> u64 {
        let hash = self.inner.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }
}
