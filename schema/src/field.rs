//! Field codecs, change policies and the values that flow through them.

use bitstream::{BitReader, BitWriter};

use crate::error::{SchemaError, SchemaResult};

/// Fixed-point quantization parameters (all integer-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FixedPoint {
    /// Minimum quantized value.
    pub min_q: i64,
    /// Maximum quantized value.
    pub max_q: i64,
    /// Units per 1.0 (e.g., 100 => 0.01 resolution).
    pub scale: u32,
}

impl FixedPoint {
    /// Creates a fixed-point configuration from quantized bounds and scale.
    #[must_use]
    pub const fn new(min_q: i64, max_q: i64, scale: u32) -> Self {
        Self {
            min_q,
            max_q,
            scale,
        }
    }

    /// Quantizes a float, saturating at the configured bounds.
    #[must_use]
    pub fn quantize(self, value: f32) -> i64 {
        let scaled = (f64::from(value) * f64::from(self.scale)).round();
        if scaled.is_nan() {
            return self.min_q.max(0).min(self.max_q);
        }
        // Saturating float-to-int conversion, then clamped.
        #[allow(clippy::cast_possible_truncation)]
        let q = scaled as i64;
        q.clamp(self.min_q, self.max_q)
    }

    /// Converts a quantized value back to a float.
    #[must_use]
    pub fn dequantize(self, q: i64) -> f32 {
        #[allow(clippy::cast_precision_loss)]
        let value = q as f64 / f64::from(self.scale);
        #[allow(clippy::cast_possible_truncation)]
        let value = value as f32;
        value
    }

    /// Number of bits needed for an offset from `min_q`.
    #[must_use]
    pub fn bits(self) -> u8 {
        required_bits(self.max_q.abs_diff(self.min_q))
    }
}

/// The encoding for a field (representation only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldCodec {
    /// Boolean (1 bit).
    Bool,

    /// Unsigned integer with fixed bit width.
    UInt { bits: u8 },

    /// Signed integer with fixed bit width (two's complement).
    SInt { bits: u8 },

    /// Variable-length unsigned integer (up to 32 bits).
    VarUInt,

    /// Variable-length signed integer (zigzag encoded, up to 32 bits).
    VarSInt,

    /// Float quantized to a fixed-point range.
    FixedPoint(FixedPoint),

    /// Raw IEEE-754 single-precision float.
    Float,
}

impl FieldCodec {
    #[must_use]
    pub const fn bool() -> Self {
        Self::Bool
    }

    #[must_use]
    pub const fn uint(bits: u8) -> Self {
        Self::UInt { bits }
    }

    #[must_use]
    pub const fn sint(bits: u8) -> Self {
        Self::SInt { bits }
    }

    #[must_use]
    pub const fn var_uint() -> Self {
        Self::VarUInt
    }

    #[must_use]
    pub const fn var_sint() -> Self {
        Self::VarSInt
    }

    #[must_use]
    pub const fn fixed_point(min_q: i64, max_q: i64, scale: u32) -> Self {
        Self::FixedPoint(FixedPoint::new(min_q, max_q, scale))
    }

    #[must_use]
    pub const fn float() -> Self {
        Self::Float
    }

    /// The kind of [`FieldValue`] this codec carries.
    #[must_use]
    pub const fn value_kind(self) -> ValueKind {
        match self {
            Self::Bool => ValueKind::Bool,
            Self::UInt { .. } | Self::VarUInt => ValueKind::UInt,
            Self::SInt { .. } | Self::VarSInt => ValueKind::SInt,
            Self::FixedPoint(_) | Self::Float => ValueKind::Float,
        }
    }

    /// Writes a value with this codec.
    ///
    /// Fixed-point values saturate at their range; integers that do not fit
    /// are an error.
    pub fn write(self, value: FieldValue, writer: &mut BitWriter) -> SchemaResult<()> {
        match (self, value) {
            (Self::Bool, FieldValue::Bool(v)) => writer.write_bool(v),
            (Self::UInt { bits }, FieldValue::UInt(v)) => {
                if bits < 64 && v >= 1u64 << bits {
                    return Err(self.out_of_range(i128::from(v)));
                }
                writer.write_bits(v, bits)?;
            }
            (Self::SInt { bits }, FieldValue::SInt(v)) => {
                let encoded = encode_sint(bits, v).ok_or_else(|| self.out_of_range(i128::from(v)))?;
                writer.write_bits(encoded, bits)?;
            }
            (Self::VarUInt, FieldValue::UInt(v)) => {
                let v = u32::try_from(v).map_err(|_| self.out_of_range(i128::from(v)))?;
                writer.write_varu32(v)?;
            }
            (Self::VarSInt, FieldValue::SInt(v)) => {
                let v = i32::try_from(v).map_err(|_| self.out_of_range(i128::from(v)))?;
                writer.write_vars32(v)?;
            }
            (Self::FixedPoint(fp), FieldValue::Float(v)) => {
                let bits = fp.bits();
                if bits > 0 {
                    let offset = fp.quantize(v).abs_diff(fp.min_q);
                    writer.write_bits(offset, bits)?;
                }
            }
            (Self::Float, FieldValue::Float(v)) => writer.write_f32(v)?,
            (codec, value) => {
                return Err(SchemaError::ValueKindMismatch {
                    codec,
                    kind: value.kind(),
                })
            }
        }
        Ok(())
    }

    /// Reads a value written by [`FieldCodec::write`].
    pub fn read(self, reader: &mut BitReader<'_>) -> SchemaResult<FieldValue> {
        let value = match self {
            Self::Bool => FieldValue::Bool(reader.read_bool()?),
            Self::UInt { bits } => FieldValue::UInt(reader.read_bits(bits)?),
            Self::SInt { bits } => FieldValue::SInt(decode_sint(bits, reader.read_bits(bits)?)),
            Self::VarUInt => FieldValue::UInt(u64::from(reader.read_varu32()?)),
            Self::VarSInt => FieldValue::SInt(i64::from(reader.read_vars32()?)),
            Self::FixedPoint(fp) => {
                let bits = fp.bits();
                let offset = if bits == 0 { 0 } else { reader.read_bits(bits)? };
                let range = fp.max_q.abs_diff(fp.min_q);
                if offset > range {
                    return Err(self.out_of_range(i128::from(offset)));
                }
                // offset <= range, so the sum stays within [min_q, max_q].
                #[allow(clippy::cast_possible_wrap)]
                let q = fp.min_q.wrapping_add(offset as i64);
                FieldValue::Float(fp.dequantize(q))
            }
            Self::Float => FieldValue::Float(reader.read_f32()?),
        };
        Ok(value)
    }

    /// Returns `true` if `current` differs from `basis` enough to be sent
    /// under `policy`.
    ///
    /// Fixed-point fields are compared after quantization, so changes below
    /// the wire resolution never count.
    #[must_use]
    pub fn changed(self, policy: ChangePolicy, basis: FieldValue, current: FieldValue) -> bool {
        let threshold = match policy {
            ChangePolicy::Always => 0,
            ChangePolicy::Threshold { threshold_q } => u128::from(threshold_q),
        };
        match (self.key(basis), self.key(current)) {
            (Some(a), Some(b)) => a.abs_diff(b) > threshold,
            _ => basis != current,
        }
    }

    /// Integer comparison key, or `None` for raw floats.
    fn key(self, value: FieldValue) -> Option<i128> {
        match (self, value) {
            (Self::FixedPoint(fp), FieldValue::Float(v)) => Some(i128::from(fp.quantize(v))),
            (_, FieldValue::Bool(v)) => Some(i128::from(v)),
            (_, FieldValue::UInt(v)) => Some(i128::from(v)),
            (_, FieldValue::SInt(v)) => Some(i128::from(v)),
            (_, FieldValue::Float(_)) => None,
        }
    }

    fn out_of_range(self, value: i128) -> SchemaError {
        SchemaError::ValueOutOfRange { codec: self, value }
    }
}

/// Change detection policy for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChangePolicy {
    /// Any difference counts.
    #[default]
    Always,
    /// Counts only if the quantized difference exceeds this threshold.
    Threshold { threshold_q: u32 },
}

/// Broad type of a [`FieldValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    UInt,
    SInt,
    Float,
}

/// A single field value in transit between a state and the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldValue {
    Bool(bool),
    UInt(u64),
    SInt(i64),
    Float(f32),
}

impl FieldValue {
    #[must_use]
    pub const fn kind(self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::UInt(_) => ValueKind::UInt,
            Self::SInt(_) => ValueKind::SInt,
            Self::Float(_) => ValueKind::Float,
        }
    }
}

/// Rust types that can be bound to a field.
pub trait Scalar: Copy + Send + Sync + 'static {
    /// The value kind this type converts to.
    const KIND: ValueKind;

    fn to_value(self) -> FieldValue;

    /// Converts back, returning `None` if the value does not fit.
    fn from_value(value: FieldValue) -> Option<Self>;
}

impl Scalar for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn to_value(self) -> FieldValue {
        FieldValue::Bool(self)
    }

    fn from_value(value: FieldValue) -> Option<Self> {
        match value {
            FieldValue::Bool(v) => Some(v),
            _ => None,
        }
    }
}

impl Scalar for f32 {
    const KIND: ValueKind = ValueKind::Float;

    fn to_value(self) -> FieldValue {
        FieldValue::Float(self)
    }

    fn from_value(value: FieldValue) -> Option<Self> {
        match value {
            FieldValue::Float(v) => Some(v),
            _ => None,
        }
    }
}

macro_rules! unsigned_scalar {
    ($($ty:ty),*) => {$(
        impl Scalar for $ty {
            const KIND: ValueKind = ValueKind::UInt;

            fn to_value(self) -> FieldValue {
                FieldValue::UInt(u64::from(self))
            }

            fn from_value(value: FieldValue) -> Option<Self> {
                match value {
                    FieldValue::UInt(v) => <$ty>::try_from(v).ok(),
                    _ => None,
                }
            }
        }
    )*};
}

macro_rules! signed_scalar {
    ($($ty:ty),*) => {$(
        impl Scalar for $ty {
            const KIND: ValueKind = ValueKind::SInt;

            fn to_value(self) -> FieldValue {
                FieldValue::SInt(i64::from(self))
            }

            fn from_value(value: FieldValue) -> Option<Self> {
                match value {
                    FieldValue::SInt(v) => <$ty>::try_from(v).ok(),
                    _ => None,
                }
            }
        }
    )*};
}

unsigned_scalar!(u8, u16, u32, u64);
signed_scalar!(i8, i16, i32, i64);

pub(crate) fn required_bits(range: u64) -> u8 {
    if range == 0 {
        return 0;
    }
    // At most 64.
    #[allow(clippy::cast_possible_truncation)]
    let bits = (64 - range.leading_zeros()) as u8;
    bits
}

#[allow(clippy::cast_sign_loss)]
fn encode_sint(bits: u8, value: i64) -> Option<u64> {
    if bits == 64 {
        return Some(value as u64);
    }
    let min = -(1i128 << (bits - 1));
    let max = (1i128 << (bits - 1)) - 1;
    if i128::from(value) < min || i128::from(value) > max {
        return None;
    }
    let mask = (1u64 << bits) - 1;
    Some((value as u64) & mask)
}

#[allow(clippy::cast_possible_wrap)]
fn decode_sint(bits: u8, raw: u64) -> i64 {
    if bits == 64 {
        return raw as i64;
    }
    if bits == 0 {
        return 0;
    }
    let sign_bit = 1u64 << (bits - 1);
    if raw & sign_bit == 0 {
        raw as i64
    } else {
        (raw as i64) - (1i64 << bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(codec: FieldCodec, value: FieldValue) -> FieldValue {
        let mut writer = BitWriter::new();
        codec.write(value, &mut writer).unwrap();
        let bytes = writer.finish();
        let mut reader = BitReader::new(&bytes);
        codec.read(&mut reader).unwrap()
    }

    #[test]
    fn fixed_point_quantize_saturates() {
        let fp = FixedPoint::new(-100, 200, 100);
        assert_eq!(fp.quantize(0.5), 50);
        assert_eq!(fp.quantize(-5.0), -100);
        assert_eq!(fp.quantize(9.0), 200);
        assert_eq!(fp.quantize(f32::NAN), 0);
        assert_eq!(fp.bits(), 9);
    }

    #[test]
    fn fixed_point_roundtrip_to_resolution() {
        let codec = FieldCodec::fixed_point(-10_000, 10_000, 100);
        assert_eq!(roundtrip(codec, FieldValue::Float(12.503)), FieldValue::Float(12.5));
    }

    #[test]
    fn sint_two_complement_roundtrip() {
        let codec = FieldCodec::sint(6);
        assert_eq!(roundtrip(codec, FieldValue::SInt(-32)), FieldValue::SInt(-32));
        assert_eq!(roundtrip(codec, FieldValue::SInt(31)), FieldValue::SInt(31));
    }

    #[test]
    fn uint_out_of_range_rejected() {
        let mut writer = BitWriter::new();
        let err = FieldCodec::uint(4)
            .write(FieldValue::UInt(16), &mut writer)
            .unwrap_err();
        assert!(matches!(err, SchemaError::ValueOutOfRange { value: 16, .. }));
    }

    #[test]
    fn var_sint_rejects_wide_value() {
        let mut writer = BitWriter::new();
        assert!(FieldCodec::var_sint()
            .write(FieldValue::SInt(i64::from(i32::MAX) + 1), &mut writer)
            .is_err());
    }

    #[test]
    fn kind_mismatch_rejected() {
        let mut writer = BitWriter::new();
        assert!(matches!(
            FieldCodec::bool().write(FieldValue::UInt(1), &mut writer),
            Err(SchemaError::ValueKindMismatch { .. })
        ));
    }

    #[test]
    fn changed_respects_quantization() {
        let codec = FieldCodec::fixed_point(-1000, 1000, 10);
        let policy = ChangePolicy::Always;
        assert!(!codec.changed(policy, FieldValue::Float(1.0), FieldValue::Float(1.01)));
        assert!(codec.changed(policy, FieldValue::Float(1.0), FieldValue::Float(1.1)));
    }

    #[test]
    fn changed_respects_threshold() {
        let codec = FieldCodec::uint(16);
        let policy = ChangePolicy::Threshold { threshold_q: 3 };
        assert!(!codec.changed(policy, FieldValue::UInt(10), FieldValue::UInt(13)));
        assert!(codec.changed(policy, FieldValue::UInt(10), FieldValue::UInt(14)));
        assert!(codec.changed(policy, FieldValue::UInt(14), FieldValue::UInt(10)));
    }

    #[test]
    fn raw_float_compares_exactly() {
        let codec = FieldCodec::float();
        assert!(codec.changed(
            ChangePolicy::Always,
            FieldValue::Float(1.0),
            FieldValue::Float(1.000_001)
        ));
    }

    #[test]
    fn scalar_conversions_check_width() {
        assert_eq!(u8::from_value(FieldValue::UInt(255)), Some(255));
        assert_eq!(u8::from_value(FieldValue::UInt(256)), None);
        assert_eq!(i8::from_value(FieldValue::SInt(-129)), None);
        assert_eq!(bool::from_value(FieldValue::UInt(1)), None);
        assert_eq!(7u16.to_value(), FieldValue::UInt(7));
    }
}
