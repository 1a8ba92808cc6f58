//! Identifier types shared by every layer of the protocol.

use std::fmt;

use bitstream::{BitReader, BitResult, BitWriter};

use crate::error::{DecodeError, WireResult};

/// A simulation tick number.
///
/// Ticks are monotonically increasing identifiers for simulation steps. The
/// raw value `0` is the [`Tick::INVALID`] sentinel; the first real tick is
/// [`Tick::START`]. Two valid ticks compare with plain integer ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Tick(u32);

impl Tick {
    /// The "no tick" sentinel.
    pub const INVALID: Self = Self(0);

    /// The first valid tick.
    pub const START: Self = Self(1);

    /// Creates a new tick.
    #[must_use]
    pub const fn new(tick: u32) -> Self {
        Self(tick)
    }

    /// Returns the raw tick value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns `true` unless this is the invalid sentinel.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Returns the following tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns this tick shifted by `delta`, clamped to [`Tick::START`].
    ///
    /// Shifting an invalid tick yields an invalid tick.
    #[must_use]
    pub fn offset(self, delta: i64) -> Self {
        if !self.is_valid() {
            return Self::INVALID;
        }
        let shifted = (i64::from(self.0) + delta).clamp(1, i64::from(u32::MAX));
        // Clamped into u32 range above.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let raw = shifted as u32;
        Self(raw)
    }

    /// Signed distance `self - other`.
    #[must_use]
    pub fn diff(self, other: Self) -> i64 {
        i64::from(self.0) - i64::from(other.0)
    }

    /// Writes this tick as a varint.
    pub fn encode(self, writer: &mut BitWriter) -> BitResult<()> {
        writer.write_varu32(self.0)
    }

    /// Reads a tick that may be the invalid sentinel.
    pub fn decode(reader: &mut BitReader<'_>) -> WireResult<Self> {
        Ok(Self(reader.read_varu32()?))
    }

    /// Reads a tick, rejecting the invalid sentinel.
    pub fn decode_valid(reader: &mut BitReader<'_>, field: &'static str) -> WireResult<Self> {
        let tick = Self::decode(reader)?;
        if !tick.is_valid() {
            return Err(DecodeError::InvalidTick { field });
        }
        Ok(tick)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            f.write_str("invalid")
        }
    }
}

impl From<u32> for Tick {
    fn from(tick: u32) -> Self {
        Self(tick)
    }
}

impl From<Tick> for u32 {
    fn from(tick: Tick) -> Self {
        tick.0
    }
}

/// A stable entity identifier.
///
/// Assigned monotonically by the authoritative side. `0` is reserved as
/// [`EntityId::INVALID`] and is used on the wire to mean "no entity".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntityId(u32);

impl EntityId {
    /// The reserved "no entity" id.
    pub const INVALID: Self = Self(0);

    /// Creates a new entity ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw entity ID value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Writes this id as a varint.
    pub fn encode(self, writer: &mut BitWriter) -> BitResult<()> {
        writer.write_varu32(self.0)
    }

    /// Reads an id, rejecting the invalid sentinel.
    pub fn decode(reader: &mut BitReader<'_>) -> WireResult<Self> {
        let id = Self(reader.read_varu32()?);
        if !id.is_valid() {
            return Err(DecodeError::InvalidEntityId);
        }
        Ok(id)
    }

    /// Writes an optional id, using the sentinel for `None`.
    pub fn encode_opt(id: Option<Self>, writer: &mut BitWriter) -> BitResult<()> {
        id.unwrap_or(Self::INVALID).encode(writer)
    }

    /// Reads an optional id written by [`EntityId::encode_opt`].
    pub fn decode_opt(reader: &mut BitReader<'_>) -> WireResult<Option<Self>> {
        let id = Self(reader.read_varu32()?);
        Ok(id.is_valid().then_some(id))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for EntityId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<EntityId> for u32 {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

/// Sequence number of a reliable event.
///
/// Sequence ids live in `1..=u16::MAX`; `0` is [`SequenceId::INVALID`] and
/// means "nothing received yet". The counter wraps from `u16::MAX` back to
/// `1`, so ordering is only meaningful between ids less than half the cycle
/// apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SequenceId(u16);

impl SequenceId {
    /// "Nothing received yet".
    pub const INVALID: Self = Self(0);

    /// The first id handed out.
    pub const START: Self = Self(1);

    /// Number of valid ids in one wrap cycle.
    const CYCLE: i32 = u16::MAX as i32;

    /// Wire width of an encoded id.
    pub const BITS: u8 = 16;

    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Returns the id after this one, skipping the sentinel on wrap.
    #[must_use]
    pub const fn next(self) -> Self {
        if self.0 == u16::MAX {
            Self(1)
        } else {
            Self(self.0 + 1)
        }
    }

    /// Signed wrapping distance `self - other` between two valid ids.
    ///
    /// Positive means `self` is newer.
    #[must_use]
    pub fn diff(self, other: Self) -> i32 {
        debug_assert!(self.is_valid() && other.is_valid(), "diff of invalid sequence id");
        let a = i32::from(self.0) - 1;
        let b = i32::from(other.0) - 1;
        let d = (a - b).rem_euclid(Self::CYCLE);
        if d > Self::CYCLE / 2 {
            d - Self::CYCLE
        } else {
            d
        }
    }

    /// Returns `true` if `self` is strictly newer than `other`.
    ///
    /// Every valid id is newer than the invalid sentinel.
    #[must_use]
    pub fn is_newer_than(self, other: Self) -> bool {
        match (self.is_valid(), other.is_valid()) {
            (true, true) => self.diff(other) > 0,
            (true, false) => true,
            (false, _) => false,
        }
    }

    pub fn encode(self, writer: &mut BitWriter) -> BitResult<()> {
        writer.write_bits(u64::from(self.0), Self::BITS)
    }

    pub fn decode(reader: &mut BitReader<'_>) -> WireResult<Self> {
        // Exactly 16 bits were read.
        #[allow(clippy::cast_possible_truncation)]
        let raw = reader.read_bits(Self::BITS)? as u16;
        Ok(Self(raw))
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_sentinel() {
        assert!(!Tick::INVALID.is_valid());
        assert!(Tick::START.is_valid());
        assert_eq!(Tick::default(), Tick::INVALID);
    }

    #[test]
    fn tick_ordering_and_diff() {
        let a = Tick::new(10);
        let b = Tick::new(14);
        assert!(a < b);
        assert_eq!(b.diff(a), 4);
        assert_eq!(a.diff(b), -4);
        assert_eq!(a.next(), Tick::new(11));
    }

    #[test]
    fn tick_offset_clamps_to_start() {
        assert_eq!(Tick::new(10).offset(-3), Tick::new(7));
        assert_eq!(Tick::new(2).offset(-6), Tick::START);
        assert_eq!(Tick::INVALID.offset(5), Tick::INVALID);
    }

    #[test]
    fn tick_display() {
        assert_eq!(Tick::new(5).to_string(), "5");
        assert_eq!(Tick::INVALID.to_string(), "invalid");
    }

    #[test]
    fn tick_decode_valid_rejects_sentinel() {
        let mut writer = BitWriter::new();
        Tick::INVALID.encode(&mut writer).unwrap();
        let bytes = writer.finish();
        let mut reader = BitReader::new(&bytes);
        assert_eq!(
            Tick::decode_valid(&mut reader, "sender_tick"),
            Err(DecodeError::InvalidTick {
                field: "sender_tick"
            })
        );
    }

    #[test]
    fn entity_id_optional_roundtrip() {
        let mut writer = BitWriter::new();
        EntityId::encode_opt(None, &mut writer).unwrap();
        EntityId::encode_opt(Some(EntityId::new(77)), &mut writer).unwrap();
        let bytes = writer.finish();
        let mut reader = BitReader::new(&bytes);
        assert_eq!(EntityId::decode_opt(&mut reader).unwrap(), None);
        assert_eq!(
            EntityId::decode_opt(&mut reader).unwrap(),
            Some(EntityId::new(77))
        );
    }

    #[test]
    fn entity_id_decode_rejects_zero() {
        let bytes = [0u8];
        let mut reader = BitReader::new(&bytes);
        assert_eq!(
            EntityId::decode(&mut reader),
            Err(DecodeError::InvalidEntityId)
        );
    }

    #[test]
    fn sequence_next_skips_sentinel() {
        assert_eq!(SequenceId::new(u16::MAX).next(), SequenceId::START);
        assert_eq!(SequenceId::new(5).next(), SequenceId::new(6));
    }

    #[test]
    fn sequence_diff_wraps() {
        let before_wrap = SequenceId::new(u16::MAX - 2);
        let after_wrap = SequenceId::new(3);
        assert_eq!(after_wrap.diff(before_wrap), 5);
        assert_eq!(before_wrap.diff(after_wrap), -5);
        assert!(after_wrap.is_newer_than(before_wrap));
        assert!(!before_wrap.is_newer_than(after_wrap));
    }

    #[test]
    fn sequence_newer_than_invalid() {
        assert!(SequenceId::START.is_newer_than(SequenceId::INVALID));
        assert!(!SequenceId::INVALID.is_newer_than(SequenceId::START));
        assert!(!SequenceId::new(9).is_newer_than(SequenceId::new(9)));
    }
}
