//! Entity deltas.
//!
//! A delta says "this entity, as of tick T, changed like this since the
//! basis the receiver acknowledged". Frozen deltas carry no state.
//!
//! Wire layout:
//!
//! ```text
//! [entity_id][is_frozen]
//!   if !is_frozen:
//!     [type_index][has_removed][removed_tick?][has_controller][has_immutable]
//!     [immutable?][mutable mask][mutable values][controller?][command_ack?]
//! ```
//!
//! The delta tick is the packet's sender tick and is not repeated per delta.

use bitstream::{BitReader, BitWriter};
use schema::FieldMask;
use wire::{EntityId, Tick};

use crate::buffer::Timed;
use crate::error::{CodecResult, TypeKind};
use crate::registry::{Registry, TypeIndex};
use crate::state::DynState;

/// Conditions that force a delta out even when no mutable field changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaOptions {
    /// Tick at which the entity stops existing on the receiver.
    pub removed_tick: Option<Tick>,
    /// Include immutable data (the receiver has never seen the entity).
    pub include_immutable: bool,
    /// Include controller data, acknowledging commands up to this tick.
    pub command_ack: Option<Tick>,
    /// Send every mutable field regardless of the basis.
    pub force_full: bool,
}

/// State carried by a non-frozen delta.
#[derive(Debug, Clone)]
pub struct DeltaPayload {
    type_index: TypeIndex,
    state: Box<dyn DynState>,
    mutable: FieldMask,
    removed_tick: Option<Tick>,
    has_immutable: bool,
    command_ack: Option<Tick>,
}

impl DeltaPayload {
    #[must_use]
    pub const fn type_index(&self) -> TypeIndex {
        self.type_index
    }

    #[must_use]
    pub fn state(&self) -> &dyn DynState {
        &*self.state
    }

    #[must_use]
    pub const fn mutable_mask(&self) -> FieldMask {
        self.mutable
    }

    #[must_use]
    pub const fn removed_tick(&self) -> Option<Tick> {
        self.removed_tick
    }

    #[must_use]
    pub const fn has_immutable(&self) -> bool {
        self.has_immutable
    }

    #[must_use]
    pub const fn has_controller(&self) -> bool {
        self.command_ack.is_some()
    }

    /// Latest client command tick the sender has applied. Present exactly when
    /// controller data is.
    #[must_use]
    pub const fn command_ack(&self) -> Option<Tick> {
        self.command_ack
    }
}

/// One entity's update within a server packet.
#[derive(Debug, Clone)]
pub struct Delta {
    entity: EntityId,
    tick: Tick,
    payload: Option<DeltaPayload>,
}

impl Delta {
    /// A delta telling the receiver to stop simulating `entity`.
    #[must_use]
    pub const fn frozen(entity: EntityId, tick: Tick) -> Self {
        Self {
            entity,
            tick,
            payload: None,
        }
    }

    /// Diffs `current` against every state in `basis` and ORs the masks, so a
    /// field that changed and changed back inside the window is still sent.
    ///
    /// `basis` of `None` means the receiver has no usable basis and every
    /// mutable field is sent. Returns `None` when nothing needs sending.
    pub fn build(
        entity: EntityId,
        tick: Tick,
        type_index: TypeIndex,
        current: &dyn DynState,
        basis: Option<&[&dyn DynState]>,
        options: DeltaOptions,
    ) -> Option<Self> {
        let mutable = match basis {
            Some(records) if !options.force_full => records
                .iter()
                .fold(FieldMask::EMPTY, |mask, record| {
                    mask | current.compare_mutable(*record)
                }),
            _ => current.full_mask(),
        };
        let forced = options.removed_tick.is_some()
            || options.include_immutable
            || options.command_ack.is_some()
            || options.force_full;
        if mutable.is_empty() && !forced {
            return None;
        }
        Some(Self {
            entity,
            tick,
            payload: Some(DeltaPayload {
                type_index,
                state: current.clone_state(),
                mutable,
                removed_tick: options.removed_tick,
                has_immutable: options.include_immutable,
                command_ack: options.command_ack,
            }),
        })
    }

    #[must_use]
    pub const fn entity(&self) -> EntityId {
        self.entity
    }

    #[must_use]
    pub const fn is_frozen(&self) -> bool {
        self.payload.is_none()
    }

    #[must_use]
    pub const fn payload(&self) -> Option<&DeltaPayload> {
        self.payload.as_ref()
    }

    #[must_use]
    pub fn removed_tick(&self) -> Option<Tick> {
        self.payload.as_ref().and_then(DeltaPayload::removed_tick)
    }

    /// Applies the carried categories to `target`. Frozen deltas do nothing.
    /// Applying the same delta twice has the same effect as applying it once.
    pub fn apply_to(&self, target: &mut dyn DynState) {
        let Some(payload) = &self.payload else {
            return;
        };
        if payload.has_immutable {
            target.apply_immutable_from(payload.state());
        }
        target.apply_mutable_from(payload.state(), payload.mutable);
        if payload.has_controller() {
            target.apply_controller_from(payload.state());
        }
    }

    pub fn encode(&self, writer: &mut BitWriter) -> CodecResult<()> {
        self.entity.encode(writer)?;
        writer.write_bool(self.payload.is_none());
        let Some(payload) = &self.payload else {
            return Ok(());
        };
        payload.type_index.encode(writer)?;
        writer.write_bool(payload.removed_tick.is_some());
        if let Some(removed) = payload.removed_tick {
            removed.encode(writer)?;
        }
        writer.write_bool(payload.command_ack.is_some());
        writer.write_bool(payload.has_immutable);
        if payload.has_immutable {
            payload.state.encode_immutable(writer)?;
        }
        payload.state.encode_mutable(payload.mutable, writer)?;
        if let Some(ack) = payload.command_ack {
            payload.state.encode_controller(writer)?;
            ack.encode(writer)?;
        }
        Ok(())
    }

    /// Decodes one delta sent at `tick`.
    pub fn decode(reader: &mut BitReader<'_>, tick: Tick, registry: &Registry) -> CodecResult<Self> {
        let entity = EntityId::decode(reader)?;
        if reader.read_bool()? {
            return Ok(Self::frozen(entity, tick));
        }
        let type_index = TypeIndex::decode(reader, registry, TypeKind::State)?;
        let mut state = registry.create_state(type_index)?;
        let removed_tick = if reader.read_bool()? {
            Some(Tick::decode_valid(reader, "removed_tick")?)
        } else {
            None
        };
        let has_controller = reader.read_bool()?;
        let has_immutable = reader.read_bool()?;
        if has_immutable {
            state.decode_immutable(reader)?;
        }
        let mutable = state.decode_mutable(reader)?;
        let command_ack = if has_controller {
            state.decode_controller(reader)?;
            Some(Tick::decode(reader)?)
        } else {
            None
        };
        Ok(Self {
            entity,
            tick,
            payload: Some(DeltaPayload {
                type_index,
                state,
                mutable,
                removed_tick,
                has_immutable,
                command_ack,
            }),
        })
    }
}

impl Timed for Delta {
    fn tick(&self) -> Tick {
        self.tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::fixtures::{Beacon, Crate, Lamp};

    fn registry() -> Registry {
        Registry::new().with_state::<Crate>().with_state::<Lamp>()
    }

    fn sample() -> Crate {
        Crate {
            kind: 4,
            x: 1.5,
            y: -2.0,
            hp: 80,
            boost: 3,
        }
    }

    fn roundtrip(delta: &Delta) -> Delta {
        let mut writer = BitWriter::new();
        delta.encode(&mut writer).unwrap();
        let bytes = writer.finish();
        let mut reader = BitReader::new(&bytes);
        let decoded = Delta::decode(&mut reader, delta.tick(), &registry()).unwrap();
        reader.finish().unwrap();
        decoded
    }

    #[test]
    fn no_basis_sends_every_field() {
        let delta = Delta::build(
            EntityId::new(1),
            Tick::new(5),
            TypeIndex::new(0),
            &sample(),
            None,
            DeltaOptions::default(),
        )
        .unwrap();
        assert_eq!(delta.payload().unwrap().mutable_mask(), FieldMask::full(3));
    }

    #[test]
    fn unchanged_without_forcing_yields_nothing() {
        let state = sample();
        let basis: [&dyn DynState; 1] = [&state];
        assert!(Delta::build(
            EntityId::new(1),
            Tick::new(5),
            TypeIndex::new(0),
            &state,
            Some(&basis[..]),
            DeltaOptions::default(),
        )
        .is_none());

        let forced = Delta::build(
            EntityId::new(1),
            Tick::new(5),
            TypeIndex::new(0),
            &state,
            Some(&basis[..]),
            DeltaOptions {
                command_ack: Some(Tick::new(4)),
                ..DeltaOptions::default()
            },
        )
        .unwrap();
        assert!(forced.payload().unwrap().mutable_mask().is_empty());
        assert!(forced.payload().unwrap().has_controller());
    }

    #[test]
    fn forced_full_resend_goes_out_without_mutable_fields() {
        let state = Beacon { channel: 3 };
        let basis: [&dyn DynState; 1] = [&state];
        let delta = Delta::build(
            EntityId::new(2),
            Tick::new(8),
            TypeIndex::new(0),
            &state,
            Some(&basis[..]),
            DeltaOptions {
                force_full: true,
                ..DeltaOptions::default()
            },
        )
        .unwrap();
        assert!(!delta.is_frozen());
        assert!(delta.payload().unwrap().mutable_mask().is_empty());
    }

    #[test]
    fn flicker_inside_window_is_reported() {
        let acked = sample();
        let flicker = Crate { hp: 10, ..sample() };
        let current = sample();
        let window: [&dyn DynState; 2] = [&acked, &flicker];
        let delta = Delta::build(
            EntityId::new(1),
            Tick::new(9),
            TypeIndex::new(0),
            &current,
            Some(&window[..]),
            DeltaOptions::default(),
        )
        .unwrap();
        assert_eq!(
            delta.payload().unwrap().mutable_mask().iter().collect::<Vec<_>>(),
            vec![2]
        );
    }

    #[test]
    fn roundtrip_all_flag_combinations() {
        let state = sample();
        for bits in 0..16u8 {
            let options = DeltaOptions {
                removed_tick: (bits & 1 != 0).then_some(Tick::new(12)),
                include_immutable: bits & 2 != 0,
                command_ack: (bits & 4 != 0).then_some(Tick::new(7)),
                force_full: bits & 8 != 0,
            };
            let delta = Delta::build(
                EntityId::new(3),
                Tick::new(11),
                TypeIndex::new(0),
                &state,
                None,
                options,
            )
            .unwrap();
            let decoded = roundtrip(&delta);
            let payload = decoded.payload().unwrap();
            assert_eq!(decoded.entity(), EntityId::new(3));
            assert_eq!(payload.removed_tick(), options.removed_tick);
            assert_eq!(payload.has_immutable(), options.include_immutable);
            assert_eq!(payload.command_ack(), options.command_ack);
            assert_eq!(payload.mutable_mask(), FieldMask::full(3));

            let mut target = Crate::default();
            decoded.apply_to(&mut target);
            assert_eq!(target.x, state.x);
            assert_eq!(target.hp, state.hp);
            assert_eq!(target.kind, if options.include_immutable { 4 } else { 0 });
            assert_eq!(target.boost, if options.command_ack.is_some() { 3 } else { 0 });
        }
    }

    #[test]
    fn frozen_roundtrip() {
        let decoded = roundtrip(&Delta::frozen(EntityId::new(8), Tick::new(2)));
        assert!(decoded.is_frozen());
        assert_eq!(decoded.entity(), EntityId::new(8));
        assert_eq!(decoded.tick(), Tick::new(2));

        let mut target = sample();
        decoded.apply_to(&mut target);
        assert_eq!(target, sample());
    }

    #[test]
    fn apply_is_idempotent() {
        let basis = Crate::default();
        let current = Crate { y: 4.25, ..Crate::default() };
        let window: [&dyn DynState; 1] = [&basis];
        let delta = Delta::build(
            EntityId::new(1),
            Tick::new(3),
            TypeIndex::new(0),
            &current,
            Some(&window[..]),
            DeltaOptions::default(),
        )
        .unwrap();
        let mut once = Crate { hp: 5, ..Crate::default() };
        delta.apply_to(&mut once);
        let mut twice = once.clone();
        delta.apply_to(&mut twice);
        assert_eq!(once, twice);
        assert_eq!(once.hp, 5);
        assert_eq!(once.y, 4.25);
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let mut writer = BitWriter::new();
        EntityId::new(1).encode(&mut writer).unwrap();
        writer.write_bool(false);
        TypeIndex::new(9).encode(&mut writer).unwrap();
        let bytes = writer.finish();
        assert!(Delta::decode(&mut BitReader::new(&bytes), Tick::new(1), &registry()).is_err());
    }
}
