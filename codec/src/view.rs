//! What a peer knows about each entity.

use std::collections::HashMap;

use bitstream::{BitReader, BitWriter};
use wire::{EntityId, Tick};

use crate::error::CodecResult;

/// Last tick received for one entity and whether it was frozen at that tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewEntry {
    pub entity: EntityId,
    pub tick: Tick,
    pub frozen: bool,
}

impl ViewEntry {
    pub fn encode(&self, writer: &mut BitWriter) -> CodecResult<()> {
        self.entity.encode(writer)?;
        self.tick.encode(writer)?;
        writer.write_bool(self.frozen);
        Ok(())
    }

    pub fn decode(reader: &mut BitReader<'_>) -> CodecResult<Self> {
        Ok(Self {
            entity: EntityId::decode(reader)?,
            tick: Tick::decode_valid(reader, "view_tick")?,
            frozen: reader.read_bool()?,
        })
    }
}

/// Table of [`ViewEntry`] by entity.
///
/// Clients fill it from received deltas and report it back; servers fill it
/// from those reports and use it as each entity's acknowledged basis.
#[derive(Debug, Clone, Default)]
pub struct View {
    entries: HashMap<EntityId, (Tick, bool)>,
}

impl View {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records `entry` if it is newer than what is held. Returns whether the
    /// view changed.
    pub fn record(&mut self, entry: ViewEntry) -> bool {
        match self.entries.get(&entry.entity) {
            Some((tick, _)) if *tick >= entry.tick => false,
            _ => {
                self.entries.insert(entry.entity, (entry.tick, entry.frozen));
                true
            }
        }
    }

    pub fn get(&self, entity: EntityId) -> Option<ViewEntry> {
        self.entries
            .get(&entity)
            .map(|(tick, frozen)| ViewEntry {
                entity,
                tick: *tick,
                frozen: *frozen,
            })
    }

    /// Last tick received for `entity`, or [`Tick::INVALID`].
    pub fn latest_tick(&self, entity: EntityId) -> Tick {
        self.entries
            .get(&entity)
            .map_or(Tick::INVALID, |(tick, _)| *tick)
    }

    pub fn is_frozen(&self, entity: EntityId) -> bool {
        self.entries.get(&entity).is_some_and(|(_, frozen)| *frozen)
    }

    pub fn remove(&mut self, entity: EntityId) -> Option<ViewEntry> {
        self.entries
            .remove(&entity)
            .map(|(tick, frozen)| ViewEntry {
                entity,
                tick,
                frozen,
            })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries sorted newest first, ties by entity id.
    pub fn by_recency(&self) -> Vec<ViewEntry> {
        let mut entries: Vec<ViewEntry> = self
            .entries
            .iter()
            .map(|(entity, (tick, frozen))| ViewEntry {
                entity: *entity,
                tick: *tick,
                frozen: *frozen,
            })
            .collect();
        entries.sort_by(|a, b| b.tick.cmp(&a.tick).then(a.entity.cmp(&b.entity)));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(entity: u32, tick: u32, frozen: bool) -> ViewEntry {
        ViewEntry {
            entity: EntityId::new(entity),
            tick: Tick::new(tick),
            frozen,
        }
    }

    #[test]
    fn only_newer_ticks_replace() {
        let mut view = View::new();
        assert!(view.record(entry(1, 5, false)));
        assert!(!view.record(entry(1, 4, true)));
        assert!(!view.record(entry(1, 5, true)));
        assert!(view.record(entry(1, 6, true)));
        assert!(view.is_frozen(EntityId::new(1)));
        assert_eq!(view.latest_tick(EntityId::new(1)), Tick::new(6));
        assert_eq!(view.latest_tick(EntityId::new(2)), Tick::INVALID);
    }

    #[test]
    fn recency_order() {
        let mut view = View::new();
        view.record(entry(3, 2, false));
        view.record(entry(1, 9, false));
        view.record(entry(2, 9, true));
        let order: Vec<_> = view.by_recency().iter().map(|e| e.entity.raw()).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn entry_roundtrip() {
        let original = entry(12, 300, true);
        let mut writer = BitWriter::new();
        original.encode(&mut writer).unwrap();
        let bytes = writer.finish();
        let mut reader = BitReader::new(&bytes);
        assert_eq!(ViewEntry::decode(&mut reader).unwrap(), original);
        reader.finish().unwrap();
    }
}
