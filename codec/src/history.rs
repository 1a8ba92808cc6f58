//! Per-entity record history used as the delta basis.

use wire::Tick;

use crate::buffer::{RollingBuffer, Timed};
use crate::pool::{Handle, Pool};
use crate::state::DynState;

/// Full copy of an entity's state at a tick.
#[derive(Debug, Clone)]
pub struct Record {
    tick: Tick,
    state: Box<dyn DynState>,
}

impl Record {
    #[must_use]
    pub fn new(tick: Tick, state: Box<dyn DynState>) -> Self {
        Self { tick, state }
    }

    #[must_use]
    pub fn state(&self) -> &dyn DynState {
        &*self.state
    }
}

impl Timed for Record {
    fn tick(&self) -> Tick {
        self.tick
    }
}

/// Ring of record handles for one entity, oldest first.
///
/// The records themselves live in a [`Pool`] shared by every entity of a
/// room; evicted records are returned to it.
#[derive(Debug)]
pub struct RecordHistory {
    handles: RollingBuffer<Handle<Record>>,
}

impl RecordHistory {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            handles: RollingBuffer::new(capacity),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stores a copy of `state` at `tick` unless it matches the latest record
    /// in both mutable and controller data. Returns whether a record was
    /// stored.
    pub fn store(&mut self, pool: &mut Pool<Record>, tick: Tick, state: &dyn DynState) -> bool {
        if let Some(latest) = self.latest(pool) {
            if latest.tick >= tick {
                return false;
            }
            let changed = !state.compare_mutable(latest.state()).is_empty()
                || state.controller_differs(latest.state());
            if !changed {
                return false;
            }
        }
        let handle = pool.insert(Record::new(tick, state.clone_state()));
        if let Some(evicted) = self.handles.store(handle) {
            pool.remove(evicted);
        }
        true
    }

    pub fn latest<'p>(&self, pool: &'p Pool<Record>) -> Option<&'p Record> {
        self.handles.latest().and_then(|handle| pool.get(*handle))
    }

    /// Records from the latest one at or before `acked` through the newest.
    ///
    /// Returns `None` when no record is at or before `acked` (the peer has
    /// nothing usable, or its basis has aged out of the history).
    pub fn basis<'p>(&self, pool: &'p Pool<Record>, acked: Tick) -> Option<Vec<&'p dyn DynState>> {
        if !acked.is_valid() {
            return None;
        }
        let records: Vec<&Record> = self
            .handles
            .iter()
            .filter_map(|handle| pool.get(*handle))
            .collect();
        let start = records.iter().rposition(|record| record.tick <= acked)?;
        Some(records[start..].iter().map(|record| record.state()).collect())
    }

    /// Returns every record to the pool.
    pub fn clear(&mut self, pool: &mut Pool<Record>) {
        for handle in self.handles.drain() {
            pool.remove(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::fixtures::Crate;

    fn crate_at(x: f32, boost: u8) -> Crate {
        Crate {
            x,
            boost,
            ..Crate::default()
        }
    }

    #[test]
    fn unchanged_state_is_not_stored() {
        let mut pool = Pool::new();
        let mut history = RecordHistory::new(4);
        assert!(history.store(&mut pool, Tick::new(1), &crate_at(1.0, 0)));
        assert!(!history.store(&mut pool, Tick::new(2), &crate_at(1.0, 0)));
        assert!(history.store(&mut pool, Tick::new(3), &crate_at(1.0, 1)));
        assert!(history.store(&mut pool, Tick::new(4), &crate_at(2.0, 1)));
        assert_eq!(history.len(), 3);
        assert_eq!(history.latest(&pool).unwrap().tick(), Tick::new(4));
    }

    #[test]
    fn eviction_frees_pool_slots() {
        let mut pool = Pool::new();
        let mut history = RecordHistory::new(2);
        for tick in 1..=5u32 {
            #[allow(clippy::cast_precision_loss)]
            let x = tick as f32;
            history.store(&mut pool, Tick::new(tick), &crate_at(x, 0));
        }
        assert_eq!(history.len(), 2);
        assert_eq!(pool.len(), 2);
        history.clear(&mut pool);
        assert!(pool.is_empty());
    }

    #[test]
    fn basis_window_starts_at_acked_record() {
        let mut pool = Pool::new();
        let mut history = RecordHistory::new(8);
        history.store(&mut pool, Tick::new(2), &crate_at(1.0, 0));
        history.store(&mut pool, Tick::new(4), &crate_at(2.0, 0));
        history.store(&mut pool, Tick::new(6), &crate_at(3.0, 0));

        assert!(history.basis(&pool, Tick::INVALID).is_none());
        assert!(history.basis(&pool, Tick::new(1)).is_none());
        assert_eq!(history.basis(&pool, Tick::new(5)).unwrap().len(), 2);
        assert_eq!(history.basis(&pool, Tick::new(6)).unwrap().len(), 1);
        assert_eq!(history.basis(&pool, Tick::new(2)).unwrap().len(), 3);
    }
}
