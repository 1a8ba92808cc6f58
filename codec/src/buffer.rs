//! Fixed-capacity history buffers.
//!
//! [`RollingBuffer`] is a plain ring that drops its oldest entry when full.
//! [`DejitterBuffer`] indexes entries by tick so out-of-order arrivals can be
//! read back in tick order.

use std::collections::VecDeque;

use wire::Tick;

/// A value stamped with the tick it belongs to.
pub trait Timed {
    fn tick(&self) -> Tick;
}

/// Ring buffer that overwrites its oldest entry when full.
#[derive(Debug, Clone)]
pub struct RollingBuffer<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> RollingBuffer<T> {
    /// Creates an empty buffer.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "rolling buffer capacity must be non-zero");
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends `value`, returning the evicted oldest entry when full.
    pub fn store(&mut self, value: T) -> Option<T> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(value);
        evicted
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn oldest(&self) -> Option<&T> {
        self.entries.front()
    }

    pub fn pop_oldest(&mut self) -> Option<T> {
        self.entries.pop_front()
    }

    /// Iterates oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.entries.iter()
    }

    /// Removes every entry, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.entries.drain(..)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Tick-indexed ring that absorbs jitter and reordering.
///
/// An entry lands in slot `(tick / divisor) % capacity`, so the buffer spans
/// `capacity` slot groups ending at the newest tick stored. A store is
/// rejected when the tick is invalid, falls outside that span, or its slot
/// already holds an equal or newer tick; the rejected value is handed back.
#[derive(Debug, Clone)]
pub struct DejitterBuffer<T> {
    slots: Vec<Option<T>>,
    divisor: u32,
    latest: Tick,
}

impl<T: Timed> DejitterBuffer<T> {
    /// Creates an empty buffer of `capacity` slots, one slot per `divisor`
    /// ticks.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` or `divisor` is zero.
    #[must_use]
    pub fn new(capacity: usize, divisor: u32) -> Self {
        assert!(capacity > 0, "dejitter capacity must be non-zero");
        assert!(divisor > 0, "dejitter divisor must be non-zero");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            divisor,
            latest: Tick::INVALID,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Highest tick ever stored.
    #[must_use]
    pub const fn latest_tick(&self) -> Tick {
        self.latest
    }

    fn slot_index(&self, tick: Tick) -> usize {
        (tick.raw() / self.divisor) as usize % self.slots.len()
    }

    /// Whether `tick` is too old to share the buffer with the newest tick.
    fn is_late(&self, tick: Tick) -> bool {
        if !self.latest.is_valid() {
            return false;
        }
        let span = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        let newest = self.latest.raw() / self.divisor;
        newest.saturating_sub(tick.raw() / self.divisor) >= span
    }

    /// Stores `value`, returning the older entry it displaced from its slot.
    pub fn store(&mut self, value: T) -> Result<Option<T>, T> {
        let tick = value.tick();
        if !tick.is_valid() || self.is_late(tick) {
            return Err(value);
        }
        let index = self.slot_index(tick);
        let slot = &mut self.slots[index];
        if slot.as_ref().is_some_and(|held| held.tick() >= tick) {
            return Err(value);
        }
        let displaced = slot.replace(value);
        if tick > self.latest {
            self.latest = tick;
        }
        Ok(displaced)
    }

    /// Entry with the greatest tick not after `tick`.
    pub fn latest_at(&self, tick: Tick) -> Option<&T> {
        self.slots
            .iter()
            .flatten()
            .filter(|entry| entry.tick() <= tick)
            .max_by_key(|entry| entry.tick())
    }

    /// Most recent entry.
    pub fn latest(&self) -> Option<&T> {
        self.slots.iter().flatten().max_by_key(|entry| entry.tick())
    }

    /// Entries with `from < tick <= to` in tick order, plus the first entry
    /// after `to`.
    pub fn range_and_next(&self, from: Tick, to: Tick) -> (Vec<&T>, Option<&T>) {
        let mut range: Vec<&T> = self
            .slots
            .iter()
            .flatten()
            .filter(|entry| entry.tick() > from && entry.tick() <= to)
            .collect();
        range.sort_by_key(|entry| entry.tick());
        let next = self
            .slots
            .iter()
            .flatten()
            .filter(|entry| entry.tick() > to)
            .min_by_key(|entry| entry.tick());
        (range, next)
    }

    /// Entries strictly after `tick`, in tick order.
    pub fn range_from(&self, tick: Tick) -> Vec<&T> {
        let mut range: Vec<&T> = self
            .slots
            .iter()
            .flatten()
            .filter(|entry| entry.tick() > tick)
            .collect();
        range.sort_by_key(|entry| entry.tick());
        range
    }

    /// Entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().flatten()
    }

    /// Empties the buffer, yielding every entry.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.latest = Tick::INVALID;
        self.slots.iter_mut().filter_map(Option::take)
    }

    pub fn clear(&mut self) {
        self.drain().for_each(drop);
    }
}
